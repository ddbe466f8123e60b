pub mod algorithms;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod invariants;
pub mod memory;
pub mod models;
pub mod operations;
pub mod permissions;
pub mod store;

pub mod prelude {
    pub use crate::algorithms::{
        build_tree, plan_manager_assignment, plan_manager_update, plan_promotion,
        reparent_reports,
    };
    #[cfg(feature = "api")]
    pub use crate::api::{AppError, HasPool, OrgChartApp};
    pub use crate::config::OrgChartConfig;
    #[cfg(feature = "sqlx")]
    pub use crate::db::{PgStore, create_orgchart_tables};
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::invariants::{HierarchyIndex, ensure_hierarchy_invariants, hierarchy_violations};
    pub use crate::memory::MemoryStore;
    pub use crate::models::{
        AssignManagerPayload, CreateEmployeePayload, CreateOrganizationPayload, Employee,
        EmployeeId, EmployeeWithReports, HierarchyReport, HierarchyViolation,
        ListOrganizationsQuery, ManagerChange, Organization, OrganizationId, OrganizationSummary,
        Paged, UpdateEmployeePayload, UpdateOrganizationPayload,
    };
    pub use crate::operations::{OrgOperation, OrgOperationResult, OrgOperations};
    pub use crate::permissions::{AllowAll, OrgAction, PermissionGate, RoleGate};
    pub use crate::store::{RecordStore, StoreTransaction};
}

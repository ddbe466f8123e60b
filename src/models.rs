use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, LibError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct OrganizationId(pub Uuid);

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrganizationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for OrganizationId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct EmployeeId(pub Uuid);

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EmployeeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for EmployeeId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSummary {
    pub id: OrganizationId,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub employee_count: i64,
}

/// A member of an organization. `manager_id == None` marks the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: EmployeeId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub title: String,
    pub manager_id: Option<EmployeeId>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Employee {
    pub const fn is_root(&self) -> bool {
        self.manager_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeWithReports {
    #[serde(flatten)]
    pub employee: Employee,
    pub direct_reports: Vec<EmployeeWithReports>,
}

impl EmployeeWithReports {
    /// Number of employees in this subtree, including the node itself.
    pub fn size(&self) -> usize {
        let mut total = 0usize;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            total += 1;
            stack.extend(node.direct_reports.iter());
        }
        total
    }
}

/// One `manager_id` write, applied in plan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerChange {
    pub employee_id: EmployeeId,
    pub manager_id: Option<EmployeeId>,
}

impl ManagerChange {
    pub const fn new(employee_id: EmployeeId, manager_id: Option<EmployeeId>) -> Self {
        Self {
            employee_id,
            manager_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HierarchyViolation {
    CrossOrganizationReference {
        employee_id: EmployeeId,
        organization_id: OrganizationId,
        expected_organization_id: OrganizationId,
    },
    SelfReference {
        employee_id: EmployeeId,
    },
    CycleDetected {
        manager_id: EmployeeId,
        employee_id: EmployeeId,
    },
    RootProtected {
        root_id: EmployeeId,
    },
    RootAlreadyAssigned {
        root_id: EmployeeId,
    },
    MissingRoot {
        organization_id: OrganizationId,
    },
    MultipleRoots {
        root_ids: Vec<EmployeeId>,
    },
    UnknownManagerReference {
        employee_id: EmployeeId,
        manager_id: EmployeeId,
    },
    DisconnectedEmployees {
        employee_ids: Vec<EmployeeId>,
    },
}

impl HierarchyViolation {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            HierarchyViolation::CrossOrganizationReference { .. }
            | HierarchyViolation::SelfReference { .. }
            | HierarchyViolation::CycleDetected { .. }
            | HierarchyViolation::RootAlreadyAssigned { .. } => ErrorKind::InvalidInput,
            HierarchyViolation::RootProtected { .. } => ErrorKind::Forbidden,
            HierarchyViolation::MissingRoot { .. }
            | HierarchyViolation::MultipleRoots { .. }
            | HierarchyViolation::UnknownManagerReference { .. }
            | HierarchyViolation::DisconnectedEmployees { .. } => ErrorKind::Integrity,
        }
    }

    pub const fn error_code(&self) -> &'static str {
        match self {
            HierarchyViolation::CrossOrganizationReference { .. } => {
                "org_cross_organization_reference"
            }
            HierarchyViolation::SelfReference { .. } => "org_self_reference",
            HierarchyViolation::CycleDetected { .. } => "org_cycle_violation",
            HierarchyViolation::RootProtected { .. } => "org_root_protected",
            HierarchyViolation::RootAlreadyAssigned { .. } => "org_root_already_assigned",
            HierarchyViolation::MissingRoot { .. } => "org_missing_root",
            HierarchyViolation::MultipleRoots { .. } => "org_multiple_roots",
            HierarchyViolation::UnknownManagerReference { .. } => "org_unknown_manager_reference",
            HierarchyViolation::DisconnectedEmployees { .. } => "org_disconnected_employees",
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            HierarchyViolation::CrossOrganizationReference { .. } => {
                "Employee does not belong to this organization"
            }
            HierarchyViolation::SelfReference { .. } => "An employee cannot be their own manager",
            HierarchyViolation::CycleDetected { .. } => {
                "Manager assignment would create a reporting cycle"
            }
            HierarchyViolation::RootProtected { .. } => {
                "The organization root can only be changed through promotion"
            }
            HierarchyViolation::RootAlreadyAssigned { .. } => {
                "Organization already has a root employee; a manager is required"
            }
            HierarchyViolation::MissingRoot { .. } => "Organization has employees but no root",
            HierarchyViolation::MultipleRoots { .. } => "Organization has more than one root",
            HierarchyViolation::UnknownManagerReference { .. } => {
                "Employee references a manager outside the organization"
            }
            HierarchyViolation::DisconnectedEmployees { .. } => {
                "Employees are not connected to the organization root"
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyReport {
    pub organization_id: OrganizationId,
    pub employee_count: usize,
    pub valid: bool,
    pub violations: Vec<HierarchyViolation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub page: u32,
    pub limit: u32,
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrganizationPayload {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrganizationPayload {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmployeePayload {
    pub name: String,
    pub title: String,
    pub manager_id: Option<EmployeeId>,
}

/// Replaces name and title. An absent `manager_id` keeps the current manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEmployeePayload {
    pub name: String,
    pub title: String,
    pub manager_id: Option<EmployeeId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignManagerPayload {
    pub subordinate_ids: Vec<EmployeeId>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListOrganizationsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Validated employee fields ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeDraft {
    pub name: String,
    pub title: String,
    pub manager_id: Option<EmployeeId>,
}

impl ListOrganizationsQuery {
    pub fn pagination(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(25).clamp(1, 200);
        (page, limit)
    }
}

impl CreateOrganizationPayload {
    pub fn normalize(self) -> Result<String> {
        normalize_organization_name(self.name)
    }
}

impl UpdateOrganizationPayload {
    pub fn normalize(self) -> Result<String> {
        normalize_organization_name(self.name)
    }
}

impl CreateEmployeePayload {
    pub fn normalize(self) -> Result<EmployeeDraft> {
        normalize_employee(self.name, self.title, self.manager_id)
    }
}

impl UpdateEmployeePayload {
    pub fn normalize(self) -> Result<EmployeeDraft> {
        normalize_employee(self.name, self.title, self.manager_id)
    }
}

impl AssignManagerPayload {
    /// Collapses repeated ids, keeping the first occurrence.
    pub fn normalize(self) -> Vec<EmployeeId> {
        let mut seen = std::collections::HashSet::with_capacity(self.subordinate_ids.len());
        self.subordinate_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

fn normalize_organization_name(name: String) -> Result<String> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(LibError::invalid(
            "Organization name is required",
            anyhow!("empty organization name"),
        ));
    }
    Ok(name)
}

fn normalize_employee(
    name: String,
    title: String,
    manager_id: Option<EmployeeId>,
) -> Result<EmployeeDraft> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(LibError::invalid(
            "Employee name is required",
            anyhow!("empty employee name"),
        ));
    }

    let title = title.trim().to_string();
    if title.is_empty() {
        return Err(LibError::invalid(
            "Employee title is required",
            anyhow!("employee {} had empty title", name),
        ));
    }

    Ok(EmployeeDraft {
        name,
        title,
        manager_id,
    })
}

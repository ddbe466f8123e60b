use anyhow::anyhow;

use crate::error::{LibError, Result};

/// Can read organizations, employees and trees.
pub const ORGCHART_ROLE_READ: &str = "orgchart_read";
/// Can create and rename organizations.
pub const ORGCHART_ROLE_MANAGE_ORGANIZATIONS: &str = "orgchart_manage_organizations";
/// Can delete organizations together with their employees.
pub const ORGCHART_ROLE_DELETE_ORGANIZATIONS: &str = "orgchart_delete_organizations";
/// Can create, update and delete employees.
pub const ORGCHART_ROLE_MANAGE_EMPLOYEES: &str = "orgchart_manage_employees";
/// Can promote a new root and bulk reassign reports.
pub const ORGCHART_ROLE_RESTRUCTURE: &str = "orgchart_restructure";

pub const ALL_ORGCHART_PERMISSION_ROLES: &[&str] = &[
    ORGCHART_ROLE_READ,
    ORGCHART_ROLE_MANAGE_ORGANIZATIONS,
    ORGCHART_ROLE_DELETE_ORGANIZATIONS,
    ORGCHART_ROLE_MANAGE_EMPLOYEES,
    ORGCHART_ROLE_RESTRUCTURE,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrgAction {
    Read,
    CreateOrganization,
    UpdateOrganization,
    DeleteOrganization,
    CreateEmployee,
    UpdateEmployee,
    DeleteEmployee,
    Promote,
    AssignManager,
}

impl OrgAction {
    pub const fn required_role(self) -> &'static str {
        match self {
            OrgAction::Read => ORGCHART_ROLE_READ,
            OrgAction::CreateOrganization | OrgAction::UpdateOrganization => {
                ORGCHART_ROLE_MANAGE_ORGANIZATIONS
            }
            OrgAction::DeleteOrganization => ORGCHART_ROLE_DELETE_ORGANIZATIONS,
            OrgAction::CreateEmployee | OrgAction::UpdateEmployee | OrgAction::DeleteEmployee => {
                ORGCHART_ROLE_MANAGE_EMPLOYEES
            }
            OrgAction::Promote | OrgAction::AssignManager => ORGCHART_ROLE_RESTRUCTURE,
        }
    }
}

pub fn is_orgchart_permission_role(role_name: &str) -> bool {
    ALL_ORGCHART_PERMISSION_ROLES
        .iter()
        .any(|known| *known == role_name)
}

/// Consulted before every operation. Authorization policy is not enforced
/// by this crate; [`AllowAll`] is the default.
pub trait PermissionGate: Send + Sync {
    fn authorize(&self, action: OrgAction) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionGate for AllowAll {
    fn authorize(&self, _action: OrgAction) -> Result<()> {
        Ok(())
    }
}

/// Grants only the actions whose role is in the list.
#[derive(Debug, Clone, Default)]
pub struct RoleGate {
    roles: Vec<String>,
}

impl RoleGate {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles
                .into_iter()
                .map(Into::into)
                .filter(|role: &String| is_orgchart_permission_role(role))
                .collect(),
        }
    }
}

impl PermissionGate for RoleGate {
    fn authorize(&self, action: OrgAction) -> Result<()> {
        let required = action.required_role();
        if self.roles.iter().any(|role| role == required) {
            Ok(())
        } else {
            Err(LibError::forbidden(
                "You do not have permission to perform this action",
                anyhow!("action {:?} requires role {}", action, required),
            ))
        }
    }
}

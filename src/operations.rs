use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::algorithms;
use crate::error::{ErrorKind, LibError, Result};
use crate::invariants::{self, HierarchyIndex};
use crate::models::{
    AssignManagerPayload, CreateEmployeePayload, CreateOrganizationPayload, Employee, EmployeeId,
    EmployeeWithReports, HierarchyReport, HierarchyViolation, ListOrganizationsQuery,
    ManagerChange, Organization, OrganizationId, OrganizationSummary, Paged,
    UpdateEmployeePayload, UpdateOrganizationPayload,
};
use crate::permissions::{AllowAll, OrgAction, PermissionGate};
use crate::store::{RecordStore, StoreTransaction};

/// Tool-friendly org chart actions.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum OrgOperation {
    CreateOrganization {
        payload: CreateOrganizationPayload,
    },
    UpdateOrganization {
        organization_id: OrganizationId,
        payload: UpdateOrganizationPayload,
    },
    DeleteOrganization {
        organization_id: OrganizationId,
    },
    GetOrganization {
        organization_id: OrganizationId,
    },
    ListOrganizations {
        #[serde(default)]
        query: ListOrganizationsQuery,
    },
    CheckHierarchy {
        organization_id: OrganizationId,
    },
    GetTree {
        organization_id: OrganizationId,
    },
    CreateEmployee {
        organization_id: OrganizationId,
        payload: CreateEmployeePayload,
    },
    UpdateEmployee {
        organization_id: OrganizationId,
        employee_id: EmployeeId,
        payload: UpdateEmployeePayload,
    },
    DeleteEmployee {
        organization_id: OrganizationId,
        employee_id: EmployeeId,
    },
    GetEmployee {
        organization_id: OrganizationId,
        employee_id: EmployeeId,
    },
    ListEmployees {
        organization_id: OrganizationId,
    },
    DirectReports {
        organization_id: OrganizationId,
        employee_id: EmployeeId,
    },
    ReportingChain {
        organization_id: OrganizationId,
        employee_id: EmployeeId,
    },
    Promote {
        organization_id: OrganizationId,
        employee_id: EmployeeId,
    },
    AssignManager {
        organization_id: OrganizationId,
        manager_id: EmployeeId,
        payload: AssignManagerPayload,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OrgOperationResult {
    Organization {
        organization: Organization,
    },
    OrganizationsPage {
        page: u32,
        limit: u32,
        items: Vec<OrganizationSummary>,
    },
    Employee {
        employee: Employee,
    },
    Employees {
        employees: Vec<Employee>,
    },
    Tree {
        tree: Option<EmployeeWithReports>,
    },
    Hierarchy {
        report: HierarchyReport,
    },
    EmployeeDeleted {
        reparented_reports: usize,
    },
    Deleted,
}

/// Entry point for every org chart read and mutation. Each call runs in a
/// single store transaction.
pub struct OrgOperations<S> {
    store: Arc<S>,
    gate: Arc<dyn PermissionGate>,
}

impl<S> Clone for OrgOperations<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<S: RecordStore> OrgOperations<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            gate: Arc::new(AllowAll),
        }
    }

    pub fn with_gate<G>(mut self, gate: G) -> Self
    where
        G: PermissionGate + 'static,
    {
        self.gate = Arc::new(gate);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn execute(&self, operation: OrgOperation) -> Result<OrgOperationResult> {
        match operation {
            OrgOperation::CreateOrganization { payload } => {
                let organization = self.create_organization(payload).await?;
                Ok(OrgOperationResult::Organization { organization })
            }
            OrgOperation::UpdateOrganization {
                organization_id,
                payload,
            } => {
                let organization = self.update_organization(organization_id, payload).await?;
                Ok(OrgOperationResult::Organization { organization })
            }
            OrgOperation::DeleteOrganization { organization_id } => {
                self.delete_organization(organization_id).await?;
                Ok(OrgOperationResult::Deleted)
            }
            OrgOperation::GetOrganization { organization_id } => {
                let organization = self.get_organization(organization_id).await?;
                Ok(OrgOperationResult::Organization { organization })
            }
            OrgOperation::ListOrganizations { query } => {
                let page = self.list_organizations(query).await?;
                Ok(OrgOperationResult::OrganizationsPage {
                    page: page.page,
                    limit: page.limit,
                    items: page.items,
                })
            }
            OrgOperation::CheckHierarchy { organization_id } => {
                let report = self.check_hierarchy(organization_id).await?;
                Ok(OrgOperationResult::Hierarchy { report })
            }
            OrgOperation::GetTree { organization_id } => {
                let tree = self.org_tree(organization_id).await?;
                Ok(OrgOperationResult::Tree { tree })
            }
            OrgOperation::CreateEmployee {
                organization_id,
                payload,
            } => {
                let employee = self.create_employee(organization_id, payload).await?;
                Ok(OrgOperationResult::Employee { employee })
            }
            OrgOperation::UpdateEmployee {
                organization_id,
                employee_id,
                payload,
            } => {
                let employee = self
                    .update_employee(organization_id, employee_id, payload)
                    .await?;
                Ok(OrgOperationResult::Employee { employee })
            }
            OrgOperation::DeleteEmployee {
                organization_id,
                employee_id,
            } => {
                let reparented_reports = self.delete_employee(organization_id, employee_id).await?;
                Ok(OrgOperationResult::EmployeeDeleted { reparented_reports })
            }
            OrgOperation::GetEmployee {
                organization_id,
                employee_id,
            } => {
                let employee = self.get_employee(organization_id, employee_id).await?;
                Ok(OrgOperationResult::Employee { employee })
            }
            OrgOperation::ListEmployees { organization_id } => {
                let employees = self.list_employees(organization_id).await?;
                Ok(OrgOperationResult::Employees { employees })
            }
            OrgOperation::DirectReports {
                organization_id,
                employee_id,
            } => {
                let employees = self.direct_reports(organization_id, employee_id).await?;
                Ok(OrgOperationResult::Employees { employees })
            }
            OrgOperation::ReportingChain {
                organization_id,
                employee_id,
            } => {
                let employees = self.reporting_chain(organization_id, employee_id).await?;
                Ok(OrgOperationResult::Employees { employees })
            }
            OrgOperation::Promote {
                organization_id,
                employee_id,
            } => {
                let employee = self.promote(organization_id, employee_id).await?;
                Ok(OrgOperationResult::Employee { employee })
            }
            OrgOperation::AssignManager {
                organization_id,
                manager_id,
                payload,
            } => {
                let employee = self
                    .assign_manager(organization_id, manager_id, payload)
                    .await?;
                Ok(OrgOperationResult::Employee { employee })
            }
        }
    }

    pub async fn create_organization(
        &self,
        payload: CreateOrganizationPayload,
    ) -> Result<Organization> {
        self.gate.authorize(OrgAction::CreateOrganization)?;
        let name = payload.normalize()?;

        let mut tx = self.store.begin().await?;
        let organization = tx.insert_organization(&name).await?;
        tx.commit().await?;

        tracing::info!(organization_id = %organization.id, "created organization");
        Ok(organization)
    }

    pub async fn update_organization(
        &self,
        organization_id: OrganizationId,
        payload: UpdateOrganizationPayload,
    ) -> Result<Organization> {
        self.gate.authorize(OrgAction::UpdateOrganization)?;
        let name = payload.normalize()?;

        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        let organization = tx.rename_organization(organization_id, &name).await?;
        tx.commit().await?;
        Ok(organization)
    }

    /// Removes the organization and every employee in the same transaction.
    pub async fn delete_organization(&self, organization_id: OrganizationId) -> Result<()> {
        self.gate.authorize(OrgAction::DeleteOrganization)?;

        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        let employee_count = tx.list_by_organization(organization_id).await?.len();
        tx.delete_organization(organization_id).await?;
        tx.commit().await?;

        tracing::info!(
            organization_id = %organization_id,
            removed_employees = employee_count,
            "deleted organization"
        );
        Ok(())
    }

    pub async fn get_organization(&self, organization_id: OrganizationId) -> Result<Organization> {
        self.gate.authorize(OrgAction::Read)?;
        let mut tx = self.store.begin().await?;
        let organization = require_organization(&mut tx, organization_id).await?;
        Ok(organization)
    }

    pub async fn list_organizations(
        &self,
        query: ListOrganizationsQuery,
    ) -> Result<Paged<OrganizationSummary>> {
        self.gate.authorize(OrgAction::Read)?;
        let (page, limit) = query.pagination();
        let mut tx = self.store.begin().await?;
        let items = tx.list_organizations(page, limit).await?;
        Ok(Paged { page, limit, items })
    }

    /// Audits stored data against every hierarchy invariant without
    /// changing it.
    pub async fn check_hierarchy(&self, organization_id: OrganizationId) -> Result<HierarchyReport> {
        self.gate.authorize(OrgAction::Read)?;
        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        let employees = tx.list_by_organization(organization_id).await?;
        let violations = invariants::hierarchy_violations(organization_id, &employees);
        if !violations.is_empty() {
            tracing::warn!(
                organization_id = %organization_id,
                violations = ?violations,
                "hierarchy audit found violations"
            );
        }

        Ok(HierarchyReport {
            organization_id,
            employee_count: employees.len(),
            valid: violations.is_empty(),
            violations,
        })
    }

    pub async fn org_tree(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<EmployeeWithReports>> {
        self.gate.authorize(OrgAction::Read)?;
        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        let employees = tx.list_by_organization(organization_id).await?;
        let index = HierarchyIndex::new(organization_id, &employees);
        let Some(root) = index.root().inspect_err(report_integrity_fault)? else {
            return Ok(None);
        };
        Ok(algorithms::build_tree(&index, root, employees))
    }

    pub async fn list_employees(&self, organization_id: OrganizationId) -> Result<Vec<Employee>> {
        self.gate.authorize(OrgAction::Read)?;
        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        let employees = tx.list_by_organization(organization_id).await?;
        Ok(employees)
    }

    pub async fn get_employee(
        &self,
        organization_id: OrganizationId,
        employee_id: EmployeeId,
    ) -> Result<Employee> {
        self.gate.authorize(OrgAction::Read)?;
        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        let employee = require_member(&mut tx, organization_id, employee_id).await?;
        Ok(employee)
    }

    pub async fn direct_reports(
        &self,
        organization_id: OrganizationId,
        employee_id: EmployeeId,
    ) -> Result<Vec<Employee>> {
        self.gate.authorize(OrgAction::Read)?;
        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        require_member(&mut tx, organization_id, employee_id).await?;
        let reports = tx.list_by_manager(organization_id, employee_id).await?;
        Ok(reports)
    }

    /// Managers of `employee_id`, nearest first, ending at the root.
    pub async fn reporting_chain(
        &self,
        organization_id: OrganizationId,
        employee_id: EmployeeId,
    ) -> Result<Vec<Employee>> {
        self.gate.authorize(OrgAction::Read)?;
        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        require_member(&mut tx, organization_id, employee_id).await?;
        let employees = tx.list_by_organization(organization_id).await?;
        let index = HierarchyIndex::new(organization_id, &employees);
        let mut records: HashMap<EmployeeId, Employee> = employees
            .into_iter()
            .map(|employee| (employee.id, employee))
            .collect();
        Ok(index
            .ancestors(employee_id)
            .into_iter()
            .filter_map(|id| records.remove(&id))
            .collect())
    }

    /// Without a manager the new employee becomes the root, which is only
    /// allowed while the organization has none.
    pub async fn create_employee(
        &self,
        organization_id: OrganizationId,
        payload: CreateEmployeePayload,
    ) -> Result<Employee> {
        self.gate.authorize(OrgAction::CreateEmployee)?;
        let draft = payload.normalize()?;

        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        match draft.manager_id {
            Some(manager_id) => {
                require_member(&mut tx, organization_id, manager_id).await?;
            }
            None => {
                if let Some(root) = current_root(&mut tx, organization_id).await? {
                    return Err(LibError::from_violation(
                        HierarchyViolation::RootAlreadyAssigned { root_id: root.id },
                        anyhow!(
                            "organization {} already has root {}",
                            organization_id,
                            root.id
                        ),
                    ));
                }
            }
        }

        let employee = tx.insert_employee(organization_id, &draft).await?;
        tx.commit().await?;

        tracing::info!(
            organization_id = %organization_id,
            employee_id = %employee.id,
            root = employee.is_root(),
            "created employee"
        );
        Ok(employee)
    }

    /// Replaces name and title and, when given, moves the employee under a
    /// new manager. The root's manager cannot be changed here.
    pub async fn update_employee(
        &self,
        organization_id: OrganizationId,
        employee_id: EmployeeId,
        payload: UpdateEmployeePayload,
    ) -> Result<Employee> {
        self.gate.authorize(OrgAction::UpdateEmployee)?;
        let draft = payload.normalize()?;

        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        let previous = require_member(&mut tx, organization_id, employee_id).await?;

        let mut changes = Vec::new();
        if let Some(manager_id) = draft.manager_id {
            if manager_id == employee_id {
                return Err(LibError::from_violation(
                    HierarchyViolation::SelfReference { employee_id },
                    anyhow!("employee {} named as its own manager", employee_id),
                ));
            }
            require_member(&mut tx, organization_id, manager_id).await?;

            let index = load_index(&mut tx, organization_id).await?;
            changes = algorithms::plan_manager_update(&index, employee_id, manager_id)?;
            apply_plan(&mut tx, &index, &changes, None).await?;
        }

        tx.update_employee_details(employee_id, &draft.name, &draft.title)
            .await?;
        let employee = require_member(&mut tx, organization_id, employee_id).await?;
        tx.commit().await?;

        tracing::info!(
            organization_id = %organization_id,
            employee_id = %employee_id,
            previous_manager_id = ?previous.manager_id,
            manager_id = ?employee.manager_id,
            manager_changed = !changes.is_empty(),
            "updated employee"
        );
        Ok(employee)
    }

    /// Deletes a non-root employee, moving its direct reports to its manager
    /// first. Returns the number of re-parented reports.
    pub async fn delete_employee(
        &self,
        organization_id: OrganizationId,
        employee_id: EmployeeId,
    ) -> Result<usize> {
        self.gate.authorize(OrgAction::DeleteEmployee)?;

        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        let employee = require_member(&mut tx, organization_id, employee_id).await?;
        if employee.is_root() {
            return Err(LibError::from_violation(
                HierarchyViolation::RootProtected {
                    root_id: employee_id,
                },
                anyhow!("refusing to delete root {}", employee_id),
            ));
        }

        let reports = tx.list_by_manager(organization_id, employee_id).await?;
        let root = current_root(&mut tx, organization_id).await?;
        let changes = algorithms::reparent_reports(&employee, &reports, root.map(|r| r.id))?;

        let index = load_index(&mut tx, organization_id).await?;
        apply_plan(&mut tx, &index, &changes, Some(employee_id)).await?;
        tx.delete_employee(employee_id).await?;
        tx.commit().await?;

        tracing::info!(
            organization_id = %organization_id,
            employee_id = %employee_id,
            reparented_reports = changes.len(),
            "deleted employee"
        );
        Ok(changes.len())
    }

    /// Makes `employee_id` the root. The previous root and its other direct
    /// reports end up reporting to the new root.
    pub async fn promote(
        &self,
        organization_id: OrganizationId,
        employee_id: EmployeeId,
    ) -> Result<Employee> {
        self.gate.authorize(OrgAction::Promote)?;

        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        let candidate = require_member(&mut tx, organization_id, employee_id).await?;
        if candidate.is_root() {
            return Ok(candidate);
        }

        let previous_root = require_root(&mut tx, organization_id).await?;
        let index = load_index(&mut tx, organization_id).await?;
        let changes =
            algorithms::plan_promotion(&index, employee_id).inspect_err(report_integrity_fault)?;
        tracing::debug!(
            organization_id = %organization_id,
            changes = ?changes,
            "planned promotion"
        );
        apply_plan(&mut tx, &index, &changes, None).await?;

        let promoted = require_member(&mut tx, organization_id, employee_id).await?;
        tx.commit().await?;

        tracing::info!(
            organization_id = %organization_id,
            employee_id = %employee_id,
            previous_root_id = %previous_root.id,
            flattened_reports = changes.len().saturating_sub(2),
            "promoted employee to root"
        );
        Ok(promoted)
    }

    /// Moves every listed subordinate under `manager_id`. The whole batch is
    /// validated before anything is written.
    pub async fn assign_manager(
        &self,
        organization_id: OrganizationId,
        manager_id: EmployeeId,
        payload: AssignManagerPayload,
    ) -> Result<Employee> {
        self.gate.authorize(OrgAction::AssignManager)?;
        let subordinate_ids = payload.normalize();

        let mut tx = self.store.begin().await?;
        require_organization(&mut tx, organization_id).await?;
        let manager = require_member(&mut tx, organization_id, manager_id).await?;
        if manager.is_root() {
            return Err(LibError::from_violation(
                HierarchyViolation::RootProtected {
                    root_id: manager_id,
                },
                anyhow!("reports of root {} change only through promotion", manager_id),
            ));
        }
        require_root(&mut tx, organization_id).await?;

        for subordinate_id in &subordinate_ids {
            if *subordinate_id == manager_id {
                return Err(LibError::from_violation(
                    HierarchyViolation::SelfReference {
                        employee_id: manager_id,
                    },
                    anyhow!("employee {} listed as its own subordinate", manager_id),
                ));
            }
            require_member(&mut tx, organization_id, *subordinate_id).await?;
        }

        let index = load_index(&mut tx, organization_id).await?;
        let changes = algorithms::plan_manager_assignment(&index, manager_id, &subordinate_ids)
            .inspect_err(report_integrity_fault)?;
        tracing::debug!(
            organization_id = %organization_id,
            changes = ?changes,
            "planned manager assignment"
        );
        apply_plan(&mut tx, &index, &changes, None).await?;

        let manager = require_member(&mut tx, organization_id, manager_id).await?;
        tx.commit().await?;

        tracing::info!(
            organization_id = %organization_id,
            manager_id = %manager_id,
            subordinates = subordinate_ids.len(),
            "assigned reports to manager"
        );
        Ok(manager)
    }
}

fn report_integrity_fault(err: &LibError) {
    if err.kind == ErrorKind::Integrity {
        tracing::error!(
            code = err.code,
            error = %err.source,
            "org chart integrity fault"
        );
    }
}

async fn require_organization<T: StoreTransaction>(
    tx: &mut T,
    organization_id: OrganizationId,
) -> Result<Organization> {
    tx.get_organization(organization_id).await?.ok_or_else(|| {
        LibError::not_found(
            "Organization not found",
            anyhow!("organization {} not found", organization_id),
        )
    })
}

async fn require_member<T: StoreTransaction>(
    tx: &mut T,
    organization_id: OrganizationId,
    employee_id: EmployeeId,
) -> Result<Employee> {
    let employee = tx.get_employee(employee_id).await?.ok_or_else(|| {
        LibError::not_found(
            "Employee not found",
            anyhow!("employee {} not found", employee_id),
        )
    })?;

    if employee.organization_id != organization_id {
        return Err(LibError::from_violation(
            HierarchyViolation::CrossOrganizationReference {
                employee_id,
                organization_id: employee.organization_id,
                expected_organization_id: organization_id,
            },
            anyhow!(
                "employee {} belongs to {} not {}",
                employee_id,
                employee.organization_id,
                organization_id
            ),
        ));
    }

    Ok(employee)
}

async fn load_index<T: StoreTransaction>(
    tx: &mut T,
    organization_id: OrganizationId,
) -> Result<HierarchyIndex> {
    let employees = tx.list_by_organization(organization_id).await?;
    Ok(HierarchyIndex::new(organization_id, &employees))
}

/// The organization's root through the indexed accessor; `None` only for an
/// empty organization.
async fn current_root<T: StoreTransaction>(
    tx: &mut T,
    organization_id: OrganizationId,
) -> Result<Option<Employee>> {
    let mut roots = tx.list_roots(organization_id).await?;
    let populated = roots.is_empty() && !tx.list_by_organization(organization_id).await?.is_empty();
    let result = match roots.len() {
        0 if !populated => Ok(None),
        0 => Err(LibError::from_violation(
            HierarchyViolation::MissingRoot { organization_id },
            anyhow!("organization {} has employees but no root", organization_id),
        )),
        1 => Ok(roots.pop()),
        count => Err(LibError::integrity(
            HierarchyViolation::MultipleRoots {
                root_ids: roots.iter().map(|root| root.id).collect(),
            },
            anyhow!("organization {} has {} roots", organization_id, count),
        )),
    };
    result.inspect_err(report_integrity_fault)
}

async fn require_root<T: StoreTransaction>(
    tx: &mut T,
    organization_id: OrganizationId,
) -> Result<Employee> {
    current_root(tx, organization_id).await?.ok_or_else(|| {
        LibError::from_violation(
            HierarchyViolation::MissingRoot { organization_id },
            anyhow!("organization {} has no employees", organization_id),
        )
    })
}

/// Checks the projected tree, then writes the changes in order.
async fn apply_plan<T: StoreTransaction>(
    tx: &mut T,
    index: &HierarchyIndex,
    changes: &[ManagerChange],
    removed: Option<EmployeeId>,
) -> Result<()> {
    let mut projected = index.clone();
    projected.apply(changes);
    if let Some(employee_id) = removed {
        projected.remove(employee_id);
    }
    invariants::ensure_hierarchy_invariants(&projected).inspect_err(report_integrity_fault)?;

    for change in changes {
        tx.set_manager(change.employee_id, change.manager_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use uuid::Uuid;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::permissions::{ORGCHART_ROLE_READ, RoleGate};

    type Ops = OrgOperations<MemoryStore>;

    async fn organization(ops: &Ops, name: &str) -> OrganizationId {
        ops.create_organization(CreateOrganizationPayload {
            name: name.to_string(),
        })
        .await
        .expect("organization should be created")
        .id
    }

    async fn hire(
        ops: &Ops,
        organization_id: OrganizationId,
        name: &str,
        manager_id: Option<EmployeeId>,
    ) -> EmployeeId {
        ops.create_employee(
            organization_id,
            CreateEmployeePayload {
                name: name.to_string(),
                title: "Staff".to_string(),
                manager_id,
            },
        )
        .await
        .expect("employee should be created")
        .id
    }

    async fn manager_of(
        ops: &Ops,
        organization_id: OrganizationId,
        employee_id: EmployeeId,
    ) -> Option<EmployeeId> {
        ops.get_employee(organization_id, employee_id)
            .await
            .expect("employee should exist")
            .manager_id
    }

    async fn assert_valid(ops: &Ops, organization_id: OrganizationId) {
        let report = ops
            .check_hierarchy(organization_id)
            .await
            .expect("audit should run");
        assert!(report.valid, "violations: {:?}", report.violations);
    }

    /// root A, B reports to A, C reports to B.
    async fn chain(ops: &Ops) -> (OrganizationId, EmployeeId, EmployeeId, EmployeeId) {
        let org = organization(ops, "Acme").await;
        let a = hire(ops, org, "A", None).await;
        let b = hire(ops, org, "B", Some(a)).await;
        let c = hire(ops, org, "C", Some(b)).await;
        (org, a, b, c)
    }

    #[tokio::test]
    async fn first_employee_becomes_root_and_second_root_is_refused() {
        let ops = Ops::new(MemoryStore::new());
        let org = organization(&ops, "Acme").await;
        let root = hire(&ops, org, "Root", None).await;
        assert_eq!(manager_of(&ops, org, root).await, None);

        let err = ops
            .create_employee(
                org,
                CreateEmployeePayload {
                    name: "Second".to_string(),
                    title: "CEO".to_string(),
                    manager_id: None,
                },
            )
            .await
            .expect_err("second root should be refused");
        assert_eq!(err.code, "org_root_already_assigned");
        assert_eq!(ops.list_employees(org).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn create_requires_same_organization_manager() {
        let ops = Ops::new(MemoryStore::new());
        let org = organization(&ops, "Acme").await;
        let other = organization(&ops, "Other").await;
        let foreign_root = hire(&ops, other, "Foreign", None).await;

        let err = ops
            .create_employee(
                org,
                CreateEmployeePayload {
                    name: "New".to_string(),
                    title: "Staff".to_string(),
                    manager_id: Some(foreign_root),
                },
            )
            .await
            .expect_err("foreign manager should be refused");
        assert_eq!(err.code, "org_cross_organization_reference");

        let err = ops
            .create_employee(
                OrganizationId(Uuid::new_v4()),
                CreateEmployeePayload {
                    name: "New".to_string(),
                    title: "Staff".to_string(),
                    manager_id: None,
                },
            )
            .await
            .expect_err("unknown organization");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn promotion_flattens_scenario() {
        let ops = Ops::new(MemoryStore::new());
        let (org, a, b, c) = chain(&ops).await;

        let promoted = ops.promote(org, c).await.expect("promotion");
        assert_eq!(promoted.id, c);
        assert_eq!(promoted.manager_id, None);
        assert_eq!(manager_of(&ops, org, a).await, Some(c));
        assert_eq!(manager_of(&ops, org, b).await, Some(c));
        assert_valid(&ops, org).await;
    }

    #[tokio::test]
    async fn promotion_moves_every_other_root_report() {
        let ops = Ops::new(MemoryStore::new());
        let org = organization(&ops, "Acme").await;
        let x = hire(&ops, org, "X", None).await;
        let p = hire(&ops, org, "P", Some(x)).await;
        let q = hire(&ops, org, "Q", Some(x)).await;
        let candidate = hire(&ops, org, "Cand", Some(p)).await;
        let leaf = hire(&ops, org, "Leaf", Some(p)).await;

        ops.promote(org, candidate).await.expect("promotion");
        assert_eq!(manager_of(&ops, org, candidate).await, None);
        assert_eq!(manager_of(&ops, org, x).await, Some(candidate));
        assert_eq!(manager_of(&ops, org, p).await, Some(candidate));
        assert_eq!(manager_of(&ops, org, q).await, Some(candidate));
        assert_eq!(manager_of(&ops, org, leaf).await, Some(p));
        assert_valid(&ops, org).await;
    }

    #[tokio::test]
    async fn promoting_root_is_noop() {
        let ops = Ops::new(MemoryStore::new());
        let (org, a, b, _) = chain(&ops).await;
        let same = ops.promote(org, a).await.expect("noop promotion");
        assert_eq!(same.manager_id, None);
        assert_eq!(manager_of(&ops, org, b).await, Some(a));
    }

    #[tokio::test]
    async fn deleting_root_is_refused_with_or_without_reports() {
        let ops = Ops::new(MemoryStore::new());
        let (org, a, _, _) = chain(&ops).await;
        let err = ops.delete_employee(org, a).await.expect_err("root");
        assert_eq!(err.code, "org_root_protected");
        assert_eq!(err.kind, ErrorKind::Forbidden);

        let lonely = organization(&ops, "Solo").await;
        let only = hire(&ops, lonely, "Only", None).await;
        let err = ops.delete_employee(lonely, only).await.expect_err("root");
        assert_eq!(err.code, "org_root_protected");
    }

    #[tokio::test]
    async fn deletion_reparents_reports_to_manager() {
        let ops = Ops::new(MemoryStore::new());
        let org = organization(&ops, "Acme").await;
        let m = hire(&ops, org, "M", None).await;
        let e = hire(&ops, org, "E", Some(m)).await;
        let r1 = hire(&ops, org, "R1", Some(e)).await;
        let r2 = hire(&ops, org, "R2", Some(e)).await;
        let deep = hire(&ops, org, "Deep", Some(r1)).await;

        let moved = ops.delete_employee(org, e).await.expect("delete");
        assert_eq!(moved, 2);
        assert_eq!(manager_of(&ops, org, r1).await, Some(m));
        assert_eq!(manager_of(&ops, org, r2).await, Some(m));
        assert_eq!(manager_of(&ops, org, deep).await, Some(r1));
        let err = ops.get_employee(org, e).await.expect_err("deleted");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_valid(&ops, org).await;
    }

    #[tokio::test]
    async fn bulk_assignment_breaks_self_loop() {
        let ops = Ops::new(MemoryStore::new());
        let org = organization(&ops, "Acme").await;
        let root = hire(&ops, org, "Root", None).await;
        let p = hire(&ops, org, "P", Some(root)).await;
        let m = hire(&ops, org, "M", Some(p)).await;
        let other = hire(&ops, org, "Other", Some(root)).await;

        let updated = ops
            .assign_manager(
                org,
                m,
                AssignManagerPayload {
                    subordinate_ids: vec![other, p],
                },
            )
            .await
            .expect("assignment");
        assert_eq!(updated.id, m);
        assert_eq!(updated.manager_id, Some(root));
        assert_eq!(manager_of(&ops, org, p).await, Some(m));
        assert_eq!(manager_of(&ops, org, other).await, Some(m));
        assert_valid(&ops, org).await;
    }

    #[tokio::test]
    async fn bulk_assignment_failure_leaves_tree_untouched() {
        let ops = Ops::new(MemoryStore::new());
        let (org, a, b, c) = chain(&ops).await;
        let d = hire(&ops, org, "D", Some(a)).await;
        let other = organization(&ops, "Other").await;
        let foreign = hire(&ops, other, "Foreign", None).await;

        let err = ops
            .assign_manager(
                org,
                c,
                AssignManagerPayload {
                    subordinate_ids: vec![d, foreign],
                },
            )
            .await
            .expect_err("foreign subordinate");
        assert_eq!(err.code, "org_cross_organization_reference");
        assert_eq!(manager_of(&ops, org, d).await, Some(a));

        let err = ops
            .assign_manager(
                org,
                b,
                AssignManagerPayload {
                    subordinate_ids: vec![d, a],
                },
            )
            .await
            .expect_err("root subordinate");
        assert_eq!(err.code, "org_root_protected");
        assert_eq!(manager_of(&ops, org, d).await, Some(a));

        let err = ops
            .assign_manager(
                org,
                a,
                AssignManagerPayload {
                    subordinate_ids: vec![d],
                },
            )
            .await
            .expect_err("root manager");
        assert_eq!(err.code, "org_root_protected");

        let err = ops
            .assign_manager(
                org,
                c,
                AssignManagerPayload {
                    subordinate_ids: vec![d, c],
                },
            )
            .await
            .expect_err("self");
        assert_eq!(err.code, "org_self_reference");
        assert_eq!(manager_of(&ops, org, d).await, Some(a));
    }

    #[tokio::test]
    async fn update_rejects_cycles_self_and_root_changes() {
        let ops = Ops::new(MemoryStore::new());
        let (org, a, b, c) = chain(&ops).await;

        let update = |manager_id| UpdateEmployeePayload {
            name: "Renamed".to_string(),
            title: "Lead".to_string(),
            manager_id,
        };

        let err = ops
            .update_employee(org, b, update(Some(b)))
            .await
            .expect_err("self");
        assert_eq!(err.code, "org_self_reference");

        let err = ops
            .update_employee(org, b, update(Some(c)))
            .await
            .expect_err("cycle");
        assert_eq!(err.code, "org_cycle_violation");

        let err = ops
            .update_employee(org, a, update(Some(c)))
            .await
            .expect_err("root");
        assert_eq!(err.code, "org_root_protected");

        let unchanged = ops
            .get_employee(org, b)
            .await
            .expect("employee should exist");
        assert_eq!(unchanged.name, "B");

        let moved = ops
            .update_employee(org, c, update(Some(a)))
            .await
            .expect("valid move");
        assert_eq!(moved.manager_id, Some(a));
        assert_eq!(moved.name, "Renamed");
        assert_eq!(moved.title, "Lead");

        let renamed_root = ops
            .update_employee(org, a, update(None))
            .await
            .expect("root rename");
        assert_eq!(renamed_root.manager_id, None);
        assert_valid(&ops, org).await;
    }

    #[tokio::test]
    async fn missing_root_is_surfaced() {
        let store = MemoryStore::new();
        let ops = Ops::new(store.clone());
        let org = organization(&ops, "Broken").await;
        let root = hire(&ops, org, "Root", None).await;
        let a = hire(&ops, org, "A", Some(root)).await;
        let b = hire(&ops, org, "B", Some(root)).await;

        // Corrupt the stored data: A and B point at each other, no root left.
        let mut a_record = ops.get_employee(org, a).await.expect("a");
        let mut b_record = ops.get_employee(org, b).await.expect("b");
        a_record.manager_id = Some(b);
        b_record.manager_id = Some(a);
        store.insert_raw_employee(a_record).await;
        store.insert_raw_employee(b_record).await;
        {
            let mut tx = store.begin().await.expect("begin");
            tx.delete_employee(root).await.expect("raw delete");
            tx.commit().await.expect("commit");
        }

        let err = ops.promote(org, a).await.expect_err("missing root");
        assert_eq!(err.code, "org_missing_root");
        assert_eq!(err.kind, ErrorKind::Integrity);

        let report = ops.check_hierarchy(org).await.expect("audit");
        assert!(!report.valid);
        assert!(
            report
                .violations
                .iter()
                .any(|v| matches!(v, HierarchyViolation::MissingRoot { .. }))
        );
    }

    #[tokio::test]
    async fn organization_delete_cascades_to_employees() {
        let ops = Ops::new(MemoryStore::new());
        let (org, a, _, _) = chain(&ops).await;
        ops.delete_organization(org).await.expect("delete");

        let err = ops.get_organization(org).await.expect_err("gone");
        assert_eq!(err.kind, ErrorKind::NotFound);
        let mut tx = ops.store().begin().await.expect("begin");
        assert!(tx.get_employee(a).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn reads_cover_reports_chain_and_tree() {
        let ops = Ops::new(MemoryStore::new());
        let (org, a, b, c) = chain(&ops).await;
        let d = hire(&ops, org, "D", Some(a)).await;

        let reports = ops.direct_reports(org, a).await.expect("reports");
        assert_eq!(
            reports.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![b, d]
        );

        let chain = ops.reporting_chain(org, c).await.expect("chain");
        assert_eq!(chain.iter().map(|e| e.id).collect::<Vec<_>>(), vec![b, a]);

        let tree = ops
            .org_tree(org)
            .await
            .expect("tree")
            .expect("non-empty organization");
        assert_eq!(tree.employee.id, a);
        assert_eq!(tree.size(), 4);

        let empty = organization(&ops, "Empty").await;
        assert!(ops.org_tree(empty).await.expect("tree").is_none());

        let page = ops
            .list_organizations(ListOrganizationsQuery::default())
            .await
            .expect("list");
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].name, "Acme");
        assert_eq!(page.items[0].employee_count, 4);
    }

    #[tokio::test]
    async fn employee_reads_are_scoped_to_organization() {
        let ops = Ops::new(MemoryStore::new());
        let (org, a, _, _) = chain(&ops).await;
        let other = organization(&ops, "Other").await;

        let err = ops.get_employee(other, a).await.expect_err("wrong org");
        assert_eq!(err.code, "org_cross_organization_reference");
        let err = ops
            .get_employee(org, EmployeeId(Uuid::new_v4()))
            .await
            .expect_err("unknown");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn permission_gate_runs_before_store_access() {
        let ops = Ops::new(MemoryStore::new()).with_gate(RoleGate::new([ORGCHART_ROLE_READ]));
        let err = ops
            .create_organization(CreateOrganizationPayload {
                name: "Acme".to_string(),
            })
            .await
            .expect_err("read-only gate");
        assert_eq!(err.kind, ErrorKind::Forbidden);

        let page = ops
            .list_organizations(ListOrganizationsQuery::default())
            .await
            .expect("read allowed");
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn execute_dispatches_tagged_operations() {
        let ops = Ops::new(MemoryStore::new());
        let operation: OrgOperation = serde_json::from_value(serde_json::json!({
            "operation": "create_organization",
            "payload": { "name": "Acme" }
        }))
        .expect("operation should parse");

        let OrgOperationResult::Organization { organization } =
            ops.execute(operation).await.expect("execute")
        else {
            panic!("expected organization result");
        };

        let operation: OrgOperation = serde_json::from_value(serde_json::json!({
            "operation": "create_employee",
            "organization_id": organization.id,
            "payload": { "name": "Root", "title": "CEO" }
        }))
        .expect("operation should parse");
        let result = ops.execute(operation).await.expect("execute");
        let value = serde_json::to_value(&result).expect("result should serialize");
        assert_eq!(value["result"], "employee");
        assert_eq!(value["employee"]["name"], "Root");

        let result = ops
            .execute(OrgOperation::CheckHierarchy {
                organization_id: organization.id,
            })
            .await
            .expect("execute");
        assert!(matches!(
            result,
            OrgOperationResult::Hierarchy { report } if report.valid && report.employee_count == 1
        ));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Hire { manager: usize },
        Fire { target: usize },
        Promote { target: usize },
        Move { target: usize, manager: usize },
        Assign { manager: usize, subordinates: Vec<usize> },
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => any::<usize>().prop_map(|manager| Step::Hire { manager }),
            1 => any::<usize>().prop_map(|target| Step::Fire { target }),
            1 => any::<usize>().prop_map(|target| Step::Promote { target }),
            2 => (any::<usize>(), any::<usize>())
                .prop_map(|(target, manager)| Step::Move { target, manager }),
            2 => (any::<usize>(), prop::collection::vec(any::<usize>(), 0..4))
                .prop_map(|(manager, subordinates)| Step::Assign { manager, subordinates }),
        ]
    }

    /// Applies the steps and returns every failure observed along the way:
    /// audit violations, integrity or store errors, and rejections of steps
    /// that are valid on any well-formed tree.
    async fn run_steps(steps: Vec<Step>) -> Vec<String> {
        let ops = Ops::new(MemoryStore::new());
        let org = organization(&ops, "Prop").await;
        hire(&ops, org, "Root", None).await;

        let mut failures = Vec::new();
        for (n, step) in steps.into_iter().enumerate() {
            let employees = ops.list_employees(org).await.expect("list");
            let pick = |i: usize| employees[i % employees.len()].id;

            let target_is_root = |i: usize| employees[i % employees.len()].is_root();
            // Hiring under an existing manager, firing a non-root and promoting a
            // non-root are valid on any well-formed tree.
            let must_succeed = match &step {
                Step::Hire { .. } => true,
                Step::Fire { target } | Step::Promote { target } => !target_is_root(*target),
                Step::Move { .. } | Step::Assign { .. } => false,
            };

            let outcome = match &step {
                Step::Hire { manager } => ops
                    .create_employee(
                        org,
                        CreateEmployeePayload {
                            name: format!("E{n}"),
                            title: "Staff".to_string(),
                            manager_id: Some(pick(*manager)),
                        },
                    )
                    .await
                    .map(|_| ()),
                Step::Fire { target } => ops.delete_employee(org, pick(*target)).await.map(|_| ()),
                Step::Promote { target } => ops.promote(org, pick(*target)).await.map(|_| ()),
                Step::Move { target, manager } => {
                    let current = employees[*target % employees.len()].clone();
                    ops.update_employee(
                        org,
                        current.id,
                        UpdateEmployeePayload {
                            name: current.name,
                            title: current.title,
                            manager_id: Some(pick(*manager)),
                        },
                    )
                    .await
                    .map(|_| ())
                }
                Step::Assign {
                    manager,
                    subordinates,
                } => ops
                    .assign_manager(
                        org,
                        pick(*manager),
                        AssignManagerPayload {
                            subordinate_ids: subordinates.iter().map(|i| pick(*i)).collect(),
                        },
                    )
                    .await
                    .map(|_| ()),
            };

            match outcome {
                Ok(()) => {}
                Err(err) => match err.kind {
                    ErrorKind::InvalidInput | ErrorKind::Forbidden | ErrorKind::NotFound
                        if !must_succeed => {}
                    _ => failures.push(format!("{step:?} failed: {err}")),
                },
            }

            let report = ops.check_hierarchy(org).await.expect("audit");
            if !report.valid {
                failures.push(format!("after {step:?}: {:?}", report.violations));
            }

            let employees = ops.list_employees(org).await.expect("list");
            let roots = employees.iter().filter(|e| e.is_root()).count();
            if roots != 1 {
                failures.push(format!("after {step:?}: {roots} roots"));
            }
            let index = HierarchyIndex::new(org, &employees);
            let Some(root) = index.roots().first().copied() else {
                continue;
            };
            for employee in &employees {
                let chain = index.ancestors(employee.id);
                if employee.id != root && chain.last() != Some(&root) {
                    failures.push(format!("{} does not reach the root", employee.id));
                }
            }
        }
        failures
    }

    #[tokio::test]
    async fn scripted_restructuring_steps_all_succeed() {
        let steps = vec![
            Step::Hire { manager: 0 },
            Step::Hire { manager: 1 },
            Step::Hire { manager: 2 },
            Step::Promote { target: 3 },
            Step::Promote { target: 1 },
            Step::Hire { manager: 0 },
            Step::Fire { target: 2 },
        ];
        let failures = run_steps(steps).await;
        assert!(failures.is_empty(), "{failures:?}");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn random_operations_keep_a_single_rooted_tree(
            steps in prop::collection::vec(step(), 1..24)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime should build");
            let failures = runtime.block_on(run_steps(steps));
            prop_assert!(failures.is_empty(), "{:?}", failures);
        }
    }
}

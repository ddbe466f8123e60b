//! In-process [`RecordStore`]. Transactions are serialized by an async mutex
//! held for their lifetime; writes go to a working copy that replaces the
//! shared state on commit.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{NaiveDateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::models::{
    Employee, EmployeeDraft, EmployeeId, Organization, OrganizationId, OrganizationSummary,
};
use crate::store::{RecordStore, StoreTransaction};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    organizations: HashMap<OrganizationId, Organization>,
    employees: HashMap<EmployeeId, Employee>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a record as-is, skipping every check, to seed corrupted
    /// fixtures.
    #[cfg(test)]
    pub(crate) async fn insert_raw_employee(&self, employee: Employee) {
        let mut state = self.state.lock().await;
        state.employees.insert(employee.id, employee);
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl RecordStore for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = (*guard).clone();
        Ok(MemoryTransaction { guard, working })
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn sort_employees(employees: &mut [Employee]) {
    employees.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
}

impl MemoryTransaction {
    fn employee_mut(&mut self, employee_id: EmployeeId) -> Result<&mut Employee> {
        self.working.employees.get_mut(&employee_id).ok_or_else(|| {
            LibError::not_found(
                "Employee not found",
                anyhow!("employee {} not found", employee_id),
            )
        })
    }
}

impl StoreTransaction for MemoryTransaction {
    async fn get_organization(
        &mut self,
        organization_id: OrganizationId,
    ) -> Result<Option<Organization>> {
        Ok(self.working.organizations.get(&organization_id).cloned())
    }

    async fn list_organizations(&mut self, page: u32, limit: u32) -> Result<Vec<OrganizationSummary>> {
        let mut counts: HashMap<OrganizationId, i64> = HashMap::new();
        for employee in self.working.employees.values() {
            *counts.entry(employee.organization_id).or_default() += 1;
        }

        let mut organizations = self.working.organizations.values().collect::<Vec<_>>();
        organizations.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        let offset = (page.saturating_sub(1) as usize).saturating_mul(limit as usize);
        Ok(organizations
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .map(|organization| OrganizationSummary {
                id: organization.id,
                name: organization.name.clone(),
                created_at: organization.created_at,
                updated_at: organization.updated_at,
                employee_count: counts.get(&organization.id).copied().unwrap_or(0),
            })
            .collect())
    }

    async fn insert_organization(&mut self, name: &str) -> Result<Organization> {
        let timestamp = now();
        let organization = Organization {
            id: OrganizationId(Uuid::new_v4()),
            name: name.to_string(),
            created_at: timestamp,
            updated_at: timestamp,
        };
        self.working
            .organizations
            .insert(organization.id, organization.clone());
        Ok(organization)
    }

    async fn rename_organization(
        &mut self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Organization> {
        let organization = self
            .working
            .organizations
            .get_mut(&organization_id)
            .ok_or_else(|| {
                LibError::not_found(
                    "Organization not found",
                    anyhow!("organization {} not found", organization_id),
                )
            })?;
        organization.name = name.to_string();
        organization.updated_at = now();
        Ok(organization.clone())
    }

    async fn delete_organization(&mut self, organization_id: OrganizationId) -> Result<()> {
        self.working
            .employees
            .retain(|_, employee| employee.organization_id != organization_id);
        self.working.organizations.remove(&organization_id);
        Ok(())
    }

    async fn get_employee(&mut self, employee_id: EmployeeId) -> Result<Option<Employee>> {
        Ok(self.working.employees.get(&employee_id).cloned())
    }

    async fn list_by_organization(
        &mut self,
        organization_id: OrganizationId,
    ) -> Result<Vec<Employee>> {
        let mut employees = self
            .working
            .employees
            .values()
            .filter(|employee| employee.organization_id == organization_id)
            .cloned()
            .collect::<Vec<_>>();
        sort_employees(&mut employees);
        Ok(employees)
    }

    async fn list_by_manager(
        &mut self,
        organization_id: OrganizationId,
        manager_id: EmployeeId,
    ) -> Result<Vec<Employee>> {
        let mut employees = self
            .working
            .employees
            .values()
            .filter(|employee| {
                employee.organization_id == organization_id
                    && employee.manager_id == Some(manager_id)
            })
            .cloned()
            .collect::<Vec<_>>();
        sort_employees(&mut employees);
        Ok(employees)
    }

    async fn insert_employee(
        &mut self,
        organization_id: OrganizationId,
        draft: &EmployeeDraft,
    ) -> Result<Employee> {
        let timestamp = now();
        let employee = Employee {
            id: EmployeeId(Uuid::new_v4()),
            organization_id,
            name: draft.name.clone(),
            title: draft.title.clone(),
            manager_id: draft.manager_id,
            created_at: timestamp,
            updated_at: timestamp,
        };
        self.working
            .employees
            .insert(employee.id, employee.clone());
        Ok(employee)
    }

    async fn update_employee_details(
        &mut self,
        employee_id: EmployeeId,
        name: &str,
        title: &str,
    ) -> Result<()> {
        let employee = self.employee_mut(employee_id)?;
        employee.name = name.to_string();
        employee.title = title.to_string();
        employee.updated_at = now();
        Ok(())
    }

    async fn set_manager(
        &mut self,
        employee_id: EmployeeId,
        manager_id: Option<EmployeeId>,
    ) -> Result<()> {
        let employee = self.employee_mut(employee_id)?;
        employee.manager_id = manager_id;
        employee.updated_at = now();
        Ok(())
    }

    async fn delete_employee(&mut self, employee_id: EmployeeId) -> Result<()> {
        self.working.employees.remove(&employee_id);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let MemoryTransaction { mut guard, working } = self;
        *guard = working;
        Ok(())
    }
}

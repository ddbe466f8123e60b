//! Record store seam consumed by the hierarchy engine.
//!
//! Every operation opens one [`StoreTransaction`], performs its validation
//! reads and its writes through it, and calls [`StoreTransaction::commit`].
//! Dropping a transaction without committing discards its writes.

use std::future::Future;

use crate::error::Result;
use crate::models::{
    Employee, EmployeeDraft, EmployeeId, Organization, OrganizationId, OrganizationSummary,
};

pub trait RecordStore: Send + Sync {
    type Transaction: StoreTransaction;

    fn begin(&self) -> impl Future<Output = Result<Self::Transaction>> + Send;
}

pub trait StoreTransaction: Send {
    fn get_organization(
        &mut self,
        organization_id: OrganizationId,
    ) -> impl Future<Output = Result<Option<Organization>>> + Send;

    fn list_organizations(
        &mut self,
        page: u32,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<OrganizationSummary>>> + Send;

    fn insert_organization(
        &mut self,
        name: &str,
    ) -> impl Future<Output = Result<Organization>> + Send;

    fn rename_organization(
        &mut self,
        organization_id: OrganizationId,
        name: &str,
    ) -> impl Future<Output = Result<Organization>> + Send;

    /// Removes the organization and all of its employees.
    fn delete_organization(
        &mut self,
        organization_id: OrganizationId,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_employee(
        &mut self,
        employee_id: EmployeeId,
    ) -> impl Future<Output = Result<Option<Employee>>> + Send;

    fn list_by_organization(
        &mut self,
        organization_id: OrganizationId,
    ) -> impl Future<Output = Result<Vec<Employee>>> + Send;

    fn list_by_manager(
        &mut self,
        organization_id: OrganizationId,
        manager_id: EmployeeId,
    ) -> impl Future<Output = Result<Vec<Employee>>> + Send;

    /// Employees with no manager. Stores with an index on the root column
    /// should override this.
    fn list_roots(
        &mut self,
        organization_id: OrganizationId,
    ) -> impl Future<Output = Result<Vec<Employee>>> + Send {
        async move {
            let employees = self.list_by_organization(organization_id).await?;
            Ok(employees
                .into_iter()
                .filter(Employee::is_root)
                .collect())
        }
    }

    fn insert_employee(
        &mut self,
        organization_id: OrganizationId,
        draft: &EmployeeDraft,
    ) -> impl Future<Output = Result<Employee>> + Send;

    fn update_employee_details(
        &mut self,
        employee_id: EmployeeId,
        name: &str,
        title: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_manager(
        &mut self,
        employee_id: EmployeeId,
        manager_id: Option<EmployeeId>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete_employee(&mut self, employee_id: EmployeeId)
    -> impl Future<Output = Result<()>> + Send;

    fn commit(self) -> impl Future<Output = Result<()>> + Send;
}

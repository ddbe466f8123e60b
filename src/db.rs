use std::sync::Arc;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::models::{
    Employee, EmployeeDraft, EmployeeId, Organization, OrganizationId, OrganizationSummary,
};
use crate::store::{RecordStore, StoreTransaction};

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_orgchart_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug, Clone, FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct OrganizationSummaryRow {
    id: Uuid,
    name: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
    employee_count: i64,
}

#[derive(Debug, Clone, FromRow)]
struct EmployeeRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    title: String,
    manager_id: Option<Uuid>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl From<OrganizationRow> for Organization {
    fn from(value: OrganizationRow) -> Self {
        Self {
            id: OrganizationId(value.id),
            name: value.name,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl From<OrganizationSummaryRow> for OrganizationSummary {
    fn from(value: OrganizationSummaryRow) -> Self {
        Self {
            id: OrganizationId(value.id),
            name: value.name,
            created_at: value.created_at,
            updated_at: value.updated_at,
            employee_count: value.employee_count,
        }
    }
}

impl From<EmployeeRow> for Employee {
    fn from(value: EmployeeRow) -> Self {
        Self {
            id: EmployeeId(value.id),
            organization_id: OrganizationId(value.organization_id),
            name: value.name,
            title: value.title,
            manager_id: value.manager_id.map(EmployeeId),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::database(public, anyhow!(err))
}

fn missing_employee(employee_id: EmployeeId) -> LibError {
    LibError::not_found(
        "Employee not found",
        anyhow!("employee {} not found", employee_id),
    )
}

/// Postgres-backed [`RecordStore`] over the `orgchart` schema.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl RecordStore for PgStore {
    type Transaction = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|err| db_err("Failed to start transaction", err))?;
        Ok(PgTransaction { tx })
    }
}

impl StoreTransaction for PgTransaction {
    async fn get_organization(
        &mut self,
        organization_id: OrganizationId,
    ) -> Result<Option<Organization>> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            r#"
            SELECT id, name, created_at, updated_at
            FROM orgchart.organizations
            WHERE id = $1
            "#,
        )
        .bind(organization_id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to query organization", err))?;

        Ok(row.map(Organization::from))
    }

    async fn list_organizations(&mut self, page: u32, limit: u32) -> Result<Vec<OrganizationSummary>> {
        let offset = (page.saturating_sub(1) as i64).saturating_mul(limit as i64);

        let rows = sqlx::query_as::<_, OrganizationSummaryRow>(
            r#"
            SELECT
                o.id,
                o.name,
                o.created_at,
                o.updated_at,
                COALESCE(e.employee_count, 0) AS employee_count
            FROM orgchart.organizations o
            LEFT JOIN (
                SELECT organization_id, COUNT(*)::bigint AS employee_count
                FROM orgchart.employees
                GROUP BY organization_id
            ) e
            ON e.organization_id = o.id
            ORDER BY o.name ASC, o.id ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to list organizations", err))?;

        Ok(rows.into_iter().map(OrganizationSummary::from).collect())
    }

    async fn insert_organization(&mut self, name: &str) -> Result<Organization> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            r#"
            INSERT INTO orgchart.organizations (id, name)
            VALUES ($1, $2)
            RETURNING id, name, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to create organization", err))?;

        Ok(row.into())
    }

    async fn rename_organization(
        &mut self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Organization> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            r#"
            UPDATE orgchart.organizations
            SET name = $1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $2
            RETURNING id, name, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(organization_id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to update organization", err))?;

        row.map(Organization::from).ok_or_else(|| {
            LibError::not_found(
                "Organization not found",
                anyhow!("organization {} not found", organization_id),
            )
        })
    }

    async fn delete_organization(&mut self, organization_id: OrganizationId) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM orgchart.organizations
            WHERE id = $1
            "#,
        )
        .bind(organization_id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to delete organization", err))?;

        Ok(())
    }

    async fn get_employee(&mut self, employee_id: EmployeeId) -> Result<Option<Employee>> {
        let row = sqlx::query_as::<_, EmployeeRow>(
            r#"
            SELECT id, organization_id, name, title, manager_id, created_at, updated_at
            FROM orgchart.employees
            WHERE id = $1
            "#,
        )
        .bind(employee_id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to query employee", err))?;

        Ok(row.map(Employee::from))
    }

    async fn list_by_organization(
        &mut self,
        organization_id: OrganizationId,
    ) -> Result<Vec<Employee>> {
        let rows = sqlx::query_as::<_, EmployeeRow>(
            r#"
            SELECT id, organization_id, name, title, manager_id, created_at, updated_at
            FROM orgchart.employees
            WHERE organization_id = $1
            ORDER BY name ASC, id ASC
            "#,
        )
        .bind(organization_id.0)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to list employees", err))?;

        Ok(rows.into_iter().map(Employee::from).collect())
    }

    async fn list_by_manager(
        &mut self,
        organization_id: OrganizationId,
        manager_id: EmployeeId,
    ) -> Result<Vec<Employee>> {
        let rows = sqlx::query_as::<_, EmployeeRow>(
            r#"
            SELECT id, organization_id, name, title, manager_id, created_at, updated_at
            FROM orgchart.employees
            WHERE organization_id = $1
              AND manager_id = $2
            ORDER BY name ASC, id ASC
            "#,
        )
        .bind(organization_id.0)
        .bind(manager_id.0)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to list direct reports", err))?;

        Ok(rows.into_iter().map(Employee::from).collect())
    }

    async fn list_roots(&mut self, organization_id: OrganizationId) -> Result<Vec<Employee>> {
        let rows = sqlx::query_as::<_, EmployeeRow>(
            r#"
            SELECT id, organization_id, name, title, manager_id, created_at, updated_at
            FROM orgchart.employees
            WHERE organization_id = $1
              AND manager_id IS NULL
            ORDER BY id ASC
            "#,
        )
        .bind(organization_id.0)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to query organization root", err))?;

        Ok(rows.into_iter().map(Employee::from).collect())
    }

    async fn insert_employee(
        &mut self,
        organization_id: OrganizationId,
        draft: &EmployeeDraft,
    ) -> Result<Employee> {
        let row = sqlx::query_as::<_, EmployeeRow>(
            r#"
            INSERT INTO orgchart.employees (id, organization_id, name, title, manager_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, organization_id, name, title, manager_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(organization_id.0)
        .bind(&draft.name)
        .bind(&draft.title)
        .bind(draft.manager_id.map(|id| id.0))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to create employee", err))?;

        Ok(row.into())
    }

    async fn update_employee_details(
        &mut self,
        employee_id: EmployeeId,
        name: &str,
        title: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orgchart.employees
            SET name = $1,
                title = $2,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $3
            "#,
        )
        .bind(name)
        .bind(title)
        .bind(employee_id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to update employee", err))?;

        if result.rows_affected() == 0 {
            return Err(missing_employee(employee_id));
        }
        Ok(())
    }

    async fn set_manager(
        &mut self,
        employee_id: EmployeeId,
        manager_id: Option<EmployeeId>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orgchart.employees
            SET manager_id = $1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $2
            "#,
        )
        .bind(manager_id.map(|id| id.0))
        .bind(employee_id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to update manager", err))?;

        if result.rows_affected() == 0 {
            return Err(missing_employee(employee_id));
        }
        Ok(())
    }

    async fn delete_employee(&mut self, employee_id: EmployeeId) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM orgchart.employees
            WHERE id = $1
            "#,
        )
        .bind(employee_id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to delete employee", err))?;

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|err| db_err("Failed to commit transaction", err))
    }
}

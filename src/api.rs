use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde_json::json;

use crate::db::PgStore;
use crate::error::{ErrorKind, LibError};
use crate::models::{
    AssignManagerPayload, CreateEmployeePayload, CreateOrganizationPayload, EmployeeId,
    ListOrganizationsQuery, OrganizationId, UpdateEmployeePayload, UpdateOrganizationPayload,
};
use crate::operations::OrgOperations;
use crate::permissions::RoleGate;

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind {
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Integrity => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::error!(
            kind = ?self.0.kind,
            code = self.0.code,
            error = %self.0.source,
            "orgchart api request failed"
        );
        let body = json!({
            "error": {
                "code": self.0.code,
                "message": self.0.public,
            }
        });
        (status, Json(body)).into_response()
    }
}

pub trait HasPool {
    fn pool(&self) -> Arc<sqlx::PgPool>;
}

pub trait OrgChartApp: HasPool {
    /// Roles granted to callers of this app. `None` allows every action.
    fn granted_roles(&self) -> Option<Vec<String>> {
        None
    }

    fn operations(&self) -> OrgOperations<PgStore> {
        let operations = OrgOperations::new(PgStore::new(self.pool()));
        match self.granted_roles() {
            Some(roles) => operations.with_gate(RoleGate::new(roles)),
            None => operations,
        }
    }
}

async fn list_organizations_handler<S>(
    State(app): State<S>,
    Query(query): Query<ListOrganizationsQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let page = operations.list_organizations(query).await?;
    Ok(Json(page))
}

async fn create_organization_handler<S>(
    State(app): State<S>,
    Json(payload): Json<CreateOrganizationPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let organization = operations.create_organization(payload).await?;
    Ok((StatusCode::CREATED, Json(organization)))
}

async fn get_organization_handler<S>(
    State(app): State<S>,
    Path(organization_id): Path<OrganizationId>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let organization = operations.get_organization(organization_id).await?;
    Ok(Json(organization))
}

async fn update_organization_handler<S>(
    State(app): State<S>,
    Path(organization_id): Path<OrganizationId>,
    Json(payload): Json<UpdateOrganizationPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let organization = operations
        .update_organization(organization_id, payload)
        .await?;
    Ok(Json(organization))
}

async fn delete_organization_handler<S>(
    State(app): State<S>,
    Path(organization_id): Path<OrganizationId>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    operations.delete_organization(organization_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn hierarchy_handler<S>(
    State(app): State<S>,
    Path(organization_id): Path<OrganizationId>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let report = operations.check_hierarchy(organization_id).await?;
    Ok(Json(report))
}

async fn tree_handler<S>(
    State(app): State<S>,
    Path(organization_id): Path<OrganizationId>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let tree = operations.org_tree(organization_id).await?;
    Ok(Json(tree))
}

async fn list_employees_handler<S>(
    State(app): State<S>,
    Path(organization_id): Path<OrganizationId>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let employees = operations.list_employees(organization_id).await?;
    Ok(Json(employees))
}

async fn create_employee_handler<S>(
    State(app): State<S>,
    Path(organization_id): Path<OrganizationId>,
    Json(payload): Json<CreateEmployeePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let employee = operations
        .create_employee(organization_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(employee)))
}

async fn get_employee_handler<S>(
    State(app): State<S>,
    Path((organization_id, employee_id)): Path<(OrganizationId, EmployeeId)>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let employee = operations.get_employee(organization_id, employee_id).await?;
    Ok(Json(employee))
}

async fn update_employee_handler<S>(
    State(app): State<S>,
    Path((organization_id, employee_id)): Path<(OrganizationId, EmployeeId)>,
    Json(payload): Json<UpdateEmployeePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let employee = operations
        .update_employee(organization_id, employee_id, payload)
        .await?;
    Ok(Json(employee))
}

async fn delete_employee_handler<S>(
    State(app): State<S>,
    Path((organization_id, employee_id)): Path<(OrganizationId, EmployeeId)>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let reparented = operations
        .delete_employee(organization_id, employee_id)
        .await?;
    Ok(Json(json!({ "reparentedReports": reparented })))
}

async fn promote_handler<S>(
    State(app): State<S>,
    Path((organization_id, employee_id)): Path<(OrganizationId, EmployeeId)>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let employee = operations.promote(organization_id, employee_id).await?;
    Ok(Json(employee))
}

async fn direct_reports_handler<S>(
    State(app): State<S>,
    Path((organization_id, employee_id)): Path<(OrganizationId, EmployeeId)>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let reports = operations
        .direct_reports(organization_id, employee_id)
        .await?;
    Ok(Json(reports))
}

async fn assign_manager_handler<S>(
    State(app): State<S>,
    Path((organization_id, employee_id)): Path<(OrganizationId, EmployeeId)>,
    Json(payload): Json<AssignManagerPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let manager = operations
        .assign_manager(organization_id, employee_id, payload)
        .await?;
    Ok(Json(manager))
}

async fn reporting_chain_handler<S>(
    State(app): State<S>,
    Path((organization_id, employee_id)): Path<(OrganizationId, EmployeeId)>,
) -> Result<impl IntoResponse, AppError>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    let operations = app.operations();
    let chain = operations
        .reporting_chain(organization_id, employee_id)
        .await?;
    Ok(Json(chain))
}

pub fn routes<S>() -> Router<S>
where
    S: OrgChartApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /orgcharts [GET,POST]");
    tracing::info!("Registering route /orgcharts/{{org_id}} [GET,PUT,DELETE]");
    tracing::info!("Registering route /orgcharts/{{org_id}}/hierarchy [GET]");
    tracing::info!("Registering route /orgcharts/{{org_id}}/tree [GET]");
    tracing::info!("Registering route /orgcharts/{{org_id}}/employees [GET,POST]");
    tracing::info!(
        "Registering route /orgcharts/{{org_id}}/employees/{{employee_id}} [GET,PUT,DELETE]"
    );
    tracing::info!("Registering route /orgcharts/{{org_id}}/employees/{{employee_id}}/promote [PUT]");
    tracing::info!(
        "Registering route /orgcharts/{{org_id}}/employees/{{employee_id}}/direct_reports [GET,PUT]"
    );
    tracing::info!("Registering route /orgcharts/{{org_id}}/employees/{{employee_id}}/chain [GET]");

    Router::new()
        .route(
            "/orgcharts",
            get(list_organizations_handler::<S>).post(create_organization_handler::<S>),
        )
        .route(
            "/orgcharts/{org_id}",
            get(get_organization_handler::<S>)
                .put(update_organization_handler::<S>)
                .delete(delete_organization_handler::<S>),
        )
        .route("/orgcharts/{org_id}/hierarchy", get(hierarchy_handler::<S>))
        .route("/orgcharts/{org_id}/tree", get(tree_handler::<S>))
        .route(
            "/orgcharts/{org_id}/employees",
            get(list_employees_handler::<S>).post(create_employee_handler::<S>),
        )
        .route(
            "/orgcharts/{org_id}/employees/{employee_id}",
            get(get_employee_handler::<S>)
                .put(update_employee_handler::<S>)
                .delete(delete_employee_handler::<S>),
        )
        .route(
            "/orgcharts/{org_id}/employees/{employee_id}/promote",
            put(promote_handler::<S>),
        )
        .route(
            "/orgcharts/{org_id}/employees/{employee_id}/direct_reports",
            get(direct_reports_handler::<S>).put(assign_manager_handler::<S>),
        )
        .route(
            "/orgcharts/{org_id}/employees/{employee_id}/chain",
            get(reporting_chain_handler::<S>),
        )
}

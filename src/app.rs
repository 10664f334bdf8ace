use axum::{
    Extension, Json, Router,
    extract::{FromRequest, FromRequestParts, Multipart, State},
    http::{StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{MethodRouter, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::agronomy::{AgronomyFilter, AgronomyPatch, AgronomyStore};
use crate::config::Config;
use crate::downloader::{self, ExportFormat};
use crate::error::{AppError, AppResult};
use crate::farm_report::{FarmReportFilter, FarmReportStore, NewFarmReport};
use crate::graph::{self, GraphOptions};
use crate::loader::{self, ImportFormat};
use crate::login::{self, Gate, Identity, Role, SessionStore, Surface, UserStore};

/// Roles allowed to read spray programs
pub const AGRONOMY_READ: &[Role] = &[
    Role::Admin,
    Role::Manager,
    Role::Agronomist,
    Role::Supervisor,
];

/// Roles allowed to add, bulk-set and import spray programs
pub const AGRONOMY_WRITE: &[Role] = &[Role::Admin, Role::Agronomist];

/// Roles allowed to set supervisor remarks
pub const AGRONOMY_REMARKS: &[Role] = &[Role::Admin, Role::Manager, Role::Supervisor];

/// Roles allowed to read farm reports
pub const FARM_REPORT_READ: &[Role] = Role::ALL;

/// Roles allowed to file farm reports
pub const FARM_REPORT_WRITE: &[Role] = &[Role::Admin, Role::Agronomist, Role::Scout];

/// Shared application state
///
/// Cloned into every handler; all members are reference counted.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionStore,
    pub users: Arc<UserStore>,
    pub agronomy: Arc<AgronomyStore>,
    pub farm_reports: Arc<FarmReportStore>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            sessions: SessionStore::new(Duration::from_secs(config.session_ttl_secs)),
            users: Arc::new(UserStore::new(config.users_file(), config.payroll_file())),
            agronomy: Arc::new(AgronomyStore::new(config.agronomy_file())),
            farm_reports: Arc::new(FarmReportStore::new(config.farm_report_file())),
            config: Arc::new(config),
        }
    }
}

/// JSON body extractor whose rejections use the API error envelope
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Query string extractor whose rejections use the API error envelope
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Path parameter extractor whose rejections use the API error envelope
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

fn success<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let gate_state = state.clone();
    let guard = move |method_router: MethodRouter<AppState>,
                      roles: &'static [Role],
                      surface: Surface| {
        method_router.route_layer(middleware::from_fn_with_state(
            Gate {
                state: gate_state.clone(),
                roles,
                surface,
            },
            login::require_roles,
        ))
    };
    let api = |method_router: MethodRouter<AppState>, roles: &'static [Role]| {
        guard(method_router, roles, Surface::Api)
    };
    let page = |method_router: MethodRouter<AppState>, roles: &'static [Role]| {
        guard(method_router, roles, Surface::Page)
    };

    Router::new()
        // Public pages and credential endpoints
        .route("/login", get(login::serve_login_page))
        .route("/register", get(login::serve_register_page))
        .route("/api/auth/register", post(login::handle_register))
        .route("/api/auth/login", post(login::handle_login))
        .route("/api/auth/logout", post(login::handle_logout))
        .route("/api/auth/session", get(login::handle_session))
        // Pages
        .route("/", page(get(serve_dashboard), Role::ALL))
        .route("/agronomy", page(get(serve_agronomy_page), AGRONOMY_READ))
        .route("/farm-report", page(get(serve_farm_report_page), FARM_REPORT_READ))
        // Agronomy
        .route(
            "/api/agronomy",
            api(get(list_agronomy), AGRONOMY_READ).merge(api(
                post(add_agronomy).put(bulk_set_agronomy),
                AGRONOMY_WRITE,
            )),
        )
        .route("/api/agronomy/search", api(get(list_agronomy), AGRONOMY_READ))
        .route(
            "/api/agronomy/:id/supervisor-remarks",
            api(
                axum::routing::patch(patch_supervisor_remarks),
                AGRONOMY_REMARKS,
            ),
        )
        .route("/api/agronomy/export", api(get(export_agronomy), AGRONOMY_READ))
        .route("/api/agronomy/import", api(post(import_agronomy), AGRONOMY_WRITE))
        // Farm reports
        .route(
            "/api/farm-report",
            api(get(search_farm_reports), FARM_REPORT_READ)
                .merge(api(post(append_farm_report), FARM_REPORT_WRITE)),
        )
        .route(
            "/api/farm-report/search",
            api(get(search_farm_reports), FARM_REPORT_READ),
        )
        .route(
            "/api/farm-report/chart",
            api(get(farm_report_chart), FARM_REPORT_READ),
        )
        .route(
            "/api/farm-report/chart.png",
            api(get(farm_report_chart_png), FARM_REPORT_READ),
        )
        .route(
            "/api/farm-report/export",
            api(get(export_farm_reports), FARM_REPORT_READ),
        )
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on the configured address until the process stops
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = config.bind_addr.clone();
    log::info!("Data directory: {}", config.data_dir.display());

    let app = router(AppState::new(config));
    let listener = TcpListener::bind(&bind_addr).await?;
    log::info!("Listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_dashboard() -> Html<&'static str> {
    Html(include_str!("./static/index.html"))
}

async fn serve_agronomy_page() -> Html<&'static str> {
    Html(include_str!("./static/agronomy.html"))
}

async fn serve_farm_report_page() -> Html<&'static str> {
    Html(include_str!("./static/farm_report.html"))
}

fn attachment(format: ExportFormat, stem: &str, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.{}\"", stem, format.extension()),
            ),
        ],
        bytes,
    )
        .into_response()
}

async fn list_agronomy(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<AgronomyFilter>,
) -> AppResult<Json<Value>> {
    Ok(success(state.agronomy.list(&filter)?))
}

async fn add_agronomy(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiJson(patch): ApiJson<AgronomyPatch>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let row = state.agronomy.add(patch)?;
    log::info!("{} added agronomy row {}", identity.username, row.id);
    Ok((StatusCode::CREATED, success(row)))
}

async fn bulk_set_agronomy(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiJson(patches): ApiJson<Vec<AgronomyPatch>>,
) -> AppResult<Json<Value>> {
    let count = patches.len();
    let rows = state.agronomy.bulk_set(patches)?;
    log::info!("{} bulk set {} agronomy rows", identity.username, count);
    Ok(success(rows))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SupervisorRemarks {
    supervisor_remarks: String,
}

async fn patch_supervisor_remarks(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<SupervisorRemarks>,
) -> AppResult<Json<Value>> {
    let row = state
        .agronomy
        .patch_supervisor_remarks(id, &body.supervisor_remarks)?;
    log::info!("{} set supervisor remarks on row {}", identity.username, id);
    Ok(success(row))
}

#[derive(Debug, Default, Deserialize)]
struct AgronomyExportQuery {
    format: Option<String>,
    #[serde(flatten)]
    filter: AgronomyFilter,
}

async fn export_agronomy(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<AgronomyExportQuery>,
) -> AppResult<Response> {
    let format: ExportFormat = query.format.as_deref().unwrap_or_default().parse()?;
    let rows = state.agronomy.list(&query.filter)?;
    let bytes = downloader::render(&downloader::agronomy_sheet(&rows), format)?;
    Ok(attachment(format, "agronomy", bytes))
}

#[derive(Debug, Default, Deserialize)]
struct ImportQuery {
    format: Option<String>,
}

/// Accept a spreadsheet upload in the multipart field `file`
async fn import_agronomy(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiQuery(query): ApiQuery<ImportQuery>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let mut upload: Option<(Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("Malformed upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(format!("Malformed upload: {}", e)))?;
        upload = Some((file_name, bytes.to_vec()));
    }

    let (file_name, bytes) = upload
        .filter(|(_, bytes)| !bytes.is_empty())
        .ok_or_else(|| AppError::bad_request("No file data received"))?;

    let format = match (query.format.as_deref(), file_name.as_deref()) {
        (Some(format), _) if !format.trim().is_empty() => format.parse()?,
        (_, Some(name)) => ImportFormat::from_file_name(name)?,
        _ => return Err(AppError::bad_request("Cannot tell the file format")),
    };

    let table = loader::read_table(&bytes, format)?;
    let summary = state.agronomy.import_table(&table)?;
    log::info!(
        "{} imported {} ({} rows)",
        identity.username,
        file_name.as_deref().unwrap_or("upload"),
        table.rows.len()
    );
    Ok(success(summary))
}

async fn search_farm_reports(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<FarmReportFilter>,
) -> AppResult<Json<Value>> {
    Ok(success(state.farm_reports.search(&filter)?))
}

async fn append_farm_report(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiJson(fields): ApiJson<NewFarmReport>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let report = state
        .farm_reports
        .append(fields, Some(&identity.username))?;
    Ok((StatusCode::CREATED, success(report)))
}

async fn farm_report_chart(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<FarmReportFilter>,
) -> AppResult<Json<Value>> {
    let reports = state.farm_reports.chart_series(&filter)?;
    let points = graph::trend_points(&reports);
    Ok(Json(json!({
        "success": true,
        "data": reports,
        "points": points,
    })))
}

async fn farm_report_chart_png(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<FarmReportFilter>,
) -> AppResult<Response> {
    let reports = state.farm_reports.chart_series(&filter)?;
    let png = graph::create_trend_graph(&graph::trend_points(&reports), &GraphOptions::default())?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct FarmReportExportQuery {
    format: Option<String>,
    #[serde(flatten)]
    filter: FarmReportFilter,
}

async fn export_farm_reports(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<FarmReportExportQuery>,
) -> AppResult<Response> {
    let format: ExportFormat = query.format.as_deref().unwrap_or_default().parse()?;
    let reports = state.farm_reports.search(&query.filter)?;
    let sheet = downloader::farm_report_sheet(&reports, state.config.utc_offset());
    let bytes = downloader::render(&sheet, format)?;
    Ok(attachment(format, "farm_reports", bytes))
}

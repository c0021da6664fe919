//! REST API for the site (exposed on port 11111)
//!
//! Public routes serve personalization and the lead form; `/admin/*` routes
//! sit behind the bearer-token middleware and drive the admin screens.

use axum::{
    extract::{Multipart, Path, Query, RawQuery, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::admin::{AdminError, CardView, Dashboard, PageController};
use crate::analytics::{AnalyticsSink, TracingAnalytics};
use crate::auth::{AuthError, AuthGate};
use crate::config::{
    load_image_settings, load_system_config, save_image_settings, save_system_config, AppConfig,
    ImageSettings, SystemConfig,
};
use crate::content::{ContentApplier, DomPatch, PatchSet};
use crate::geo::{GeoLocator, Location};
use crate::lead_form::{FormConfig, FormError, FormRegistry, LeadSubmission};
use crate::models::{AuthPayload, Campaign, ImageRecord, Lead};
use crate::rules::{ContentPayload, RuleEngine};
use crate::signals::{Signals, UrlParams};
use crate::storage::{Storage, StorageError};
use crate::store::StoreError;
use crate::transfer::TransferError;
use crate::visits::VisitTracker;

/// Shared app state for REST handlers
pub struct AppState {
    pub storage: Storage,
    pub auth: AuthGate,
    pub geo: GeoLocator,
    pub forms: FormRegistry,
}

impl AppState {
    pub fn new(storage: Storage, config: &AppConfig, geo: GeoLocator) -> Self {
        let mut forms = FormRegistry::new(storage.clone(), FormConfig::default());
        if load_system_config(&storage).analytics_enabled {
            let sink: Arc<dyn AnalyticsSink> = Arc::new(TracingAnalytics);
            forms = forms.with_analytics(sink);
        }
        Self {
            auth: AuthGate::new(storage.clone(), &config.jwt_secret),
            storage,
            geo,
            forms,
        }
    }

    fn in_maintenance(&self) -> bool {
        load_system_config(&self.storage).maintenance_mode
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Generic REST response (JSON)
#[derive(Serialize, Deserialize, Debug)]
pub struct RestResponse {
    pub success: bool,
    pub message: String,
}

impl RestResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }

    fn failed(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success: false,
                message: message.into(),
            }),
        )
    }
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let claims = state.auth.authorize(token, Utc::now()).map_err(|e| {
        debug!(error = %e, "admin request rejected");
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Create the Axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/admin/session", get(session_handler))
        .route("/admin/logout", post(logout_handler))
        .route("/admin/dashboard", get(dashboard_handler))
        .route("/admin/config", get(get_config_handler).put(put_config_handler))
        .route("/admin/images/upload", post(upload_image_handler))
        .merge(record_routes::<Lead>())
        .merge(record_routes::<Campaign>())
        .merge(record_routes::<ImageRecord>())
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .route("/login", post(login_handler))
        .route("/personalize", get(personalize_handler))
        .route("/form", get(form_handler))
        .route("/leads/submit", post(submit_lead_handler))
        .merge(admin_routes)
        .with_state(state)
}

fn record_routes<T>() -> Router<Arc<AppState>>
where
    T: CardView,
    T::Filter: DeserializeOwned,
{
    let base = format!("/admin/{}", T::SCREEN);
    Router::new()
        .route(&base, get(list_records::<T>).post(create_record::<T>))
        .route(&format!("{}/export", base), get(export_records::<T>))
        .route(&format!("{}/import", base), post(import_records::<T>))
        .route(
            &format!("{}/:id", base),
            get(edit_form_handler::<T>)
                .put(update_record::<T>)
                .delete(delete_record::<T>),
        )
}

async fn health_handler() -> Json<RestResponse> {
    RestResponse::ok("site API healthy")
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, (StatusCode, Json<RestResponse>)> {
    match state.auth.login(&payload.email, &payload.password, Utc::now()) {
        Ok(session) => Ok(Json(session).into_response()),
        Err(e @ AuthError::InvalidCredentials) => {
            Err(RestResponse::failed(StatusCode::UNAUTHORIZED, e.to_string()))
        }
        Err(e @ AuthError::RateLimited { .. }) => {
            Err(RestResponse::failed(StatusCode::TOO_MANY_REQUESTS, e.to_string()))
        }
        Err(e) => {
            error!(error = %e, "login failed");
            Err(RestResponse::failed(StatusCode::INTERNAL_SERVER_ERROR, "login unavailable"))
        }
    }
}

async fn session_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
) -> Json<Value> {
    let now = Utc::now();
    Json(json!({
        "email": claims.sub,
        "user": state.auth.current_user(now),
        "visibility": state.auth.visibility(now),
    }))
}

async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
) -> Result<Json<RestResponse>, StatusCode> {
    state.auth.logout(Utc::now()).map_err(|e| {
        error!(error = %e, "logout failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    info!(email = %claims.sub, "admin logged out");
    Ok(RestResponse::ok("Logged out"))
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct PersonalizeQuery {
    pub ip: Option<String>,
    pub page: Option<String>,
}

#[derive(Serialize)]
pub struct PersonalizeResponse {
    pub content: ContentPayload,
    pub location: Option<Location>,
    pub patches: Vec<DomPatch>,
}

/// Client IP: first `X-Forwarded-For` entry, else the `ip` parameter.
fn client_ip(headers: &HeaderMap, param: Option<&str>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| param.map(str::to_string))
}

async fn personalize_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PersonalizeQuery>,
    RawQuery(raw): RawQuery,
) -> Result<Json<PersonalizeResponse>, (StatusCode, Json<RestResponse>)> {
    if state.in_maintenance() {
        return Err(unavailable());
    }
    let now = Utc::now();
    let raw = raw.unwrap_or_default();

    let location = match client_ip(&headers, query.ip.as_deref()) {
        Some(ip) => state.geo.locate(&ip).await,
        None => None,
    };

    let visit = query.page.as_deref().and_then(|page| {
        let tracker = VisitTracker::new(state.storage.clone());
        if let Err(e) = tracker.track_session(page, &UrlParams::parse(&raw), now) {
            warn!(error = %e, "failed to track session");
        }
        tracker
            .record_visit(page, now)
            .map_err(|e| warn!(error = %e, "failed to record visit"))
            .ok()
    });

    let system = load_system_config(&state.storage);
    let signals = Signals::from_query(&raw)
        .with_location(location.clone())
        .with_visit(visit);
    let content = RuleEngine::new(&system.default_service).resolve(&signals);

    let mut patches = PatchSet::new();
    ContentApplier::new(&system.site_name).apply(&content, &mut patches);

    Ok(Json(PersonalizeResponse {
        content,
        location,
        patches: patches.patches,
    }))
}

fn unavailable() -> (StatusCode, Json<RestResponse>) {
    RestResponse::failed(
        StatusCode::SERVICE_UNAVAILABLE,
        "The site is down for maintenance. Please check back soon.",
    )
}

/// A fresh form per page load; the hidden token routes its submission back.
async fn form_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Html<String>, (StatusCode, Json<RestResponse>)> {
    if state.in_maintenance() {
        return Err(unavailable());
    }
    let (_, html) = state.forms.open(Utc::now());
    Ok(Html(html))
}

async fn submit_lead_handler(
    State(state): State<Arc<AppState>>,
    RawQuery(raw): RawQuery,
    Json(submission): Json<LeadSubmission>,
) -> (StatusCode, Json<Value>) {
    if state.in_maintenance() {
        let (status, Json(body)) = unavailable();
        return (status, Json(json!({ "success": false, "message": body.message })));
    }
    let attribution = UrlParams::parse(raw.as_deref().unwrap_or("")).attribution();

    match state.forms.submit(submission, attribution, Utc::now()) {
        Ok(outcome) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "lead": outcome.lead,
                "banner": outcome.banner,
                "nextCaptcha": outcome.next_captcha,
            })),
        ),
        Err(e) => {
            let status = match &e {
                FormError::Validation(_) | FormError::Captcha => StatusCode::UNPROCESSABLE_ENTITY,
                FormError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                FormError::Csrf => StatusCode::FORBIDDEN,
                FormError::Store(err) => {
                    error!(error = %err, "failed to store lead");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (status, Json(json!({ "success": false, "banner": e.banner() })))
        }
    }
}

fn admin_status(e: AdminError) -> StatusCode {
    match e {
        AdminError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        AdminError::Store(StoreError::Invalid { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        AdminError::Transfer(TransferError::Store(e)) | AdminError::Store(e) => {
            error!(error = %e, "admin storage failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        AdminError::Transfer(_) => StatusCode::BAD_REQUEST,
        AdminError::Load(e) => {
            error!(error = %e, "admin load task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn load_page<T: CardView>(state: &AppState) -> Result<PageController<T>, StatusCode> {
    let mut page = PageController::<T>::new(state.storage.clone());
    page.init().await.map_err(admin_status)?;
    Ok(page)
}

#[derive(Serialize)]
pub struct RecordList<T> {
    pub total: usize,
    pub records: Vec<T>,
    pub html: String,
}

async fn list_records<T>(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<T::Filter>,
) -> Result<Json<RecordList<T>>, StatusCode>
where
    T: CardView,
    T::Filter: DeserializeOwned,
{
    let mut page = load_page::<T>(&state).await?;
    page.set_filter(filter);
    Ok(Json(RecordList {
        total: page.records().len(),
        records: page.visible().into_iter().cloned().collect(),
        html: page.html().to_string(),
    }))
}

async fn create_record<T: CardView>(
    State(state): State<Arc<AppState>>,
    Json(record): Json<T>,
) -> Result<(StatusCode, Json<T>), StatusCode> {
    let mut page = load_page::<T>(&state).await?;
    let added = page.add(record).map_err(admin_status)?;
    Ok((StatusCode::CREATED, Json(added)))
}

async fn edit_form_handler<T: CardView>(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let page = load_page::<T>(&state).await?;
    let values = page.edit_form(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!(values)))
}

async fn update_record<T: CardView>(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<T>, StatusCode> {
    let mut page = load_page::<T>(&state).await?;
    page.save_edit(&id, &patch).map(Json).map_err(admin_status)
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct DeleteQuery {
    pub confirm: bool,
}

async fn delete_record<T: CardView>(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<RestResponse>, (StatusCode, Json<RestResponse>)> {
    let mut page = load_page::<T>(&state)
        .await
        .map_err(|status| RestResponse::failed(status, "failed to load records"))?;
    match page.delete(&id, |_| query.confirm) {
        Ok(true) => Ok(RestResponse::ok(format!("{} {} deleted", T::KIND, id))),
        Ok(false) => Err(RestResponse::failed(
            StatusCode::PRECONDITION_REQUIRED,
            "Deletion must be confirmed with ?confirm=true",
        )),
        Err(e) => {
            let message = e.to_string();
            Err(RestResponse::failed(admin_status(e), message))
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct FormatQuery {
    pub format: Option<String>,
}

impl FormatQuery {
    fn is_json(&self) -> bool {
        self.format.as_deref().is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}

async fn export_records<T: CardView>(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FormatQuery>,
) -> Result<Response, StatusCode> {
    let page = load_page::<T>(&state).await?;
    let (body, content_type, extension) = if query.is_json() {
        (page.export_json().map_err(admin_status)?, "application/json", "json")
    } else {
        (page.export_csv(), "text/csv; charset=utf-8", "csv")
    };
    let disposition = format!(
        "attachment; filename=\"{}-export-{}.{}\"",
        T::SCREEN,
        Utc::now().format("%Y-%m-%d"),
        extension
    );
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn import_records<T: CardView>(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FormatQuery>,
    body: String,
) -> Result<Response, StatusCode> {
    let mut page = load_page::<T>(&state).await?;
    let report = if query.is_json() {
        page.import_json(&body)
    } else {
        page.import_csv(&body)
    }
    .map_err(admin_status)?;
    info!(kind = T::KIND, accepted = report.accepted, rejected = report.rejected.len(), "records imported");
    Ok(Json(report).into_response())
}

async fn upload_image_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImageRecord>), (StatusCode, Json<RestResponse>)> {
    let settings = load_image_settings(&state.storage);
    let mut category = settings.default_category.clone();
    let mut upload: Option<(String, Vec<u8>)> = None;

    let bad_request = |message: &str| RestResponse::failed(StatusCode::BAD_REQUEST, message);
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| bad_request("malformed upload"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        match (name.as_str(), file_name) {
            ("category", _) => {
                category = field.text().await.map_err(|_| bad_request("malformed upload"))?;
            }
            (_, Some(file_name)) => {
                let bytes = field.bytes().await.map_err(|_| bad_request("malformed upload"))?;
                upload = Some((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (file_name, bytes) = upload.ok_or_else(|| bad_request("no file in upload"))?;
    let mut image = ImageRecord::from_upload(&file_name, &category, &bytes);
    if !image.extension().is_some_and(|ext| settings.allows(&ext)) {
        return Err(RestResponse::failed(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("{} is not an allowed image type", file_name),
        ));
    }
    if image.size > settings.max_upload_bytes {
        return Err(RestResponse::failed(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("{} exceeds the {} byte upload limit", file_name, settings.max_upload_bytes),
        ));
    }

    let mut page = load_page::<ImageRecord>(&state)
        .await
        .map_err(|status| RestResponse::failed(status, "failed to load images"))?;
    image = page
        .add(image)
        .map_err(|e| RestResponse::failed(admin_status(e), "failed to save image"))?;
    Ok((StatusCode::CREATED, Json(image)))
}

async fn dashboard_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    let mut dashboard = Dashboard::new(state.storage.clone());
    let stats = dashboard.init().await.map_err(admin_status)?.clone();
    Ok(Json(json!({ "stats": stats, "html": dashboard.html() })))
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigBody {
    pub system: Option<SystemConfig>,
    pub images: Option<ImageSettings>,
}

async fn get_config_handler(State(state): State<Arc<AppState>>) -> Json<ConfigBody> {
    Json(ConfigBody {
        system: Some(load_system_config(&state.storage)),
        images: Some(load_image_settings(&state.storage)),
    })
}

async fn put_config_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConfigBody>,
) -> Result<Json<RestResponse>, StatusCode> {
    let save_failed = |e: StorageError| {
        error!(error = %e, "failed to save settings");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    if let Some(system) = &body.system {
        save_system_config(&state.storage, system).map_err(save_failed)?;
    }
    if let Some(images) = &body.images {
        save_image_settings(&state.storage, images).map_err(save_failed)?;
    }
    Ok(RestResponse::ok("Settings saved"))
}

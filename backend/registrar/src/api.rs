//! Axum HTTP surface: the public event page with its registration form, the
//! admin console, and the payment-status callback.
//!
//! Pages are JSON views. State-changing form posts answer with `303 See
//! Other` so a reload never repeats them.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Multipart, OriginalUri, Path, Query, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Redirect, Response,
    },
    routing::{get, post},
    Extension, Form, Json, Router,
};
use futures::{stream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::admin::{self, Attachments, EditableEvent, EventForm, EventSummary};
use crate::auth::{self, Auth, Session, LOGIN_PATH};
use crate::changes::ChangeFeed;
use crate::config::Config;
use crate::db;
use crate::errors::{AppError, Result};
use crate::models::Event;
use crate::payment::PaymentClient;
use crate::registrants::{
    self, RegistrantFeed, RegistrantQuery, RegistrantView, StatusFilter,
};
use crate::registration::{EventBinding, FormSessions, FormView, PageLoad};
use crate::sidebar::EventSidebar;
use crate::storage::{ImageStore, ImageUpload};
use crate::validation::{Donation, PersonalInfo};

pub const FORM_COOKIE: &str = "form_session";
const DASHBOARD_PATH: &str = "/admin/dashboard";
const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";

pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub changes: ChangeFeed,
    pub auth: Auth,
    pub forms: FormSessions,
    pub payment: PaymentClient,
    pub images: ImageStore,
    pub registrants: RegistrantFeed,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Config, client: Client) -> Self {
        let changes = ChangeFeed::new();
        Self {
            auth: Auth::new(pool.clone(), config.session_ttl_secs),
            forms: FormSessions::new(Duration::from_secs(
                config.form_session_ttl_secs.max(0) as u64,
            )),
            payment: PaymentClient::new(
                client,
                config.payment_function_url.clone(),
                config.payment_api_key.clone(),
                config.payment_max_attempts,
            ),
            images: ImageStore::new(&config.storage_dir, &config.public_base_url),
            registrants: RegistrantFeed::new(
                pool.clone(),
                changes.clone(),
                Duration::from_millis(config.refresh_debounce_ms),
            ),
            changes,
            pool,
            config,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/admin", get(admin_home))
        .route("/admin/dashboard", get(dashboard))
        .route("/admin/registrants/export", get(export_registrants))
        .route("/admin/registrants/stream", get(stream_registrants))
        .route("/admin/events/create", get(create_event_page).post(create_event))
        .route("/admin/events/edit/:id", get(edit_event_page).post(edit_event))
        .route("/admin/events/:id/publish", post(set_publication))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth::require_admin,
        ));

    let images = ServeDir::new(state.images.bucket_dir());
    let images_prefix = state.images.route_prefix();

    Router::new()
        .route("/health", get(health))
        .route("/", get(|| async { Redirect::to(LOGIN_PATH) }))
        .route("/e/:slug", get(event_page))
        .route("/e/:slug/form/next", post(form_next))
        .route("/e/:slug/form/back", post(form_back))
        .route("/e/:slug/form/submit", post(form_submit))
        .route("/e/:slug/form/register-another", post(form_register_another))
        .route("/e/:slug/form/retry", post(form_retry))
        .route("/admin/login", get(login_page).post(login))
        .route("/admin/logout", post(logout))
        .route("/webhooks/payment", post(payment_webhook))
        .merge(admin)
        .nest_service(&images_prefix, images)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct NotFoundView {
    pub title: &'static str,
    pub message: String,
    pub login_url: &'static str,
}

#[derive(Serialize)]
pub struct EventPage {
    pub event: EventSidebar,
    pub form: FormView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct LoginView {
    pub title: &'static str,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct Tab {
    pub id: &'static str,
    pub label: &'static str,
    pub url: String,
    pub active: bool,
}

#[derive(Serialize)]
pub struct DashboardView {
    pub signed_in_as: String,
    pub tabs: Vec<Tab>,
    pub logout_url: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<EventSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrants: Option<RegistrantView>,
    pub create_url: &'static str,
}

#[derive(Serialize)]
pub struct EventFormView {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EditableEvent>,
    pub form: EventForm,
}

// ─────────────────────────────────────────────────────────
// Form session cookie
// ─────────────────────────────────────────────────────────

/// The visitor's registration-form session. A new id is minted when the
/// request carries none, and handed back as a cookie on the response.
#[derive(Debug, Clone, Copy)]
pub struct FormCookie {
    pub id: Uuid,
    fresh: bool,
}

#[async_trait]
impl<S> FromRequestParts<S> for FormCookie
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        let existing = auth::cookie_value(&parts.headers, FORM_COOKIE)
            .and_then(|value| Uuid::parse_str(&value).ok());
        Ok(match existing {
            Some(id) => Self { id, fresh: false },
            None => Self {
                id: Uuid::new_v4(),
                fresh: true,
            },
        })
    }
}

impl FormCookie {
    fn attach(self, mut response: Response) -> Response {
        if self.fresh {
            let cookie = format!("{FORM_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax", self.id);
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        response
    }
}

fn see_other(location: &str) -> Response {
    Redirect::to(location).into_response()
}

fn with_cookie(mut response: Response, cookie: String) -> Response {
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

// ─────────────────────────────────────────────────────────
// Public event page
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn not_found(slug: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(NotFoundView {
            title: "Event not found",
            message: format!("There is no published event at /e/{slug}."),
            login_url: LOGIN_PATH,
        }),
    )
        .into_response()
}

/// The published event behind `slug`, or the not-found page.
async fn published_event(state: &AppState, slug: &str) -> std::result::Result<Event, Response> {
    match db::get_published_event_by_slug(&state.pool, slug).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) => Err(not_found(slug)),
        Err(e) => Err(e.into_response()),
    }
}

async fn render_page(
    state: &AppState,
    cookie: FormCookie,
    event: &Event,
    status: StatusCode,
    error: Option<String>,
) -> Response {
    let binding = EventBinding::from(event);
    let form = state.forms.with_form(cookie.id, &binding, |form| form.view()).await;
    let page = EventPage {
        event: EventSidebar::from_event(Some(event), state.config.display_offset),
        form,
        error,
    };
    cookie.attach((status, Json(page)).into_response())
}

/// Answer a failed form action with the page and the error that stopped it.
async fn form_failure(state: &AppState, cookie: FormCookie, event: &Event, err: AppError) -> Response {
    debug!("Form action on {} failed: {err}", event.slug);
    let status = err.status_code();
    render_page(state, cookie, event, status, Some(err.to_string())).await
}

fn page_path(slug: &str) -> String {
    format!("/e/{slug}")
}

/// `GET /e/:slug`
pub async fn event_page(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    OriginalUri(uri): OriginalUri,
    cookie: FormCookie,
) -> Response {
    let event = match published_event(&state, &slug).await {
        Ok(event) => event,
        Err(response) => return response,
    };
    let binding = EventBinding::from(&event);

    let load = state
        .forms
        .with_form(cookie.id, &binding, |form| form.on_page_load(uri.path(), uri.query()))
        .await;
    if let PageLoad::Redirect(location) = load {
        info!("Payment outcome received for {slug}");
        return cookie.attach(see_other(&location));
    }

    render_page(&state, cookie, &event, StatusCode::OK, None).await
}

/// Run a synchronous form transition and redirect back to the page.
async fn form_action(
    state: &AppState,
    slug: &str,
    cookie: FormCookie,
    action: impl FnOnce(&mut crate::registration::RegistrationForm) -> Result<()>,
) -> Response {
    let event = match published_event(state, slug).await {
        Ok(event) => event,
        Err(response) => return response,
    };
    let binding = EventBinding::from(&event);

    match state.forms.with_form(cookie.id, &binding, action).await {
        Ok(()) => cookie.attach(see_other(&page_path(slug))),
        Err(e) => form_failure(state, cookie, &event, e).await,
    }
}

/// `POST /e/:slug/form/next`
pub async fn form_next(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    cookie: FormCookie,
    Json(personal): Json<PersonalInfo>,
) -> Response {
    form_action(&state, &slug, cookie, |form| {
        form.update_personal(personal)?;
        form.next()
    })
    .await
}

/// `POST /e/:slug/form/back`
pub async fn form_back(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    cookie: FormCookie,
) -> Response {
    form_action(&state, &slug, cookie, |form| form.back()).await
}

/// `POST /e/:slug/form/register-another`
pub async fn form_register_another(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    cookie: FormCookie,
) -> Response {
    form_action(&state, &slug, cookie, |form| form.register_another()).await
}

/// `POST /e/:slug/form/retry`
pub async fn form_retry(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    cookie: FormCookie,
) -> Response {
    form_action(&state, &slug, cookie, |form| form.retry()).await
}

/// `POST /e/:slug/form/submit`
///
/// Creates the payment link, records the pending registration and sends the
/// visitor to the provider.
pub async fn form_submit(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    cookie: FormCookie,
    Json(donation): Json<Donation>,
) -> Response {
    let event = match published_event(&state, &slug).await {
        Ok(event) => event,
        Err(response) => return response,
    };
    let binding = EventBinding::from(&event);

    let (link, registration) = match state
        .forms
        .submit(cookie.id, &binding, donation, &state.payment)
        .await
    {
        Ok(created) => created,
        Err(e) => return form_failure(&state, cookie, &event, e).await,
    };

    if let Err(e) = db::insert_registration(&state.pool, &state.changes, &registration).await {
        warn!("Payment link created but the registration was not recorded: {e}");
        return form_failure(&state, cookie, &event, e).await;
    }

    info!("Redirecting registrant for {slug} to the payment provider");
    cookie.attach(see_other(&link.url))
}

// ─────────────────────────────────────────────────────────
// Admin authentication
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

fn login_view(error: Option<String>) -> LoginView {
    LoginView {
        title: "Admin Login",
        action: LOGIN_PATH,
        error,
    }
}

/// `GET /admin/login`
pub async fn login_page(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = auth::cookie_value(&headers, auth::SESSION_COOKIE) {
        if let Ok(Some(_)) = state.auth.session(&token).await {
            return see_other(DASHBOARD_PATH);
        }
    }
    Json(login_view(None)).into_response()
}

/// `POST /admin/login`
pub async fn login(State(state): State<Arc<AppState>>, Form(request): Form<LoginRequest>) -> Response {
    match state.auth.sign_in(&request.email, &request.password).await {
        Ok(session) => with_cookie(see_other(DASHBOARD_PATH), auth::session_cookie(&session)),
        Err(AppError::Unauthorized(message)) => {
            (StatusCode::UNAUTHORIZED, Json(login_view(Some(message)))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// `POST /admin/logout`
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    if let Some(token) = auth::cookie_value(&headers, auth::SESSION_COOKIE) {
        state.auth.sign_out(&token).await?;
    }
    Ok(with_cookie(see_other(LOGIN_PATH), auth::cleared_session_cookie()))
}

// ─────────────────────────────────────────────────────────
// Admin console
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct DashboardParams {
    pub tab: Option<String>,
    #[serde(rename = "eventId")]
    pub event_id: Option<String>,
    pub q: Option<String>,
    pub status: Option<String>,
}

impl DashboardParams {
    fn registrant_query(&self) -> RegistrantQuery {
        RegistrantQuery {
            event_id: self.event_id.clone().filter(|id| !id.is_empty()),
            search: self.q.clone().unwrap_or_default(),
            status: StatusFilter::parse(self.status.as_deref()),
        }
    }
}

/// `GET /admin`
pub async fn admin_home() -> Redirect {
    Redirect::to(DASHBOARD_PATH)
}

/// `GET /admin/dashboard?tab=&eventId=&q=&status=`
///
/// An `eventId` without an explicit tab opens the registrant list.
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Query(params): Query<DashboardParams>,
) -> Result<Json<DashboardView>> {
    let tab = match params.tab.as_deref() {
        Some("registrants") => "registrants",
        Some(_) => "events",
        None if params.event_id.is_some() => "registrants",
        None => "events",
    };

    let (events, registrants) = if tab == "events" {
        let events = admin::list_events(&state.pool, state.config.display_offset).await?;
        (Some(events), None)
    } else {
        let view = registrants::load_view(
            &state.pool,
            &params.registrant_query(),
            state.config.display_offset,
        )
        .await?;
        (None, Some(view))
    };

    let tabs = [("events", "Events"), ("registrants", "Registrants")]
        .into_iter()
        .map(|(id, label)| Tab {
            id,
            label,
            url: format!("{DASHBOARD_PATH}?tab={id}"),
            active: id == tab,
        })
        .collect();

    Ok(Json(DashboardView {
        signed_in_as: session.email,
        tabs,
        logout_url: "/admin/logout",
        events,
        registrants,
        create_url: "/admin/events/create",
    }))
}

/// `GET /admin/registrants/export`
///
/// The rows currently visible in the list, as a CSV download.
pub async fn export_registrants(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DashboardParams>,
) -> Result<Response> {
    let query = params.registrant_query();
    let records = registrants::fetch_registrants(&state.pool, query.event_id.as_deref()).await?;
    let rows = query.apply(records);
    let csv = registrants::to_csv(&rows, state.config.display_offset);
    let file_name = registrants::export_file_name(chrono::Utc::now().date_naive());
    info!("Exporting {} registrants to {file_name}", rows.len());

    let disposition = format!("attachment; filename=\"{file_name}\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(csv),
    )
        .into_response())
}

/// `GET /admin/registrants/stream`
///
/// Server-sent events carrying the refreshed registrant view whenever the
/// registrations change. The stream ends when the admin signs out.
pub async fn stream_registrants(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Query(params): Query<DashboardParams>,
) -> Result<Sse<impl Stream<Item = std::result::Result<SseEvent, axum::Error>>>> {
    let query = params.registrant_query();
    let title = registrants::filter_title(&state.pool, query.event_id.as_deref()).await?;
    let offset = state.config.display_offset;
    let subscription = state.registrants.subscribe(query.event_id.clone());

    let snapshots = stream::unfold(subscription, |mut subscription| async move {
        subscription.next().await.map(|rows| (rows, subscription))
    });

    let auth = state.auth.clone();
    let signed_out = async move {
        auth.session_ended(&session).await;
        debug!("Registrant stream closed by sign-out");
    };

    let events = snapshots
        .map(move |rows| {
            let view = RegistrantView::build(rows, &query, title.as_deref(), offset);
            SseEvent::default().event("registrants").json_data(view)
        })
        .take_until(signed_out);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// `GET /admin/events/create`
pub async fn create_event_page() -> Json<EventFormView> {
    Json(EventFormView {
        action: "/admin/events/create".to_string(),
        event: None,
        form: EventForm::default(),
    })
}

/// Split the console's multipart body into the event JSON and its images.
///
/// Parts: `event` (JSON [`EventForm`]), `speaker_photo_<index>` and
/// `moderator_photo` (files). Empty file parts are skipped.
async fn read_event_parts(mut multipart: Multipart) -> Result<(EventForm, Attachments)> {
    let bad_part = |e: axum::extract::multipart::MultipartError| AppError::BadRequest(e.to_string());
    let mut form = None;
    let mut attachments = Attachments::default();

    while let Some(field) = multipart.next_field().await.map_err(bad_part)? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or(&name).to_string();
        let bytes = field.bytes().await.map_err(bad_part)?;

        if name == "event" {
            let parsed: EventForm = serde_json::from_slice(&bytes)
                .map_err(|e| AppError::BadRequest(format!("invalid event part: {e}")))?;
            form = Some(parsed);
            continue;
        }
        if bytes.is_empty() {
            continue;
        }

        let upload = ImageUpload {
            file_name,
            bytes: bytes.to_vec(),
        };
        if name == "moderator_photo" {
            attachments.moderator = Some(upload);
        } else if let Some(index) = name
            .strip_prefix("speaker_photo_")
            .and_then(|i| i.parse::<usize>().ok())
        {
            attachments.speakers.insert(index, upload);
        } else {
            debug!("Ignoring multipart field {name}");
        }
    }

    let form = form.ok_or_else(|| AppError::BadRequest("missing `event` part".to_string()))?;
    Ok((form, attachments))
}

/// `POST /admin/events/create`
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Redirect> {
    let (form, attachments) = read_event_parts(multipart).await?;
    admin::create_event(
        &state.pool,
        &state.images,
        &form,
        &attachments,
        state.config.display_offset,
    )
    .await?;
    Ok(Redirect::to("/admin/dashboard?tab=events"))
}

/// `GET /admin/events/edit/:id`
pub async fn edit_event_page(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EventFormView>> {
    let editable = admin::load_for_edit(&state.pool, &id, state.config.display_offset).await?;
    Ok(Json(EventFormView {
        action: format!("/admin/events/edit/{id}"),
        form: editable.form.clone(),
        event: Some(editable),
    }))
}

/// `POST /admin/events/edit/:id`
pub async fn edit_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Redirect> {
    let (form, attachments) = read_event_parts(multipart).await?;
    admin::update_event(
        &state.pool,
        &state.images,
        &id,
        &form,
        &attachments,
        state.config.display_offset,
    )
    .await?;
    Ok(Redirect::to("/admin/dashboard?tab=events"))
}

#[derive(Debug, Deserialize)]
pub struct PublicationRequest {
    pub published: bool,
}

/// `POST /admin/events/:id/publish`
pub async fn set_publication(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Form(request): Form<PublicationRequest>,
) -> Result<Redirect> {
    db::set_event_published(&state.pool, &id, request.published).await?;
    info!("Event {id} published = {}", request.published);
    Ok(Redirect::to("/admin/dashboard?tab=events"))
}

// ─────────────────────────────────────────────────────────
// Payment-status callback
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PaymentStatusUpdate {
    /// Provider reference returned at link creation, or the registration id.
    #[serde(alias = "order_id", alias = "id")]
    pub reference: String,
    #[serde(alias = "transaction_status")]
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub updated: usize,
}

/// `POST /webhooks/payment`
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<PaymentStatusUpdate>,
) -> Result<Json<WebhookResponse>> {
    let Some(expected) = state.config.webhook_token.as_deref() else {
        return Err(AppError::Unauthorized("payment callbacks are not enabled".to_string()));
    };
    let presented = headers
        .get(WEBHOOK_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    if !auth::token_matches(presented, expected) {
        warn!("Rejected payment callback with a bad token");
        return Err(AppError::Unauthorized("bad webhook token".to_string()));
    }

    let status = update.status.trim().to_ascii_lowercase();
    if status.is_empty() {
        return Err(AppError::BadRequest("status is required".to_string()));
    }

    let updated =
        db::update_registration_status(&state.pool, &state.changes, &update.reference, &status)
            .await?;
    if updated.is_empty() {
        return Err(AppError::NotFound(format!("Registration {}", update.reference)));
    }

    info!("Payment {} is now {status}", update.reference);
    Ok(Json(WebhookResponse {
        updated: updated.len(),
    }))
}

// ─────────────────────────────────────────────────────────
// Router tests
// ─────────────────────────────────────────────────────────

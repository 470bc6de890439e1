use crate::catalog::content::ChallengeContent;
use crate::catalog::{Category, CategoryKey, CategoryRegistry};
use crate::config::Config;
use crate::identity::{AccessToken, IdentityProvider, sign_in};
use crate::ledger::LedgerError;
use crate::ledger::model::{ActivityLogEntry, AppData, AuthUser, CategoryStats};
use crate::provider::ContentProvider;
use crate::report::{self, HistoryPage, MonthCalendar, RankedCategory};
use crate::session::{ContentRequest, Session, SessionError};
use anyhow::{Context, anyhow};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<Config>,
    pub registry: Arc<CategoryRegistry>,
    pub session: Arc<Mutex<Session>>,
    pub provider: Option<Arc<dyn ContentProvider>>,
    pub identity: Option<Arc<dyn IdentityProvider>>,
    pub access_token: Arc<StdMutex<Option<AccessToken>>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/categories", get(categories))
        .route("/api/v1/session", get(session_get))
        .route("/api/v1/session/login", post(session_login))
        .route("/api/v1/session/logout", post(session_logout))
        .route("/api/v1/auth/kakao/url", get(kakao_url))
        .route("/api/v1/auth/kakao/callback", get(kakao_callback))
        .route("/api/v1/me", get(me))
        .route(
            "/api/v1/me/birth-date",
            put(birth_date_put).delete(birth_date_delete),
        )
        .route("/api/v1/challenges/:category", get(challenge_get))
        .route(
            "/api/v1/challenges/:category/complete",
            post(challenge_complete),
        )
        .route("/api/v1/activity", get(activity_history))
        .route("/api/v1/activity/today", get(activity_today))
        .route("/api/v1/activity/calendar", get(activity_calendar))
        .route("/api/v1/stats", get(stats))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    page: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CalendarQuery {
    month: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KakaoCallbackQuery {
    code: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BirthDatePayload {
    birth_date: String,
}

#[derive(Debug, Default, Deserialize)]
struct CompletePayload {
    content: Option<Value>,
}

#[derive(Debug, Serialize)]
struct StatusPayload {
    version: &'static str,
    authenticated: bool,
    user_id: Option<String>,
    today: String,
    content_provider_configured: bool,
    kakao_login_configured: bool,
    cached_entries: usize,
    api_port: u16,
}

#[derive(Debug, Serialize)]
struct CategoriesPayload {
    categories: Vec<Category>,
}

#[derive(Debug, Serialize)]
struct SessionPayload {
    authenticated: bool,
    user: Option<AuthUser>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum ChallengeStatus {
    Ready,
    NeedsBirthDate,
}

#[derive(Debug, Serialize)]
struct ChallengePayload {
    category: CategoryKey,
    name: String,
    date: String,
    status: ChallengeStatus,
    cached: bool,
    content: Option<ChallengeContent>,
}

#[derive(Debug, Serialize)]
struct TodayPayload {
    date: String,
    completed: bool,
    entry: Option<ActivityLogEntry>,
}

#[derive(Debug, Serialize)]
struct StatsPayload {
    total: u32,
    category_stats: CategoryStats,
    ranking: Vec<RankedCategory>,
}

async fn status(State(state): State<ApiState>) -> ApiResult<Json<StatusPayload>> {
    let session = state.session.lock().await;

    Ok(Json(StatusPayload {
        version: env!("CARGO_PKG_VERSION"),
        authenticated: session.current_user().is_some(),
        user_id: session.current_user().map(|user| user.id.clone()),
        today: session.today().format("%Y-%m-%d").to_string(),
        content_provider_configured: state.provider.is_some(),
        kakao_login_configured: state.identity.is_some(),
        cached_entries: session.cached_entries(),
        api_port: state.config.api_port,
    }))
}

async fn categories(State(state): State<ApiState>) -> ApiResult<Json<CategoriesPayload>> {
    Ok(Json(CategoriesPayload {
        categories: state.registry.iter().cloned().collect(),
    }))
}

async fn session_get(State(state): State<ApiState>) -> ApiResult<Json<SessionPayload>> {
    let session = state.session.lock().await;
    let user = session.current_user().cloned();

    Ok(Json(SessionPayload {
        authenticated: user.is_some(),
        user,
    }))
}

/// Accepts a profile resolved client-side (Google sign-in).
async fn session_login(
    State(state): State<ApiState>,
    Json(user): Json<AuthUser>,
) -> ApiResult<Json<AppData>> {
    if user.id.trim().is_empty() {
        return Err(ApiError::BadRequest("user id must not be empty".to_string()));
    }

    let mut session = state.session.lock().await;
    let data = session.login(user)?.clone();

    Ok(Json(data))
}

async fn session_logout(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let token = state
        .access_token
        .lock()
        .map_err(|_| anyhow!("access token lock poisoned"))?
        .take();

    if let (Some(token), Some(identity)) = (token, state.identity.clone()) {
        let revoked = tokio::task::spawn_blocking(move || identity.revoke(&token)).await;
        match revoked {
            Ok(Ok(())) => info!("identity provider session revoked"),
            Ok(Err(error)) => warn!(error = %error, "identity provider logout failed"),
            Err(error) => warn!(error = %error, "identity provider logout task failed"),
        }
    }

    let mut session = state.session.lock().await;
    let user = session.logout();

    Ok(Json(json!({
        "signed_out": user.is_some(),
        "user_id": user.map(|user| user.id),
    })))
}

async fn kakao_url(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let identity = require_identity(&state)?;
    let url = identity.authorize_url()?;

    Ok(Json(json!({ "url": url.to_string() })))
}

async fn kakao_callback(
    State(state): State<ApiState>,
    Query(query): Query<KakaoCallbackQuery>,
) -> ApiResult<Json<AppData>> {
    if let Some(error) = query.error {
        return Err(ApiError::Unauthorized(format!("Kakao login was cancelled: {error}")));
    }
    let code = query
        .code
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("code query parameter is required".to_string()))?;

    let identity = require_identity(&state)?;
    let (user, token) = tokio::task::spawn_blocking(move || sign_in(&*identity, &code))
        .await
        .context("Sign-in task failed")?
        .map_err(|error| ApiError::Unauthorized(format!("{error:#}")))?;

    *state
        .access_token
        .lock()
        .map_err(|_| anyhow!("access token lock poisoned"))? = Some(token);

    let mut session = state.session.lock().await;
    let data = session.login(user)?.clone();

    Ok(Json(data))
}

async fn me(State(state): State<ApiState>) -> ApiResult<Json<AppData>> {
    let session = state.session.lock().await;
    Ok(Json(session.app_data()?.clone()))
}

async fn birth_date_put(
    State(state): State<ApiState>,
    Json(payload): Json<BirthDatePayload>,
) -> ApiResult<Json<Value>> {
    let mut session = state.session.lock().await;
    let changed = session.set_birth_date(&payload.birth_date)?;

    Ok(Json(json!({
        "changed": changed,
        "birthDate": session.birth_date(),
    })))
}

async fn birth_date_delete(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let mut session = state.session.lock().await;
    let changed = session.clear_birth_date()?;

    Ok(Json(json!({ "changed": changed, "birthDate": Value::Null })))
}

/// Today's content for a category. Generation runs without holding the
/// session lock; a result whose session changed meanwhile is rejected.
async fn challenge_get(
    State(state): State<ApiState>,
    Path(category): Path<String>,
) -> ApiResult<Json<ChallengePayload>> {
    let category = parse_category(&category)?;
    let name = state.registry.display_name(category).to_string();

    let (request, date) = {
        let mut session = state.session.lock().await;
        (session.request_content(category)?, session.today())
    };

    let payload = |status: ChallengeStatus, cached: bool, content: Option<ChallengeContent>| ChallengePayload {
        category,
        name: name.clone(),
        date: date.format("%Y-%m-%d").to_string(),
        status,
        cached,
        content,
    };

    let ticket = match request {
        ContentRequest::Ready(content) => {
            return Ok(Json(payload(ChallengeStatus::Ready, true, Some(content))));
        }
        ContentRequest::NeedsBirthDate => {
            return Ok(Json(payload(ChallengeStatus::NeedsBirthDate, false, None)));
        }
        ContentRequest::Fetch(ticket) => ticket,
    };

    let provider = state.provider.clone().ok_or_else(|| {
        ApiError::NotConfigured("Content generation is not configured (Gemini API key missing)".to_string())
    })?;

    let job_ticket = ticket.clone();
    let content = tokio::task::spawn_blocking(move || {
        provider.generate(job_ticket.category, job_ticket.date, &job_ticket.params())
    })
    .await
    .context("Content generation task failed")?
    .map_err(|error| {
        warn!(category = %category, error = %error, "content generation failed");
        ApiError::ContentUnavailable(format!("{error:#}"))
    })?;

    let accepted = state.session.lock().await.finish_fetch(&ticket, &content);
    if !accepted {
        return Err(ApiError::Conflict(
            "Session changed while content was being generated".to_string(),
        ));
    }

    Ok(Json(payload(ChallengeStatus::Ready, false, Some(content))))
}

/// Records today's completion. Without a body the content cached for today
/// is recorded.
async fn challenge_complete(
    State(state): State<ApiState>,
    Path(category): Path<String>,
    payload: Option<Json<CompletePayload>>,
) -> ApiResult<Json<ActivityLogEntry>> {
    let category = parse_category(&category)?;
    let payload = payload.map(|Json(payload)| payload).unwrap_or_default();
    let mut session = state.session.lock().await;

    let content = match payload.content {
        Some(raw) => ChallengeContent::decode(category, raw)
            .map_err(|error| ApiError::BadRequest(error.to_string()))?,
        None => match session.request_content(category)? {
            ContentRequest::Ready(content) => content,
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "No {category} content has been loaded today; send it in the request body"
                )));
            }
        },
    };

    let entry = session.complete_challenge(category, content)?;
    Ok(Json(entry))
}

async fn activity_today(State(state): State<ApiState>) -> ApiResult<Json<TodayPayload>> {
    let session = state.session.lock().await;
    let entry = session.todays_completion()?.cloned();

    Ok(Json(TodayPayload {
        date: session.today().format("%Y-%m-%d").to_string(),
        completed: entry.is_some(),
        entry,
    }))
}

async fn activity_history(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryPage>> {
    let session = state.session.lock().await;
    let data = session.app_data()?;

    Ok(Json(report::history_page(
        &data.activity_log,
        query.page.unwrap_or(1),
    )))
}

async fn activity_calendar(
    State(state): State<ApiState>,
    Query(query): Query<CalendarQuery>,
) -> ApiResult<Json<MonthCalendar>> {
    let session = state.session.lock().await;
    let data = session.app_data()?;

    let (year, month) = match query.month.as_deref() {
        Some(raw) => report::parse_month(raw)
            .map_err(|error| ApiError::BadRequest(format!("{error:#}")))?,
        None => {
            let today: NaiveDate = session.today();
            (today.year(), today.month())
        }
    };

    Ok(Json(report::month_calendar(&data.activity_log, year, month)?))
}

async fn stats(State(state): State<ApiState>) -> ApiResult<Json<StatsPayload>> {
    let session = state.session.lock().await;
    let data = session.app_data()?;

    Ok(Json(StatsPayload {
        total: data.category_stats.total(),
        category_stats: data.category_stats.clone(),
        ranking: report::ranked_stats(&data.category_stats, &state.registry),
    }))
}

fn parse_category(raw: &str) -> ApiResult<CategoryKey> {
    CategoryKey::parse(raw).ok_or_else(|| {
        ApiError::NotFound(format!(
            "Unknown category: {raw}. Use fortune, economics, health, quiz or conversation"
        ))
    })
}

fn require_identity(state: &ApiState) -> ApiResult<Arc<dyn IdentityProvider>> {
    state.identity.clone().ok_or_else(|| {
        ApiError::NotConfigured("Kakao login is not configured (client id missing)".to_string())
    })
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    NotConfigured(String),
    ContentUnavailable(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value)
    }
}

impl From<SessionError> for ApiError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::NotAuthenticated | SessionError::Ledger(LedgerError::NotLoaded) => {
                Self::Unauthorized(value.to_string())
            }
            SessionError::InvalidBirthDate(_)
            | SessionError::Ledger(LedgerError::ContentMismatch { .. }) => {
                Self::BadRequest(value.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Conflict(message) => (
                StatusCode::CONFLICT,
                Json(json!({ "error": message, "retryable": true })),
            )
                .into_response(),
            ApiError::NotConfigured(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": message })),
            )
                .into_response(),
            ApiError::ContentUnavailable(message) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": message, "retryable": true })),
            )
                .into_response(),
            ApiError::Internal(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response(),
        }
    }
}

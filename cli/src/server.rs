use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use tend_core::hosted::HostedStore;
use tend_core::models::is_date_key;

// Day records are small; anything near this limit is malformed input.
const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<HostedStore>>,
}

/// Account resolved from the bearer token by the auth middleware.
#[derive(Clone)]
struct Account(String);

// --- Request / Response types ---

#[derive(Serialize)]
struct MetaResponse {
    updated_at_ms: i64,
}

#[derive(Serialize)]
struct AccountResponse {
    account: String,
}

#[derive(Serialize)]
struct DayRowResponse {
    date: String,
    record: serde_json::Value,
    updated_at_ms: i64,
}

#[derive(Deserialize)]
struct RangeQuery {
    start: String,
    end: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                eprintln!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToString::to_string);

    let account = token.and_then(|t| {
        let store = state
            .store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        store.account_for_token(&t).ok().flatten()
    });

    match account {
        Some(account) => {
            request.extensions_mut().insert(Account(account));
            next.run(request).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid or missing access token".to_string(),
            }),
        )
            .into_response(),
    }
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn get_account(Extension(Account(account)): Extension<Account>) -> Json<AccountResponse> {
    Json(AccountResponse { account })
}

async fn get_day_meta(
    State(state): State<AppState>,
    Extension(Account(account)): Extension<Account>,
    Path(date): Path<String>,
) -> Result<Json<MetaResponse>, ApiError> {
    if !is_date_key(&date) {
        return Err(ApiError::BadRequest(format!(
            "Invalid date '{date}'. Use YYYY-MM-DD"
        )));
    }
    let store = state
        .store
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let ts = store
        .row_updated_at(&account, &date)
        .context("failed to read day row")?;
    match ts {
        Some(updated_at_ms) => Ok(Json(MetaResponse { updated_at_ms })),
        None => Err(ApiError::NotFound(format!("No day row for {date}"))),
    }
}

async fn put_day(
    State(state): State<AppState>,
    Extension(Account(account)): Extension<Account>,
    Path(date): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<MetaResponse>, ApiError> {
    if !is_date_key(&date) {
        return Err(ApiError::BadRequest(format!(
            "Invalid date '{date}'. Use YYYY-MM-DD"
        )));
    }
    if !payload.is_object() {
        return Err(ApiError::BadRequest(
            "Day record payload must be a JSON object".to_string(),
        ));
    }
    let store = state
        .store
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let updated_at_ms = store
        .upsert_row(&account, &date, &payload.to_string())
        .context("failed to upsert day row")?;
    Ok(Json(MetaResponse { updated_at_ms }))
}

async fn list_days(
    State(state): State<AppState>,
    Extension(Account(account)): Extension<Account>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<DayRowResponse>>, ApiError> {
    if !is_date_key(&range.start) || !is_date_key(&range.end) {
        return Err(ApiError::BadRequest(
            "Invalid range. Use start=YYYY-MM-DD&end=YYYY-MM-DD".to_string(),
        ));
    }
    let store = state
        .store
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let rows = store
        .list_range(&account, &range.start, &range.end)
        .context("failed to list day rows")?;
    let rows = rows
        .into_iter()
        .map(|row| DayRowResponse {
            record: serde_json::from_str(&row.data).unwrap_or(serde_json::Value::Null),
            date: row.date,
            updated_at_ms: row.updated_at_ms,
        })
        .collect();
    Ok(Json(rows))
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/account", get(get_account))
        .route("/api/days", get(list_days))
        .route("/api/days/{date}", put(put_day))
        .route("/api/days/{date}/meta", get(get_day_meta))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(middleware::from_fn(security_headers))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .with_state(state)
}

pub async fn start_server(
    store: HostedStore,
    port: u16,
    bind: &str,
    token: &str,
    new_token: bool,
) -> anyhow::Result<()> {
    let state = AppState {
        store: Arc::new(Mutex::new(store)),
    };

    let app = build_router(state);

    if new_token {
        eprintln!("First run: a fresh access token was generated (see above).");
    } else {
        eprintln!(
            "Access token: {}...{} (see server_token file in data directory)",
            &token[..4],
            &token[token.len() - 4..],
        );
    }

    if bind != "127.0.0.1" && bind != "localhost" {
        eprintln!(
            "Listening on {bind}: any device on your network can reach this API with the token."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

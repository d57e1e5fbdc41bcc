//! HTTP surface of the token service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{error, info};

use crate::keygate::Keygate;
use crate::keygate_error::KeygateError;
use crate::model::{GeneratedToken, TokenEvent, TokenStatus};

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Shared state for the HTTP server.
pub struct ServerState {
    pub keygate: Keygate,
    /// Admin routes stay closed while this is `None`.
    pub admin_key: Option<String>,
}

impl ServerState {
    fn is_admin(&self, headers: &HeaderMap) -> bool {
        let (Some(expected), Some(provided)) = (
            self.admin_key.as_deref(),
            headers.get(ADMIN_KEY_HEADER).map(|value| value.as_bytes()),
        ) else {
            return false;
        };
        expected.as_bytes().ct_eq(provided).into()
    }
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    token: String,
    hwid: String,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    plan: String,
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    token: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

/// Error returned from handlers. Domain errors keep their message, anything else
/// is logged and reported as a bare 500.
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

fn status_for(err: &KeygateError) -> StatusCode {
    match err {
        KeygateError::InvalidToken | KeygateError::Unauthorized => StatusCode::UNAUTHORIZED,
        KeygateError::TokenRevoked | KeygateError::TokenExpired | KeygateError::HwidMismatch => {
            StatusCode::FORBIDDEN
        }
        KeygateError::TokenNotFound => StatusCode::NOT_FOUND,
        KeygateError::InvalidPlan { .. } => StatusCode::BAD_REQUEST,
        KeygateError::UnsupportedUrl { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self.0.downcast_ref::<KeygateError>() {
            Some(err) => (status_for(err), err.to_string()),
            None => {
                error!(error = %self.0, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_owned(),
                )
            }
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

type SharedState = Arc<ServerState>;

/// Construct the router with all routes installed.
pub fn build_router(state: ServerState) -> Router {
    let shared = Arc::new(state);

    let admin = Router::new()
        .route("/verify", post(admin_verify))
        .route("/unbind", post(admin_unbind))
        .route("/revoke", post(admin_revoke))
        .route("/history", post(admin_history))
        .route_layer(middleware::from_fn_with_state(
            shared.clone(),
            require_admin,
        ));

    Router::new()
        .route("/verify", post(verify))
        .route("/generate", post(generate))
        .route("/healthz", get(health))
        .nest("/admin", admin)
        .with_state(shared)
}

async fn require_admin(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.is_admin(req.headers()) {
        return Err(KeygateError::Unauthorized.into());
    }
    Ok(next.run(req).await)
}

async fn health() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

async fn verify(
    State(state): State<SharedState>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.keygate.verify(payload.token, payload.hwid).await?;
    Ok(Json(StatusResponse { status: "ok" }))
}

async fn generate(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<GenerateRequest>,
) -> Result<Json<GeneratedToken>, ApiError> {
    if state.keygate.keygate_file.require_admin_for_generate && !state.is_admin(&headers) {
        return Err(KeygateError::Unauthorized.into());
    }
    Ok(Json(state.keygate.generate(&payload.plan).await?))
}

async fn admin_verify(
    State(state): State<SharedState>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<TokenStatus>, ApiError> {
    Ok(Json(state.keygate.inspect(payload.token).await?))
}

async fn admin_unbind(
    State(state): State<SharedState>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.keygate.unbind(payload.token).await?;
    Ok(Json(StatusResponse { status: "ok" }))
}

async fn admin_revoke(
    State(state): State<SharedState>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.keygate.revoke(payload.token).await?;
    Ok(Json(StatusResponse { status: "revoked" }))
}

async fn admin_history(
    State(state): State<SharedState>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<Vec<TokenEvent>>, ApiError> {
    Ok(Json(state.keygate.history(payload.token).await?))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Serve until ctrl-c or SIGTERM, then drain in-flight requests.
pub async fn run_server(state: ServerState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::keygate_file::KeygateFile;

    const ADMIN_KEY: &str = "test admin key";

    async fn router_with(file: KeygateFile, admin_key: Option<&str>) -> Router {
        let keygate = Keygate::new(file, "http").await.unwrap();
        build_router(ServerState {
            keygate,
            admin_key: admin_key.map(str::to_owned),
        })
    }

    async fn router() -> Router {
        let file = KeygateFile {
            url: "sqlite::memory:".to_owned(),
            ..KeygateFile::default()
        };
        router_with(file, Some(ADMIN_KEY)).await
    }

    async fn post_json(
        router: &Router,
        uri: &str,
        admin_key: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut request = axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(key) = admin_key {
            request = request.header(ADMIN_KEY_HEADER, key);
        }
        let response = router
            .clone()
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn generate_token(router: &Router, plan: &str) -> String {
        let (status, body) = post_json(router, "/generate", None, json!({ "plan": plan })).await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn generate_then_verify() {
        let router = router().await;
        let (status, body) =
            post_json(&router, "/generate", None, json!({ "plan": "2W" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plan"], "2w");
        assert!(body["expires_at"].is_f64());
        let token = body["token"].as_str().unwrap().to_owned();
        assert!(token.starts_with("OLLY-"));

        let (status, body) = post_json(
            &router,
            "/verify",
            None,
            json!({ "token": token, "hwid": "hw-1" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));

        let (status, body) = post_json(
            &router,
            "/verify",
            None,
            json!({ "token": token, "hwid": "hw-2" }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({ "detail": "HWID mismatch" }));
    }

    #[tokio::test]
    async fn infinite_plan_has_null_expiry() {
        let router = router().await;
        let (status, body) =
            post_json(&router, "/generate", None, json!({ "plan": "infinite" })).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["expires_at"].is_null());
    }

    #[tokio::test]
    async fn invalid_plan_is_bad_request() {
        let router = router().await;
        let (status, body) =
            post_json(&router, "/generate", None, json!({ "plan": "4d" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["detail"],
            "Invalid plan. Valid plans: 1d, 3d, 1w, 2w, 3w, 6w, 1m, 2m, 3m, 6m, 9m, 1y, 2y, infinite"
        );
    }

    #[tokio::test]
    async fn unknown_token_is_unauthorized() {
        let router = router().await;
        let (status, body) = post_json(
            &router,
            "/verify",
            None,
            json!({ "token": "OLLY-NOPE", "hwid": "hw" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "detail": "Invalid token" }));
    }

    #[tokio::test]
    async fn missing_field_is_rejected() {
        let router = router().await;
        let (status, _) =
            post_json(&router, "/verify", None, json!({ "token": "OLLY-X" })).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn admin_routes_need_the_key() {
        let router = router().await;
        let token = generate_token(&router, "1d").await;

        for uri in ["/admin/verify", "/admin/unbind", "/admin/revoke", "/admin/history"] {
            let (status, body) = post_json(&router, uri, None, json!({ "token": token })).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(body, json!({ "detail": "Unauthorized" }));

            let (status, _) =
                post_json(&router, uri, Some("wrong"), json!({ "token": token })).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn admin_routes_closed_without_configured_key() {
        let file = KeygateFile {
            url: "sqlite::memory:".to_owned(),
            ..KeygateFile::default()
        };
        let router = router_with(file, None).await;
        let (status, _) =
            post_json(&router, "/admin/verify", None, json!({ "token": "x" })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) =
            post_json(&router, "/admin/verify", Some(""), json!({ "token": "x" })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_lifecycle() {
        let router = router().await;
        let token = generate_token(&router, "1m").await;
        let key = Some(ADMIN_KEY);

        post_json(
            &router,
            "/verify",
            None,
            json!({ "token": token, "hwid": "hw-1" }),
        )
        .await;

        let (status, body) =
            post_json(&router, "/admin/verify", key, json!({ "token": token })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token"], token.as_str());
        assert_eq!(body["hwid"], "hw-1");
        assert_eq!(body["revoked"], false);
        let remaining = body["seconds_remaining"].as_i64().unwrap();
        assert!(remaining > 29 * 86400 && remaining <= 30 * 86400);

        let (status, body) =
            post_json(&router, "/admin/unbind", key, json!({ "token": token })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
        let (_, body) = post_json(&router, "/admin/verify", key, json!({ "token": token })).await;
        assert!(body["hwid"].is_null());

        let (status, body) =
            post_json(&router, "/admin/revoke", key, json!({ "token": token })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "revoked" }));

        let (status, body) = post_json(
            &router,
            "/verify",
            None,
            json!({ "token": token, "hwid": "hw-1" }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({ "detail": "Token revoked" }));

        let (status, body) =
            post_json(&router, "/admin/history", key, json!({ "token": token })).await;
        assert_eq!(status, StatusCode::OK);
        let actions: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|event| event["action"].as_str().unwrap())
            .collect();
        assert_eq!(actions, vec!["generated", "bound", "unbound", "revoked"]);
        assert_eq!(body[0]["change_source"], "http");
    }

    #[tokio::test]
    async fn admin_verify_unknown_token_is_not_found() {
        let router = router().await;
        let (status, body) = post_json(
            &router,
            "/admin/verify",
            Some(ADMIN_KEY),
            json!({ "token": "OLLY-NOPE" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "detail": "Token not found" }));

        let (status, body) = post_json(
            &router,
            "/admin/revoke",
            Some(ADMIN_KEY),
            json!({ "token": "OLLY-NOPE" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "revoked" }));
    }

    #[tokio::test]
    async fn admin_history_unknown_token_is_not_found() {
        let router = router().await;
        let (status, body) = post_json(
            &router,
            "/admin/history",
            Some(ADMIN_KEY),
            json!({ "token": "OLLY-NOPE" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "detail": "Token not found" }));
    }

    #[tokio::test]
    async fn storage_errors_are_masked() {
        let response = ApiError(anyhow::anyhow!("disk I/O error")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!text.contains("disk I/O error"));
        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body, json!({ "detail": "Internal server error" }));
    }

    #[tokio::test]
    async fn unsupported_url_is_internal_error() {
        let err = KeygateError::UnsupportedUrl {
            data_interface: "Sqlite".to_owned(),
            url: "postgres://localhost".to_owned(),
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn generate_can_require_admin() {
        let file = KeygateFile {
            url: "sqlite::memory:".to_owned(),
            require_admin_for_generate: true,
            ..KeygateFile::default()
        };
        let router = router_with(file, Some(ADMIN_KEY)).await;

        let (status, _) = post_json(&router, "/generate", None, json!({ "plan": "1d" })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = post_json(
            &router,
            "/generate",
            Some(ADMIN_KEY),
            json!({ "plan": "1d" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let router = router().await;
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

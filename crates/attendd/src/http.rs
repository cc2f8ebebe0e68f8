//! HTTP surface: `POST /api/signup`, `POST /api/login`, `GET /api/health`.

use crate::enroll::SignupForm;
use crate::error::{FlowError, FlowResult};
use crate::service::AttendanceService;
use crate::verify::LoginForm;
use attend_store::{AttendanceLedger, CredentialStore};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the handlers.
pub struct AppState<C, L> {
    pub service: Arc<AttendanceService<C, L>>,
}

impl<C, L> Clone for AppState<C, L> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub recognized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub users: usize,
}

pub fn router<C, L>(service: Arc<AttendanceService<C, L>>, max_body_bytes: usize) -> Router
where
    C: CredentialStore + Send + Sync + 'static,
    L: AttendanceLedger + Send + Sync + 'static,
{
    Router::new()
        .route("/api/signup", post(signup::<C, L>))
        .route("/api/login", post(login::<C, L>))
        .route("/api/health", get(health::<C, L>))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(AppState { service })
}

/// CORS for the browser front end. No configured origins means any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods(AllowMethods::list([Method::GET, Method::POST, Method::OPTIONS]))
        .allow_headers(AllowHeaders::list([header::CONTENT_TYPE, header::ACCEPT]));

    if origins.is_empty() {
        return base.allow_origin(tower_http::cors::Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();
    base.allow_origin(allowed)
}

/// Wrap the router with tracing and CORS.
pub fn app(router: Router, origins: &[String]) -> Router {
    router
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(origins))
}

/// Parse a request body leniently: an empty body is an empty form, so
/// absent fields are reported by the flow rather than here.
fn parse_form<T: DeserializeOwned + Default>(body: &[u8]) -> FlowResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| FlowError::MalformedBody(e.to_string()))
}

/// POST /api/signup
async fn signup<C, L>(
    State(state): State<AppState<C, L>>,
    body: Bytes,
) -> FlowResult<Json<SignupResponse>>
where
    C: CredentialStore + Send + Sync + 'static,
    L: AttendanceLedger + Send + Sync + 'static,
{
    let form: SignupForm = parse_form(&body)?;
    state.service.enroll(form).await?;
    Ok(Json(SignupResponse { success: true }))
}

/// POST /api/login
async fn login<C, L>(
    State(state): State<AppState<C, L>>,
    body: Bytes,
) -> FlowResult<Json<LoginResponse>>
where
    C: CredentialStore + Send + Sync + 'static,
    L: AttendanceLedger + Send + Sync + 'static,
{
    let form: LoginForm = parse_form(&body)?;
    let outcome = state.service.verify(form).await?;
    let distance = state
        .service
        .config()
        .expose_distance
        .then_some(outcome.distance);
    Ok(Json(LoginResponse {
        success: true,
        recognized: outcome.recognized,
        distance,
    }))
}

/// GET /api/health
async fn health<C, L>(State(state): State<AppState<C, L>>) -> FlowResult<Json<HealthResponse>>
where
    C: CredentialStore + Send + Sync + 'static,
    L: AttendanceLedger + Send + Sync + 'static,
{
    let users = state
        .service
        .users()
        .count()
        .await
        .map_err(FlowError::internal)?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        users,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{face_image, FACE_A, FACE_B};
    use crate::service::testing::*;
    use attend_core::LedgerPolicy;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        call(app, Method::POST, uri, Body::from(body.to_string())).await
    }

    fn signup_body(id: &str) -> Value {
        json!({
            "id": id,
            "password": "p1",
            "domain": "eng",
            "owner_secret": OWNER_SECRET,
            "image": face_image(FACE_A),
            "latitude": INSIDE.0,
            "longitude": INSIDE.1.to_string(),
        })
    }

    fn login_body(id: &str, password: &str, face: [u8; 3]) -> Value {
        json!({
            "id": id,
            "password": password,
            "image": face_image(face),
            "latitude": INSIDE.0.to_string(),
            "longitude": INSIDE.1,
        })
    }

    async fn test_app(expose_distance: bool) -> Router {
        let mut config = test_config(LedgerPolicy::AllowDuplicates);
        config.expose_distance = expose_distance;
        let notes = crate::notify::testing::RecordingNotifier::default();
        let h = harness_with(config, notes.clone(), notes).await;
        router(h.service, 10 * 1024 * 1024)
    }

    #[tokio::test]
    async fn test_signup_then_login() {
        let app = test_app(true).await;

        let (status, body) = post_json(&app, "/api/signup", signup_body("alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let (status, body) = post_json(&app, "/api/login", login_body("alice", "p1", FACE_A)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["recognized"], true);
        assert!(body["distance"].as_f64().unwrap() <= 0.6);

        let (status, body) = post_json(&app, "/api/login", login_body("alice", "p1", FACE_B)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recognized"], false);
        assert!(body["distance"].as_f64().unwrap() > 0.6);
    }

    #[tokio::test]
    async fn test_distance_can_be_hidden() {
        let app = test_app(false).await;
        post_json(&app, "/api/signup", signup_body("alice")).await;

        let (status, body) = post_json(&app, "/api/login", login_body("alice", "p1", FACE_A)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "recognized": true }));
    }

    #[tokio::test]
    async fn test_rejections_map_to_status() {
        let app = test_app(true).await;
        post_json(&app, "/api/signup", signup_body("alice")).await;

        let (status, body) = post_json(&app, "/api/signup", signup_body("alice")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "success": false, "error": "id already exists" }));

        let (status, _) = post_json(&app, "/api/login", login_body("alice", "nope", FACE_A)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = post_json(&app, "/api/login", login_body("bob", "p1", FACE_A)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let mut outside = signup_body("carol");
        outside["latitude"] = json!(OUTSIDE.0);
        let (status, body) = post_json(&app, "/api/signup", outside).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "not in allowed location");

        let mut bad_secret = signup_body("carol");
        bad_secret["owner_secret"] = json!("guess");
        let (status, _) = post_json(&app, "/api/signup", bad_secret).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_missing_and_malformed_bodies() {
        let app = test_app(true).await;

        let (status, body) = call(&app, Method::POST, "/api/login", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "missing fields (required: id, password, image, latitude, longitude)"
        );

        let (status, body) = post_json(&app, "/api/signup", json!({ "id": "alice" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, body) = call(&app, Method::POST, "/api/signup", Body::from("id=alice")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("malformed request body"));
    }

    #[tokio::test]
    async fn test_non_scalar_coordinates_fail_location_check() {
        let app = test_app(true).await;

        for bad in [json!(true), json!([13.0]), json!({})] {
            let mut body = signup_body("alice");
            body["latitude"] = bad.clone();
            let (status, resp) = post_json(&app, "/api/signup", body).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "latitude {bad}");
            assert_eq!(resp["error"], "not in allowed location");
        }

        post_json(&app, "/api/signup", signup_body("alice")).await;
        let mut login = login_body("alice", "p1", FACE_A);
        login["longitude"] = json!([77.6]);
        let (status, resp) = post_json(&app, "/api/login", login).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(resp["error"], "not in allowed location");
    }

    #[tokio::test]
    async fn test_numeric_id_is_accepted_as_text() {
        let app = test_app(true).await;

        let mut body = signup_body("ignored");
        body["id"] = json!(1042);
        let (status, _) = post_json(&app, "/api/signup", body).await;
        assert_eq!(status, StatusCode::OK);

        let (status, resp) = post_json(&app, "/api/login", login_body("1042", "p1", FACE_A)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["recognized"], true);

        let mut login = login_body("ignored", "p1", FACE_A);
        login["id"] = json!(1042);
        let (status, _) = post_json(&app, "/api/login", login).await;
        assert_eq!(status, StatusCode::OK);

        let mut nested = login_body("ignored", "p1", FACE_A);
        nested["id"] = json!({ "id": 1042 });
        let (status, resp) = post_json(&app, "/api/login", nested).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(resp["error"].as_str().unwrap().starts_with("malformed request body"));
    }

    #[tokio::test]
    async fn test_health_counts_users() {
        let app = test_app(true).await;
        post_json(&app, "/api/signup", signup_body("alice")).await;

        let (status, body) = call(&app, Method::GET, "/api/health", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["users"], 1);
    }
}

use axum::{
    extract::State,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::extractors::AuthUser,
    error::{IdentityError, Result},
    state::AppState,
    transport::Topic,
};

/// Body wrapper used by the storefront: `{ "data": { ... } }`.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub data: Value,
}

pub fn account_routes() -> Router<AppState> {
    Router::new().nest(
        "/account",
        Router::new()
            .route("/hello", get(hello))
            .route("/sign-up", post(sign_up))
            .route("/sign-in", post(sign_in))
            .route("/guest", post(guest))
            .route("/password", put(update_password))
            .route("/password/forgot", post(forgot_password))
            .route("/password/reset", post(reset_password))
            .route("/me", get(get_me).patch(update_me)),
    )
}

async fn forward(state: &AppState, topic: Topic, body: Value) -> Result<Json<Value>> {
    state.account.send(topic, body).await.map(Json)
}

/// Adds the authenticated user's id to the forwarded body, replacing any
/// client-supplied value.
fn scoped(user_id: Uuid, data: Value) -> Result<Value> {
    match data {
        Value::Object(mut fields) => {
            fields.insert("userId".into(), json!(user_id));
            Ok(Value::Object(fields))
        }
        _ => Err(IdentityError::BadRequest("data must be an object".into())),
    }
}

#[instrument(skip(state))]
pub async fn hello(State(state): State<AppState>) -> Result<Json<Value>> {
    forward(&state, Topic::Hello, Value::Null).await
}

#[instrument(skip(state, body))]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(body): Json<Envelope>,
) -> Result<Json<Value>> {
    forward(&state, Topic::Register, body.data).await
}

#[instrument(skip(state, body))]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(body): Json<Envelope>,
) -> Result<Json<Value>> {
    forward(&state, Topic::Login, body.data).await
}

#[instrument(skip(state))]
pub async fn guest(State(state): State<AppState>) -> Result<Json<Value>> {
    forward(&state, Topic::Guest, Value::Null).await
}

#[instrument(skip(state, body))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<Envelope>,
) -> Result<Json<Value>> {
    forward(&state, Topic::RequestPasswordReset, body.data).await
}

#[instrument(skip(state, body))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<Envelope>,
) -> Result<Json<Value>> {
    forward(&state, Topic::ResetPassword, body.data).await
}

#[instrument(skip(state, body))]
pub async fn update_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<Envelope>,
) -> Result<Json<Value>> {
    forward(&state, Topic::UpdatePassword, scoped(user_id, body.data)?).await
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>> {
    forward(&state, Topic::GetProfile, json!({ "userId": user_id })).await
}

#[instrument(skip(state, body))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<Envelope>,
) -> Result<Json<Value>> {
    forward(&state, Topic::UpdateProfile, scoped(user_id, body.data)?).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::auth::{handlers::AccountListener, services::testing::harness};
    use crate::config::AppConfig;

    fn app() -> Router {
        let h = harness();
        let keys = h.keys.clone();
        let (listener, account) = AccountListener::new(Arc::new(h.service), 8);
        tokio::spawn(listener.run());
        let state = AppState::from_parts(Arc::new(AppConfig::fake()), account, keys);
        account_routes().with_state(state)
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn sign_up_and_in(app: &Router) -> String {
        let (status, _) = call(
            app,
            Method::POST,
            "/account/sign-up",
            None,
            Some(json!({ "data": {
                "username": "ada",
                "email": "ada@example.com",
                "password": "analytical"
            }})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            app,
            Method::POST,
            "/account/sign-in",
            None,
            Some(json!({ "data": { "username": "ada", "password": "analytical" } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        body["accessToken"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn hello_is_forwarded() {
        let app = app();
        let (status, body) = call(&app, Method::GET, "/account/hello", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_str().unwrap().contains("Hello"));
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_conflict() {
        let app = app();
        sign_up_and_in(&app).await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/account/sign-up",
            None,
            Some(json!({ "data": {
                "username": "ada",
                "email": "someone@example.com",
                "password": "analytical"
            }})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn failed_sign_in_is_a_plain_false() {
        let app = app();
        sign_up_and_in(&app).await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/account/sign-in",
            None,
            Some(json!({ "data": { "username": "ada", "password": "not-it-at-all" } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": false }));
    }

    #[tokio::test]
    async fn me_requires_a_session_token() {
        let app = app();
        let token = sign_up_and_in(&app).await;

        let (status, _) = call(&app, Method::GET, "/account/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, guest) = call(&app, Method::POST, "/account/guest", None, None).await;
        let guest_token = guest["accessToken"].as_str().unwrap();
        let (status, _) = call(&app, Method::GET, "/account/me", Some(guest_token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&app, Method::GET, "/account/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "ada");
    }

    #[tokio::test]
    async fn profile_and_password_updates_use_the_token_identity() {
        let app = app();
        let token = sign_up_and_in(&app).await;

        let (status, body) = call(
            &app,
            Method::PATCH,
            "/account/me",
            Some(&token),
            Some(json!({ "data": { "company": "Analytical Engines", "userId": uuid::Uuid::nil() } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["company"], "Analytical Engines");

        let (status, _) = call(
            &app,
            Method::PUT,
            "/account/password",
            Some(&token),
            Some(json!({ "data": { "oldPassword": "analytical", "newPassword": "analytical" } })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &app,
            Method::PUT,
            "/account/password",
            Some(&token),
            Some(json!({ "data": { "oldPassword": "analytical", "newPassword": "difference" } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));
    }

    #[tokio::test]
    async fn forgot_password_for_unknown_email_is_not_found() {
        let app = app();
        let (status, _) = call(
            &app,
            Method::POST,
            "/account/password/forgot",
            None,
            Some(json!({ "data": { "email": "nobody@example.com" } })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn scoped_rejects_non_objects() {
        assert!(scoped(Uuid::nil(), json!("text")).is_err());
        let value = scoped(Uuid::nil(), json!({ "userId": "spoofed" })).unwrap();
        assert_eq!(value["userId"], json!(Uuid::nil()));
    }
}

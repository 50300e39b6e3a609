use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::models::UpsertPushSubscription;
use crate::db::PushSubscriptionRepository;
use crate::error::AppError;
use crate::routes::auth::AuthUser;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/public-key", get(public_key))
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
}

/// Expose the VAPID public key the browser needs to subscribe.
/// Unauthenticated so the frontend can fetch it before login completes.
async fn public_key(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let Some((_private, public)) = state.config.vapid.keys() else {
        return Err(AppError::Config(
            "VAPID_PUBLIC_KEY is not configured".to_string(),
        ));
    };
    Ok(Json(json!({ "publicKey": public })))
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
    pub expiration_time: Option<i64>,
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    Json(request): Json<SubscribeRequest>,
) -> Result<Json<Value>, AppError> {
    if request.endpoint.is_empty()
        || request.keys.p256dh.is_empty()
        || request.keys.auth.is_empty()
    {
        return Err(AppError::BadRequest(
            "Invalid subscription payload".to_string(),
        ));
    }

    let user_agent = headers
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let subscription = PushSubscriptionRepository::upsert(
        &state.db,
        UpsertPushSubscription {
            user_id: user.id,
            endpoint: request.endpoint,
            p256dh: request.keys.p256dh,
            auth: request.keys.auth,
            expiration_time: request.expiration_time,
            user_agent,
        },
    )
    .await?;

    tracing::info!(
        "Registered push subscription {} for user {}",
        subscription.id,
        user.id
    );
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<UnsubscribeRequest>,
) -> Result<Json<Value>, AppError> {
    if request.endpoint.is_empty() {
        return Err(AppError::BadRequest("endpoint is required".to_string()));
    }

    let deleted =
        PushSubscriptionRepository::delete_for_user(&state.db, user.id, &request.endpoint).await?;
    Ok(Json(json!({ "ok": true, "deleted": deleted })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::UserRepository;
    use crate::routes::testing::{bearer, test_state, test_state_with};
    use axum::body::Body;
    use http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = super::router()
            .with_state(state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn post_json(uri: &str, token: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(http::header::AUTHORIZATION, token)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::USER_AGENT, "test-agent")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn public_key_errors_until_both_vapid_keys_are_set() {
        let state = test_state().await;
        let request = Request::builder()
            .uri("/public-key")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&state, request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["code"], "CONFIG_ERROR");

        let mut config = Config::default();
        config.vapid.private_key = Some("priv".to_string());
        config.vapid.public_key = Some("pub-key".to_string());
        let state = test_state_with(config).await;
        let request = Request::builder()
            .uri("/public-key")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["publicKey"], "pub-key");
    }

    #[tokio::test]
    async fn subscribe_rejects_payloads_with_empty_keys() {
        let state = test_state().await;
        let user = UserRepository::create(&state.db, "alice", "hash", None)
            .await
            .unwrap();
        let token = bearer(&state, user.id);

        let payload = json!({
            "endpoint": "https://push.example/a",
            "keys": {"p256dh": "", "auth": "auth"},
        });
        let (status, json) = send(&state, post_json("/subscribe", &token, payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "BAD_REQUEST");

        let subs = PushSubscriptionRepository::list_for_user(&state.db, user.id)
            .await
            .unwrap();
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_reports_the_deleted_count() {
        let state = test_state().await;
        let user = UserRepository::create(&state.db, "alice", "hash", None)
            .await
            .unwrap();
        let token = bearer(&state, user.id);

        let payload = json!({
            "endpoint": "https://push.example/a",
            "keys": {"p256dh": "p256", "auth": "auth"},
            "expirationTime": null,
        });
        let (status, json) = send(&state, post_json("/subscribe", &token, payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);

        let subs = PushSubscriptionRepository::list_for_user(&state.db, user.id)
            .await
            .unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].user_agent.as_deref(), Some("test-agent"));

        let payload = json!({"endpoint": "https://push.example/a"});
        let (_, json) = send(&state, post_json("/unsubscribe", &token, payload)).await;
        assert_eq!(json["deleted"], 1);

        // Idempotent: a second unsubscribe deletes nothing.
        let payload = json!({"endpoint": "https://push.example/a"});
        let (status, json) = send(&state, post_json("/unsubscribe", &token, payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["deleted"], 0);
    }
}

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    // GET as well as POST: hosted cron schedulers often only issue GETs.
    Router::new().route(
        "/trigger-whatsapp",
        get(trigger_whatsapp).post(trigger_whatsapp),
    )
}

#[derive(Debug, Deserialize)]
pub struct CronQuery {
    pub date: Option<String>,
    pub secret: Option<String>,
}

/// Kick off the WhatsApp daily digest for a date (today by default).
///
/// Guarded by the shared `CRON_SECRET`, accepted either as the
/// `X-Cron-Secret` header or the `secret` query parameter. When no secret
/// is configured the route is open.
async fn trigger_whatsapp(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CronQuery>,
) -> Result<Json<Value>, AppError> {
    if let Some(expected) = state
        .config
        .whatsapp
        .cron_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        let provided = headers
            .get("X-Cron-Secret")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or(query.secret.as_deref().map(str::trim));
        if provided != Some(expected) {
            return Err(AppError::Unauthorized);
        }
    }

    let date = match query.date.as_deref().filter(|d| !d.is_empty()) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| AppError::BadRequest("date must be YYYY-MM-DD".to_string()))?,
        None => Utc::now().date_naive(),
    };

    let Some(whatsapp) = state.whatsapp.as_ref() else {
        return Err(AppError::ServiceUnavailable(
            "WhatsApp digest is not configured".to_string(),
        ));
    };

    let summary = whatsapp.send_daily_digest(&state.db, date).await?;
    Ok(Json(json!(summary)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::routes::testing::{test_state, test_state_with};
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

    async fn secured_state() -> Arc<AppState> {
        let mut config = Config::default();
        config.whatsapp.cron_secret = Some("s3cret".to_string());
        test_state_with(config).await
    }

    #[tokio::test]
    async fn trigger_requires_the_shared_secret_when_configured() {
        let state = secured_state().await;

        let request = Request::builder()
            .uri("/trigger-whatsapp")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&state, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "UNAUTHORIZED");

        let request = Request::builder()
            .uri("/trigger-whatsapp?secret=wrong")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn secret_is_accepted_from_header_or_query_on_get_and_post() {
        let state = secured_state().await;

        // Passing the guard with no Twilio credentials surfaces the
        // digest-disabled error, not 401.
        let request = Request::builder()
            .uri("/trigger-whatsapp")
            .header("X-Cron-Secret", "s3cret")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&state, request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"]["code"], "SERVICE_UNAVAILABLE");

        let request = Request::builder()
            .method("POST")
            .uri("/trigger-whatsapp?secret=s3cret")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn trigger_is_open_when_no_secret_is_configured() {
        let state = test_state().await;

        let request = Request::builder()
            .uri("/trigger-whatsapp")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn malformed_date_is_rejected_before_the_digest_runs() {
        let state = secured_state().await;

        let request = Request::builder()
            .uri("/trigger-whatsapp?secret=s3cret&date=03-05-2025")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["message"], "date must be YYYY-MM-DD");
    }
}

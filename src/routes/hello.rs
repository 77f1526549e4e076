//! Greeting endpoint.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use http::header::{HeaderValue, CONTENT_TYPE};
use serde::Serialize;

use crate::state::AppState;

/// Content type sent with every JSON body, charset included.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

#[derive(Debug, Serialize)]
pub struct HelloResponse {
    pub message: String,
}

/// `GET /hello`: `{"message":"<greeting>, Metaverse!"}`
pub async fn hello(State(state): State<AppState>) -> impl IntoResponse {
    let body = HelloResponse {
        message: format!("{}, Metaverse!", state.config.hello.greeting),
    };
    tracing::debug!(message = %body.message, "Replying hello");

    (
        [(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        Json(body),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use http::StatusCode;

    #[tokio::test]
    async fn test_hello_body_and_headers() {
        let state = AppState::new(AppConfig::default());
        let response = hello(State(state)).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE].to_str().unwrap(),
            JSON_CONTENT_TYPE
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "message": "你好, Metaverse!" }));
    }

    #[tokio::test]
    async fn test_hello_uses_configured_greeting() {
        let mut config = AppConfig::default();
        config.hello.greeting = "Hello".to_string();
        let response = hello(State(AppState::new(config))).await.into_response();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"message":"Hello, Metaverse!"}"#);
    }
}

//! Remote API client
//!
//! `RemoteApi` is the seam between the sync engine and the network: the
//! engine only ever talks to this trait, so tests drive it against an
//! in-memory fake. `HttpRemoteApi` is the production implementation.

pub mod wire;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url};

use wire::{ClubWire, CourseHoleWire, CourseWire, RoundWire, UserWire};

/// Client-side surface of the remote service.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_round(&self, payload: &RoundWire, idempotency_key: &str) -> Result<RoundWire>;
    async fn update_round(&self, server_id: i64, payload: &RoundWire) -> Result<RoundWire>;
    async fn delete_round(&self, server_id: i64) -> Result<()>;
    async fn list_rounds(&self) -> Result<Vec<RoundWire>>;

    async fn create_club(&self, payload: &ClubWire, idempotency_key: &str) -> Result<ClubWire>;
    async fn update_club(&self, server_id: i64, payload: &ClubWire) -> Result<ClubWire>;
    async fn delete_club(&self, server_id: i64) -> Result<()>;
    async fn list_clubs(&self) -> Result<Vec<ClubWire>>;

    async fn create_course(&self, payload: &CourseWire, idempotency_key: &str)
        -> Result<CourseWire>;
    async fn get_course(&self, server_id: i64) -> Result<CourseWire>;
    async fn patch_course_hole(
        &self,
        course_server_id: i64,
        hole_number: i64,
        payload: &CourseHoleWire,
    ) -> Result<CourseHoleWire>;
    async fn publish_course(&self, server_id: i64) -> Result<()>;

    async fn create_user(&self, device_id: &str) -> Result<UserWire>;
    async fn me(&self) -> Result<UserWire>;

    /// Cheap reachability check used by the connectivity monitor.
    async fn ping(&self) -> Result<()>;
}

/// HTTP implementation of `RemoteApi` over reqwest.
#[derive(Clone)]
pub struct HttpRemoteApi {
    base_url: String,
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl HttpRemoteApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            client,
            auth_token: None,
        })
    }

    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("Accept", "application/json");
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn expect_ok(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = parse_api_error(status, &body);
        if status.is_server_error() {
            Err(Error::RemoteTransient(message))
        } else {
            Err(Error::RemoteRejected {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        let response = Self::expect_ok(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create_round(&self, payload: &RoundWire, idempotency_key: &str) -> Result<RoundWire> {
        let response = self
            .request(Method::POST, "/rounds")
            .header("Idempotency-Key", idempotency_key)
            .json(payload)
            .send()
            .await?;
        Self::json(response).await
    }

    async fn update_round(&self, server_id: i64, payload: &RoundWire) -> Result<RoundWire> {
        let response = self
            .request(Method::PUT, &format!("/rounds/{server_id}"))
            .json(payload)
            .send()
            .await?;
        Self::json(response).await
    }

    async fn delete_round(&self, server_id: i64) -> Result<()> {
        let response = self
            .request(Method::DELETE, &format!("/rounds/{server_id}"))
            .send()
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    async fn list_rounds(&self) -> Result<Vec<RoundWire>> {
        let response = self.request(Method::GET, "/rounds").send().await?;
        Self::json(response).await
    }

    async fn create_club(&self, payload: &ClubWire, idempotency_key: &str) -> Result<ClubWire> {
        let response = self
            .request(Method::POST, "/clubs")
            .header("Idempotency-Key", idempotency_key)
            .json(payload)
            .send()
            .await?;
        Self::json(response).await
    }

    async fn update_club(&self, server_id: i64, payload: &ClubWire) -> Result<ClubWire> {
        let response = self
            .request(Method::PUT, &format!("/clubs/{server_id}"))
            .json(payload)
            .send()
            .await?;
        Self::json(response).await
    }

    async fn delete_club(&self, server_id: i64) -> Result<()> {
        let response = self
            .request(Method::DELETE, &format!("/clubs/{server_id}"))
            .send()
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    async fn list_clubs(&self) -> Result<Vec<ClubWire>> {
        let response = self.request(Method::GET, "/clubs").send().await?;
        Self::json(response).await
    }

    async fn create_course(
        &self,
        payload: &CourseWire,
        idempotency_key: &str,
    ) -> Result<CourseWire> {
        let response = self
            .request(Method::POST, "/courses")
            .header("Idempotency-Key", idempotency_key)
            .json(payload)
            .send()
            .await?;
        Self::json(response).await
    }

    async fn get_course(&self, server_id: i64) -> Result<CourseWire> {
        let response = self
            .request(Method::GET, &format!("/courses/{server_id}"))
            .send()
            .await?;
        Self::json(response).await
    }

    async fn patch_course_hole(
        &self,
        course_server_id: i64,
        hole_number: i64,
        payload: &CourseHoleWire,
    ) -> Result<CourseHoleWire> {
        let response = self
            .request(
                Method::PATCH,
                &format!("/courses/{course_server_id}/holes/{hole_number}"),
            )
            .json(payload)
            .send()
            .await?;
        Self::json(response).await
    }

    async fn publish_course(&self, server_id: i64) -> Result<()> {
        let response = self
            .request(Method::POST, &format!("/courses/{server_id}/publish"))
            .send()
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    async fn create_user(&self, device_id: &str) -> Result<UserWire> {
        let response = self
            .request(Method::POST, "/users")
            .json(&serde_json::json!({ "device": device_id }))
            .send()
            .await?;
        Self::json(response).await
    }

    async fn me(&self) -> Result<UserWire> {
        let response = self.request(Method::GET, "/me").send().await?;
        Self::json(response).await
    }

    async fn ping(&self) -> Result<()> {
        let response = self.request(Method::GET, "/healthz").send().await?;
        Self::expect_ok(response).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("API base URL must not be empty".into()));
    }
    if !is_http_url(trimmed) {
        return Err(Error::InvalidInput(
            "API base URL must include http:// or https://".into(),
        ));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
    }

    #[test]
    fn normalize_base_url_strips_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://api.example.com/".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn parse_api_error_prefers_structured_message() {
        let message = parse_api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error": "score out of range"}"#,
        );
        assert_eq!(message, "score out of range (422)");
    }

    #[test]
    fn parse_api_error_falls_back_to_body_text() {
        let message = parse_api_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(message, "upstream down (502)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }
}

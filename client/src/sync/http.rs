//! JSON-over-HTTP implementation of [`RemoteBackend`].
//!
//! Routes, relative to the base URL:
//!
//! | Call      | Request                                   |
//! |-----------|-------------------------------------------|
//! | create    | `POST /{type}` with the document          |
//! | update    | `PUT /{type}/{id}` with the document      |
//! | overwrite | `PUT /{type}/{id}?overwrite=true`         |
//! | delete    | `DELETE /{type}/{id}`                     |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::Value;

use super::backend::{RemoteBackend, RemoteError};

/// Reference backend talking to a REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpBackend {
    /// Create a backend rooted at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url).map_err(|e| RemoteError::Other {
            message: format!("invalid remote url '{base_url}': {e}"),
            retryable: false,
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Other {
                message: format!("remote url '{base_url}' cannot hold paths"),
                retryable: false,
            });
        }

        let client = Client::builder().timeout(timeout).build().map_err(|e| RemoteError::Other {
            message: e.to_string(),
            retryable: false,
        })?;

        Ok(Self {
            client,
            base_url,
            auth_token: None,
            timeout,
        })
    }

    /// Builder-style method to send a bearer token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, missing_is_ok: bool) -> Result<(), RemoteError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(self.timeout)
            } else {
                RemoteError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() || (missing_is_ok && status == StatusCode::NOT_FOUND) {
            return Ok(());
        }

        if status == StatusCode::CONFLICT {
            let remote = response.json::<Value>().await.unwrap_or(Value::Null);
            return Err(RemoteError::Conflict { remote });
        }

        let message = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), %message, "Remote returned an error");

        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            Err(RemoteError::Server {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(RemoteError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn create_entity(&self, entity_type: &str, _id: &str, document: &Value) -> Result<(), RemoteError> {
        let request = self
            .request(Method::POST, self.url(&[entity_type]))
            .json(document);
        self.send(request, false).await
    }

    async fn update_entity(&self, entity_type: &str, id: &str, document: &Value) -> Result<(), RemoteError> {
        let request = self
            .request(Method::PUT, self.url(&[entity_type, id]))
            .json(document);
        self.send(request, false).await
    }

    async fn delete_entity(&self, entity_type: &str, id: &str) -> Result<(), RemoteError> {
        let request = self.request(Method::DELETE, self.url(&[entity_type, id]));
        self.send(request, true).await
    }

    async fn overwrite_entity(&self, entity_type: &str, id: &str, document: &Value) -> Result<(), RemoteError> {
        let request = self
            .request(Method::PUT, self.url(&[entity_type, id]))
            .query(&[("overwrite", "true")])
            .json(document);
        self.send(request, false).await
    }
}

//! Instagram carousel publishing through the Graph API.
//!
//! Protocol, strictly sequential:
//! 1. `POST /{account}/media` once per image with `is_carousel_item=true`
//! 2. `POST /{account}/media` with `media_type=CAROUSEL`, the child ids and the caption
//! 3. `POST /{account}/media_publish` with the container id
//!
//! Any failing call aborts the publish. Children created before the failure
//! are left behind; the Graph API expires unpublished containers on its own.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::errors::PersistenceError;
use crate::http;
use crate::store::CredentialStore;

/// The Graph API accepts at most this many children per carousel.
pub const MAX_CAROUSEL_ITEMS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStep {
    CreateChild,
    CreateContainer,
    PublishContainer,
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PublishStep::CreateChild => "create_child",
            PublishStep::CreateContainer => "create_container",
            PublishStep::PublishContainer => "publish_container",
        })
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no images to publish")]
    NoImages,

    #[error("no publishing credential stored")]
    MissingCredential,

    #[error("credential store unavailable: {0}")]
    Credential(#[from] PersistenceError),

    #[error("{step} failed: {message}")]
    Step { step: PublishStep, message: String },
}

impl PublishError {
    fn step(step: PublishStep, message: impl Into<String>) -> Self {
        PublishError::Step {
            step,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    /// Id of the published post.
    pub media_id: String,
    pub container_id: String,
    pub child_ids: Vec<String>,
}

#[async_trait]
pub trait CarouselPublisher: Send + Sync {
    /// Publishes up to [`MAX_CAROUSEL_ITEMS`] images, in order, with `caption`.
    async fn publish(&self, image_urls: &[String], caption: &str)
        -> Result<PublishResult, PublishError>;
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Deserialize)]
struct GraphErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

/// Best human-readable message from a Graph API error body.
fn graph_error_message(body: &str) -> String {
    match serde_json::from_str::<GraphErrorBody>(body) {
        Ok(GraphErrorBody {
            error: GraphErrorDetail {
                message,
                code: Some(code),
            },
        }) => format!("{} (code {})", message, code),
        Ok(parsed) => parsed.error.message,
        Err(_) => body.to_string(),
    }
}

pub struct GraphPublisher {
    client: reqwest::Client,
    base_url: Url,
    account_id: String,
    credentials: Arc<dyn CredentialStore>,
}

impl GraphPublisher {
    pub fn new(
        graph_base_url: &str,
        account_id: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: http::build_client(http::REQUEST_TIMEOUT)?,
            base_url: http::parse_base_url(graph_base_url)?,
            account_id: account_id.into(),
            credentials,
        })
    }

    async fn access_token(&self) -> Result<String, PublishError> {
        let credential = self
            .credentials
            .load()
            .await?
            .ok_or(PublishError::MissingCredential)?;

        if credential.expires_at <= Utc::now() {
            warn!(
                expires_at = %credential.expires_at,
                "publishing with an expired credential"
            );
        }
        Ok(credential.access_token)
    }

    /// POSTs `form` to `/{account}/{edge}` and returns the `id` of the created object.
    async fn create(
        &self,
        step: PublishStep,
        edge: &str,
        form: &[(&str, &str)],
        token: &str,
    ) -> Result<String, PublishError> {
        let url = http::join(&self.base_url, &[self.account_id.as_str(), edge]);
        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .form(form)
            .send()
            .await
            .map_err(|e| PublishError::step(step, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = http::error_body(resp).await;
            return Err(PublishError::step(
                step,
                format!("HTTP {}: {}", status.as_u16(), graph_error_message(&body)),
            ));
        }

        let body: IdResponse = resp
            .json()
            .await
            .map_err(|e| PublishError::step(step, format!("invalid response: {}", e)))?;
        Ok(body.id)
    }
}

#[async_trait]
impl CarouselPublisher for GraphPublisher {
    async fn publish(
        &self,
        image_urls: &[String],
        caption: &str,
    ) -> Result<PublishResult, PublishError> {
        let images = &image_urls[..image_urls.len().min(MAX_CAROUSEL_ITEMS)];
        if images.is_empty() {
            return Err(PublishError::NoImages);
        }
        let token = self.access_token().await?;

        // A carousel needs at least two children; a single image is posted directly.
        if let [single] = images {
            let container_id = self
                .create(
                    PublishStep::CreateContainer,
                    "media",
                    &[("image_url", single.as_str()), ("caption", caption)],
                    &token,
                )
                .await?;
            let media_id = self
                .create(
                    PublishStep::PublishContainer,
                    "media_publish",
                    &[("creation_id", container_id.as_str())],
                    &token,
                )
                .await?;
            info!(media_id = %media_id, "single image published");
            return Ok(PublishResult {
                media_id,
                container_id,
                child_ids: Vec::new(),
            });
        }

        let mut child_ids = Vec::with_capacity(images.len());
        for (index, url) in images.iter().enumerate() {
            let child_id = self
                .create(
                    PublishStep::CreateChild,
                    "media",
                    &[("image_url", url.as_str()), ("is_carousel_item", "true")],
                    &token,
                )
                .await?;
            debug!(index, child_id = %child_id, "carousel child created");
            child_ids.push(child_id);
        }

        let children = child_ids.join(",");
        let container_id = self
            .create(
                PublishStep::CreateContainer,
                "media",
                &[
                    ("media_type", "CAROUSEL"),
                    ("children", children.as_str()),
                    ("caption", caption),
                ],
                &token,
            )
            .await?;
        debug!(container_id = %container_id, "carousel container created");

        let media_id = self
            .create(
                PublishStep::PublishContainer,
                "media_publish",
                &[("creation_id", container_id.as_str())],
                &token,
            )
            .await?;

        info!(
            media_id = %media_id,
            children = child_ids.len(),
            "carousel published"
        );

        Ok(PublishResult {
            media_id,
            container_id,
            child_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_error_message_prefers_structured_error() {
        let body = r#"{"error":{"message":"Invalid OAuth access token.","type":"OAuthException","code":190}}"#;
        assert_eq!(graph_error_message(body), "Invalid OAuth access token. (code 190)");
        assert_eq!(graph_error_message("<html>oops</html>"), "<html>oops</html>");
    }

    #[test]
    fn test_step_names() {
        assert_eq!(PublishStep::CreateChild.to_string(), "create_child");
        let err = PublishError::step(PublishStep::PublishContainer, "HTTP 500: boom");
        assert_eq!(err.to_string(), "publish_container failed: HTTP 500: boom");
    }
}

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Image download failed: {0}")]
    Download(String),
    #[error("Text-extraction gateway error: {0}")]
    Gateway(String),
    #[error("Unreadable gateway response: {0}")]
    Decode(String),
}

/// One recognised piece of text. Fragments arrive unordered and carry no
/// positional information.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextFragment {
    pub text: String,
}

impl TextFragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Abstraction over the text-extraction oracle: given an image reference,
/// return the recognised fragments.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, image_url: &str) -> Result<Vec<TextFragment>, ExtractError>;
}

/// Production extractor: downloads the submitted image and posts it to an
/// HTTP OCR gateway that answers with `[{"text": "..."}, ...]`.
pub struct HttpExtractor {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
}

impl HttpExtractor {
    pub fn new(client: reqwest::Client, gateway_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            gateway_url: gateway_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl TextExtractor for HttpExtractor {
    async fn extract(&self, image_url: &str) -> Result<Vec<TextFragment>, ExtractError> {
        let image = self
            .client
            .get(image_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExtractError::Download(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| ExtractError::Download(e.to_string()))?;

        tracing::debug!(bytes = image.len(), "image downloaded for extraction");

        let form = reqwest::multipart::Form::new().part(
            "image",
            reqwest::multipart::Part::bytes(image.to_vec()).file_name("upload.jpg"),
        );

        let fragments = self
            .client
            .post(&self.gateway_url)
            .header("X-Api-Key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExtractError::Gateway(e.to_string()))?
            .json::<Vec<TextFragment>>()
            .await
            .map_err(|e| ExtractError::Decode(e.to_string()))?;

        tracing::debug!(fragments = fragments.len(), "text extraction complete");
        Ok(fragments)
    }
}

/// Returns preset fragments — lets the reconciliation and verification paths
/// be exercised without a live gateway. Counts calls so tests can assert
/// which collaborators were (not) consulted.
#[derive(Default)]
pub struct MockExtractor {
    fragments: Vec<TextFragment>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn with_fragments<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: texts.into_iter().map(TextFragment::new).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self { fragments: Vec::new(), fail: true, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for MockExtractor {
    async fn extract(&self, _image_url: &str) -> Result<Vec<TextFragment>, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ExtractError::Gateway("simulated outage".to_string()));
        }
        Ok(self.fragments.clone())
    }
}

//! Seam to the external text-enrichment service.

use async_trait::async_trait;
use thiserror::Error;

/// Cleaned-up text returned by [`Enricher::clean_up`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cleaned {
    pub title: Option<String>,
    pub body: String,
}

#[derive(Debug, Error)]
#[error("enrichment failed: {0}")]
pub struct EnrichError(pub String);

/// Plain text in, cleaned text or tags out. Callers treat every failure as
/// non-fatal.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn clean_up(&self, text: &str, prompt: &str) -> Result<Cleaned, EnrichError>;

    async fn tag(&self, text: &str) -> Result<Vec<String>, EnrichError>;
}

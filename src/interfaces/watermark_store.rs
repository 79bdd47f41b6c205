//! Watermark storage interface.

use async_trait::async_trait;

use super::Result;
use crate::model::Sequence;

/// Named high-water marks, e.g. the dispatcher's last fully fanned-out event.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Sequence>>;

    async fn put(&self, name: &str, sequence: Sequence) -> Result<()>;
}

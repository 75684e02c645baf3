//! # Recognition Engine Interface
//!
//! This module defines the boundary to the external OCR capability. The core
//! never performs text recognition itself; collaborators plug an engine in
//! behind the [`OcrEngine`] trait. The module also provides the content
//! hashing used to key recognition results in the cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::AppResult;

/// Unstructured text produced by the OCR engine for a single image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecognitionResult {
    /// Verbatim recognized text
    pub raw_text: String,
}

/// External OCR capability
///
/// Engine failures propagate as pipeline errors; the caller decides how to
/// surface them.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text in the given image bytes
    async fn recognize(&self, image: &[u8]) -> AppResult<RawRecognitionResult>;
}

/// Compute the content hash of raw image bytes
///
/// Byte-identical uploads always produce the same digest, so repeat uploads
/// hit the recognition cache without re-running the engine.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

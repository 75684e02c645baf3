//! # spendscan
//!
//! Receipt understanding and category inference core for a personal-finance
//! backend. Scanned receipt images are preprocessed, recognized through an
//! external OCR engine, and parsed into structured fields; merchant strings
//! are categorized with confidence scores that improve as users confirm or
//! correct predictions.
//!
//! HTTP routing, persistence, and image storage live outside this crate and
//! plug in through the [`recognition::OcrEngine`] and
//! [`categorizer::TransactionHistory`] traits.

pub mod cache;
pub mod categorizer;
pub mod config;
pub mod errors;
pub mod extraction;
pub mod preprocessing;
pub mod recognition;
pub mod service;
pub mod validation;
pub mod worker_pool;

// Re-export types for easier access
pub use categorizer::{
    CategoryPrediction, CategoryScore, CategorySuggestion, SmartCategorizer, SuggestionReason,
    TransactionHistory,
};
pub use config::AppConfig;
pub use errors::{AppError, AppResult};
pub use extraction::{ExtractedReceiptData, LineItem, ReceiptFieldExtractor};
pub use recognition::{content_hash, OcrEngine, RawRecognitionResult};
pub use service::ScanService;

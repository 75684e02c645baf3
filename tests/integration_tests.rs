//! # Integration Tests
//!
//! End-to-end tests for the scan service: the full preprocess, recognize,
//! extract pipeline with caching and pooling, driven through a mock OCR
//! engine so recognition calls are observable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spendscan::categorizer::{CategoryRecord, TransactionHistory, TransactionRecord};
use spendscan::config::AppConfig;
use spendscan::errors::{AppError, AppResult};
use spendscan::recognition::{OcrEngine, RawRecognitionResult};
use spendscan::ScanService;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Mock engine that returns a fixed text and counts invocations
struct CountingEngine {
    text: String,
    calls: AtomicUsize,
    fail: bool,
}

impl CountingEngine {
    fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            text: String::new(),
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for CountingEngine {
    async fn recognize(&self, _image: &[u8]) -> AppResult<RawRecognitionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::Recognition("engine unavailable".to_string()));
        }
        Ok(RawRecognitionResult {
            raw_text: self.text.clone(),
        })
    }
}

struct EmptyHistory;

#[async_trait]
impl TransactionHistory for EmptyHistory {
    async fn recent_transactions(
        &self,
        _user_id: &str,
        _limit: usize,
    ) -> AppResult<Vec<TransactionRecord>> {
        Ok(vec![])
    }

    async fn user_categories(&self, _user_id: &str) -> AppResult<Vec<CategoryRecord>> {
        Ok(vec![])
    }
}

/// A tiny but valid PNG, so image validation and preprocessing both succeed
fn valid_image_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(32, 32, image::Rgb([200, 200, 200]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(
            &mut std::io::Cursor::new(&mut buf),
            image::ImageFormat::Png,
        )
        .unwrap();
    buf
}

fn service_with_engine(engine: Arc<CountingEngine>) -> ScanService {
    ScanService::new(AppConfig::default(), engine, Arc::new(EmptyHistory)).unwrap()
}

const RECEIPT_TEXT: &str =
    "WALMART SUPERCENTER\n123 Main St\nDate: 01/15/2024\nMilk 3.49\nBread 2.99\nSubtotal: 6.48\nTax: 0.52\nTotal: $7.00";

#[tokio::test]
async fn test_scan_receipt_end_to_end() {
    init_tracing();
    let engine = CountingEngine::new(RECEIPT_TEXT);
    let service = service_with_engine(Arc::clone(&engine));

    let data = service.scan_receipt(&valid_image_bytes()).await.unwrap();
    assert_eq!(data.merchant.as_deref(), Some("WALMART SUPERCENTER"));
    assert_eq!(data.date.as_deref(), Some("01/15/2024"));
    assert_eq!(data.subtotal.as_deref(), Some("6.48"));
    assert_eq!(data.tax.as_deref(), Some("0.52"));
    assert_eq!(data.total.as_deref(), Some("7.00"));
    assert_eq!(data.items.len(), 2);
    assert_eq!(data.raw_text, RECEIPT_TEXT);
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_identical_uploads_hit_cache() {
    init_tracing();
    let engine = CountingEngine::new(RECEIPT_TEXT);
    let service = service_with_engine(Arc::clone(&engine));
    let image = valid_image_bytes();

    let first = service.scan_receipt(&image).await.unwrap();
    let second = service.scan_receipt(&image).await.unwrap();

    assert_eq!(first, second);
    // Second scan was served from the cache without touching the engine
    assert_eq!(engine.calls(), 1);

    let stats = service.cache_stats();
    let recognition = &stats.per_cache_breakdown["recognition"];
    assert_eq!(recognition.hits, 1);
    assert_eq!(recognition.misses, 1);
    assert_eq!(recognition.sets, 1);
}

#[tokio::test]
async fn test_cache_ttl_expiry_reinvokes_engine() {
    let engine = CountingEngine::new(RECEIPT_TEXT);
    let mut config = AppConfig::default();
    config.cache.recognition_ttl_secs = 1;
    let engine_dyn: Arc<dyn OcrEngine> = engine.clone();
    let service =
        ScanService::new(config, engine_dyn, Arc::new(EmptyHistory)).unwrap();
    let image = valid_image_bytes();

    service.scan_receipt(&image).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    service.scan_receipt(&image).await.unwrap();

    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn test_engine_failure_propagates() {
    let engine = CountingEngine::failing();
    let service = service_with_engine(Arc::clone(&engine));

    let result = service.scan_receipt(&valid_image_bytes()).await;
    assert!(matches!(result, Err(AppError::Recognition(_))));
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_failed_scans_are_not_cached() {
    let engine = CountingEngine::failing();
    let service = service_with_engine(Arc::clone(&engine));
    let image = valid_image_bytes();

    assert!(service.scan_receipt(&image).await.is_err());
    assert!(service.scan_receipt(&image).await.is_err());
    // Both attempts reached the engine; nothing partial was memoized
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn test_invalid_image_is_a_fatal_error() {
    let engine = CountingEngine::new(RECEIPT_TEXT);
    let service = service_with_engine(Arc::clone(&engine));

    let empty = service.scan_receipt(&[]).await;
    assert!(matches!(empty, Err(AppError::Validation(_))));

    let garbage = service.scan_receipt(b"not an image").await;
    assert!(matches!(garbage, Err(AppError::Validation(_))));

    // Validation failures never reach the engine
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_preprocessing_failure_degrades_gracefully() {
    // A real image format header followed by a corrupt body: validation
    // accepts it, decoding fails, and preprocessing falls back to the
    // original bytes instead of failing the scan.
    let mut corrupt = valid_image_bytes();
    corrupt.truncate(20);

    let engine = CountingEngine::new(RECEIPT_TEXT);
    let service = service_with_engine(Arc::clone(&engine));

    let data = service.scan_receipt(&corrupt).await.unwrap();
    assert_eq!(data.merchant.as_deref(), Some("WALMART SUPERCENTER"));
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_scans_complete_under_pool_bound() {
    let engine = CountingEngine::new(RECEIPT_TEXT);
    let service = Arc::new(service_with_engine(Arc::clone(&engine)));

    // Distinct images, so every scan goes through the pool
    let mut handles = Vec::new();
    for i in 0..7u8 {
        let service = Arc::clone(&service);
        let mut image = valid_image_bytes();
        image.push(i);
        handles.push(tokio::spawn(async move {
            service.scan_receipt(&image).await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(engine.calls(), 7);
}

#[tokio::test]
async fn test_shutdown_rejects_further_scans() {
    let engine = CountingEngine::new(RECEIPT_TEXT);
    let service = service_with_engine(Arc::clone(&engine));

    service.shutdown();
    let result = service.scan_receipt(&valid_image_bytes()).await;
    assert!(matches!(result, Err(AppError::Pool(_))));
}

#[tokio::test]
async fn test_categorization_round_trip_through_service() {
    let engine = CountingEngine::new(RECEIPT_TEXT);
    let service = service_with_engine(Arc::clone(&engine));

    let prediction = service.predict_category("Starbucks", "user1").await;
    assert_eq!(prediction.category_id.as_deref(), Some("fast_food"));

    service
        .learn_from_user_decision("Joe's Cafe", "category_x", "user1")
        .await
        .unwrap();
    let prediction = service.predict_category("Joe's Cafe", "user1").await;
    assert_eq!(prediction.category_id.as_deref(), Some("category_x"));

    let suggestions = service
        .get_category_suggestions("Joe's Cafe", "user1", Some(5))
        .await;
    assert!(!suggestions.is_empty());

    service.invalidate_user("user1");
    let stats = service.cache_stats();
    assert!(stats.per_cache_breakdown.contains_key("user_profiles"));
}

#[tokio::test]
async fn test_cache_stats_aggregate_shape() {
    let engine = CountingEngine::new(RECEIPT_TEXT);
    let service = service_with_engine(Arc::clone(&engine));
    let image = valid_image_bytes();

    service.scan_receipt(&image).await.unwrap();
    service.scan_receipt(&image).await.unwrap();

    let stats = service.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.sets, 1);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);

    let json = serde_json::to_value(&stats).unwrap();
    assert!(json.get("hitRate").is_some());
    assert!(json.get("perCacheBreakdown").is_some());
}

//! # Scan Service
//!
//! The composition root of the receipt core. A [`ScanService`] owns
//! constructed instances of the preprocessor, extractor, caches, worker
//! pool, and categorizer, wired together explicitly so lifecycles are
//! visible and nothing hides in process-wide globals.
//!
//! Pipeline for an uploaded image: content hash, cache lookup, and on a miss
//! the worker pool admits preprocessing plus recognition, the extractor
//! structures the text, and the result is cached and returned.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::cache::{CacheManager, CacheManagerStats};
use crate::categorizer::{
    CategoryPrediction, CategorySuggestion, SmartCategorizer, TransactionHistory,
};
use crate::config::AppConfig;
use crate::errors::{error_logging, AppResult};
use crate::extraction::{ExtractedReceiptData, ReceiptFieldExtractor};
use crate::preprocessing::ReceiptPreprocessor;
use crate::recognition::{content_hash, OcrEngine};
use crate::validation;
use crate::worker_pool::{Priority, WorkerPool};

/// End-to-end receipt scanning and categorization service
pub struct ScanService {
    config: AppConfig,
    engine: Arc<dyn OcrEngine>,
    preprocessor: ReceiptPreprocessor,
    extractor: ReceiptFieldExtractor,
    caches: CacheManager,
    pool: WorkerPool,
    categorizer: SmartCategorizer,
}

impl ScanService {
    /// Construct the service from configuration and its collaborators
    ///
    /// The configuration is validated here so misconfiguration surfaces at
    /// startup rather than mid-request.
    pub fn new(
        config: AppConfig,
        engine: Arc<dyn OcrEngine>,
        history: Arc<dyn TransactionHistory>,
    ) -> AppResult<Self> {
        config.validate()?;
        let service = Self {
            preprocessor: ReceiptPreprocessor::new(config.preprocess.clone()),
            extractor: ReceiptFieldExtractor::new(),
            caches: CacheManager::new(&config.cache),
            pool: WorkerPool::new(config.pool.clone()),
            categorizer: SmartCategorizer::new(history, config.categorizer.clone()),
            engine,
            config,
        };
        info!(
            max_workers = service.config.pool.max_workers,
            cache_ttl_secs = service.config.cache.recognition_ttl_secs,
            "scan service initialized"
        );
        Ok(service)
    }

    /// Scan a receipt image into structured fields
    ///
    /// Byte-identical uploads are served from the recognition cache without
    /// touching the engine. On a miss the job goes through the worker pool
    /// at normal priority.
    pub async fn scan_receipt(&self, image: &[u8]) -> AppResult<ExtractedReceiptData> {
        self.scan_receipt_with_priority(image, Priority::Normal).await
    }

    /// Scan a receipt image at an explicit scheduling priority
    pub async fn scan_receipt_with_priority(
        &self,
        image: &[u8],
        priority: Priority,
    ) -> AppResult<ExtractedReceiptData> {
        validation::validate_image_bytes(image, self.config.preprocess.max_input_bytes)?;

        let hash = content_hash(image);
        if let Some(cached) = self.caches.recognition.get(&hash) {
            metrics::counter!("recognition_cache_hits_total").increment(1);
            debug!(content_hash = %hash, "recognition served from cache");
            return Ok(cached);
        }
        metrics::counter!("recognition_cache_misses_total").increment(1);

        // Preprocessing happens inside the scheduled task so the heavy work
        // is bounded by the pool along with recognition itself.
        let started = Instant::now();
        let engine = Arc::clone(&self.engine);
        let preprocessor = self.preprocessor.clone();
        let bytes = image.to_vec();
        let recognized = self
            .pool
            .schedule(priority, move || async move {
                let processed = preprocessor.preprocess(&bytes);
                engine.recognize(&processed).await
            })
            .await;

        let recognized = match recognized {
            Ok(result) => result,
            Err(e) => {
                error_logging::log_recognition_error(
                    &e,
                    "scan_receipt",
                    Some(image.len()),
                    Some(started.elapsed()),
                );
                return Err(e);
            }
        };

        let data = self.extractor.extract(&recognized.raw_text);
        // Only a fully successful extraction reaches this point; partial
        // results never enter the cache.
        self.caches.recognition.insert(hash, data.clone());
        metrics::histogram!("recognition_duration_ms")
            .record(started.elapsed().as_millis() as f64);
        Ok(data)
    }

    /// Predict a spending category for a merchant string
    pub async fn predict_category(&self, merchant: &str, user_id: &str) -> CategoryPrediction {
        self.categorizer.predict_category(merchant, user_id).await
    }

    /// Ranked category suggestions for a merchant
    pub async fn get_category_suggestions(
        &self,
        merchant: &str,
        user_id: &str,
        limit: Option<usize>,
    ) -> Vec<CategorySuggestion> {
        self.categorizer
            .get_category_suggestions(merchant, user_id, limit)
            .await
    }

    /// Record a user-confirmed categorization into the learned profile
    pub async fn learn_from_user_decision(
        &self,
        merchant: &str,
        category_id: &str,
        user_id: &str,
    ) -> AppResult<()> {
        self.categorizer
            .learn_from_user_decision(merchant, category_id, user_id)
            .await
    }

    /// Drop a user's cached categorization profile
    ///
    /// Call whenever the user's transaction history is modified outside
    /// this process.
    pub fn invalidate_user(&self, user_id: &str) {
        self.categorizer.invalidate_user(user_id);
    }

    /// Aggregated statistics across the in-process caches
    pub fn cache_stats(&self) -> CacheManagerStats {
        CacheManagerStats::from_parts(vec![
            ("recognition", self.caches.recognition.stats()),
            ("user_profiles", self.categorizer.profile_cache_stats()),
        ])
    }

    /// Shut down the service
    ///
    /// Terminates pooled workers and rejects queued recognition waiters.
    /// Cached data is left in place; it is harmless and the process is
    /// usually about to exit anyway.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        info!("scan service shut down");
    }
}

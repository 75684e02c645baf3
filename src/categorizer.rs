//! # Smart Categorizer Module
//!
//! Predicts a spending category for a merchant string by combining three
//! signal sources:
//!
//! 1. Built-in keyword pattern groups covering common merchant archetypes
//! 2. The user's historical merchant-to-category associations
//! 3. The user's own categories, scored by their name and description tokens
//!
//! Scores from all sources are merged into one ranked, confidence-scored
//! list. User-confirmed decisions feed back into a per-user learned profile,
//! so predictions improve over time.
//!
//! Prediction must never block transaction creation: any internal failure
//! degrades to an unconfident empty prediction instead of propagating.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CacheStats;
use crate::config::CategorizerConfig;
use crate::errors::{error_logging, AppError, AppResult};

/// Built-in keyword pattern groups mapping a category archetype to the
/// merchant keywords that indicate it
static CATEGORY_PATTERNS: &[(&str, &[&str])] = &[
    (
        "fast_food",
        &[
            "mcdonald",
            "burger king",
            "kfc",
            "subway",
            "starbucks",
            "dunkin",
            "pizza hut",
            "domino",
            "taco bell",
            "cafe",
        ],
    ),
    (
        "groceries",
        &[
            "walmart",
            "kroger",
            "safeway",
            "aldi",
            "trader joe",
            "whole foods",
            "costco",
            "grocery",
            "supermarket",
            "market",
        ],
    ),
    (
        "transport",
        &[
            "uber", "lyft", "shell", "chevron", "exxon", "texaco", "gas", "fuel", "parking",
            "transit",
        ],
    ),
    (
        "shopping",
        &[
            "amazon",
            "target",
            "best buy",
            "ebay",
            "ikea",
            "home depot",
            "mall",
            "outlet",
            "store",
        ],
    ),
    (
        "entertainment",
        &[
            "netflix",
            "spotify",
            "cinema",
            "theater",
            "hulu",
            "disney",
            "steam",
            "playstation",
            "concert",
        ],
    ),
    (
        "utilities",
        &[
            "electric", "water", "internet", "comcast", "verizon", "at&t", "t-mobile", "utility",
        ],
    ),
    (
        "health",
        &[
            "pharmacy", "cvs", "walgreens", "clinic", "hospital", "dental", "doctor", "optical",
        ],
    ),
    (
        "travel",
        &[
            "hotel", "airbnb", "marriott", "hilton", "airline", "delta", "united", "expedia",
        ],
    ),
];

/// One historical transaction, as provided by the persistence collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Merchant string as stored on the transaction
    pub merchant: String,
    /// Category the user assigned, if any
    pub category_id: Option<String>,
}

/// One user-defined category, as provided by the persistence collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

/// Read access to a user's transaction history and categories
///
/// Implemented by the persistence layer. Queries are expected to be sorted
/// most recent first.
#[async_trait]
pub trait TransactionHistory: Send + Sync {
    /// Up to `limit` most recent transactions for the user
    async fn recent_transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> AppResult<Vec<TransactionRecord>>;

    /// The user's category list
    async fn user_categories(&self, user_id: &str) -> AppResult<Vec<CategoryRecord>>;
}

/// A scored category candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryScore {
    pub category_id: String,
    pub confidence: f64,
}

/// Result of a category prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPrediction {
    /// Highest-scoring category, if any source produced a score
    pub category_id: Option<String>,
    /// Score of the chosen category; the maximum across all sources
    pub confidence: f64,
    /// Whether the confidence clears the configured threshold
    pub is_confident: bool,
    /// Next best candidates, best first
    pub alternatives: Vec<CategoryScore>,
}

impl CategoryPrediction {
    /// The degraded prediction returned when no signal or an internal
    /// failure leaves nothing to report
    pub fn unconfident() -> Self {
        Self {
            category_id: None,
            confidence: 0.0,
            is_confident: false,
            alternatives: Vec::new(),
        }
    }
}

/// Why a suggestion was offered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuggestionReason {
    #[serde(rename = "Pattern match")]
    PatternMatch,
    #[serde(rename = "Alternative match")]
    AlternativeMatch,
    #[serde(rename = "Frequently used")]
    FrequentlyUsed,
}

/// A ranked category suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySuggestion {
    pub category_id: String,
    pub confidence: f64,
    pub reason: SuggestionReason,
}

/// Per-user learned categorization state
///
/// This is a cache over persisted transaction history, not a source of
/// truth. Counts only grow; there is no unlearning. Staleness against
/// externally modified history is accepted until `invalidate_user` is
/// called.
#[derive(Debug, Clone, Default)]
pub struct UserCategorizationProfile {
    /// Overall category usage counts
    pub frequent_categories: HashMap<String, u32>,
    /// Lowercased merchant key to per-category counts
    pub merchant_categories: HashMap<String, HashMap<String, u32>>,
}

impl UserCategorizationProfile {
    fn from_transactions(transactions: &[TransactionRecord]) -> Self {
        let mut profile = Self::default();
        for transaction in transactions {
            if let Some(category_id) = &transaction.category_id {
                profile.record_decision(&transaction.merchant.trim().to_lowercase(), category_id);
            }
        }
        profile
    }

    fn record_decision(&mut self, merchant_key: &str, category_id: &str) {
        *self
            .frequent_categories
            .entry(category_id.to_string())
            .or_insert(0) += 1;
        *self
            .merchant_categories
            .entry(merchant_key.to_string())
            .or_default()
            .entry(category_id.to_string())
            .or_insert(0) += 1;
    }
}

/// Category predictor with per-user online learning
pub struct SmartCategorizer {
    history: Arc<dyn TransactionHistory>,
    config: CategorizerConfig,
    profiles: RwLock<HashMap<String, Arc<Mutex<UserCategorizationProfile>>>>,
    profile_stats: Mutex<CacheStats>,
}

impl SmartCategorizer {
    /// Create a new categorizer backed by the given history collaborator
    pub fn new(history: Arc<dyn TransactionHistory>, config: CategorizerConfig) -> Self {
        Self {
            history,
            config,
            profiles: RwLock::new(HashMap::new()),
            profile_stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Predict a spending category for a merchant string
    ///
    /// Never fails: internal errors degrade to an unconfident prediction so
    /// category prediction can never block transaction creation.
    pub async fn predict_category(&self, merchant: &str, user_id: &str) -> CategoryPrediction {
        match self.predict_inner(merchant, user_id).await {
            Ok(prediction) => prediction,
            Err(e) => {
                error_logging::log_prediction_error(&e, merchant, user_id);
                CategoryPrediction::unconfident()
            }
        }
    }

    async fn predict_inner(&self, merchant: &str, user_id: &str) -> AppResult<CategoryPrediction> {
        let normalized = merchant.trim().to_lowercase();
        if normalized.is_empty() {
            return Ok(CategoryPrediction::unconfident());
        }

        let mut scores: HashMap<String, f64> = HashMap::new();

        // Signal 1: built-in keyword pattern groups
        for (category_id, keywords) in CATEGORY_PATTERNS {
            let score = keyword_density(&normalized, keywords.iter().copied());
            if score > 0.0 {
                scores.insert((*category_id).to_string(), score);
            }
        }

        let profile = self.profile(user_id).await?;

        // Signal 2: the user's historical merchant associations. Later
        // sources overwrite earlier scores for the same category.
        {
            let profile = profile.lock();
            if let Some((category_id, confidence)) = self.score_history(&profile, &normalized) {
                scores.insert(category_id, confidence);
            }
        }

        // Signal 3: the user's own categories, scored by name and
        // description tokens with the same density formula
        for category in self.history.user_categories(user_id).await? {
            let keywords = category_keywords(&category);
            let score = keyword_density(&normalized, keywords.iter().map(String::as_str));
            if score > 0.0 {
                scores.insert(category.id, score);
            }
        }

        Ok(self.rank(scores))
    }

    /// Tally the user's past categories for merchants sharing the query's
    /// first token. The most frequent category wins, scored by its share of
    /// the similar transactions considered.
    fn score_history(
        &self,
        profile: &UserCategorizationProfile,
        normalized_merchant: &str,
    ) -> Option<(String, f64)> {
        let first_token = normalized_merchant.split_whitespace().next()?;

        let mut tallies: HashMap<&str, u32> = HashMap::new();
        let mut total: u32 = 0;
        for (merchant_key, categories) in &profile.merchant_categories {
            if !merchant_key.contains(first_token) {
                continue;
            }
            for (category_id, count) in categories {
                *tallies.entry(category_id.as_str()).or_insert(0) += count;
                total += count;
            }
        }
        if total == 0 {
            return None;
        }

        let considered = total.min(self.config.similar_transaction_limit as u32);
        let (best, count) = tallies
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))?;
        let confidence = (count as f64 / considered as f64).min(1.0);
        Some((best.to_string(), confidence))
    }

    fn rank(&self, scores: HashMap<String, f64>) -> CategoryPrediction {
        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        // Sort by score descending; ties break on the id for determinism
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let Some((category_id, confidence)) = ranked.first().cloned() else {
            return CategoryPrediction::unconfident();
        };
        let confidence = confidence.min(1.0);

        let alternatives = ranked
            .into_iter()
            .skip(1)
            .take(3)
            .map(|(category_id, score)| CategoryScore {
                category_id,
                confidence: score.min(1.0),
            })
            .collect();

        CategoryPrediction {
            is_confident: confidence >= self.config.confidence_threshold,
            category_id: Some(category_id),
            confidence,
            alternatives,
        }
    }

    /// Ranked category suggestions for a merchant
    ///
    /// The confident primary prediction comes first, then its alternatives,
    /// then the user's most frequently used categories as padding up to
    /// `limit`. Duplicates are skipped. Never fails; degradation yields a
    /// shorter list.
    pub async fn get_category_suggestions(
        &self,
        merchant: &str,
        user_id: &str,
        limit: Option<usize>,
    ) -> Vec<CategorySuggestion> {
        let limit = limit.unwrap_or(self.config.default_suggestion_limit);
        let prediction = self.predict_category(merchant, user_id).await;

        let mut suggestions: Vec<CategorySuggestion> = Vec::new();
        if prediction.is_confident {
            if let Some(category_id) = prediction.category_id.clone() {
                suggestions.push(CategorySuggestion {
                    category_id,
                    confidence: prediction.confidence,
                    reason: SuggestionReason::PatternMatch,
                });
            }
        }
        for alternative in &prediction.alternatives {
            if suggestions.len() >= limit {
                break;
            }
            if suggestions
                .iter()
                .any(|s| s.category_id == alternative.category_id)
            {
                continue;
            }
            suggestions.push(CategorySuggestion {
                category_id: alternative.category_id.clone(),
                confidence: alternative.confidence,
                reason: SuggestionReason::AlternativeMatch,
            });
        }

        if suggestions.len() < limit {
            self.pad_with_frequent(user_id, limit, &mut suggestions).await;
        }

        suggestions.truncate(limit);
        suggestions
    }

    async fn pad_with_frequent(
        &self,
        user_id: &str,
        limit: usize,
        suggestions: &mut Vec<CategorySuggestion>,
    ) {
        let profile = match self.profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, user_id = %user_id, "could not load profile for suggestion padding");
                return;
            }
        };
        let profile = profile.lock();

        let total: u32 = profile.frequent_categories.values().sum();
        if total == 0 {
            return;
        }
        let mut frequent: Vec<(&String, &u32)> = profile.frequent_categories.iter().collect();
        frequent.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (category_id, count) in frequent {
            if suggestions.len() >= limit {
                break;
            }
            if suggestions.iter().any(|s| &s.category_id == category_id) {
                continue;
            }
            suggestions.push(CategorySuggestion {
                category_id: category_id.clone(),
                confidence: (*count as f64 / total as f64).min(1.0),
                reason: SuggestionReason::FrequentlyUsed,
            });
        }
    }

    /// Record a user-confirmed categorization
    ///
    /// Increments the merchant and overall frequency counters in the user's
    /// profile. Safe to call repeatedly; counters never decrement.
    pub async fn learn_from_user_decision(
        &self,
        merchant: &str,
        category_id: &str,
        user_id: &str,
    ) -> AppResult<()> {
        let merchant_key = merchant.trim().to_lowercase();
        if merchant_key.is_empty() {
            return Err(AppError::Validation("merchant cannot be empty".to_string()));
        }
        if category_id.trim().is_empty() {
            return Err(AppError::Validation(
                "category_id cannot be empty".to_string(),
            ));
        }

        // A history failure must not lose the decision; fall back to an
        // empty profile and learn into it.
        let profile = match self.profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(
                    error = %e,
                    user_id = %user_id,
                    "profile build failed, learning into an empty profile"
                );
                self.insert_empty_profile(user_id)
            }
        };

        profile.lock().record_decision(&merchant_key, category_id);
        debug!(
            merchant = %merchant_key,
            category_id = %category_id,
            user_id = %user_id,
            "learned categorization decision"
        );
        metrics::counter!("categorizer_decisions_learned_total").increment(1);
        Ok(())
    }

    /// Drop a user's cached profile so the next access rebuilds it
    ///
    /// Call whenever transaction history is modified outside this process;
    /// the profile has no automatic invalidation.
    pub fn invalidate_user(&self, user_id: &str) {
        if self.profiles.write().remove(user_id).is_some() {
            self.profile_stats.lock().deletes += 1;
            info!(user_id = %user_id, "user categorization profile invalidated");
        }
    }

    /// Statistics for the profile cache
    pub fn profile_cache_stats(&self) -> CacheStats {
        // Locks taken one at a time, in the same profiles-then-stats order
        // as the build path
        let entries = self.profiles.read().len();
        let mut stats = self.profile_stats.lock().clone();
        stats.entries = entries;
        let total_requests = stats.hits + stats.misses;
        if total_requests > 0 {
            stats.hit_rate = stats.hits as f64 / total_requests as f64;
        }
        stats
    }

    /// Get or lazily build the user's profile from recent history
    async fn profile(&self, user_id: &str) -> AppResult<Arc<Mutex<UserCategorizationProfile>>> {
        if let Some(profile) = self.profiles.read().get(user_id) {
            self.profile_stats.lock().hits += 1;
            return Ok(Arc::clone(profile));
        }
        self.profile_stats.lock().misses += 1;

        let transactions = self
            .history
            .recent_transactions(user_id, self.config.history_limit)
            .await?;
        let built = UserCategorizationProfile::from_transactions(&transactions);
        debug!(
            user_id = %user_id,
            transactions = transactions.len(),
            merchants = built.merchant_categories.len(),
            "built user categorization profile"
        );

        let mut profiles = self.profiles.write();
        // Another task may have built the profile while we queried history;
        // keep the existing one so learned decisions are not lost.
        let entry = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(built)));
        self.profile_stats.lock().sets += 1;
        Ok(Arc::clone(entry))
    }

    fn insert_empty_profile(&self, user_id: &str) -> Arc<Mutex<UserCategorizationProfile>> {
        let mut profiles = self.profiles.write();
        let entry = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UserCategorizationProfile::default())));
        Arc::clone(entry)
    }
}

/// Keyword density score for a merchant against a keyword list
///
/// Each keyword contributes 1.0 on an exact match, 0.8 when the merchant
/// starts or ends with it, and 0.6 when it appears anywhere inside. The sum
/// is divided by the keyword-list length rather than the match count, so
/// dense matches in short lists score highest. Kept for compatibility with
/// the established ranking behavior even though a long keyword list dilutes
/// a perfect single-keyword match.
fn keyword_density<'a, I>(merchant: &str, keywords: I) -> f64
where
    I: IntoIterator<Item = &'a str>,
{
    let mut total = 0usize;
    let mut sum = 0.0;
    for keyword in keywords {
        total += 1;
        if merchant == keyword {
            sum += 1.0;
        } else if merchant.starts_with(keyword) || merchant.ends_with(keyword) {
            sum += 0.8;
        } else if merchant.contains(keyword) {
            sum += 0.6;
        }
    }
    if total == 0 {
        return 0.0;
    }
    sum / total as f64
}

/// Tokens from a category's name and description used for keyword scoring
fn category_keywords(category: &CategoryRecord) -> Vec<String> {
    let mut text = category.name.to_lowercase();
    if let Some(description) = &category.description {
        text.push(' ');
        text.push_str(&description.to_lowercase());
    }
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= 3)
        .map(str::to_string)
        .collect()
}

//! # Receipt Field Extraction Module
//!
//! This module turns raw recognized text into a structured receipt record.
//! Receipt text coming out of OCR is noisy: merchant names share the page
//! with store numbers and addresses, dates appear in half a dozen formats,
//! and line items mix with totals and section headers. The extractor applies
//! layered heuristics to pull out the merchant, transaction date, monetary
//! totals, and line items.
//!
//! ## Design rules
//!
//! - Extraction is a pure function of the input text; identical text always
//!   produces identical output.
//! - Absence of a field is expected, not exceptional. Missing fields are
//!   `None`, never errors.
//! - Monetary values stay as unparsed strings. Numeric coercion and range
//!   validation happen in the validation layer before anything is persisted.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// How many leading lines are considered when looking for the merchant name
const MERCHANT_SCAN_LINES: usize = 5;

/// Upper bound (exclusive) for the keyword-less total fallback
const TOTAL_FALLBACK_MAX: f64 = 100_000.0;

/// Upper bound (exclusive) for a plausible line item price
const ITEM_PRICE_MAX: f64 = 10_000.0;

/// English month names and abbreviations used by the date patterns
const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";

lazy_static! {
    // Date shapes, tried in order. The first capture wins.
    static ref DATE_PATTERNS: Vec<Regex> = vec![
        // Numeric day/month/year or month/day/year
        Regex::new(r"\b(\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4})\b").unwrap(),
        // Numeric year/month/day
        Regex::new(r"\b(\d{4}[/\-.]\d{1,2}[/\-.]\d{1,2})\b").unwrap(),
        // "January 15, 2024"
        Regex::new(&format!(
            r"(?i)\b((?:{MONTHS})\.?\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{2,4}})\b"
        ))
        .unwrap(),
        // "15 January 2024"
        Regex::new(&format!(
            r"(?i)\b(\d{{1,2}}(?:st|nd|rd|th)?\s+(?:{MONTHS})\.?,?\s+\d{{2,4}})\b"
        ))
        .unwrap(),
    ];

    // Keyword-prefixed amounts. Word boundaries keep "total" from matching
    // inside "subtotal".
    static ref TOTAL_RE: Regex = Regex::new(
        r"(?i)\b(?:grand\s+total|final\s+total|amount\s+due|balance\s+due|total)\b\s*:?\s*[$€£]?\s*(\d+(?:[.,]\d{1,2})?)"
    )
    .unwrap();
    static ref SUBTOTAL_RE: Regex = Regex::new(
        r"(?i)\b(?:sub\s*total)\b\s*:?\s*[$€£]?\s*(\d+(?:[.,]\d{1,2})?)"
    )
    .unwrap();
    static ref TAX_RE: Regex = Regex::new(
        r"(?i)\b(?:sales\s+tax|service\s+tax|vat|gst|tax)\b\s*:?\s*[$€£]?\s*(\d+(?:[.,]\d{1,2})?)"
    )
    .unwrap();
    static ref SUBTOTAL_KEYWORD_RE: Regex = Regex::new(r"(?i)\bsub\s*total\b").unwrap();

    // Lines that should never be treated as a merchant name
    static ref NUMERIC_LINE_RE: Regex = Regex::new(r"^[\d\s#/\-]+$").unwrap();
    static ref BARE_AMOUNT_RE: Regex = Regex::new(r"^[$€£]?\s*\d+(?:[.,]\d{1,2})?$").unwrap();
    static ref FIELD_KEYWORD_LINE_RE: Regex =
        Regex::new(r"(?i)^(?:receipt|invoice|bill|total|subtotal|tax|amount)\b").unwrap();

    // Merchant name shapes, tried in order
    static ref ALL_CAPS_NAME_RE: Regex = Regex::new(r"^[A-Z][A-Z\s&'.\-]{1,48}$").unwrap();
    static ref TITLE_CASE_NAME_RE: Regex =
        Regex::new(r"^[A-Z][a-z'&.\-]+(?:\s+[A-Z][a-z'&.\-]+)+$").unwrap();
    static ref CAPS_ABBREV_RE: Regex = Regex::new(r"^[A-Z][A-Z&.\-]{1,48}$").unwrap();

    // Line item parsing
    static ref HEADER_LINE_RE: Regex =
        Regex::new(r"(?i)\b(?:item|description|qty|quantity|price|amount)\b").unwrap();
    static ref TOTALISH_LINE_RE: Regex = Regex::new(
        r"(?i)\b(?:grand\s+total|sub\s*total|subtotal|total|tax|vat|gst|amount\s+due|balance\s+due|change|cash|card|visa|mastercard)\b"
    )
    .unwrap();
    static ref PRICE_TOKEN_RE: Regex =
        Regex::new(r"(?:^|[^\d])[$€£]?\s*(\d{1,4}\.\d{2})\b").unwrap();

    // Currency-shaped tokens considered by the total fallback. Requiring two
    // decimal places keeps dates and store numbers out of the candidate set,
    // and the leading non-digit guard keeps the pattern from matching the
    // tail of a longer number.
    static ref MONEY_TOKEN_RE: Regex =
        Regex::new(r"(?:^|[^\d])[$€£]?\s*(\d{1,5}\.\d{2})\b").unwrap();
}

/// A best-effort parse of one receipt row
///
/// Not guaranteed complete or accurate; section headers occasionally parse
/// as items when they carry a trailing number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Item description with the price token removed
    pub description: String,
    /// Unparsed price string
    pub price: String,
}

/// Structured fields extracted from recognized receipt text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedReceiptData {
    /// Merchant name, if one was identified
    pub merchant: Option<String>,
    /// Loosely-formatted date string requiring downstream parsing
    pub date: Option<String>,
    /// Receipt total as an unparsed string
    pub total: Option<String>,
    /// Receipt subtotal as an unparsed string
    pub subtotal: Option<String>,
    /// Tax amount as an unparsed string
    pub tax: Option<String>,
    /// Best-effort line items
    pub items: Vec<LineItem>,
    /// Verbatim OCR text that produced this record, kept for audit
    pub raw_text: String,
}

/// Heuristic extractor for receipt fields
#[derive(Debug, Clone, Default)]
pub struct ReceiptFieldExtractor;

impl ReceiptFieldExtractor {
    /// Create a new extractor
    pub fn new() -> Self {
        Self
    }

    /// Extract structured receipt fields from raw recognized text
    pub fn extract(&self, raw_text: &str) -> ExtractedReceiptData {
        let lines: Vec<&str> = raw_text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        let merchant = self.extract_merchant(&lines);
        let date = self.extract_date(raw_text);
        let total = self
            .extract_keyword_amount(&lines, &TOTAL_RE, true)
            .or_else(|| self.fallback_total(raw_text));
        let subtotal = self.extract_keyword_amount(&lines, &SUBTOTAL_RE, false);
        let tax = self.extract_keyword_amount(&lines, &TAX_RE, false);
        let items = self.extract_items(&lines);

        debug!(
            lines = lines.len(),
            merchant = ?merchant,
            date = ?date,
            total = ?total,
            items = items.len(),
            "receipt fields extracted"
        );

        ExtractedReceiptData {
            merchant,
            date,
            total,
            subtotal,
            tax,
            items,
            raw_text: raw_text.to_string(),
        }
    }

    /// Find the merchant name among the first few lines
    ///
    /// Lines shaped like store numbers, dates, amounts, or boilerplate
    /// keywords are skipped. Among the survivors, the first line shaped like
    /// a business name wins. When nothing matches, the first non-empty line
    /// is returned verbatim as a last resort.
    fn extract_merchant(&self, lines: &[&str]) -> Option<String> {
        let candidates: Vec<&str> = lines
            .iter()
            .take(MERCHANT_SCAN_LINES)
            .copied()
            .filter(|line| !self.is_non_merchant_line(line))
            .collect();

        for candidate in &candidates {
            if ALL_CAPS_NAME_RE.is_match(candidate)
                || TITLE_CASE_NAME_RE.is_match(candidate)
                || CAPS_ABBREV_RE.is_match(candidate)
            {
                trace!(merchant = %candidate, "merchant matched name shape");
                return Some((*candidate).to_string());
            }
        }

        // Last resort: the top line of the receipt, whatever it looks like
        lines.first().map(|line| (*line).to_string())
    }

    fn is_non_merchant_line(&self, line: &str) -> bool {
        if NUMERIC_LINE_RE.is_match(line)
            || BARE_AMOUNT_RE.is_match(line)
            || FIELD_KEYWORD_LINE_RE.is_match(line)
        {
            return true;
        }
        if DATE_PATTERNS.iter().any(|pattern| pattern.is_match(line)) {
            return true;
        }
        self.is_alphanumeric_code(line)
    }

    /// Store codes like "A1B2C3" or "TX-10419": no spaces, letters and
    /// digits mixed. Pure-letter lines are never codes; all-caps
    /// abbreviations are legitimate merchant names.
    fn is_alphanumeric_code(&self, line: &str) -> bool {
        if line.contains(char::is_whitespace) {
            return false;
        }
        line.chars().any(|c| c.is_ascii_digit()) && line.chars().any(|c| c.is_ascii_alphabetic())
    }

    /// Return the first date-shaped substring in the text
    fn extract_date(&self, text: &str) -> Option<String> {
        for pattern in DATE_PATTERNS.iter() {
            if let Some(captures) = pattern.captures(text) {
                return captures.get(1).map(|m| m.as_str().to_string());
            }
        }
        None
    }

    /// Scan lines for a keyword-prefixed amount, first match wins
    ///
    /// `skip_subtotal_lines` keeps the total scan from capturing the amount
    /// on "Sub Total" lines, where the bare "total" keyword would otherwise
    /// match.
    fn extract_keyword_amount(
        &self,
        lines: &[&str],
        pattern: &Regex,
        skip_subtotal_lines: bool,
    ) -> Option<String> {
        for line in lines {
            if skip_subtotal_lines && SUBTOTAL_KEYWORD_RE.is_match(line) {
                continue;
            }
            if let Some(captures) = pattern.captures(line) {
                return captures.get(1).map(|m| m.as_str().to_string());
            }
        }
        None
    }

    /// Keyword-less total fallback: the largest currency-shaped token in a
    /// plausible range. Receipts without a labeled total usually still print
    /// the charged amount as their largest figure.
    fn fallback_total(&self, text: &str) -> Option<String> {
        let mut best: Option<(f64, String)> = None;
        for captures in MONEY_TOKEN_RE.captures_iter(text) {
            let token = captures.get(1)?.as_str();
            let value: f64 = match token.parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            if value <= 0.0 || value >= TOTAL_FALLBACK_MAX {
                continue;
            }
            if best.as_ref().map_or(true, |(max, _)| value > *max) {
                best = Some((value, token.to_string()));
            }
        }
        best.map(|(_, token)| token)
    }

    /// Parse line items from rows that are neither totals nor headers
    fn extract_items(&self, lines: &[&str]) -> Vec<LineItem> {
        let mut items = Vec::new();
        for line in lines {
            if TOTALISH_LINE_RE.is_match(line) || HEADER_LINE_RE.is_match(line) {
                continue;
            }
            let Some(captures) = PRICE_TOKEN_RE.captures_iter(line).last() else {
                continue;
            };
            let token = match captures.get(1) {
                Some(m) => m,
                None => continue,
            };
            let value: f64 = match token.as_str().parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            if value <= 0.0 || value >= ITEM_PRICE_MAX {
                continue;
            }

            let full = captures.get(0).expect("match always has a full capture");
            let description = format!("{}{}", &line[..full.start()], &line[full.end()..]);
            let description = description
                .trim()
                .trim_matches(|c: char| matches!(c, '.' | '-' | ':' | '*' | ','))
                .trim()
                .to_string();
            if description.is_empty() {
                continue;
            }

            items.push(LineItem {
                description,
                price: token.as_str().to_string(),
            });
        }
        items
    }
}

//! Predicate schema registry
//!
//! Per-predicate rules for claim handling: cardinality, conflict policy,
//! value normalization, and dedup policy. Unregistered predicates get the
//! defaults (single / supersede / none / corroborate).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ============================================================================
// SCHEMA ENUMS
// ============================================================================

/// How many active values a predicate may hold per subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Single,
    Multi,
}

impl std::str::FromStr for Cardinality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(Cardinality::Single),
            "multi" => Ok(Cardinality::Multi),
            _ => Err(format!("unknown cardinality: {s}")),
        }
    }
}

/// What to do when a new exclusive claim contradicts an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Trust-gated replacement of the older claim
    #[default]
    Supersede,
    /// Always park the contradiction for an operator
    RequireReview,
    /// Both stay active; conflict recorded pre-resolved for audit
    KeepBoth,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "supersede" => Ok(ConflictPolicy::Supersede),
            "require_review" => Ok(ConflictPolicy::RequireReview),
            "keep_both" => Ok(ConflictPolicy::KeepBoth),
            _ => Err(format!("unknown conflict policy: {s}")),
        }
    }
}

/// Value normalizer applied before comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Normalize {
    #[default]
    None,
    Trim,
    Lowercase,
    LowercaseTrim,
    Currency,
}

impl std::str::FromStr for Normalize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Normalize::None),
            "trim" => Ok(Normalize::Trim),
            "lowercase" => Ok(Normalize::Lowercase),
            "lowercase_trim" => Ok(Normalize::LowercaseTrim),
            "currency" => Ok(Normalize::Currency),
            _ => Err(format!("unknown normalizer: {s}")),
        }
    }
}

/// What to do when the same normalized value is stored again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DedupPolicy {
    /// Bump corroboration on the existing memory, create nothing
    #[default]
    Corroborate,
    /// Store a separate memory anyway
    Store,
}

impl std::str::FromStr for DedupPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "corroborate" => Ok(DedupPolicy::Corroborate),
            "store" => Ok(DedupPolicy::Store),
            _ => Err(format!("unknown dedup policy: {s}")),
        }
    }
}

// ============================================================================
// PREDICATE SCHEMA
// ============================================================================

/// Effective rules for one predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateSchema {
    pub predicate: String,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default)]
    pub normalize: Normalize,
    #[serde(default)]
    pub dedup_policy: DedupPolicy,
}

impl PredicateSchema {
    /// All-defaults schema for an unregistered predicate.
    pub fn defaults(predicate: &str) -> Self {
        Self {
            predicate: predicate.to_string(),
            cardinality: Cardinality::Single,
            conflict_policy: ConflictPolicy::Supersede,
            normalize: Normalize::None,
            dedup_policy: DedupPolicy::Corroborate,
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Mapping from predicate name to its schema
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, PredicateSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed schema. Empty predicate names are rejected.
    pub fn register(&mut self, schema: PredicateSchema) -> Result<()> {
        if schema.predicate.trim().is_empty() {
            return Err(EngineError::Invalid("predicate must not be empty".into()));
        }
        self.schemas.insert(schema.predicate.clone(), schema);
        Ok(())
    }

    /// Register from string options, as front ends supply them.
    pub fn register_named(
        &mut self,
        predicate: &str,
        cardinality: &str,
        conflict_policy: &str,
        normalize: &str,
        dedup_policy: &str,
    ) -> Result<()> {
        let schema = PredicateSchema {
            predicate: predicate.to_string(),
            cardinality: cardinality.parse().map_err(EngineError::Invalid)?,
            conflict_policy: conflict_policy.parse().map_err(EngineError::Invalid)?,
            normalize: normalize.parse().map_err(EngineError::Invalid)?,
            dedup_policy: dedup_policy.parse().map_err(EngineError::Invalid)?,
        };
        self.register(schema)
    }

    /// Effective schema: registered, or all-defaults.
    pub fn effective(&self, predicate: &str) -> PredicateSchema {
        self.schemas
            .get(predicate)
            .cloned()
            .unwrap_or_else(|| PredicateSchema::defaults(predicate))
    }

    /// Apply the predicate's normalizer to a raw claim value.
    pub fn normalize_value(&self, predicate: &str, value: &str) -> String {
        apply_normalizer(self.effective(predicate).normalize, value)
    }
}

/// Apply one normalizer to a value.
pub fn apply_normalizer(normalize: Normalize, value: &str) -> String {
    match normalize {
        Normalize::None => value.to_string(),
        Normalize::Trim => value.trim().to_string(),
        Normalize::Lowercase => value.to_lowercase(),
        Normalize::LowercaseTrim => value.trim().to_lowercase(),
        Normalize::Currency => normalize_currency(value).unwrap_or_else(|| value.to_string()),
    }
}

// ============================================================================
// CURRENCY NORMALIZER
// ============================================================================

const CURRENCY_CODES: &[&str] = &["USD", "EUR", "GBP", "JPY", "CAD", "AUD", "INR"];

/// Parse `"$1,200.50"`, `"1200 EUR"`, `"usd 12"` etc. into `"CUR AMOUNT"`.
///
/// None when no supported currency marker or no parseable amount is found.
fn normalize_currency(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Symbol prefixes; the two-character forms must win over bare "$".
    let symbol_map: &[(&str, &str)] = &[
        ("C$", "CAD"),
        ("A$", "AUD"),
        ("$", "USD"),
        ("€", "EUR"),
        ("£", "GBP"),
        ("¥", "JPY"),
        ("₹", "INR"),
    ];

    let mut code: Option<&str> = None;
    let mut rest = trimmed.to_string();

    for (symbol, mapped) in symbol_map {
        if let Some(stripped) = rest.strip_prefix(symbol) {
            code = Some(mapped);
            rest = stripped.trim().to_string();
            break;
        }
    }

    if code.is_none() {
        let upper = rest.to_uppercase();
        for candidate in CURRENCY_CODES {
            if let Some(stripped) = upper.strip_prefix(candidate) {
                code = Some(candidate);
                rest = stripped.trim().to_string();
                break;
            }
            if let Some(stripped) = upper.strip_suffix(candidate) {
                code = Some(candidate);
                rest = stripped.trim().to_string();
                break;
            }
        }
    }

    let code = code?;
    let cleaned: String = rest.chars().filter(|c| *c != ',' && *c != '_').collect();
    let amount: f64 = cleaned.trim().parse().ok()?;
    if !amount.is_finite() {
        return None;
    }

    Some(format!("{code} {}", format_amount(amount)))
}

/// Up to 12 fractional digits, trailing zeros (and a bare dot) trimmed.
fn format_amount(amount: f64) -> String {
    let fixed = format!("{amount:.12}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

// ============================================================================
// TESTS
// ============================================================================

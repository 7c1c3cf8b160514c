//! Scoring - trust, confidence, and decay strength
//!
//! Pure functions over memory state. The engine recomputes trust and
//! confidence on every provenance mutation (store, corroborate, reinforce,
//! dispute) and decay strength on every maintenance pass.

use chrono::{DateTime, Utc};

use crate::memory::{Category, Memory, Source};

// ============================================================================
// TRUST
// ============================================================================

/// Base trust weight per provenance source
pub fn source_weight(source: Source) -> f64 {
    match source {
        Source::UserExplicit => 1.0,
        Source::System => 0.95,
        Source::ToolOutput => 0.85,
        Source::UserImplicit => 0.7,
        Source::Document => 0.6,
        Source::Inference => 0.5,
    }
}

/// Compute trust from provenance and usage signals.
///
/// base + corroboration bonus (capped 0.2) + reinforcement/dispute feedback
/// (±0.15) - age penalty (capped 0.1 at one year), clamped to [0, 1].
pub fn compute_trust(
    source: Source,
    corroboration: u32,
    reinforcements: u32,
    disputes: u32,
    age_days: f64,
) -> f64 {
    let mut trust = source_weight(source);

    let extra = corroboration.saturating_sub(1) as f64;
    trust += (extra * 0.05).min(0.2);

    let total = (reinforcements + disputes) as f64;
    if total > 0.0 {
        let feedback = (reinforcements as f64 - disputes as f64) / total;
        trust += feedback * 0.15;
    }

    trust -= (age_days.max(0.0) / 365.0 * 0.1).min(0.1);

    trust.clamp(0.0, 1.0)
}

/// Confidence is trust rounded to 4 decimals.
pub fn confidence(trust: f64) -> f64 {
    (trust * 10_000.0).round() / 10_000.0
}

/// Recompute `provenance.trust` and `confidence` in place from the
/// memory's current counters, aging from `created_at`.
pub fn refresh_trust(memory: &mut Memory, now: DateTime<Utc>) {
    let age_days = days_between(memory.created_at, now);
    let trust = compute_trust(
        memory.provenance.source,
        memory.provenance.corroboration,
        memory.reinforcements,
        memory.disputes,
        age_days,
    );
    memory.provenance.trust = trust;
    memory.confidence = confidence(trust);
}

// ============================================================================
// DECAY STRENGTH
// ============================================================================

/// Multiplier applied to categories that should outlive plain facts
pub fn category_weight(category: Category) -> f64 {
    match category {
        Category::Decision => 1.3,
        Category::Preference => 1.4,
        Category::Insight => 1.1,
        _ => 1.0,
    }
}

/// Current strength of a memory in [0, ~1.3].
///
/// Two modes: SM-2 stability/retrievability when `stability` is set, and a
/// legacy half-life curve otherwise. `half_life_days` only affects the
/// legacy mode.
pub fn decay_strength(memory: &Memory, half_life_days: f64, now: DateTime<Utc>) -> f64 {
    let base = memory.importance;
    let cat_weight = category_weight(memory.category_kind());
    let link_bonus = (memory.links.len() as f64 * 0.05).min(0.3);

    if let Some(stability) = memory.stability {
        let last_touch_days = days_between(memory.updated_at, now);
        let retrievability = (-0.5 * last_touch_days / stability.max(0.1)).exp();
        return (base * retrievability * cat_weight).min(1.0) + link_bonus;
    }

    let h = half_life_days.max(0.1);
    let age_days = days_between(memory.created_at, now);
    let touch_days = days_between(memory.updated_at, now);
    let age_factor = 0.5_f64.powf(age_days / h).max(0.1);
    let touch_factor = 0.5_f64.powf(touch_days / (2.0 * h)).max(0.1);
    let access_bonus = (memory.access_count as f64 * 0.02).min(0.2);

    (base * age_factor * touch_factor * cat_weight).min(1.0) + link_bonus + access_bonus
}

/// Fractional days between two instants, never negative.
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let ms = (later - earlier).num_milliseconds();
    (ms as f64 / 86_400_000.0).max(0.0)
}

// ============================================================================
// TESTS
// ============================================================================

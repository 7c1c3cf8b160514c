//! Health and timeline reporting

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::scoring;

use super::MemoryGraph;

// ============================================================================
// HEALTH
// ============================================================================

/// Strength distribution of the graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrengthBuckets {
    /// >= 0.7
    pub strong: usize,
    /// >= 0.3
    pub healthy: usize,
    /// >= 0.15
    pub weakening: usize,
    /// >= 0.05
    pub critical: usize,
    /// < 0.05
    pub dead: usize,
}

/// Snapshot of graph health
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub by_agent: HashMap<String, usize>,
    pub by_category: HashMap<String, usize>,
    /// Unordered link pairs
    pub links_total: usize,
    /// Link pairs whose endpoints belong to different agents
    pub cross_agent_links: usize,
    pub strength: StrengthBuckets,
    pub avg_strength: f64,
    pub orphans: usize,
    pub archive_count: usize,
    pub avg_age_days: f64,
    pub max_age_days: f64,
    /// Mean stability over memories carrying SM-2 state
    pub avg_stability: Option<f64>,
    pub sm2_count: usize,
}

/// Which time axis the timeline groups by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeField {
    /// `event_at || created_at`
    #[default]
    Auto,
    Event,
    Created,
}

impl std::str::FromStr for TimeField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(TimeField::Auto),
            "event" => Ok(TimeField::Event),
            "created" => Ok(TimeField::Created),
            _ => Err(format!("unknown time field: {s}")),
        }
    }
}

/// One timeline row
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub id: String,
    pub text: String,
    pub category: String,
    pub agent: String,
    pub time: DateTime<Utc>,
}

/// One day of the timeline, newest first
#[derive(Debug, Clone)]
pub struct TimelineDay {
    pub date: String,
    pub entries: Vec<TimelineEntry>,
}

impl MemoryGraph {
    /// Aggregate health snapshot of the whole graph.
    pub fn health(&self) -> Result<HealthReport> {
        let now = self.now();
        let mut report = HealthReport {
            total: self.memories.len(),
            archive_count: self.storage.load_archive()?.len(),
            ..Default::default()
        };

        let mut strength_sum = 0.0;
        let mut age_sum = 0.0;
        let mut stability_sum = 0.0;
        let mut counted_pairs: std::collections::HashSet<(String, String)> =
            std::collections::HashSet::new();

        for memory in &self.memories {
            *report
                .by_status
                .entry(memory.status.as_str().to_string())
                .or_insert(0) += 1;
            *report.by_agent.entry(memory.agent.clone()).or_insert(0) += 1;
            *report
                .by_category
                .entry(memory.category.clone())
                .or_insert(0) += 1;

            let strength = scoring::decay_strength(memory, self.config.half_life_days, now);
            strength_sum += strength;
            if strength >= 0.7 {
                report.strength.strong += 1;
            } else if strength >= 0.3 {
                report.strength.healthy += 1;
            } else if strength >= 0.15 {
                report.strength.weakening += 1;
            } else if strength >= 0.05 {
                report.strength.critical += 1;
            } else {
                report.strength.dead += 1;
            }

            if memory.links.is_empty() {
                report.orphans += 1;
            }
            for link in &memory.links {
                let pair = if memory.id < link.target_id {
                    (memory.id.clone(), link.target_id.clone())
                } else {
                    (link.target_id.clone(), memory.id.clone())
                };
                if counted_pairs.insert(pair) {
                    report.links_total += 1;
                    if let Some(pos) = self.indexes.position(&link.target_id) {
                        if self.memories[pos].agent != memory.agent {
                            report.cross_agent_links += 1;
                        }
                    }
                }
            }

            let age = scoring::days_between(memory.created_at, now);
            age_sum += age;
            report.max_age_days = report.max_age_days.max(age);

            if let Some(stability) = memory.stability {
                stability_sum += stability;
                report.sm2_count += 1;
            }
        }

        if report.total > 0 {
            report.avg_strength = strength_sum / report.total as f64;
            report.avg_age_days = age_sum / report.total as f64;
        }
        if report.sm2_count > 0 {
            report.avg_stability = Some(stability_sum / report.sm2_count as f64);
        }

        Ok(report)
    }

    /// Memories of the last `days` days grouped by date, newest day first.
    pub fn timeline(
        &self,
        agent: Option<&str>,
        days: u32,
        time_field: TimeField,
    ) -> Vec<TimelineDay> {
        let now = self.now();
        let cutoff = now - chrono::Duration::days(days as i64);

        let mut by_date: HashMap<String, Vec<TimelineEntry>> = HashMap::new();
        for memory in &self.memories {
            if let Some(a) = agent {
                if memory.agent != a {
                    continue;
                }
            }
            let time = match time_field {
                TimeField::Auto => memory.effective_time(),
                TimeField::Event => match memory.event_at {
                    Some(t) => t,
                    None => continue,
                },
                TimeField::Created => memory.created_at,
            };
            if time < cutoff || time > now {
                continue;
            }
            by_date
                .entry(time.format("%Y-%m-%d").to_string())
                .or_default()
                .push(TimelineEntry {
                    id: memory.id.clone(),
                    text: memory.text.clone(),
                    category: memory.category.clone(),
                    agent: memory.agent.clone(),
                    time,
                });
        }

        let mut timeline: Vec<TimelineDay> = by_date
            .into_iter()
            .map(|(date, mut entries)| {
                entries.sort_by(|a, b| b.time.cmp(&a.time));
                TimelineDay { date, entries }
            })
            .collect();
        timeline.sort_by(|a, b| b.date.cmp(&a.date));
        timeline
    }
}

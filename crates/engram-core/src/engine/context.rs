//! Context assembly - budget-aware Markdown briefing
//!
//! Pulls search hits plus their strongest neighbors, optionally packs them
//! into a token budget by score-per-token, and renders a sectioned
//! Markdown block ready to drop into an agent prompt.

use std::collections::HashSet;

use crate::error::Result;
use crate::memory::{Category, Memory, Status};
use crate::text::estimate_tokens;

use super::search::{SearchMeta, SearchOptions};
use super::MemoryGraph;

/// Fixed render scaffolding; the packing overhead is ten times its tokens.
const HEADER_TEMPLATE: &str = "## Relevant Memory Context\n### Category\n- ";

/// Section order for rendering; anything else lands under Notes.
const SECTION_ORDER: &[(Category, &str)] = &[
    (Category::Decision, "Decisions"),
    (Category::Finding, "Findings"),
    (Category::Preference, "Preferences"),
    (Category::Insight, "Insights"),
    (Category::Fact, "Facts"),
    (Category::Event, "Events"),
    (Category::Task, "Tasks"),
];

// ============================================================================
// OPTIONS AND RESULT
// ============================================================================

/// Options for [`MemoryGraph::context`]
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub max_memories: usize,
    pub before: Option<String>,
    pub after: Option<String>,
    /// Token budget for the rendered context; None disables packing
    pub max_tokens: Option<usize>,
    pub explain: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_memories: 15,
            before: None,
            after: None,
            max_tokens: None,
            explain: false,
        }
    }
}

/// One memory included in the context
#[derive(Debug, Clone)]
pub struct ContextMemory {
    pub id: String,
    pub text: String,
    pub category: String,
    pub agent: String,
    pub score: f64,
    /// `"search"` for direct hits, `"linked"` for neighbors
    pub source: &'static str,
    pub tokens: usize,
}

/// A memory dropped by the packer
#[derive(Debug, Clone)]
pub struct ExcludedMemory {
    pub id: String,
    pub reason: &'static str,
    /// Token cost that did not fit
    pub value: usize,
}

/// Diagnostics attached when `explain` is set
#[derive(Debug, Clone)]
pub struct ContextExplain {
    pub search_meta: Option<SearchMeta>,
    pub overhead_tokens: usize,
    pub budget: Option<usize>,
    pub considered: usize,
}

/// The assembled context
#[derive(Debug, Clone)]
pub struct ContextResult {
    pub query: String,
    pub context: String,
    pub count: usize,
    pub memories: Vec<ContextMemory>,
    pub token_estimate: Option<usize>,
    pub included: Option<usize>,
    pub excluded: Option<usize>,
    pub excluded_reasons: Option<Vec<ExcludedMemory>>,
    pub explain: Option<ContextExplain>,
}

impl MemoryGraph {
    /// Assemble a Markdown context block for a query.
    pub fn context(
        &mut self,
        agent: Option<&str>,
        query: &str,
        options: &ContextOptions,
    ) -> Result<ContextResult> {
        // 1. Broadened search: the packer needs slack to choose from.
        let search_limit = if options.max_tokens.is_some() {
            (2 * options.max_memories).max(1)
        } else {
            8
        };
        let search_options = SearchOptions {
            limit: search_limit,
            before: options.before.clone(),
            after: options.after.clone(),
            explain: options.explain,
            ..Default::default()
        };
        let response = self.search(agent, query, &search_options)?;

        // 2. Direct hits plus up to 3 linked neighbors each.
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates: Vec<ContextMemory> = Vec::new();
        for hit in &response.hits {
            if seen.insert(hit.memory.id.clone()) {
                candidates.push(to_context_memory(&hit.memory, hit.score, "search"));
            }
            let mut links: Vec<_> = hit.memory.links.clone();
            links.sort_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for link in links.into_iter().take(3) {
                if seen.contains(&link.target_id) {
                    continue;
                }
                let Some(pos) = self.indexes.position(&link.target_id) else {
                    continue;
                };
                let neighbor = &self.memories[pos];
                if neighbor.status != Status::Active {
                    continue;
                }
                seen.insert(neighbor.id.clone());
                candidates.push(to_context_memory(
                    neighbor,
                    link.similarity * hit.score,
                    "linked",
                ));
            }
        }
        let considered = candidates.len();

        // 3. Budget packing or plain top-N.
        let overhead_tokens = 10 * estimate_tokens(HEADER_TEMPLATE);
        let mut excluded_reasons: Vec<ExcludedMemory> = Vec::new();
        let included: Vec<ContextMemory> = match options.max_tokens {
            Some(max_tokens) => {
                candidates.sort_by(|a, b| {
                    let a_density = a.score / a.tokens.max(1) as f64;
                    let b_density = b.score / b.tokens.max(1) as f64;
                    b_density
                        .partial_cmp(&a_density)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let mut remaining = max_tokens.saturating_sub(overhead_tokens);
                let mut packed = Vec::new();
                for candidate in candidates {
                    if candidate.tokens <= remaining {
                        remaining -= candidate.tokens;
                        packed.push(candidate);
                    } else {
                        excluded_reasons.push(ExcludedMemory {
                            id: candidate.id.clone(),
                            reason: "budget",
                            value: candidate.tokens,
                        });
                    }
                }
                packed
            }
            None => {
                candidates.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                candidates.truncate(options.max_memories);
                candidates
            }
        };

        // 4. Render.
        let context = render_markdown(&included, agent);

        let budgeted = options.max_tokens.is_some();
        let explain = options.explain.then(|| ContextExplain {
            search_meta: response.meta.clone(),
            overhead_tokens,
            budget: options.max_tokens.map(|m| m.saturating_sub(overhead_tokens)),
            considered,
        });

        Ok(ContextResult {
            query: query.to_string(),
            count: included.len(),
            token_estimate: budgeted.then(|| estimate_tokens(&context)),
            included: budgeted.then_some(included.len()),
            excluded: budgeted.then_some(excluded_reasons.len()),
            excluded_reasons: budgeted.then_some(excluded_reasons),
            memories: included,
            context,
            explain,
        })
    }
}

fn to_context_memory(memory: &Memory, score: f64, source: &'static str) -> ContextMemory {
    ContextMemory {
        id: memory.id.clone(),
        text: memory.text.clone(),
        category: memory.category.clone(),
        agent: memory.agent.clone(),
        score,
        source,
        tokens: estimate_tokens(&memory.text),
    }
}

/// Title line, then fixed-order category sections, each entry tagged with
/// its agent unless it matches the focus agent.
fn render_markdown(memories: &[ContextMemory], focus_agent: Option<&str>) -> String {
    let mut out = String::from("## Relevant Memory Context\n");

    let mut render_section = |title: &str, entries: &[&ContextMemory]| {
        if entries.is_empty() {
            return;
        }
        out.push_str(&format!("\n### {title}\n"));
        for entry in entries {
            if focus_agent == Some(entry.agent.as_str()) {
                out.push_str(&format!("- {}\n", entry.text));
            } else {
                out.push_str(&format!("- {} ({})\n", entry.text, entry.agent));
            }
        }
    };

    for (category, title) in SECTION_ORDER {
        let entries: Vec<&ContextMemory> = memories
            .iter()
            .filter(|m| m.category == category.as_str())
            .collect();
        render_section(title, &entries);
    }
    // Categories outside the fixed order (digests, snapshots, ...) land in
    // a trailing Notes section.
    let notes: Vec<&ContextMemory> = memories
        .iter()
        .filter(|m| !SECTION_ORDER.iter().any(|(c, _)| c.as_str() == m.category))
        .collect();
    render_section("Notes", &notes);

    out
}

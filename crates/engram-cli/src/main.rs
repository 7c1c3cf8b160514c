//! Engram CLI
//!
//! Command-line front end for the memory graph engine. Storage lives under
//! `ENGRAM_DATA_DIR` (or the platform data directory); embedding and chat
//! providers activate when `ENGRAM_API_KEY` is set.

mod providers;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use directories::ProjectDirs;
use engram_core::{
    ClaimInput, ConflictFilter, ConsolidateOptions, ContextOptions, EngineConfig, EpisodeFilter,
    FileStorage, LinkType, MemoryGraph, ProvenanceInput, Rerank, SearchOptions, StoreOptions,
    TimeField,
};

use providers::{OpenAiChat, OpenAiEmbeddings, ProviderConfig};

/// Engram - graph-native memory for AI agents
#[derive(Parser)]
#[command(name = "engram")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Graph-native memory store for AI agents")]
#[command(long_about = "Engram turns a stream of short textual memories into a typed, weighted \
graph with provenance trust, structural conflict detection, biological decay, and budget-aware \
retrieval.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a memory
    Store {
        /// Agent tag the memory belongs to
        agent: String,
        /// The content to remember
        text: String,
        /// Category (fact, decision, preference, insight, finding, ...)
        #[arg(long)]
        category: Option<String>,
        /// Importance in [0, 1]
        #[arg(long)]
        importance: Option<f64>,
        /// Tags (comma-separated)
        #[arg(long)]
        tags: Option<String>,
        /// ISO-8601 time of the real-world event
        #[arg(long)]
        event_time: Option<String>,
        /// Claim subject (requires --predicate and --value)
        #[arg(long)]
        subject: Option<String>,
        /// Claim predicate
        #[arg(long)]
        predicate: Option<String>,
        /// Claim value
        #[arg(long)]
        value: Option<String>,
        /// Claim scope: global, session, or temporal
        #[arg(long)]
        scope: Option<String>,
        /// Session id, required when scope is session
        #[arg(long)]
        session: Option<String>,
        /// Provenance source (user_explicit, system, tool_output, ...)
        #[arg(long)]
        source: Option<String>,
        /// Quarantine the memory immediately
        #[arg(long)]
        quarantine: bool,
    },

    /// Search one agent's memories
    Search {
        agent: String,
        query: String,
        #[arg(long, default_value = "10")]
        limit: usize,
        #[arg(long, default_value = "0.3")]
        min_similarity: f64,
        /// Include superseded results
        #[arg(long)]
        include_superseded: bool,
        /// Include quarantined results
        #[arg(long)]
        include_quarantined: bool,
        /// Skip the composite rerank, order by raw similarity
        #[arg(long)]
        no_rerank: bool,
        /// Session id for session-scoped claim overrides
        #[arg(long)]
        session: Option<String>,
        /// Attach retrieval diagnostics
        #[arg(long)]
        explain: bool,
    },

    /// Search across every agent
    SearchAll {
        query: String,
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Evolve: LLM-guided store that archives contradicted memories and
    /// updates near-duplicates in place
    Evolve {
        agent: String,
        text: String,
        #[arg(long, default_value = "0.5")]
        importance: f64,
        #[arg(long)]
        category: Option<String>,
    },

    /// Show a memory's links
    Links { id: String },

    /// BFS over the graph from a memory
    Traverse {
        id: String,
        #[arg(long, default_value = "2")]
        hops: usize,
        /// Comma-separated link types to follow (default all)
        #[arg(long)]
        types: Option<String>,
    },

    /// Auto-detected connected components
    Clusters {
        #[arg(long, default_value = "3")]
        min_size: usize,
    },

    /// Shortest path between two memories
    Path { from: String, to: String },

    /// Run a decay pass
    Decay {
        #[arg(long)]
        dry_run: bool,
    },

    /// Graph health snapshot
    Health,

    /// Assemble a Markdown context block for a query
    Context {
        agent: String,
        query: String,
        #[arg(long, default_value = "15")]
        max_memories: usize,
        /// Token budget for the rendered context
        #[arg(long)]
        max_tokens: Option<usize>,
    },

    /// Run the five-phase consolidation pass
    Consolidate {
        #[arg(long)]
        dry_run: bool,
    },

    /// List pending conflicts
    Conflicts {
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        predicate: Option<String>,
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
    },

    /// Resolve a pending conflict: supersede, reject, or keep_both
    Resolve { id: String, action: String },

    /// Memories grouped by day
    Timeline {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, default_value = "7")]
        days: u32,
        /// Time axis: auto, event, or created
        #[arg(long, default_value = "auto")]
        time_field: String,
    },

    /// Manage episodes: named, time-ranged groupings of memories
    Episodes {
        #[command(subcommand)]
        command: EpisodeCommands,
    },
}

#[derive(Subcommand)]
enum EpisodeCommands {
    /// Create an episode from memory ids
    Create {
        name: String,
        /// Member memory ids
        ids: Vec<String>,
        /// Tags (comma-separated)
        #[arg(long)]
        tags: Option<String>,
    },

    /// Capture an episode from an agent's memories inside a time window
    Capture {
        name: String,
        agent: String,
        /// ISO-8601 window start
        start: String,
        /// ISO-8601 window end
        end: String,
        /// Minimum member count for a capture to happen
        #[arg(long, default_value = "3")]
        min_memories: usize,
    },

    /// Add memories to an episode
    Add {
        id: String,
        ids: Vec<String>,
    },

    /// Remove memories from an episode
    Remove {
        id: String,
        ids: Vec<String>,
    },

    /// List episodes
    List {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },

    /// Show one episode
    Show { id: String },

    /// Search within an episode
    Search {
        id: String,
        query: String,
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Summarize an episode via the chat provider
    Summarize { id: String },

    /// Delete an episode (member memories stay)
    Delete { id: String },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut graph = open_graph()?;

    match cli.command {
        Commands::Store {
            agent,
            text,
            category,
            importance,
            tags,
            event_time,
            subject,
            predicate,
            value,
            scope,
            session,
            source,
            quarantine,
        } => {
            let claim = match (subject, predicate, value) {
                (Some(subject), Some(predicate), Some(value)) => Some(ClaimInput {
                    subject,
                    predicate,
                    value,
                    scope,
                    session_id: session,
                    ..Default::default()
                }),
                (None, None, None) => None,
                _ => anyhow::bail!("--subject, --predicate, and --value go together"),
            };
            let options = StoreOptions {
                category,
                importance,
                tags: split_csv(tags),
                event_time,
                claim,
                provenance: source.map(|source| ProvenanceInput {
                    source: Some(source),
                    source_id: None,
                }),
                quarantine,
                ..Default::default()
            };
            let outcome = graph.store(&agent, &text, options)?;
            if outcome.deduplicated {
                println!("{} {} (corroborated)", "✅ Stored:".green(), outcome.id);
            } else {
                println!("{} {}", "✅ Stored:".green(), outcome.id);
                println!("   links: {} | top: {}", outcome.links, outcome.top_link);
            }
            if outcome.quarantined {
                println!("   {}", "⚠ quarantined pending review".yellow());
            }
            if let Some(conflict_id) = outcome.pending_conflict_id {
                println!("   pending conflict: {conflict_id}");
            }
        }

        Commands::Search {
            agent,
            query,
            limit,
            min_similarity,
            include_superseded,
            include_quarantined,
            no_rerank,
            session,
            explain,
        } => {
            let options = SearchOptions {
                limit,
                min_similarity,
                include_superseded,
                include_quarantined,
                rerank: if no_rerank { Rerank::Off } else { Rerank::Default },
                session_id: session,
                explain,
                ..Default::default()
            };
            let response = graph.search(Some(&agent), &query, &options)?;
            print_hits(&response);
        }

        Commands::SearchAll { query, limit } => {
            let options = SearchOptions {
                limit,
                ..Default::default()
            };
            let response = graph.search(None, &query, &options)?;
            print_hits(&response);
        }

        Commands::Evolve {
            agent,
            text,
            importance,
            category,
        } => {
            let outcome = graph.evolve(&agent, &text, importance, category)?;
            match outcome.action {
                "updated" => println!("{} {}", "♻ Updated:".cyan(), outcome.id),
                _ => println!("{} {}", "✅ Stored:".green(), outcome.id),
            }
            if !outcome.archived_conflicts.is_empty() {
                println!("   archived conflicts: {}", outcome.archived_conflicts.len());
            }
            if let Some(error) = outcome.error {
                eprintln!("   {} {error}", "⚠".yellow());
            }
        }

        Commands::Links { id } => {
            let view = graph.links(&id)?;
            println!("{} [{}] {}", view.id.bold(), view.category, view.memory);
            for link in view.links {
                println!(
                    "  -> {} ({:.0}%, {}) [{}] {}",
                    link.id,
                    link.similarity * 100.0,
                    link.agent,
                    link.link_type,
                    link.memory
                );
            }
        }

        Commands::Traverse { id, hops, types } => {
            let types = parse_link_types(types)?;
            let nodes = graph.traverse(&id, hops, types.as_deref())?;
            for node in nodes {
                println!(
                    "{} hop={} sim={:.2} [{}] {}",
                    node.id,
                    node.hop,
                    node.similarity,
                    node.agent,
                    node.memory
                );
            }
        }

        Commands::Clusters { min_size } => {
            let clusters = graph.graph_clusters(min_size);
            if clusters.is_empty() {
                println!("no clusters of size >= {min_size}");
            }
            for (i, cluster) in clusters.iter().enumerate() {
                let label = cluster.label.as_deref().unwrap_or("(unlabeled)");
                let tags: Vec<String> = cluster
                    .top_tags
                    .iter()
                    .map(|(tag, count)| format!("{tag}({count})"))
                    .collect();
                println!(
                    "{i}: {} members | {} | tags: {}",
                    cluster.size,
                    label.bold(),
                    tags.join(", ")
                );
            }
        }

        Commands::Path { from, to } => {
            let result = graph.path(&from, &to, None)?;
            if result.found {
                println!("{} hops: {}", "✓".green(), result.hops);
                println!("{}", result.path.join(" -> "));
            } else {
                println!("{} no path", "✗".red());
            }
        }

        Commands::Decay { dry_run } => {
            let report = graph.decay(dry_run)?;
            let mode = if report.dry_run { " (dry run)" } else { "" };
            println!(
                "decay{mode}: total={} healthy={} weakening={} archived={} deleted={}",
                report.total, report.healthy, report.weakening, report.archived, report.deleted
            );
        }

        Commands::Health => {
            let report = graph.health()?;
            println!("{}", "=== Memory Graph Health ===".cyan().bold());
            println!("memories: {} (archive: {})", report.total, report.archive_count);
            println!(
                "links: {} (cross-agent: {})",
                report.links_total, report.cross_agent_links
            );
            println!(
                "strength: strong={} healthy={} weakening={} critical={} dead={} (avg {:.2})",
                report.strength.strong,
                report.strength.healthy,
                report.strength.weakening,
                report.strength.critical,
                report.strength.dead,
                report.avg_strength
            );
            println!("orphans: {}", report.orphans);
            println!(
                "age: avg {:.1}d max {:.1}d",
                report.avg_age_days, report.max_age_days
            );
            if let Some(avg) = report.avg_stability {
                println!("sm2: {} memories, avg stability {:.2}", report.sm2_count, avg);
            }
            for (agent, count) in &report.by_agent {
                println!("  agent {agent}: {count}");
            }
        }

        Commands::Context {
            agent,
            query,
            max_memories,
            max_tokens,
        } => {
            let options = ContextOptions {
                max_memories,
                max_tokens,
                ..Default::default()
            };
            let result = graph.context(Some(&agent), &query, &options)?;
            println!("{}", result.context);
            if let Some(estimate) = result.token_estimate {
                eprintln!(
                    "({} memories, ~{} tokens, {} excluded)",
                    result.count,
                    estimate,
                    result.excluded.unwrap_or(0)
                );
            }
        }

        Commands::Consolidate { dry_run } => {
            let report = graph.consolidate(&ConsolidateOptions { dry_run })?;
            let mode = if report.dry_run { " (dry run)" } else { "" };
            println!("consolidate{mode}:");
            println!("  deduplicated: {}", report.deduplicated);
            println!(
                "  contradictions: resolved={} pending={}",
                report.contradictions_resolved, report.contradictions_pending
            );
            println!("  corroborated: {}", report.corroborated);
            println!(
                "  compressed: clusters={} sources={}",
                report.compressed_clusters, report.compressed_source_memories
            );
            println!(
                "  pruned: superseded={} decayed={} disputed={} quarantined={}",
                report.pruned_superseded,
                report.pruned_decayed,
                report.pruned_disputed,
                report.pruned_quarantined
            );
            println!(
                "  {} -> {} memories in {}ms",
                report.before_total, report.after_total, report.duration_ms
            );
        }

        Commands::Conflicts {
            subject,
            predicate,
            all,
        } => {
            let filter = ConflictFilter {
                subject,
                predicate,
                include_resolved: all,
            };
            let conflicts = graph.conflicts(&filter);
            if conflicts.is_empty() {
                println!("no pending conflicts");
            }
            for conflict in conflicts {
                let state = match &conflict.resolution {
                    Some(resolution) => resolution.clone(),
                    None => "open".to_string(),
                };
                println!(
                    "{} [{state}] {}.{}: {} (trust {:.2}) vs {} (trust {:.2})",
                    conflict.id,
                    conflict.new_claim.subject,
                    conflict.new_claim.predicate,
                    conflict.new_claim.value,
                    conflict.new_trust,
                    conflict.existing_claim.value,
                    conflict.existing_trust
                );
            }
        }

        Commands::Resolve { id, action } => {
            let action = action
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let resolved = graph.resolve_conflict(&id, action)?;
            println!(
                "{} {} -> {}",
                "✓ Resolved:".green(),
                resolved.id,
                resolved.resolution.unwrap_or_default()
            );
        }

        Commands::Timeline {
            agent,
            days,
            time_field,
        } => {
            let time_field: TimeField = time_field
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let timeline = graph.timeline(agent.as_deref(), days, time_field);
            for day in timeline {
                println!("{}", day.date.bold());
                for entry in day.entries {
                    println!("  [{}] {} ({})", entry.category, entry.text, entry.agent);
                }
            }
        }

        Commands::Episodes { command } => run_episodes(&mut graph, command)?,
    }

    Ok(())
}

fn run_episodes(graph: &mut MemoryGraph, command: EpisodeCommands) -> anyhow::Result<()> {
    match command {
        EpisodeCommands::Create { name, ids, tags } => {
            let episode = graph.create_episode(&name, ids, split_csv(tags), None)?;
            println!(
                "{} {} ({} memories)",
                "✅ Episode:".green(),
                episode.id,
                episode.memory_ids.len()
            );
        }

        EpisodeCommands::Capture {
            name,
            agent,
            start,
            end,
            min_memories,
        } => match graph.capture_episode(&name, &agent, &start, &end, min_memories)? {
            Some(episode) => println!(
                "{} {} ({} memories)",
                "✅ Episode:".green(),
                episode.id,
                episode.memory_ids.len()
            ),
            None => println!("no episode captured (fewer than {min_memories} memories in window)"),
        },

        EpisodeCommands::Add { id, ids } => {
            let episode = graph.add_to_episode(&id, &ids)?;
            println!(
                "{} {} now has {} memories",
                "✓ Updated:".green(),
                episode.id,
                episode.memory_ids.len()
            );
        }

        EpisodeCommands::Remove { id, ids } => {
            let episode = graph.remove_from_episode(&id, &ids)?;
            println!(
                "{} {} now has {} memories",
                "✓ Updated:".green(),
                episode.id,
                episode.memory_ids.len()
            );
        }

        EpisodeCommands::List { agent, tag } => {
            let episodes = graph.list_episodes(&EpisodeFilter { agent, tag });
            if episodes.is_empty() {
                println!("no episodes");
            }
            for episode in episodes {
                println!(
                    "{} {} | {} memories | {} -> {} | agents: {}",
                    episode.id,
                    episode.name.bold(),
                    episode.memory_ids.len(),
                    episode.time_range.start.format("%Y-%m-%d"),
                    episode.time_range.end.format("%Y-%m-%d"),
                    episode.agents.join(", ")
                );
            }
        }

        EpisodeCommands::Show { id } => {
            let episode = graph.get_episode(&id)?;
            println!("{} {}", episode.id, episode.name.bold());
            println!(
                "  {} -> {} | agents: {}",
                episode.time_range.start.to_rfc3339(),
                episode.time_range.end.to_rfc3339(),
                episode.agents.join(", ")
            );
            if !episode.tags.is_empty() {
                println!("  tags: {}", episode.tags.join(", "));
            }
            if let Some(summary) = &episode.summary {
                println!("  summary: {summary}");
            }
            for memory_id in &episode.memory_ids {
                match graph.get(memory_id) {
                    Ok(memory) => println!("  - [{}] {}", memory.category, memory.text),
                    Err(_) => println!("  - {memory_id} (deleted)"),
                }
            }
        }

        EpisodeCommands::Search { id, query, limit } => {
            let hits = graph.search_episode(&id, &query, limit)?;
            if hits.is_empty() {
                println!("no results");
            }
            for hit in hits {
                println!(
                    "{} {} ({})",
                    format!("[{:.2}]", hit.score).cyan(),
                    hit.text,
                    hit.id
                );
            }
        }

        EpisodeCommands::Summarize { id } => {
            let episode = graph.summarize_episode(&id)?;
            println!("{}", episode.summary.unwrap_or_default());
        }

        EpisodeCommands::Delete { id } => {
            graph.delete_episode(&id)?;
            println!("{} {id}", "✓ Deleted:".green());
        }
    }
    Ok(())
}

// ============================================================================
// WIRING
// ============================================================================

/// Open the engine over file storage, attaching OpenAI-compatible
/// providers when an API key is configured.
fn open_graph() -> anyhow::Result<MemoryGraph> {
    let data_dir = match std::env::var("ENGRAM_DATA_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => ProjectDirs::from("dev", "engram", "engram")
            .context("could not determine a data directory; set ENGRAM_DATA_DIR")?
            .data_dir()
            .to_path_buf(),
    };
    let storage = FileStorage::new(&data_dir)
        .with_context(|| format!("opening storage at {}", data_dir.display()))?;

    let mut graph = MemoryGraph::open(EngineConfig::default(), Box::new(storage))?;
    if let Some(config) = ProviderConfig::from_env() {
        graph = graph
            .with_embedder(Box::new(OpenAiEmbeddings::new(config.clone())))
            .with_chat(Box::new(OpenAiChat::new(config)));
    } else {
        tracing::debug!("no ENGRAM_API_KEY; running in keyword mode");
    }
    Ok(graph)
}

fn split_csv(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_link_types(raw: Option<String>) -> anyhow::Result<Option<Vec<LinkType>>> {
    match raw {
        None => Ok(None),
        Some(raw) => {
            let mut types = Vec::new();
            for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                types.push(part.parse().map_err(|e: String| anyhow::anyhow!(e))?);
            }
            Ok(Some(types))
        }
    }
}

fn print_hits(response: &engram_core::SearchResponse) {
    if response.hits.is_empty() {
        println!("no results");
    }
    for hit in &response.hits {
        println!(
            "{} {} ({}, {})",
            format!("[{:.2}]", hit.score).cyan(),
            hit.memory.text,
            hit.memory.id,
            hit.memory.agent
        );
    }
    if let Some(meta) = &response.meta {
        eprintln!(
            "(candidates: {}, returned: {}, excluded: superseded={} quarantined={} belowMinSimilarity={})",
            meta.candidates,
            meta.returned,
            meta.excluded.superseded,
            meta.excluded.quarantined,
            meta.excluded.below_min_similarity
        );
    }
}

//! CLI binary for validating playbooks and inspecting resolved journeys.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use milestone_engine::{
    check_actionable, diff_views, edges_for_world, load_playbook_file, next_for_submission,
    overall_progress, resolve, validate, visible_edges, world_progress, Branch, EventEmitter,
    JourneyEvent, LoadOptions, Playbook, Severity,
};
use tokio::sync::broadcast::error::RecvError;
use milestone_types::{FieldValues, ProcessFlags, RawStateMap};

#[derive(Parser)]
#[command(name = "milestone", version, about = "Milestone playbook engine tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Lint a playbook JSON file
    Validate {
        /// Path to the playbook JSON file
        playbook: PathBuf,

        /// Fail on warnings as well as errors
        #[arg(long)]
        deny_warnings: bool,
    },

    /// Show worlds, nodes and conditions of a playbook
    Info {
        /// Path to the playbook JSON file
        playbook: PathBuf,
    },

    /// Resolve every node's state for one journey
    Resolve {
        playbook: PathBuf,

        #[command(flatten)]
        journey: JourneyArgs,

        /// Mark the nodes this role can act on
        #[arg(long)]
        role: Option<String>,

        /// Locale for titles (default: the playbook's default locale)
        #[arg(long)]
        locale: Option<String>,

        /// Print the view model as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the edge list of one world
    Edges {
        playbook: PathBuf,

        /// World id
        world: String,

        /// Only edges between nodes visible in the given journey
        #[arg(long)]
        visible: bool,

        /// Print the edge list as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        journey: JourneyArgs,
    },

    /// Show which branch a node takes for the given submitted fields
    Next {
        playbook: PathBuf,

        /// Node id
        node: String,

        /// Submitted field of the node, as key=value (repeatable)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, Value)>,

        /// Raw node states, for outcomes that read other nodes' answers
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Report state changes between two raw state snapshots
    Diff {
        playbook: PathBuf,

        /// Raw states before the write
        before: PathBuf,

        /// Raw states after the write
        after: PathBuf,

        /// Process flag as key=value (repeatable)
        #[arg(long = "flag", value_parser = parse_key_value)]
        flags: Vec<(String, Value)>,
    },
}

#[derive(Args)]
struct JourneyArgs {
    /// Raw node states as a JSON object keyed by node id
    #[arg(long)]
    state: Option<PathBuf>,

    /// Process flag as key=value (repeatable)
    #[arg(long = "flag", value_parser = parse_key_value)]
    flags: Vec<(String, Value)>,
}

impl JourneyArgs {
    fn raw_states(&self) -> anyhow::Result<RawStateMap> {
        match &self.state {
            Some(path) => read_states(path),
            None => Ok(RawStateMap::new()),
        }
    }

    fn process_flags(&self) -> ProcessFlags {
        self.flags.iter().cloned().collect()
    }
}

/// Parse `key=value`. The value is read as JSON when it parses, else as a string.
fn parse_key_value(input: &str) -> Result<(String, Value), String> {
    let (key, raw) = input
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{input}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{input}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate {
            playbook,
            deny_warnings,
        } => {
            cmd_validate(&playbook, deny_warnings)?;
        }
        Commands::Info { playbook } => {
            cmd_info(&playbook)?;
        }
        Commands::Resolve {
            playbook,
            journey,
            role,
            locale,
            json,
        } => {
            cmd_resolve(&playbook, &journey, role.as_deref(), locale.as_deref(), json)?;
        }
        Commands::Edges {
            playbook,
            world,
            visible,
            json,
            journey,
        } => {
            cmd_edges(&playbook, &world, visible, json, &journey)?;
        }
        Commands::Next {
            playbook,
            node,
            fields,
            state,
        } => {
            cmd_next(&playbook, &node, fields, state.as_deref())?;
        }
        Commands::Diff {
            playbook,
            before,
            after,
            flags,
        } => {
            cmd_diff(&playbook, &before, &after, flags).await?;
        }
    }

    Ok(())
}

fn load(path: &Path) -> anyhow::Result<Playbook> {
    let loaded = load_playbook_file(path, &LoadOptions::default())?;
    Ok(loaded.playbook)
}

fn read_states(path: &Path) -> anyhow::Result<RawStateMap> {
    let source = std::fs::read_to_string(path)?;
    let states = serde_json::from_str(&source)
        .map_err(|e| anyhow::anyhow!("invalid state file {}: {e}", path.display()))?;
    Ok(states)
}

fn cmd_validate(path: &Path, deny_warnings: bool) -> anyhow::Result<()> {
    let source = milestone_playbook::read_document(path)?;
    let diagnostics = validate(&source.document);

    let mut failed = false;
    for diag in &diagnostics {
        match diag.severity {
            Severity::Error => failed = true,
            Severity::Warning if deny_warnings => failed = true,
            _ => {}
        }
        println!("[{}] {}: {}", diag.severity.as_str(), diag.rule, diag.message);
        if let Some(fix) = &diag.fix {
            println!("        fix: {fix}");
        }
    }

    if failed {
        std::process::exit(1);
    }

    // Lint passed; building the graph catches what the rules cannot see.
    let playbook = Playbook::from_document(source)?;
    println!(
        "Playbook {} {} is valid ({} worlds, {} nodes)",
        playbook.id,
        playbook.version,
        playbook.worlds().len(),
        playbook.len()
    );
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let playbook = load(path)?;
    let locale = playbook.locale_default.as_deref().unwrap_or("en");

    println!("Playbook: {}", playbook.id);
    println!("Version: {}", playbook.version);
    println!("Checksum: {}", playbook.checksum);
    println!("Nodes: {}", playbook.len());

    if !playbook.roles.is_empty() {
        let roles: Vec<&str> = playbook.roles.iter().map(|r| r.id.as_str()).collect();
        println!("Roles: {}", roles.join(", "));
    }

    let conditions: Vec<_> = playbook.conditions().collect();
    if !conditions.is_empty() {
        println!("\nConditions:");
        for cond in conditions {
            println!("  {} := {}", cond.id, cond.expr);
        }
    }

    for world in playbook.worlds() {
        let title = milestone_playbook::pick_locale(&world.title, locale).unwrap_or(&world.id);
        print!("\nWorld {} (order {}): {}", world.id, world.order, title);
        if let Some(cond) = &world.condition {
            print!(" [if {}]", cond.reference);
        }
        println!();
        for node in &world.nodes {
            let mut line = format!("  {} [{}]", node.id, node.kind);
            if !node.allowed_completers.is_empty() {
                line.push_str(&format!(" by {}", node.allowed_completers.join("|")));
            }
            if let Some(timer) = &node.timer {
                line.push_str(&format!(" timer={}d", timer.duration_days));
            }
            if let Some(cond) = &node.condition {
                line.push_str(&format!(" if {}", cond.reference));
            }
            let loops = playbook.loop_sources(&node.id);
            if !loops.is_empty() {
                line.push_str(&format!(" reworked from {}", loops.join("|")));
            }
            println!("{line}");
        }
    }

    Ok(())
}

fn cmd_resolve(
    path: &Path,
    journey: &JourneyArgs,
    role: Option<&str>,
    locale: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let playbook = load(path)?;
    let raw = journey.raw_states()?;
    let flags = journey.process_flags();
    let view = resolve(&playbook, &raw, &flags);

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let locale = locale
        .or(playbook.locale_default.as_deref())
        .unwrap_or("en");
    let progress = world_progress(&view);
    for (world, counts) in view.worlds.iter().zip(&progress) {
        println!(
            "{} {}  [{}/{}]",
            world.id,
            world.title_in(locale),
            counts.done,
            counts.total
        );
        for node in &world.nodes {
            let marker = match role {
                Some(role) if check_actionable(&view, node.id, role).is_ok() => "*",
                _ => " ",
            };
            println!(
                " {marker} {:<12} {:<24} {}",
                node.state.as_str(),
                node.id,
                node.title_in(locale)
            );
        }
    }

    let hidden: Vec<&str> = view.hidden_nodes().collect();
    if !hidden.is_empty() {
        println!("\nHidden: {}", hidden.join(", "));
    }
    let (done, total) = overall_progress(&view);
    println!("Progress: {done}/{total}");
    Ok(())
}

fn cmd_edges(
    path: &Path,
    world: &str,
    visible: bool,
    json: bool,
    journey: &JourneyArgs,
) -> anyhow::Result<()> {
    let playbook = load(path)?;
    if playbook.world(world).is_none() {
        anyhow::bail!("Unknown world '{world}'");
    }

    let edges = if visible {
        let raw = journey.raw_states()?;
        let flags = journey.process_flags();
        let view = resolve(&playbook, &raw, &flags);
        visible_edges(&playbook, &view, world)
    } else {
        edges_for_world(&playbook, world)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&edges)?);
        return Ok(());
    }
    for edge in &edges {
        println!("{} -> {} ({})", edge.from, edge.to, serde_json::to_value(edge.kind)?);
    }
    Ok(())
}

fn cmd_next(
    path: &Path,
    node: &str,
    fields: Vec<(String, Value)>,
    state: Option<&Path>,
) -> anyhow::Result<()> {
    let playbook = load(path)?;
    let raw = match state {
        Some(path) => read_states(path)?,
        None => RawStateMap::new(),
    };
    let submitted: FieldValues = fields.into_iter().collect();

    let branch = next_for_submission(&playbook, node, &submitted, &raw)?;
    match &branch {
        Branch::Outcome { value, targets, .. } => {
            println!("outcome '{}' -> {}", value, targets.join(", "));
        }
        Branch::Default { targets } => println!("default -> {}", targets.join(", ")),
        Branch::Terminal => println!("terminal"),
    }
    Ok(())
}

async fn cmd_diff(
    path: &Path,
    before: &Path,
    after: &Path,
    flags: Vec<(String, Value)>,
) -> anyhow::Result<()> {
    let playbook = load(path)?;
    let flags: ProcessFlags = flags.into_iter().collect();
    let before = resolve(&playbook, &read_states(before)?, &flags);
    let after = resolve(&playbook, &read_states(after)?, &flags);
    let events = diff_views(&before, &after);

    let lines = publish_events(events).await?;
    if lines.is_empty() {
        println!("No changes");
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

/// Publish `events` on an emitter and collect what a subscriber receives, one
/// line per event with unlocks marked `+`.
async fn publish_events(events: Vec<JourneyEvent>) -> anyhow::Result<Vec<String>> {
    let emitter = EventEmitter::new(events.len().max(1));
    let mut rx = emitter.subscribe();
    let printer = tokio::spawn(async move {
        let mut lines = Vec::new();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let marker = if event.is_unlock() { "+" } else { " " };
                    match serde_json::to_string(&event) {
                        Ok(line) => lines.push(format!("{marker} {line}")),
                        Err(e) => tracing::warn!(error = %e, "Could not encode event"),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        lines
    });

    emitter.emit_all(events);
    drop(emitter);

    Ok(printer.await?)
}

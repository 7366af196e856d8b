//! scrumflow CLI - multi-agent agile planning
//!
//! Usage:
//!   scrumflow init                          Write a default configuration
//!   scrumflow run <request>                 Start or continue a planning thread
//!   scrumflow resume --thread <id> ...      Answer a suspended thread
//!   scrumflow state --thread <id>           Show the latest snapshot of a thread
//!   scrumflow backlog <requirements>        Generate a backlog without the team
//!   scrumflow plan-sprints --tasks <file>   Pack tasks into sprints offline

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use scrumflow_agent::{
    CircuitBreaker, OpenAiClient, ReasoningService, RetryPolicy, RetryingService, ToolContext,
};
use scrumflow_core::config::CONFIG_DIR;
use scrumflow_core::{
    next_monday, BacklogItem, BacklogKind, ItemDraft, ResumeCommand, ScrumConfig, Sprint,
    TeamConstraints,
};
use scrumflow_orchestrator::{
    ActivityLogger, CompiledGraph, FileCheckpointStore, GraphRun, Pending, RunConfig,
};
use scrumflow_planning::{user_turn, BacklogGenerator, ScrumState, ScrumTeam, SprintPlanner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Consecutive reasoning failures before the circuit opens
const BREAKER_THRESHOLD: u32 = 5;
const BREAKER_TIMEOUT_SECS: u64 = 60;

#[derive(Parser)]
#[command(name = "scrumflow")]
#[command(author, version, about = "Multi-agent agile planning")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project root holding the .scrumflow directory
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write .scrumflow/config.toml with default settings
    Init,

    /// Send a request to the planning team
    Run {
        /// What to plan, e.g. "Build a todo app, team: 2 backend devs, duration 2 weeks"
        #[arg(required = true)]
        request: Vec<String>,

        /// Continue an existing thread instead of starting a new one
        #[arg(short, long)]
        thread: Option<String>,

        /// Credential passed to remote workspace tools
        #[arg(long)]
        credential: Option<String>,
    },

    /// Answer the question or approval a thread is waiting on
    Resume {
        #[arg(short, long)]
        thread: String,

        /// Answer to a question
        #[arg(long, conflicts_with_all = ["approve", "reject"])]
        answer: Option<String>,

        /// Approve the pending tool calls
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Reject the pending request with a reason
        #[arg(long)]
        reject: Option<String>,

        #[arg(long)]
        credential: Option<String>,
    },

    /// Continue a thread that stopped before its next node
    Recover {
        #[arg(short, long)]
        thread: String,

        #[arg(long)]
        credential: Option<String>,
    },

    /// Show the latest snapshot of a thread
    State {
        #[arg(short, long)]
        thread: String,

        /// Print the full state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate a backlog from requirements without supervision
    Backlog {
        #[arg(required = true)]
        requirements: Vec<String>,
    },

    /// Pack tasks from a JSON file into sprints
    PlanSprints {
        /// JSON array of tasks
        #[arg(long)]
        tasks: PathBuf,

        #[arg(long, default_value = "1")]
        team_size: u32,

        /// Sprint length in weeks
        #[arg(long, default_value = "2")]
        weeks: u32,

        /// First sprint start date (YYYY-MM-DD); defaults to next Monday
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Story points per person per week
        #[arg(long, default_value = "6")]
        points: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init => cmd_init(&cli.root),
        Commands::Run {
            request,
            thread,
            credential,
        } => cmd_run(&cli.root, request.join(" "), thread, credential).await,
        Commands::Resume {
            thread,
            answer,
            approve,
            reject,
            credential,
        } => cmd_resume(&cli.root, thread, answer, approve, reject, credential).await,
        Commands::Recover { thread, credential } => cmd_recover(&cli.root, thread, credential).await,
        Commands::State { thread, json } => cmd_state(&cli.root, thread, json).await,
        Commands::Backlog { requirements } => cmd_backlog(&cli.root, requirements.join(" ")).await,
        Commands::PlanSprints {
            tasks,
            team_size,
            weeks,
            start,
            points,
        } => cmd_plan_sprints(tasks, team_size, weeks, start, points).await,
    }
}

fn cmd_init(root: &Path) -> Result<()> {
    ScrumConfig::write_default(root).context("Failed to write configuration")?;
    println!("Initialized scrumflow in {:?}", root);
    println!("Created:");
    println!("  {}/config.toml", CONFIG_DIR);
    println!("\nSet OPENAI_API_KEY (or the variable named in models.api_key_env), then run:");
    println!("  scrumflow run \"Build a todo app, team: 2 backend devs, duration 2 weeks\"");
    Ok(())
}

fn reasoning_service(config: &ScrumConfig) -> Result<Arc<dyn ReasoningService>> {
    let client = OpenAiClient::from_config(&config.models)
        .context("No reasoning service credentials")?
        .with_circuit_breaker(CircuitBreaker::new(BREAKER_THRESHOLD, BREAKER_TIMEOUT_SECS));
    info!("Using model {}", client.model());
    Ok(Arc::new(RetryingService::new(
        Arc::new(client),
        RetryPolicy::from(&config.retry),
    )))
}

fn scrum_graph(root: &Path) -> Result<CompiledGraph<ScrumState>> {
    let config = ScrumConfig::load(root).context("Failed to load configuration")?;
    let service = reasoning_service(&config)?;
    let dir = root.join(CONFIG_DIR);
    let store = Arc::new(
        FileCheckpointStore::new(dir.join("checkpoints"))
            .with_history_limit(config.graph.checkpoint_history),
    );
    let logger = Arc::new(ActivityLogger::new(dir));

    let graph = ScrumTeam::new(service, config)
        .with_activity_logger(logger)
        .build(store)?;
    Ok(graph)
}

fn run_config(credential: Option<String>) -> RunConfig {
    match credential {
        Some(credential) => RunConfig::with_credential(credential),
        None => RunConfig::default(),
    }
}

async fn cmd_run(
    root: &Path,
    request: String,
    thread: Option<String>,
    credential: Option<String>,
) -> Result<()> {
    let thread = thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!("Running thread {}", thread);

    let graph = scrum_graph(root)?;
    let run = graph
        .invoke(&thread, user_turn(&request)?, run_config(credential))
        .await?;
    print_run(&thread, &run);
    Ok(())
}

async fn cmd_resume(
    root: &Path,
    thread: String,
    answer: Option<String>,
    approve: bool,
    reject: Option<String>,
    credential: Option<String>,
) -> Result<()> {
    let command = match (answer, approve, reject) {
        (Some(value), false, None) => ResumeCommand::provide(value),
        (None, true, None) => ResumeCommand::Approve,
        (None, false, Some(reason)) => ResumeCommand::reject(reason),
        _ => bail!("Pass exactly one of --answer, --approve or --reject"),
    };

    let graph = scrum_graph(root)?;
    let run = graph
        .resume(&thread, command, run_config(credential))
        .await?;
    print_run(&thread, &run);
    Ok(())
}

async fn cmd_recover(root: &Path, thread: String, credential: Option<String>) -> Result<()> {
    let graph = scrum_graph(root)?;
    let run = graph.recover(&thread, run_config(credential)).await?;
    print_run(&thread, &run);
    Ok(())
}

async fn cmd_state(root: &Path, thread: String, json: bool) -> Result<()> {
    let graph = scrum_graph(root)?;
    let Some(snapshot) = graph.state(&thread).await? else {
        bail!("Thread '{}' not found", thread);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot.state)?);
        return Ok(());
    }

    println!("Thread {}", thread);
    println!("==========");
    println!("Version: {} ({})", snapshot.version, snapshot.created_at);
    match &snapshot.pending {
        Pending::Next { node } => {
            println!("Status: stopped before '{}'", node);
            println!("Continue with: scrumflow recover --thread {}", thread);
        }
        Pending::Interrupted { interrupt } => {
            println!("Status: waiting at '{}': {}", interrupt.node, interrupt.prompt())
        }
        Pending::Done => println!("Status: done"),
    }
    print_summary(&snapshot.state);
    Ok(())
}

async fn cmd_backlog(root: &Path, requirements: String) -> Result<()> {
    let config = ScrumConfig::load(root).context("Failed to load configuration")?;
    let service = reasoning_service(&config)?;
    let generator = BacklogGenerator::new(service, config.backlog.clone())
        .with_max_steps(config.agent.max_steps);

    let thread = uuid::Uuid::new_v4().to_string();
    let backlog = generator
        .generate(&requirements, &ToolContext::new(thread))
        .await?;
    println!("{}", serde_json::to_string_pretty(&backlog)?);
    Ok(())
}

async fn cmd_plan_sprints(
    tasks: PathBuf,
    team_size: u32,
    weeks: u32,
    start: Option<NaiveDate>,
    points: u32,
) -> Result<()> {
    let content = tokio::fs::read_to_string(&tasks)
        .await
        .with_context(|| format!("Failed to read {:?}", tasks))?;
    let items = parse_tasks(&content)?;

    let start = start.unwrap_or_else(|| next_monday(chrono::Local::now().date_naive()));
    let team = TeamConstraints {
        team_size,
        sprint_duration_weeks: weeks,
        points_per_person_per_week: points,
        start_date: start,
    };
    let sprints = SprintPlanner::new(team).plan(&items);
    print_sprints(&sprints);
    Ok(())
}

/// Tasks as canonical items, or as drafts numbered in file order
fn parse_tasks(content: &str) -> Result<Vec<BacklogItem>> {
    if let Ok(items) = serde_json::from_str::<Vec<BacklogItem>>(content) {
        return Ok(items);
    }
    let drafts: Vec<ItemDraft> =
        serde_json::from_str(content).context("Tasks file must be a JSON array of tasks")?;
    Ok(drafts
        .into_iter()
        .enumerate()
        .map(|(position, draft)| draft.into_item(BacklogKind::Task, None, position))
        .collect())
}

fn print_run(thread: &str, run: &GraphRun<ScrumState>) {
    if let Some(interrupt) = &run.interrupt {
        println!("Waiting for input on thread {}", thread);
        println!("  {}", interrupt.prompt());
        println!("\nContinue with:");
        println!("  scrumflow resume --thread {} --answer \"...\"", thread);
        println!("  (or --approve / --reject \"reason\" for approvals)");
        return;
    }

    if let Some(last) = run.state.messages.last() {
        println!("{}\n", last.content());
    }
    print_summary(&run.state);
    println!("\nThread: {}", thread);
}

fn print_summary(state: &ScrumState) {
    println!(
        "Backlog: {} use cases, {} epics, {} user stories, {} tasks",
        state.use_cases.len(),
        state.epics.len(),
        state.user_stories.len(),
        state.tasks.len()
    );
    if !state.sprints.is_empty() {
        print_sprints(&state.sprints);
    }
    if let Some(report) = &state.project_report {
        println!(
            "Report: {:?}, {}% complete. {}",
            report.overall_status, report.completion_percentage_estimate, report.summary
        );
    }
}

fn print_sprints(sprints: &[Sprint]) {
    println!("Sprints:");
    for sprint in sprints {
        println!(
            "  {} {} → {}  {}/{} pts  {}",
            sprint.name,
            sprint.start_date,
            sprint.end_date,
            sprint.committed_effort,
            sprint.capacity,
            sprint.goal
        );
        for item in &sprint.backlog_ids {
            println!("    {}. {} {}", item.order, item.backlog_id, item.title);
        }
    }
}

//! Draftsman CLI
//!
//! The `draftsman` command drives a grounded drafting run step by step.
//!
//! ## Commands
//!
//! - `init`: create a run from a TOML/JSON request and propose research questions
//! - `questions`: show the questions awaiting review
//! - `approve`: approve the questions, optionally replacing them
//! - `run`: research, draft, verify and export
//! - `status`: phase, section states and retry history
//! - `export`: write the finished document
//! - `list` / `delete`: manage stored runs

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use draftsman_core::capability::{CancelSignal, GenerationRequest, SourceRepository};
use draftsman_core::domain::SectionState;
use draftsman_core::{
    pending_questions, render_markdown, write_export_artifact, ApprovalAction, CapabilityError,
    GenerationCapability, HttpGenerationClient, HttpGenerationConfig, InMemorySourceRepository,
    Orchestrator, ResearchQuestion, Run, RunOutcome, RunRequest,
};
use draftsman_state::{CheckpointStore, SurrealCheckpointStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "draftsman")]
#[command(version = draftsman_core::VERSION)]
#[command(about = "Grounded long-form drafting with verified citations", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// SurrealDB url for run checkpoints (default: local surrealkv store)
    #[arg(long, global = true, env = "SURREALDB_URL")]
    db_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a run and generate research questions for review
    Init {
        /// Run request (topic, template, config) as TOML or JSON
        #[arg(short, long)]
        input: PathBuf,

        /// Source records (JSON) to serve during the run
        #[arg(short, long)]
        sources: Option<PathBuf>,
    },

    /// Show research questions awaiting approval
    Questions {
        #[arg(long)]
        run: Uuid,
    },

    /// Approve the research questions
    Approve {
        #[arg(long)]
        run: Uuid,

        /// Replacement questions (JSON array) to approve instead
        #[arg(short, long)]
        questions: Option<PathBuf>,

        /// Name recorded in the approval audit record
        #[arg(long, env = "DRAFTSMAN_REVIEWER", default_value = "cli")]
        reviewer: String,
    },

    /// Drive an approved run to completion
    Run {
        #[arg(long)]
        run: Uuid,

        /// Source records (JSON) to retrieve and cite from
        #[arg(short, long)]
        sources: PathBuf,
    },

    /// Show phase, section states and retry history
    Status {
        #[arg(long)]
        run: Uuid,
    },

    /// Write the finished document as Markdown
    Export {
        #[arg(long)]
        run: Uuid,

        /// Markdown output path
        #[arg(short, long)]
        output: PathBuf,

        /// Also write the digest-verified export artifact under this directory
        #[arg(long, env = "DRAFTSMAN_ARTIFACTS_DIR")]
        artifacts_dir: Option<PathBuf>,
    },

    /// Delete every checkpoint of a run
    Delete {
        #[arg(long)]
        run: Uuid,
    },

    /// List stored runs
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    draftsman_core::init_tracing(cli.json, level);

    let store: Arc<dyn CheckpointStore> = Arc::new(
        SurrealCheckpointStore::from_env(cli.db_url.as_deref())
            .await
            .context("Failed to connect to the checkpoint store")?,
    );

    match cli.command {
        Commands::Init { input, sources } => cmd_init(store, &input, sources.as_deref()).await,
        Commands::Questions { run } => cmd_questions(store, run).await,
        Commands::Approve {
            run,
            questions,
            reviewer,
        } => cmd_approve(store, run, questions.as_deref(), reviewer).await,
        Commands::Run { run, sources } => cmd_run(store, run, &sources).await,
        Commands::Status { run } => cmd_status(store, run).await,
        Commands::Export {
            run,
            output,
            artifacts_dir,
        } => cmd_export(store, run, &output, artifacts_dir.as_deref()).await,
        Commands::Delete { run } => cmd_delete(store, run).await,
        Commands::List => cmd_list(store).await,
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn load_sources(path: Option<&Path>) -> Result<Arc<dyn SourceRepository>> {
    let repo = match path {
        Some(path) => InMemorySourceRepository::from_json_file(path)
            .with_context(|| format!("Failed to load source records from {:?}", path))?,
        None => InMemorySourceRepository::default(),
    };
    Ok(Arc::new(repo))
}

fn orchestrator(
    store: Arc<dyn CheckpointStore>,
    sources: Arc<dyn SourceRepository>,
) -> Result<Orchestrator> {
    let config = HttpGenerationConfig::from_env().map_err(anyhow::Error::msg)?;
    let generator = HttpGenerationClient::new(config).context("Failed to build generation client")?;
    Ok(Orchestrator::new(sources, Arc::new(generator), store))
}

/// Orchestrator without a generation backend, for commands that only read or
/// update stored state.
fn offline(store: Arc<dyn CheckpointStore>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(InMemorySourceRepository::default()),
        Arc::new(OfflineGenerator),
        store,
    )
}

struct OfflineGenerator;

#[async_trait]
impl GenerationCapability for OfflineGenerator {
    async fn generate(
        &self,
        _request: &GenerationRequest,
    ) -> std::result::Result<String, CapabilityError> {
        Err(CapabilityError::Unavailable(
            "generation is not available for this command".to_string(),
        ))
    }
}

/// Cancel the run on Ctrl-C; the run stays resumable from its last checkpoint.
fn cancel_on_ctrl_c() -> CancelSignal {
    let (tx, cancel) = CancelSignal::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            tx.send_replace(true);
        }
    });
    cancel
}

fn read_run_request(path: &Path) -> Result<RunRequest> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read run request: {:?}", path))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        RunRequest::from_json(&text).with_context(|| format!("Invalid JSON in {:?}", path))
    } else {
        RunRequest::from_toml(&text).with_context(|| format!("Invalid TOML in {:?}", path))
    }
}

/// Questions file: a JSON array of questions, or `{"questions": [...]}`.
/// Plain strings are accepted and apply to every section.
fn read_questions(path: &Path) -> Result<Vec<ResearchQuestion>> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Entry {
        Text(String),
        Full(ResearchQuestion),
    }
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum QuestionsFile {
        List(Vec<Entry>),
        Wrapped { questions: Vec<Entry> },
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read questions file: {:?}", path))?;
    let parsed: QuestionsFile =
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))?;
    let entries = match parsed {
        QuestionsFile::List(entries) | QuestionsFile::Wrapped { questions: entries } => entries,
    };
    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            Entry::Text(text) => ResearchQuestion {
                id: i as u32 + 1,
                text,
                target_sections: Vec::new(),
            },
            Entry::Full(question) => question,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_init(
    store: Arc<dyn CheckpointStore>,
    input: &Path,
    sources: Option<&Path>,
) -> Result<()> {
    let request = read_run_request(input)?;
    let orchestrator = orchestrator(store, load_sources(sources)?)?.with_cancel(cancel_on_ctrl_c());

    let mut run = orchestrator
        .create_run(request)
        .await
        .context("Failed to create run")?;
    info!(run_id = %run.run_id, "run created");
    println!("Run: {}", run.run_id);

    match orchestrator.drive(&mut run).await.context("Planning failed")? {
        RunOutcome::AwaitingApproval { .. } => {
            print!("{}", render_questions(&run.questions));
            println!();
            println!("Approve with: draftsman approve --run {}", run.run_id);
        }
        RunOutcome::Failed { reason } => bail!("Run failed: {reason}"),
        RunOutcome::Completed { .. } => println!("Run already completed"),
    }
    Ok(())
}

async fn cmd_questions(store: Arc<dyn CheckpointStore>, run_id: Uuid) -> Result<()> {
    let run = offline(store).load(run_id).await?;
    match pending_questions(&run) {
        Some(questions) => print!("{}", render_questions(questions)),
        None => {
            println!("Run {} is {}, not awaiting approval", run.run_id, run.phase.as_str());
            if run.questions_approved() {
                print!("{}", render_questions(&run.questions));
            }
        }
    }
    Ok(())
}

async fn cmd_approve(
    store: Arc<dyn CheckpointStore>,
    run_id: Uuid,
    questions: Option<&Path>,
    reviewer: String,
) -> Result<()> {
    let orchestrator = offline(store);
    let mut run = orchestrator.load(run_id).await?;
    let action = match questions {
        Some(path) => ApprovalAction::Edit {
            reviewer,
            questions: read_questions(path)?,
        },
        None => ApprovalAction::Approve { reviewer },
    };

    let record = orchestrator
        .approve(&mut run, action)
        .await
        .context("Approval failed")?;
    println!(
        "Approved {} questions ({:?}) by {}",
        record.question_count, record.kind, record.reviewer
    );
    println!("Questions digest: {}", record.questions_digest);
    Ok(())
}

async fn cmd_run(store: Arc<dyn CheckpointStore>, run_id: Uuid, sources: &Path) -> Result<()> {
    let orchestrator =
        orchestrator(store, load_sources(Some(sources))?)?.with_cancel(cancel_on_ctrl_c());
    let mut run = orchestrator.load(run_id).await?;

    let outcome = orchestrator.drive(&mut run).await;
    print!("{}", render_status(&run));
    match outcome.context("Run stopped")? {
        RunOutcome::AwaitingApproval { .. } => {
            println!("Questions need approval: draftsman approve --run {}", run.run_id);
        }
        RunOutcome::Completed { flagged } if flagged.is_empty() => {
            println!("Run complete; every section passed");
        }
        RunOutcome::Completed { flagged } => {
            println!("Run complete with {} flagged sections: {:?}", flagged.len(), flagged);
        }
        RunOutcome::Failed { reason } => bail!("Run failed: {reason}"),
    }
    Ok(())
}

async fn cmd_status(store: Arc<dyn CheckpointStore>, run_id: Uuid) -> Result<()> {
    let run = offline(store).load(run_id).await?;
    print!("{}", render_status(&run));
    Ok(())
}

async fn cmd_export(
    store: Arc<dyn CheckpointStore>,
    run_id: Uuid,
    output: &Path,
    artifacts_dir: Option<&Path>,
) -> Result<()> {
    let run = offline(store).load(run_id).await?;
    let Some(bundle) = run.export.as_ref() else {
        bail!(
            "Run {} has no export yet (phase {})",
            run.run_id,
            run.phase.as_str()
        );
    };

    std::fs::write(output, render_markdown(bundle))
        .with_context(|| format!("Failed to write to {:?}", output))?;
    println!("Document written to {:?}", output);
    if bundle.is_partial() {
        println!("Warning: partial delivery, some sections are flagged");
    }

    if let Some(dir) = artifacts_dir {
        let paths = write_export_artifact(bundle, dir)
            .with_context(|| format!("Failed to write export artifact under {:?}", dir))?;
        println!("Artifact: {:?} (digest {:?})", paths.json, paths.digest);
    }
    Ok(())
}

async fn cmd_delete(store: Arc<dyn CheckpointStore>, run_id: Uuid) -> Result<()> {
    let removed = offline(store).delete(run_id).await?;
    println!("Deleted run {run_id} ({removed} checkpoints)");
    Ok(())
}

async fn cmd_list(store: Arc<dyn CheckpointStore>) -> Result<()> {
    let runs = offline(store).list().await?;
    if runs.is_empty() {
        println!("No runs");
        return Ok(());
    }
    for entry in runs {
        println!(
            "{}  seq {:>4}  {:<28}  {}",
            entry.run_id.0,
            entry.latest_seq,
            entry.latest_label,
            entry.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render_questions(questions: &[ResearchQuestion]) -> String {
    let mut out = String::new();
    for q in questions {
        let targets = if q.target_sections.is_empty() {
            "all sections".to_string()
        } else {
            let ids: Vec<String> = q.target_sections.iter().map(|i| i.to_string()).collect();
            format!("sections {}", ids.join(", "))
        };
        out.push_str(&format!("Q{}. {} [{}]\n", q.id, q.text, targets));
    }
    out
}

fn render_status(run: &Run) -> String {
    let mut out = format!(
        "Run {}\nTopic: {}\nPhase: {}\n",
        run.run_id,
        run.topic,
        run.phase.as_str()
    );
    if let Some(approval) = &run.approval {
        out.push_str(&format!(
            "Approved by {} at {}\n",
            approval.reviewer,
            approval.approved_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    if let Some(failure) = &run.failure {
        out.push_str(&format!(
            "Failed in {}: {}\n",
            failure.phase.as_str(),
            failure.reason
        ));
    }

    out.push_str("\nSections:\n");
    for section in &run.sections {
        let marker = match section.state {
            SectionState::Passed => "ok",
            SectionState::FailedExhausted => "FLAGGED",
            _ => "..",
        };
        out.push_str(&format!(
            "  [{}] {:<2} {:<30} {:<16} attempts {}/{}\n",
            marker,
            section.index,
            section.name,
            section.state.as_str(),
            section.attempt_count(),
            run.config.max_retries + 1
        ));
        for summary in section.retry_history().iter().filter(|s| !s.passed) {
            let categories: Vec<String> = summary
                .failure_categories
                .iter()
                .map(|c| c.to_string())
                .collect();
            out.push_str(&format!(
                "       attempt {}: {}\n",
                summary.seq + 1,
                categories.join(", ")
            ));
        }
    }
    out
}

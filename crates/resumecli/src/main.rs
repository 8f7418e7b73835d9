// crates/resumecli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use resumecore::{
    Chunk, ChunkIndex, FileRunStore, IndexedChunk, RunStatus, RunStore, ScriptedModel,
    ScriptedTurn, ToolCallRequest,
};
use resumeruntime::{RunManager, RunRef, RuntimeConfig};
use resumetools::{ChatWorkflow, FlightTools, HttpFetcher, ToolConfig, CHAT_WORKFLOW};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "resume")]
#[command(about = "Resumable chat runs from the command line", long_about = None)]
struct Cli {
    /// Directory holding run state
    #[arg(long, global = true, default_value = ".resume")]
    state_dir: PathBuf,

    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat run against a scripted model
    Run {
        /// Path to the model script (JSON list of turns)
        #[arg(short, long)]
        script: PathBuf,

        /// User message
        #[arg(short, long)]
        message: String,
    },

    /// Answer a pending booking approval and continue the run
    Approve {
        /// Hook token (the approval's tool-call id)
        #[arg(short, long)]
        token: String,

        #[arg(long, conflicts_with = "rejected", required_unless_present = "rejected")]
        approved: bool,

        #[arg(long)]
        rejected: bool,

        #[arg(short, long)]
        comment: Option<String>,

        #[arg(short, long)]
        script: PathBuf,
    },

    /// Re-drive a stored run that was interrupted
    Resume {
        #[arg(short, long)]
        run_id: Uuid,

        #[arg(short, long)]
        script: PathBuf,
    },

    /// Print a run's stored output
    Stream {
        #[arg(short, long)]
        run_id: Uuid,

        /// First chunk index to print
        #[arg(short, long, default_value_t = 0)]
        from: ChunkIndex,
    },

    /// Write an example model script
    Init {
        #[arg(short, long, default_value = "script.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    use tracing_subscriber::{fmt, EnvFilter};
    let default_level = if cli.verbose { "debug" } else { "warn" };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { script, message } => run_chat(&cli.state_dir, &script, message).await?,
        Commands::Approve {
            token,
            approved,
            rejected,
            comment,
            script,
        } => {
            let approved = approved && !rejected;
            approve(&cli.state_dir, &script, &token, approved, comment).await?
        }
        Commands::Resume { run_id, script } => resume_run(&cli.state_dir, &script, run_id).await?,
        Commands::Stream { run_id, from } => print_stored(&cli.state_dir, run_id, from).await?,
        Commands::Init { output } => create_example_script(&output)?,
    }

    Ok(())
}

fn load_script(path: &Path) -> Result<Vec<ScriptedTurn>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    let turns: Vec<ScriptedTurn> = serde_json::from_str(&json)
        .with_context(|| format!("parsing script {}", path.display()))?;
    Ok(turns)
}

async fn manager(state_dir: &Path, script: &Path) -> Result<RunManager> {
    let store: Arc<dyn RunStore> = Arc::new(FileRunStore::open(state_dir).await?);
    let model = Arc::new(ScriptedModel::new(load_script(script)?));
    let tools = FlightTools::new(ToolConfig::default(), Arc::new(HttpFetcher::new()));

    let config = RuntimeConfig::default();
    let runs = RunManager::new(store, config.clone());
    runs.register(Arc::new(
        ChatWorkflow::new(model, tools).with_max_steps(config.max_agent_steps),
    ))
    .await;
    Ok(runs)
}

async fn run_chat(state_dir: &Path, script: &Path, message: String) -> Result<()> {
    let runs = manager(state_dir, script).await?;
    let input = serde_json::json!({
        "messages": [{ "role": "user", "content": message }]
    });

    let started = runs.start(CHAT_WORKFLOW, input, None).await?;
    println!("🚀 Run {}", started.id);
    println!();

    let run = runs.get(started.id).await?;
    follow(&run, 0).await;
    report(&run).await
}

async fn approve(
    state_dir: &Path,
    script: &Path,
    token: &str,
    approved: bool,
    comment: Option<String>,
) -> Result<()> {
    let runs = manager(state_dir, script).await?;
    runs.recover().await?;

    let Some(run_id) = runs.hooks().owner_of(token).await else {
        bail!("No pending approval with token {}", token);
    };
    let run = runs.get(run_id).await?;
    let seen = run.channel().len().await;

    let mut payload = serde_json::json!({ "approved": approved });
    if let Some(comment) = comment {
        payload["comment"] = comment.into();
    }
    runs.resolve_hook(token, payload).await?;
    println!("{} {}", if approved { "👍 Approved" } else { "👎 Rejected" }, token);
    println!();

    follow(&run, seen).await;
    report(&run).await
}

async fn resume_run(state_dir: &Path, script: &Path, run_id: Uuid) -> Result<()> {
    let runs = manager(state_dir, script).await?;
    let run = runs.get(run_id).await?;
    let seen = run.channel().len().await;

    if !runs.resume(run_id).await? {
        println!("ℹ️  Run {} is {}, nothing to resume", run_id, run.status().await);
        return Ok(());
    }
    println!("🔁 Re-driving run {}", run_id);
    println!();

    follow(&run, seen).await;
    report(&run).await
}

async fn print_stored(state_dir: &Path, run_id: Uuid, from: ChunkIndex) -> Result<()> {
    let store = FileRunStore::open(state_dir).await?;
    let Some(record) = store.load_run(run_id).await? else {
        bail!("Run {} not found in {}", run_id, state_dir.display());
    };

    for chunk in store.load_chunks(run_id).await? {
        if chunk.index >= from {
            print_chunk(&chunk);
        }
    }
    println!();
    println!("📊 Status: {}", record.status);
    Ok(())
}

/// Print chunks from `from` until the run settles. Returns the next unseen index.
async fn follow(run: &RunRef, from: ChunkIndex) -> ChunkIndex {
    let mut chunks = run.readable(from);
    let mut next = from;
    let settled = run.settled();
    tokio::pin!(settled);

    loop {
        tokio::select! {
            biased;
            chunk = chunks.next() => match chunk {
                Some(chunk) => {
                    print_chunk(&chunk);
                    next = chunk.index + 1;
                }
                None => return next,
            },
            _ = &mut settled => break,
        }
    }

    // Whatever landed between the last read and settling.
    for chunk in run.channel().snapshot(next).await {
        print_chunk(&chunk);
        next = chunk.index + 1;
    }
    next
}

fn print_chunk(chunk: &IndexedChunk) {
    match &chunk.chunk {
        Chunk::TextDelta { delta } => {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        }
        Chunk::ToolCallStart {
            tool_call_id,
            tool_name,
            input,
        } => println!("\n  ⚡ {} [{}] {}", tool_name, tool_call_id, input),
        Chunk::ToolResult {
            output, is_error, ..
        } => {
            if *is_error {
                println!("  ❌ {}", output);
            } else {
                println!("  ✅ {}", output);
            }
        }
        Chunk::StreamEnd { error: None } => println!("\n✨ Stream finished"),
        Chunk::StreamEnd { error: Some(e) } => println!("\n💥 Stream failed: {}", e),
    }
}

async fn report(run: &RunRef) -> Result<()> {
    let summary = run.summary().await;
    println!();
    println!("📊 Run Summary:");
    println!("   Run ID: {}", summary.id);
    println!("   Status: {}", summary.status);
    println!("   Steps: {}", summary.steps);
    println!("   Chunks: {}", summary.chunks);

    match summary.status {
        RunStatus::Suspended => {
            if let Some(token) = summary.pending_hook {
                println!();
                println!("⏸️  Waiting for approval. Continue with:");
                println!("  resume approve --token {} --approved --script <script>", token);
            }
        }
        RunStatus::Failed => {
            bail!(
                "run {} failed: {}",
                summary.id,
                summary.error.unwrap_or_default()
            );
        }
        RunStatus::Running | RunStatus::Completed => {}
    }
    Ok(())
}

fn example_script() -> Vec<ScriptedTurn> {
    let call = |id: &str, name: &str, input: serde_json::Value| ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        input,
    };

    vec![
        ScriptedTurn {
            text: "Let me search for flights.".into(),
            tool_calls: vec![call(
                "call-search-1",
                "searchFlights",
                serde_json::json!({"from": "SFO", "to": "JFK", "date": "2025-03-01"}),
            )],
        },
        ScriptedTurn {
            text: "BotAir FL-202 is the cheapest at $180. I need approval to book it.".into(),
            tool_calls: vec![call(
                "call-approval-1",
                "bookingApproval",
                serde_json::json!({"flightNumber": "FL-202", "passengerName": "Ada", "price": 180}),
            )],
        },
        ScriptedTurn {
            text: "Booking now.".into(),
            tool_calls: vec![call(
                "call-book-1",
                "bookFlight",
                serde_json::json!({"flightId": "FL-202", "passengerName": "Ada"}),
            )],
        },
        ScriptedTurn {
            text: "Your flight is booked. Have a good trip!".into(),
            tool_calls: vec![],
        },
    ]
}

fn create_example_script(output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&example_script())?;
    std::fs::write(output, json)?;

    println!("✨ Created example script: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  resume run --script {} --message 'Book me a flight from SFO to JFK'",
        output.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_approve_flags() {
        let cli = Cli::try_parse_from([
            "resume", "approve", "--token", "call-1", "--rejected", "--comment", "too late",
            "--script", "s.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Approve {
                token,
                approved,
                rejected,
                comment,
                ..
            } => {
                assert_eq!(token, "call-1");
                assert!(!approved);
                assert!(rejected);
                assert_eq!(comment.as_deref(), Some("too late"));
            }
            _ => panic!("expected approve"),
        }

        assert!(Cli::try_parse_from(["resume", "approve", "--token", "t", "--script", "s.json"]).is_err());
        assert!(Cli::try_parse_from([
            "resume", "approve", "--token", "t", "--approved", "--rejected", "--script", "s.json"
        ])
        .is_err());
    }

    #[test]
    fn example_script_round_trips() {
        let json = serde_json::to_string(&example_script()).unwrap();
        let turns: Vec<ScriptedTurn> = serde_json::from_str(&json).unwrap();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[1].tool_calls[0].name, "bookingApproval");
    }

    #[tokio::test]
    async fn run_then_approve_through_the_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("script.json");
        create_example_script(&script).unwrap();
        let state = dir.path().join("state");

        run_chat(&state, &script, "Book SFO to JFK".into()).await.unwrap();
        approve(&state, &script, "call-approval-1", true, None).await.unwrap();

        let store = FileRunStore::open(&state).await.unwrap();
        let ids = store.list_runs().await.unwrap();
        assert_eq!(ids.len(), 1);
        let record = store.load_run(ids[0]).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
    }
}

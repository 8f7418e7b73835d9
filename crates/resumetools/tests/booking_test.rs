// crates/resumetools/tests/booking_test.rs

use async_trait::async_trait;
use futures::StreamExt;
use resumecore::{
    Chunk, FileRunStore, IndexedChunk, MemoryRunStore, RunError, RunStatus, RunStore,
    ScriptedModel, ScriptedTurn, ToolCallRequest,
};
use resumeruntime::{RunManager, RuntimeConfig};
use resumetools::{ChatWorkflow, Fetcher, FlightTools, ToolConfig, CHAT_WORKFLOW};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_test_writer()
        .try_init();
}

/// Serves a fixed document and counts requests.
struct StaticFetcher {
    body: serde_json::Value,
    requests: AtomicUsize,
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, RunError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if url.contains("broken") {
            return Err(RunError::step_failure("fetchData", "HTTP request failed: refused"));
        }
        Ok(self.body.clone())
    }
}

fn tool_call(id: &str, name: &str, input: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.into(),
        name: name.into(),
        input,
    }
}

fn booking_script() -> Vec<ScriptedTurn> {
    vec![
        ScriptedTurn {
            text: "Searching now.".into(),
            tool_calls: vec![tool_call(
                "call-search",
                "searchFlights",
                json!({"from": "SFO", "to": "JFK", "date": "2025-03-01"}),
            )],
        },
        ScriptedTurn {
            text: "BotAir is cheapest. Asking for approval.".into(),
            tool_calls: vec![tool_call(
                "call-approve",
                "bookingApproval",
                json!({"flightNumber": "FL-202", "passengerName": "Ada", "price": 180}),
            )],
        },
        ScriptedTurn {
            text: "Approved, booking.".into(),
            tool_calls: vec![tool_call(
                "call-book",
                "bookFlight",
                json!({"flightId": "FL-202", "passengerName": "Ada"}),
            )],
        },
        ScriptedTurn {
            text: "You're booked!".into(),
            tool_calls: vec![],
        },
    ]
}

struct Assistant {
    runs: RunManager,
    model: Arc<ScriptedModel>,
    fetcher: Arc<StaticFetcher>,
}

async fn assistant(store: Arc<dyn RunStore>, script: Vec<ScriptedTurn>) -> Assistant {
    let model = Arc::new(ScriptedModel::new(script));
    let fetcher = Arc::new(StaticFetcher {
        body: json!({"temperature": 21}),
        requests: AtomicUsize::new(0),
    });
    let config = ToolConfig {
        search_latency: Duration::ZERO,
        fetch_delay: Duration::from_millis(50),
    };
    let tools = FlightTools::new(config, fetcher.clone());
    let runs = RunManager::new(store, RuntimeConfig::default());
    runs.register(Arc::new(ChatWorkflow::new(model.clone(), tools))).await;
    Assistant {
        runs,
        model,
        fetcher,
    }
}

fn chat_input(text: &str) -> serde_json::Value {
    json!({ "messages": [{ "role": "user", "content": text }] })
}

fn tool_results<'a>(chunks: &'a [IndexedChunk], id: &str) -> Vec<&'a IndexedChunk> {
    chunks
        .iter()
        .filter(|c| matches!(&c.chunk, Chunk::ToolResult { tool_call_id, .. } if tool_call_id == id))
        .collect()
}

#[tokio::test]
async fn test_booking_waits_for_approval_then_completes() {
    init_tracing();
    let app = assistant(Arc::new(MemoryRunStore::new()), booking_script()).await;

    let started = app
        .runs
        .start(CHAT_WORKFLOW, chat_input("Book me SFO to JFK"), Some("user-1".into()))
        .await
        .unwrap();
    let run = app.runs.get(started.id).await.unwrap();
    assert_eq!(run.settled().await.status, RunStatus::Suspended);

    let parked = run.channel().snapshot(0).await;
    assert!(parked.iter().any(|c| matches!(
        &c.chunk,
        Chunk::ToolCallStart { tool_call_id, tool_name, .. }
            if tool_call_id == "call-approve" && tool_name == "bookingApproval"
    )));
    assert!(tool_results(&parked, "call-approve").is_empty());

    let summary = app.runs.status(started.id).await.unwrap();
    assert_eq!(summary.pending_hook.as_deref(), Some("call-approve"));
    assert_eq!(summary.owner.as_deref(), Some("user-1"));

    app.runs
        .resolve_hook("call-approve", json!({"approved": true, "comment": "aisle seat"}))
        .await
        .unwrap();

    // The original reader keeps receiving after the resume.
    let chunks: Vec<IndexedChunk> = started.readable.collect().await;
    assert_eq!(run.status().await, RunStatus::Completed);

    let approvals = tool_results(&chunks, "call-approve");
    assert_eq!(approvals.len(), 1);
    assert!(matches!(
        &approvals[0].chunk,
        Chunk::ToolResult { output, is_error: false, .. }
            if output == "Booking approved for Ada on flight FL-202 - Note: aisle seat"
    ));

    let booking = tool_results(&chunks, "call-book");
    let Chunk::ToolResult { output, .. } = &booking[0].chunk else {
        panic!("expected a tool result");
    };
    let ticket: serde_json::Value = serde_json::from_str(output).unwrap();
    assert_eq!(ticket["status"], "confirmed");
    assert!(ticket["ticketId"].as_str().unwrap().starts_with("TKT-"));

    assert!(chunks.iter().enumerate().all(|(i, c)| c.index == i as u64));
    assert_eq!(chunks.last().unwrap().chunk, Chunk::StreamEnd { error: None });
    assert_eq!(app.model.calls(), 4);
    let record = run.record().await;
    assert_eq!(record.output.unwrap()["reply"], "You're booked!");
}

#[tokio::test]
async fn test_rejection_reason_reaches_the_model() {
    let app = assistant(Arc::new(MemoryRunStore::new()), booking_script()).await;
    let started = app
        .runs
        .start(CHAT_WORKFLOW, chat_input("Book it"), None)
        .await
        .unwrap();
    let run = app.runs.get(started.id).await.unwrap();
    run.settled().await;

    app.runs
        .resolve_hook("call-approve", json!({"approved": false}))
        .await
        .unwrap();
    assert!(matches!(
        app.runs.resolve_hook("call-approve", json!({"approved": true})).await,
        Err(RunError::AlreadyResolved(_))
    ));
    assert_eq!(run.settled().await.status, RunStatus::Completed);

    let chunks = run.channel().snapshot(0).await;
    assert!(matches!(
        &tool_results(&chunks, "call-approve")[0].chunk,
        Chunk::ToolResult { output, .. } if output == "Booking rejected: No reason provided"
    ));
}

#[tokio::test]
async fn test_reconnecting_reader_sees_suffix_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn RunStore> = Arc::new(FileRunStore::open(dir.path()).await.unwrap());

    let first = assistant(store.clone(), booking_script()).await;
    let started = first
        .runs
        .start(CHAT_WORKFLOW, chat_input("Book me SFO to JFK"), None)
        .await
        .unwrap();
    first.runs.get(started.id).await.unwrap().settled().await;
    let before = first.runs.get(started.id).await.unwrap().channel().snapshot(0).await;
    assert_eq!(first.model.calls(), 2);

    // Restart: reopen the store and resolve through a fresh manager.
    let store: Arc<dyn RunStore> = Arc::new(FileRunStore::open(dir.path()).await.unwrap());
    let second = assistant(store, booking_script()).await;
    second.runs.recover().await.unwrap();
    second
        .runs
        .resolve_hook("call-approve", json!({"approved": true}))
        .await
        .unwrap();

    let run = second.runs.get(started.id).await.unwrap();
    assert_eq!(run.settled().await.status, RunStatus::Completed);
    // Only the two turns after approval called the model again.
    assert_eq!(second.model.calls(), 2);

    let resume_at = before.len() as u64 - 1;
    let tail: Vec<IndexedChunk> = run.readable(resume_at).collect().await;
    let full: Vec<IndexedChunk> = run.readable(0).collect().await;
    assert_eq!(&full[..before.len()], &before[..]);
    assert_eq!(&full[resume_at as usize..], &tail[..]);
    assert_eq!(tool_results(&full, "call-search").len(), 1);
    assert_eq!(tool_results(&full, "call-approve").len(), 1);
}

#[tokio::test]
async fn test_fetch_data_fetches_once_and_sleeps_durably() {
    let script = vec![
        ScriptedTurn {
            text: String::new(),
            tool_calls: vec![
                tool_call("call-fetch", "fetchData", json!({"url": "https://example.test/data"})),
                tool_call("call-weather", "getWeather", json!({"city": "Oslo"})),
            ],
        },
        ScriptedTurn {
            text: "Done.".into(),
            tool_calls: vec![],
        },
    ];
    let app = assistant(Arc::new(MemoryRunStore::new()), script).await;
    let started = app.runs.start(CHAT_WORKFLOW, chat_input("fetch"), None).await.unwrap();
    let chunks: Vec<IndexedChunk> = started.readable.collect().await;

    assert_eq!(app.fetcher.requests.load(Ordering::SeqCst), 1);
    assert!(matches!(
        &tool_results(&chunks, "call-fetch")[0].chunk,
        Chunk::ToolResult { output, .. } if output == "{\"temperature\":21}"
    ));
    assert!(matches!(
        &tool_results(&chunks, "call-weather")[0].chunk,
        Chunk::ToolResult { output, .. } if output == "Weather in Oslo is currently 72°F and sunny."
    ));

    let steps: Vec<String> = app
        .runs
        .get(started.id)
        .await
        .unwrap()
        .record()
        .await
        .steps
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(
        steps,
        vec!["model.turn", "fetchData", "sleep", "getWeather", "model.turn"]
    );
}

#[tokio::test]
async fn test_bad_tool_calls_degrade_to_error_results() {
    let script = vec![
        ScriptedTurn {
            text: String::new(),
            tool_calls: vec![
                tool_call("call-1", "teleport", json!({})),
                tool_call("call-2", "getWeather", json!({"town": "Oslo"})),
                tool_call("call-3", "fetchData", json!({"url": "https://broken.test"})),
            ],
        },
        ScriptedTurn {
            text: "Sorry about that.".into(),
            tool_calls: vec![],
        },
    ];
    let app = assistant(Arc::new(MemoryRunStore::new()), script).await;
    let started = app.runs.start(CHAT_WORKFLOW, chat_input("?"), None).await.unwrap();
    let chunks: Vec<IndexedChunk> = started.readable.collect().await;

    for id in ["call-1", "call-2", "call-3"] {
        let results = tool_results(&chunks, id);
        assert_eq!(results.len(), 1, "one result for {}", id);
        assert!(matches!(&results[0].chunk, Chunk::ToolResult { is_error: true, .. }));
    }
    assert!(matches!(
        &tool_results(&chunks, "call-1")[0].chunk,
        Chunk::ToolResult { output, .. } if output == "Unknown tool: teleport"
    ));
    let status = app.runs.status(started.id).await.unwrap().status;
    assert_eq!(status, RunStatus::Completed);
}

#[tokio::test]
async fn test_failed_fetch_then_approval_completes_without_refetching() {
    let script = vec![
        ScriptedTurn {
            text: String::new(),
            tool_calls: vec![tool_call("call-fetch", "fetchData", json!({"url": "https://broken.test"}))],
        },
        ScriptedTurn {
            text: "That failed, asking before booking.".into(),
            tool_calls: vec![tool_call(
                "call-approve",
                "bookingApproval",
                json!({"flightNumber": "FL-101", "passengerName": "Ada", "price": 200}),
            )],
        },
        ScriptedTurn {
            text: "Noted.".into(),
            tool_calls: vec![],
        },
    ];
    let app = assistant(Arc::new(MemoryRunStore::new()), script).await;
    let started = app.runs.start(CHAT_WORKFLOW, chat_input("fetch then book"), None).await.unwrap();
    let run = app.runs.get(started.id).await.unwrap();
    assert_eq!(run.settled().await.status, RunStatus::Suspended);

    app.runs
        .resolve_hook("call-approve", json!({"approved": true}))
        .await
        .unwrap();
    assert_eq!(run.settled().await.status, RunStatus::Completed);
    assert_eq!(app.fetcher.requests.load(Ordering::SeqCst), 1);

    let chunks: Vec<IndexedChunk> = run.readable(0).collect().await;
    assert_eq!(tool_results(&chunks, "call-fetch").len(), 1);
    assert_eq!(tool_results(&chunks, "call-approve").len(), 1);
    assert_eq!(chunks.last().unwrap().chunk, Chunk::StreamEnd { error: None });
}

#[tokio::test]
async fn test_second_approval_after_restart_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn RunStore> = Arc::new(FileRunStore::open(dir.path()).await.unwrap());
    let first = assistant(store, booking_script()).await;
    let started = first
        .runs
        .start(CHAT_WORKFLOW, chat_input("Book me SFO to JFK"), None)
        .await
        .unwrap();
    first.runs.get(started.id).await.unwrap().settled().await;
    first
        .runs
        .resolve_hook("call-approve", json!({"approved": true}))
        .await
        .unwrap();
    let run = first.runs.get(started.id).await.unwrap();
    assert_eq!(run.settled().await.status, RunStatus::Completed);

    let store: Arc<dyn RunStore> = Arc::new(FileRunStore::open(dir.path()).await.unwrap());
    let second = assistant(store, booking_script()).await;
    second.runs.recover().await.unwrap();
    assert!(matches!(
        second.runs.resolve_hook("call-approve", json!({"approved": false})).await,
        Err(RunError::AlreadyResolved(token)) if token == "call-approve"
    ));
}

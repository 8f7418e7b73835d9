mod config;

use actix_cors::Cors;
use actix_web::http::StatusCode;
use actix_web::{get, post, web, App, HttpRequest, HttpResponse, HttpServer, ResponseError};
use config::ServerConfig;
use futures::StreamExt;
use resumecore::{
    ChunkIndex, FileRunStore, IndexedChunk, LanguageModel, MemoryRunStore, RunError, RunStore,
};
use resumeruntime::{RunManager, RuntimeConfig};
use resumetools::{
    ChatCompletionsModel, ChatInput, ChatWorkflow, FlightTools, HttpFetcher, ToolConfig,
    CHAT_WORKFLOW,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

const RUN_ID_HEADER: &str = "x-workflow-run-id";
const USER_ID_HEADER: &str = "x-user-id";

/// Application state shared across handlers
struct AppState {
    runs: RunManager,
}

/// Query of the stream endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamQuery {
    start_index: Option<ChunkIndex>,
}

/// Request body for resolving a booking approval.
///
/// Everything except `toolCallId` is the hook payload and is checked against
/// the hook's schema.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveRequest {
    tool_call_id: String,
    #[serde(flatten)]
    payload: serde_json::Map<String, serde_json::Value>,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct ApiError(RunError);

impl From<RunError> for ApiError {
    fn from(e: RunError) -> Self {
        Self(e)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            RunError::UnknownHook(_) | RunError::RunNotFound(_) | RunError::UnknownWorkflow(_) => {
                StatusCode::NOT_FOUND
            }
            RunError::AlreadyResolved(_) => StatusCode::CONFLICT,
            RunError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RunError::Serialization(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.0.to_string(),
        })
    }
}

/// Render chunks as newline-delimited JSON for a streaming body.
fn ndjson<S>(chunks: S) -> impl futures::Stream<Item = Result<web::Bytes, actix_web::Error>>
where
    S: futures::Stream<Item = IndexedChunk>,
{
    chunks.map(|chunk| -> Result<web::Bytes, actix_web::Error> {
        let mut line = serde_json::to_vec(&chunk)?;
        line.push(b'\n');
        Ok(web::Bytes::from(line))
    })
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "resumeserver"
    }))
}

/// Start a chat run and stream its output from the first chunk
#[post("/api/chat")]
async fn start_chat(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<ChatInput>,
) -> Result<HttpResponse, ApiError> {
    let owner = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let input = serde_json::to_value(body.into_inner()).map_err(RunError::from)?;

    let started = data.runs.start(CHAT_WORKFLOW, input, owner).await?;
    info!("Chat run {} started", started.id);

    Ok(HttpResponse::Ok()
        .content_type("application/x-ndjson")
        .insert_header((RUN_ID_HEADER, started.id.to_string()))
        .streaming(ndjson(started.readable)))
}

/// Reattach to a run's output
#[get("/api/chat/{id}/stream")]
async fn stream_chat(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<StreamQuery>,
) -> Result<HttpResponse, ApiError> {
    let run = data.runs.get(path.into_inner()).await?;
    let from = query.start_index.unwrap_or(0);
    info!("Reader attached to run {} at {}", run.id(), from);

    Ok(HttpResponse::Ok()
        .content_type("application/x-ndjson")
        .insert_header((RUN_ID_HEADER, run.id().to_string()))
        .streaming(ndjson(run.readable(from))))
}

/// Run status
#[get("/api/chat/{id}")]
async fn chat_status(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let summary = data.runs.status(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// Resolve a pending booking approval
#[post("/api/approve-booking")]
async fn approve_booking(
    data: web::Data<AppState>,
    body: web::Json<ApproveRequest>,
) -> Result<HttpResponse, ApiError> {
    let ApproveRequest {
        tool_call_id,
        payload,
    } = body.into_inner();

    let run_id = data
        .runs
        .resolve_hook(&tool_call_id, serde_json::Value::Object(payload))
        .await
        .map_err(|e| {
            error!("Approval {} rejected: {}", tool_call_id, e);
            e
        })?;
    info!("Approval {} delivered to run {}", tool_call_id, run_id);

    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

/// WebSocket endpoint pushing a run's chunks
#[get("/api/chat/{id}/ws")]
async fn chat_websocket(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<StreamQuery>,
) -> Result<HttpResponse, actix_web::Error> {
    let run = data.runs.get(path.into_inner()).await.map_err(ApiError::from)?;
    let mut chunks = run.readable(query.start_index.unwrap_or(0));
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client attached to run {}", run.id());

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                next = chunks.next() => {
                    match next {
                        Some(chunk) => {
                            if let Ok(json) = serde_json::to_string(&chunk) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        None => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        actix_ws::Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        actix_ws::Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client detached");
        let _ = session.close(None).await;
    });

    Ok(res)
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(start_chat)
        .service(stream_chat)
        .service(chat_websocket)
        .service(chat_status)
        .service(approve_booking);
}

fn chat_workflow(
    model: Arc<dyn LanguageModel>,
    config: &ServerConfig,
    runtime: &RuntimeConfig,
) -> ChatWorkflow {
    let tools = FlightTools::new(ToolConfig::default(), Arc::new(HttpFetcher::new()));
    let workflow = ChatWorkflow::new(model, tools).with_max_steps(runtime.max_agent_steps);
    match &config.system_prompt {
        Some(prompt) => workflow.with_system(prompt.clone()),
        None => workflow,
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting resumable chat server");

    let config = ServerConfig::from_env();
    let store: Arc<dyn RunStore> = match &config.state_dir {
        Some(dir) => {
            info!("Persisting runs under {}", dir.display());
            Arc::new(FileRunStore::open(dir.clone()).await?)
        }
        None => Arc::new(MemoryRunStore::new()),
    };

    let model: Arc<dyn LanguageModel> = Arc::new(ChatCompletionsModel::new(
        config.model_base_url.clone(),
        config.model_api_key.clone(),
        config.model_name.clone(),
    ));
    let runtime = RuntimeConfig::default();
    let runs = RunManager::new(store, runtime.clone());
    runs.register(Arc::new(chat_workflow(model, &config, &runtime)))
        .await;

    let report = runs.recover().await?;
    info!(
        "✅ Runtime ready ({} resumed, {} awaiting approval)",
        report.resumed, report.suspended
    );

    let shutdown = CancellationToken::new();
    let pruner = {
        let runs = runs.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { runs.run_pruner(shutdown).await })
    };

    let app_state = web::Data::new(AppState { runs });

    info!("🌐 Server starting on http://{}", config.bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_headers([RUN_ID_HEADER])
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes)
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    shutdown.cancel();
    let _ = pruner.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;
    use resumecore::{RunStatus, ScriptedModel, ScriptedTurn, ToolCallRequest};

    fn approval_script() -> Vec<ScriptedTurn> {
        vec![
            ScriptedTurn {
                text: "Requesting approval.".into(),
                tool_calls: vec![ToolCallRequest {
                    id: "call-approve".into(),
                    name: "bookingApproval".into(),
                    input: serde_json::json!({
                        "flightNumber": "FL-101",
                        "passengerName": "Lin",
                        "price": 250
                    }),
                }],
            },
            ScriptedTurn {
                text: "All set.".into(),
                tool_calls: vec![],
            },
        ]
    }

    async fn state(script: Vec<ScriptedTurn>) -> web::Data<AppState> {
        let runs = RunManager::new(Arc::new(MemoryRunStore::new()), RuntimeConfig::default());
        let tools = FlightTools::new(ToolConfig::instant(), Arc::new(HttpFetcher::new()));
        let model = Arc::new(ScriptedModel::new(script));
        runs.register(Arc::new(ChatWorkflow::new(model, tools))).await;
        web::Data::new(AppState { runs })
    }

    fn chat_body() -> serde_json::Value {
        serde_json::json!({ "messages": [{ "role": "user", "content": "Book FL-101 for Lin" }] })
    }

    fn parse_lines(body: &[u8]) -> Vec<IndexedChunk> {
        body.split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect()
    }

    #[actix_web::test]
    async fn test_health() {
        let app = test::init_service(App::new().configure(routes)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_chat_streams_ndjson_until_the_end() {
        let data = state(vec![ScriptedTurn {
            text: "Hello there".into(),
            tool_calls: vec![],
        }])
        .await;
        let app = test::init_service(App::new().app_data(data.clone()).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .insert_header((USER_ID_HEADER, "user-9"))
            .set_json(chat_body())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let run_id: Uuid = resp.headers().get(RUN_ID_HEADER).unwrap().to_str().unwrap().parse().unwrap();

        let chunks = parse_lines(&test::read_body(resp).await);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.last().unwrap().chunk.is_terminal());

        let summary = data.runs.status(run_id).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.owner.as_deref(), Some("user-9"));
    }

    #[actix_web::test]
    async fn test_approval_flow_and_error_codes() {
        let data = state(approval_script()).await;
        let app = test::init_service(App::new().app_data(data.clone()).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .set_json(chat_body())
            .to_request();
        let resp = test::call_service(&app, req).await;
        let run_id: Uuid = resp.headers().get(RUN_ID_HEADER).unwrap().to_str().unwrap().parse().unwrap();
        drop(resp);

        let run = data.runs.get(run_id).await.unwrap();
        assert_eq!(run.settled().await.status, RunStatus::Suspended);

        let approve = |body: serde_json::Value| {
            test::TestRequest::post()
                .uri("/api/approve-booking")
                .set_json(body)
                .to_request()
        };

        let resp = test::call_service(
            &app,
            approve(serde_json::json!({"toolCallId": "nope", "approved": true})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = test::call_service(
            &app,
            approve(serde_json::json!({"toolCallId": "call-approve", "approved": "yes"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = test::call_service(
            &app,
            approve(serde_json::json!({"toolCallId": "call-approve", "approved": true})),
        )
        .await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);

        let resp = test::call_service(
            &app,
            approve(serde_json::json!({"toolCallId": "call-approve", "approved": false})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        assert_eq!(run.settled().await.status, RunStatus::Completed);

        let req = test::TestRequest::get()
            .uri(&format!("/api/chat/{}/stream?startIndex=2", run_id))
            .to_request();
        let chunks = parse_lines(&test::read_body(test::call_service(&app, req).await).await);
        assert_eq!(chunks[0].index, 2);
        assert!(chunks.last().unwrap().chunk.is_terminal());

        let req = test::TestRequest::get()
            .uri(&format!("/api/chat/{}", run_id))
            .to_request();
        let summary: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(summary["status"], "completed");

        let req = test::TestRequest::get()
            .uri(&format!("/api/chat/{}", Uuid::new_v4()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}

pub mod adapter;
pub mod handlers;
pub mod state;
pub mod trace;

pub use state::AppState;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, MethodRouter},
    Json, Router,
};
use clap::Args;
use utoipa::OpenApi;

use crate::config::GlobalConfig;
use crate::payment::Ledger;
use handlers::mcp::{mcp_method_not_allowed, mcp_post_handler};

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "mcp402",
        version = env!("CARGO_PKG_VERSION"),
        description = "MCP tool server that charges a caller's wallet for every tool call. \
                       The wallet is read from a request header and authorized against a \
                       ledger before any tool runs.",
        license(
            name = "MIT OR Apache-2.0",
        )
    ),
    paths(
        handlers::health::health_handler,
        handlers::mcp::mcp_post_handler,
    ),
    components(
        schemas(
            handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "Health", description = "Service health and status endpoints"),
        (name = "MCP", description = "Model Context Protocol over streamable HTTP"),
    )
)]
pub struct ApiDoc;

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn mcp_route() -> MethodRouter<AppState> {
    post(mcp_post_handler)
        .get(mcp_method_not_allowed)
        .delete(mcp_method_not_allowed)
}

/// All routes over an existing state
pub fn router(state: AppState, request_limit: usize) -> Router {
    let mcp_routes = Router::new()
        .route("/mcp", mcp_route())
        .route("/mcp/", mcp_route())
        .layer(middleware::from_fn_with_state(state.clone(), adapter::wallet_scope))
        .layer(DefaultBodyLimit::max(request_limit));

    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .route("/api-docs/openapi.json", get(openapi_handler))
        .merge(mcp_routes)
        .layer(middleware::from_fn(trace::trace_request))
        .with_state(state)
}

/// Creates an instance of the axum app with all routes and state configured
pub fn create_app(config: &GlobalConfig, request_limit: usize) -> Result<(Router, AppState)> {
    let state = AppState::from_config(config)?;
    Ok((router(state.clone(), request_limit), state))
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Write process ID to the specified file
    #[arg(long, value_name = "./pid.file")]
    pub pid: Option<String>,

    /// Write readiness marker to the specified file once server is listening
    ///
    /// Useful for scripts that need to wait for the server to be fully started.
    #[arg(long)]
    pub ready_file: Option<String>,

    /// Maximum request body size (e.g., "2mb", "512kb", "1048576")
    #[arg(long, value_name = "SIZE", default_value = "2mb", value_parser = crate::prelude::parse_size)]
    pub request_limit: usize,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

pub async fn run(args: ServeArgs, config: &GlobalConfig) -> Result<()> {
    if let Some(pid_file) = &args.pid {
        std::fs::write(pid_file, std::process::id().to_string())
            .with_context(|| format!("Failed to write pid file '{}'", pid_file))?;
    }

    let (app, state) = create_app(config, args.request_limit)?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        listen = %listener.local_addr()?,
        tools = ?state.server.registry().names().collect::<Vec<_>>(),
        ledger = state.ledger().kind(),
        json_response = state.json_response,
        wallet_header = %state.wallet_header,
        "Server started"
    );

    if let Some(ready_file) = &args.ready_file {
        std::fs::write(ready_file, format!("ready {}", std::process::id()))
            .with_context(|| format!("Failed to write ready file '{}'", ready_file))?;
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::{LedgerBackend, MoneyAmount};
    use crate::wallet::WalletIdentity;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use base64::Engine;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const LIMIT: usize = 64 * 1024;

    fn money(s: &str) -> MoneyAmount {
        s.parse().unwrap()
    }

    fn wallet(s: &str) -> WalletIdentity {
        WalletIdentity::parse(s).unwrap()
    }

    fn funded(balances: &[(&str, &str)]) -> GlobalConfig {
        let mut config = GlobalConfig::default();
        for (who, amount) in balances {
            config.ledger.balances.insert(wallet(who), money(amount));
        }
        config
    }

    fn app(config: &GlobalConfig) -> (Router, AppState) {
        create_app(config, LIMIT).unwrap()
    }

    async fn balance(state: &AppState, who: &str) -> MoneyAmount {
        match state.ledger() {
            LedgerBackend::Memory(ledger) => ledger.balance(&wallet(who)).await,
            LedgerBackend::Remote(_) => panic!("tests use the in-memory ledger"),
        }
    }

    fn call(id: i64, tool: &str, a: i64, b: i64) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": tool, "arguments": {"a": a, "b": b}}
        })
    }

    fn mcp_request() -> axum::http::request::Builder {
        Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    async fn send_json(router: &Router, who: Option<&str>, message: &Value) -> (StatusCode, Value) {
        let mut builder = mcp_request();
        if let Some(who) = who {
            builder = builder.header("x-agent-wallet", who);
        }
        let request = builder.body(Body::from(message.to_string())).unwrap();
        let response = send(router, request).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn text(response: &Value) -> &str {
        response["result"]["content"][0]["text"].as_str().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = app(&GlobalConfig::default());
        let response = send(&router, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["service"][0], "mcp402");
        assert_eq!(health["tools"], 2);
        assert_eq!(health["ledger"], "memory");
        assert_eq!(health["live_contexts"], 0);
    }

    #[tokio::test]
    async fn test_openapi_document() {
        let (router, _) = app(&GlobalConfig::default());
        let response = send(&router, Request::get("/api-docs/openapi.json").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(doc["paths"]["/health"].is_object());
        assert!(doc["paths"]["/mcp"].is_object());
        assert!(doc["paths"]["/mcp"]["post"]["requestBody"]["content"]["application/json"].is_object());
    }

    #[tokio::test]
    async fn test_paid_call() {
        let (router, state) = app(&funded(&[("alice", "1.00")]));

        let (status, body) = send_json(&router, Some("alice"), &call(1, "subtract", 5, 3)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 1);
        assert_eq!(text(&body), "2");
        assert!(body["result"].get("isError").is_none());
        assert_eq!(balance(&state, "alice").await, money("0.90"));
        assert!(state.wallets.is_empty());
    }

    #[tokio::test]
    async fn test_no_wallet_is_refused() {
        let (router, state) = app(&funded(&[("alice", "1.00")]));

        let (status, body) = send_json(&router, None, &call(1, "add", 1, 2)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["isError"], true);
        assert!(text(&body).starts_with("Error [unauthenticated]"));
        assert_eq!(balance(&state, "alice").await, money("1.00"));
        assert!(state.wallets.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let (router, state) = app(&funded(&[("bob", "0.05")]));

        let (_, body) = send_json(&router, Some("bob"), &call(1, "add", 1, 2)).await;

        assert_eq!(body["result"]["_meta"]["stage"], "payment_required");
        assert_eq!(balance(&state, "bob").await, money("0.05"));
    }

    #[tokio::test]
    async fn test_x_payment_identifies_payer() {
        let payer = "0x2222222222222222222222222222222222222222";
        let (router, state) = app(&funded(&[(payer, "1")]));

        let payment = json!({"payload": {"authorization": {"from": payer}}});
        let encoded = base64::engine::general_purpose::STANDARD.encode(payment.to_string());
        let request = mcp_request()
            .header("x-payment", encoded)
            .body(Body::from(call(1, "add", 2, 2).to_string()))
            .unwrap();
        let response = send(&router, request).await;
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(text(&body), "4");
        assert_eq!(balance(&state, payer).await, money("0.90"));
    }

    #[tokio::test]
    async fn test_malformed_wallet_header_is_not_billed_to_payer() {
        let payer = "0x2222222222222222222222222222222222222222";
        let (router, state) = app(&funded(&[(payer, "1")]));

        let payment = json!({"payload": {"authorization": {"from": payer}}});
        let encoded = base64::engine::general_purpose::STANDARD.encode(payment.to_string());
        let request = mcp_request()
            .header("x-agent-wallet", "two words")
            .header("x-payment", encoded)
            .body(Body::from(call(1, "add", 2, 2).to_string()))
            .unwrap();
        let response = send(&router, request).await;
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        assert!(text(&body).starts_with("Error [unauthenticated]"));
        assert_eq!(balance(&state, payer).await, money("1"));
    }

    #[tokio::test]
    async fn test_sse_when_accepted() {
        let (router, _) = app(&funded(&[("alice", "1")]));

        let request = Request::post("/mcp")
            .header(header::ACCEPT, "application/json, text/event-stream")
            .header("x-agent-wallet", "alice")
            .body(Body::from(call(7, "add", 1, 2).to_string()))
            .unwrap();
        let response = send(&router, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();

        let data = body
            .strip_prefix("event: message\ndata: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .unwrap();
        let message: Value = serde_json::from_str(data).unwrap();
        assert_eq!(message["id"], 7);
        assert_eq!(text(&message), "3");
    }

    #[tokio::test]
    async fn test_json_response_flag_disables_sse() {
        let mut config = funded(&[("alice", "1")]);
        config.json_response = true;
        let (router, _) = app(&config);

        let request = Request::post("/mcp")
            .header(header::ACCEPT, "application/json, text/event-stream")
            .header("x-agent-wallet", "alice")
            .body(Body::from(call(1, "add", 1, 2).to_string()))
            .unwrap();
        let response = send(&router, request).await;

        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_batch_over_http() {
        let (router, state) = app(&funded(&[("alice", "1")]));
        let batch = json!([
            call(1, "add", 1, 2),
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            call(2, "subtract", 10, 4),
        ]);

        let (status, body) = send_json(&router, Some("alice"), &batch).await;

        assert_eq!(status, StatusCode::OK);
        let responses = body.as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(text(&responses[0]), "3");
        assert_eq!(text(&responses[1]), "6");
        assert_eq!(balance(&state, "alice").await, money("0.80"));
    }

    #[tokio::test]
    async fn test_notification_only_is_accepted() {
        let (router, _) = app(&GlobalConfig::default());
        let note = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});

        let (status, body) = send_json(&router, None, &note).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let (router, state) = app(&GlobalConfig::default());
        let request = mcp_request().body(Body::from("{not json")).unwrap();
        let response = send(&router, request).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], crate::mcp::protocol::PARSE_ERROR);
        assert_eq!(body["id"], Value::Null);
        assert!(state.wallets.is_empty());
    }

    #[tokio::test]
    async fn test_get_and_delete_not_allowed() {
        let (router, _) = app(&GlobalConfig::default());
        for method in ["GET", "DELETE"] {
            let request = Request::builder().method(method).uri("/mcp").body(Body::empty()).unwrap();
            let response = send(&router, request).await;
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
        }
    }

    #[tokio::test]
    async fn test_request_id_echoed() {
        let (router, _) = app(&GlobalConfig::default());

        let request = Request::get("/health").header("x-request-id", "abc123").body(Body::empty()).unwrap();
        let response = send(&router, request).await;
        assert_eq!(response.headers()["x-request-id"], "abc123");

        let response = send(&router, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(response.headers()["x-request-id"].len(), 6);
    }

    #[tokio::test]
    async fn test_initialize_over_http() {
        let (router, _) = app(&GlobalConfig::default());
        let init = json!({
            "jsonrpc": "2.0", "id": 0, "method": "initialize",
            "params": {"protocolVersion": "2025-03-26", "capabilities": {}, "clientInfo": {"name": "t", "version": "0"}}
        });

        let (_, body) = send_json(&router, None, &init).await;

        assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
        assert_eq!(body["result"]["serverInfo"]["name"], "mcp402");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_are_isolated() {
        let wallets: Vec<String> = (0..16).map(|i| format!("agent-{i}")).collect();
        let balances: Vec<(&str, &str)> = wallets
            .iter()
            .enumerate()
            .map(|(i, w)| (w.as_str(), if i % 2 == 0 { "1" } else { "0" }))
            .collect();
        let (router, state) = app(&funded(&balances));

        let mut tasks = tokio::task::JoinSet::new();
        for (i, who) in wallets.iter().cloned().enumerate() {
            let router = router.clone();
            tasks.spawn(async move {
                let (_, body) = send_json(&router, Some(&who), &call(i as i64, "add", 1, 1)).await;
                (i, body)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (i, body) = joined.unwrap();
            if i % 2 == 0 {
                assert_eq!(text(&body), "2", "agent-{i}");
            } else {
                assert_eq!(body["result"]["_meta"]["stage"], "payment_required", "agent-{i}");
            }
        }

        for (i, who) in wallets.iter().enumerate() {
            let expected = if i % 2 == 0 { "0.90" } else { "0" };
            assert_eq!(balance(&state, who).await, money(expected), "{who}");
        }
        assert!(state.wallets.is_empty());
    }

    #[tokio::test]
    async fn test_bad_config_fails_at_startup() {
        let mut config = GlobalConfig::default();
        config.pricing = config
            .pricing
            .clone()
            .with("multiply", crate::payment::ToolPricePolicy::fixed(money("1")));
        assert!(create_app(&config, LIMIT).is_err());
    }
}

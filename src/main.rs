//! Line-oriented front end: reads messages from stdin and writes the turn's
//! events to stdout as SSE frames.
//!
//! Commands: `/state`, `/reset`, `/quit`.

use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use legaldraft::agent_core::{Orchestrator, DEFAULT_SESSION_ID};
use legaldraft::inference::config::load_or_default;
use legaldraft::inference::InferenceClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    legaldraft::init_tracing();

    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let config = load_or_default(&cwd).context("failed to load configuration")?;
    let client = InferenceClient::from_config(&config).context("failed to build model client")?;
    tracing::info!(
        model = %client.model_name(),
        active = %config.active_model,
        "inference client ready"
    );

    let orchestrator = Arc::new(Orchestrator::new(Arc::new(client), config.engine.clone()));
    let mut session_id = std::env::var("LEGALDRAFT_SESSION")
        .unwrap_or_else(|_| DEFAULT_SESSION_ID.to_string());

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "/quit" | "/exit" => break,
            "/state" => {
                let state = orchestrator.state(&session_id).await?;
                let json = serde_json::to_string_pretty(&state)?;
                stdout.write_all(format!("{json}\n").as_bytes()).await?;
            }
            "/reset" => {
                session_id = orchestrator.reset(&session_id, None).await?;
                stdout
                    .write_all(format!("session reset, new id: {session_id}\n").as_bytes())
                    .await?;
            }
            message => {
                let mut events = Box::pin(orchestrator.stream_message(session_id.clone(), message));
                while let Some(event) = events.next().await {
                    stdout.write_all(event.to_sse().as_bytes()).await?;
                    stdout.flush().await?;
                }
            }
        }
        stdout.flush().await?;
    }

    tracing::info!(session_id = %session_id, "shutting down");
    Ok(())
}

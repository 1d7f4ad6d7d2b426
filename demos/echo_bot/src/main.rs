//! Echo Bot Example
//!
//! Reads updates as JSON lines from stdin, routes them through a Switchyard
//! router and prints replies as JSON lines on stdout.
//!
//! # Usage
//!
//! ```bash
//! printf '%s\n' \
//!     '{"id": 1, "chat": 7, "text": "/start"}' \
//!     '{"id": 2, "chat": 7, "text": "/echo hello"}' \
//!     '{"id": 3, "chat": 7, "text": "/echo "}' \
//!     | cargo run --package echo-bot -- --log-level debug
//! ```
//!
//! # Chains
//!
//! ```text
//! normal: log ─▶ /start ─▶ /echo <text> ─▶ /fail ─▶ unknown command
//! error:  log error ─▶ apologize
//! ```
//!
//! Command handlers consume the update by returning without advancing.
//! Failed replies go to the error chain, where `apologize` resolves the
//! errors it can answer and leaves the rest unresolved for the listener to
//! log.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use switchyard::config::{Delivery, PollingConfig};
use switchyard::prelude::*;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

const RECEIVED_AT: &str = "received_at";

const WELCOME: &str = "Welcome! Send /echo <text> and I will repeat it.";

// ============================================================================
// Payload and client
// ============================================================================

/// One inbound update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct Update {
    id: i64,
    chat: i64,
    #[serde(default)]
    text: Option<String>,
}

impl AsText for Update {
    fn plain_text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Reply {
    chat: i64,
    text: String,
}

#[derive(Debug, Error)]
enum ReplyError {
    #[error("refusing to send an empty message")]
    EmptyText,

    #[error("unknown chat {0}")]
    UnknownChat(i64),

    #[error("failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("failure requested by /fail")]
struct RequestedFailure;

enum Sink {
    Stdout,
    #[cfg(test)]
    Memory(parking_lot::Mutex<Vec<Reply>>),
}

/// The client handle: sends replies to a chat.
struct Console {
    sink: Sink,
}

impl Console {
    fn stdout() -> Self {
        Self { sink: Sink::Stdout }
    }

    fn reply(&self, chat: i64, text: &str) -> Result<(), ReplyError> {
        if text.trim().is_empty() {
            return Err(ReplyError::EmptyText);
        }
        if chat <= 0 {
            return Err(ReplyError::UnknownChat(chat));
        }

        let reply = Reply {
            chat,
            text: text.to_string(),
        };
        match &self.sink {
            Sink::Stdout => println!("{}", serde_json::to_string(&reply)?),
            #[cfg(test)]
            Sink::Memory(sent) => sent.lock().push(reply),
        }
        Ok(())
    }
}

// ============================================================================
// Source
// ============================================================================

/// Polls JSON-lines updates from a reader, skipping ids below the offset.
struct LinePoller<R> {
    lines: Lines<R>,
    offset: i64,
    eof: bool,
}

impl<R: AsyncBufRead + Unpin> LinePoller<R> {
    fn new(reader: R, offset: i64) -> Self {
        Self {
            lines: reader.lines(),
            offset,
            eof: false,
        }
    }
}

#[async_trait]
impl<R> Poller<Update> for LinePoller<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// Reads lines until one holds a new update, input ends or `timeout`
    /// elapses. Blank, malformed and already-seen lines are skipped.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Update>, BoxError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let line = match tokio::time::timeout_at(deadline, self.lines.next_line()).await {
                Ok(line) => line?,
                Err(_) => return Ok(Vec::new()),
            };

            let Some(line) = line else {
                debug!("Input closed");
                self.eof = true;
                return Ok(Vec::new());
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Update>(&line) {
                Ok(update) if update.id < self.offset => {
                    trace!(id = update.id, offset = self.offset, "Skipping update below offset");
                }
                Ok(update) => {
                    self.offset = update.id + 1;
                    return Ok(vec![update]);
                }
                Err(e) => warn!(error = %e, "Skipping malformed update"),
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.eof
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn log_update(ctrl: Control, _console: Arc<Console>, update: Arc<Update>) {
    info!(id = update.id, chat = update.chat, text = ?update.text, "Update received");
    ctrl.advance_with_value(RECEIVED_AT, Instant::now());
}

async fn start(ctrl: Control, console: Arc<Console>, update: Arc<Update>) {
    if let Err(e) = console.reply(update.chat, WELCOME) {
        ctrl.signal_error(e);
    }
}

fn is_echo(update: &Update) -> bool {
    update
        .plain_text()
        .is_some_and(|text| text.starts_with("/echo ") || text == "/echo")
}

async fn echo(ctrl: Control, console: Arc<Console>, update: Arc<Update>) {
    let content = update
        .plain_text()
        .and_then(|text| text.strip_prefix("/echo"))
        .unwrap_or_default()
        .trim_start();

    if let Err(e) = console.reply(update.chat, content) {
        ctrl.signal_error(e);
    }
}

async fn unknown_command(ctrl: Control, console: Arc<Console>, update: Arc<Update>) {
    let Some(command) = update.plain_text().filter(|text| text.starts_with('/')) else {
        trace!(id = update.id, "Not a command, ignoring");
        return;
    };

    if let Err(e) = console.reply(update.chat, &format!("Unknown command: {command}")) {
        ctrl.signal_error(e);
    }
}

async fn log_error(ctrl: Control, _console: Arc<Console>, update: Arc<Update>, err: HandlerError) {
    let elapsed = ctrl.value::<Instant>(RECEIVED_AT).map(Instant::elapsed);
    warn!(id = update.id, error = %err, ?elapsed, "Handling failed");
    ctrl.advance();
}

async fn apologize(ctrl: Control, console: Arc<Console>, update: Arc<Update>, err: HandlerError) {
    let apology = if err.is::<RequestedFailure>() {
        "Failure handled."
    } else if matches!(err.downcast_ref::<ReplyError>(), Some(ReplyError::EmptyText)) {
        "Nothing to echo."
    } else {
        ctrl.advance();
        return;
    };

    match console.reply(update.chat, apology) {
        Ok(()) => ctrl.halt(),
        Err(e) => ctrl.signal_error(e),
    }
}

fn build_router() -> Router<Console, Update> {
    Router::builder()
        .handle(log_update)
        .route("/start", start)
        .route_with(is_echo, handler_fn(echo))
        .route("/fail", |ctrl, _console, _update| async move {
            ctrl.signal_error(RequestedFailure);
        })
        .handle(unknown_command)
        .handle_error(log_error)
        .handle_error(apologize)
        .build()
}

// ============================================================================
// Main
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "echo-bot", about = "Echoes JSON-lines updates from stdin")]
struct Args {
    /// Configuration file; searched for as switchyard.toml when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. `production`.
    #[arg(short, long)]
    profile: Option<String>,

    /// Overrides the configured log level.
    #[arg(long)]
    log_level: Option<Level>,

    /// Skips updates with a lower id.
    #[arg(long)]
    offset: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(profile) = &args.profile {
        loader = loader.profile(profile);
    }
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let config = loader
        .load_validated()
        .context("failed to load configuration")?;

    let mut logging = logging::LoggingBuilder::from_config(&config.logging);
    if let Some(level) = args.log_level {
        logging = logging.with_level(level);
    }
    logging
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let mut polling = match config.listener.delivery() {
        Some(Delivery::Polling(polling)) => polling.clone(),
        Some(Delivery::Webhook(webhook)) => bail!(
            "echo-bot reads stdin and cannot serve a webhook on {}",
            webhook.listen.socket_addr()
        ),
        None => bail!("no delivery mode configured"),
    };
    if let Some(offset) = args.offset {
        polling.offset = offset;
    }

    let poller = LinePoller::new(BufReader::new(tokio::io::stdin()), polling.offset);
    let source = PollingSource::from_config(poller, &polling);
    let listener = Listener::from_config(build_router(), Console::stdout(), &config.listener);

    info!(
        handlers = listener.router().handler_count(),
        error_handlers = listener.router().error_handler_count(),
        offset = polling.offset,
        "Echo bot ready"
    );
    listener.run(source).await?;

    Ok(())
}

//! Terminal chat client.
//!
//! Reads lines from stdin, submits them to the backend, and prints the
//! assistant's reply as it streams in. `/quit`, EOF, or Ctrl-C close the
//! session.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use chatstream::config::ClientConfig;
use chatstream::session::{Message, Role, SessionManager};
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

const QUIT_COMMAND: &str = "/quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = ClientConfig::load().context("Configuration error")?;
    chatstream::telemetry::init(config.log.json);

    let endpoint = config.endpoint_url()?;
    info!(
        name: "client.config.loaded",
        host = %endpoint.host_str().unwrap_or_default(),
        path = %endpoint.path(),
        "Client configuration loaded"
    );

    let mut session = SessionManager::with_options(
        endpoint,
        config.identity_provider(),
        Arc::new(config.transport()),
        config.session_options(),
    );

    session.connect().await.context("Could not connect")?;
    session
        .wait_until_open()
        .await
        .context("Connection did not open")?;

    println!("Connected. Type a message, or {QUIT_COMMAND} to leave.");
    prompt()?;
    let mut renderer = Renderer::default();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) if line.trim() == QUIT_COMMAND => break,
                Some(line) => {
                    if let Err(e) = session.submit(&line) {
                        debug!(name: "client.submit.rejected", error = %e, "Submit rejected");
                    }
                    renderer.render(&session)?;
                }
                None => break,
            },
            event = session.next_event() => match event {
                Some(event) => {
                    session.handle_event(event);
                    renderer.render(&session)?;
                    if session.state().is_terminal() {
                        println!("\nConnection closed by server.");
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close();
    Ok(())
}

/// Prints transcript growth incrementally.
///
/// User messages are already on screen (the user typed them), so only
/// assistant text is written.
#[derive(Debug, Default)]
struct Renderer {
    /// Number of transcript entries seen so far.
    seen: usize,
    /// Bytes already printed of the last seen entry.
    printed: usize,
    typing: bool,
}

impl Renderer {
    fn render(&mut self, session: &SessionManager) -> io::Result<()> {
        let messages = session.transcript();
        let mut out = io::stdout().lock();

        if let Some(last) = self.seen.checked_sub(1).and_then(|i| messages.get(i)) {
            if last.role == Role::Assistant && last.content.len() > self.printed {
                out.write_all(&last.content.as_bytes()[self.printed..])?;
                self.printed = last.content.len();
            }
        }

        let mut started = false;
        for message in messages.iter().skip(self.seen) {
            write_start(&mut out, message)?;
            self.printed = message.content.len();
            self.seen += 1;
            started |= message.role == Role::Assistant;
        }

        let typing = session.is_typing();
        if !typing && (self.typing || started) {
            writeln!(out)?;
            write!(out, "> ")?;
        }
        self.typing = typing;
        out.flush()
    }
}

fn prompt() -> io::Result<()> {
    let mut out = io::stdout().lock();
    write!(out, "> ")?;
    out.flush()
}

fn write_start(out: &mut impl Write, message: &Message) -> io::Result<()> {
    match message.role {
        Role::User => Ok(()),
        Role::Assistant if message.synthetic => write!(out, "\n[{}]", message.content),
        Role::Assistant => write!(out, "\nassistant: {}", message.content),
    }
}

//! Orchestrator chat, `masdash chat`.
//!
//! One-shot with a message argument, otherwise a line-based session on
//! stdin. Ctrl-C stops the in-flight turn; `/clear` and `/quit` are local.

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use masdash::Dashboard;
use masdash::chat::{ChatEngine, ChatMessage, Role, TurnOutcome};
use masdash::realtime::ConnectionState;

/// Prints the growing assistant message as deltas.
struct Printer {
    shown: String,
    tools: usize,
}

impl Printer {
    fn new() -> Self {
        Self {
            shown: String::new(),
            tools: 0,
        }
    }

    /// Text to print so the terminal catches up with `content`. Replaced
    /// content (error rendering) is printed whole on a fresh line.
    fn advance(&mut self, content: &str) -> Option<String> {
        if content == self.shown {
            return None;
        }
        let out = match content.strip_prefix(self.shown.as_str()) {
            Some(rest) => rest.to_string(),
            None => format!("\n{}", content),
        };
        self.shown = content.to_string();
        Some(out)
    }

    fn render(&mut self, messages: &[ChatMessage]) {
        let Some(msg) = messages.iter().rev().find(|m| m.role == Role::Assistant) else {
            return;
        };
        for call in msg.tool_calls.iter().skip(self.tools) {
            println!();
            println!("{}", console::style(format!("[tool: {}]", call.name)).dim());
        }
        self.tools = self.tools.max(msg.tool_calls.len());

        if let Some(text) = self.advance(&msg.content) {
            print!("{}", text);
        }
        let _ = std::io::stdout().flush();
    }
}

async fn run_turn(engine: &ChatEngine, text: &str) -> TurnOutcome {
    let mut rx = engine.store().subscribe();
    let mut printer = Printer::new();

    let turn = engine.send(text);
    tokio::pin!(turn);

    let outcome = loop {
        tokio::select! {
            outcome = &mut turn => break outcome,
            Ok(()) = rx.changed() => {
                let messages = rx.borrow_and_update().messages.clone();
                printer.render(&messages);
            }
            _ = tokio::signal::ctrl_c() => engine.stop(),
        }
    };
    printer.render(&engine.store().messages());
    println!();

    if outcome == TurnOutcome::Cancelled {
        println!("{}", console::style("(stopped)").dim());
    }
    outcome
}

pub async fn cmd_chat(dash: &Dashboard, message: Option<String>, history: bool) -> Result<()> {
    let engine = dash.chat();
    if dash.session().is_authenticated() {
        // Give the supervisor a moment to bind the session's connection.
        let mut state = dash.connection_state();
        let _ = tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s != ConnectionState::Disconnected),
        )
        .await;
    }
    let _push = dash.connection().map(|conn| engine.attach(&conn));

    if history {
        match engine.fetch_messages().await {
            Ok(count) => {
                for msg in engine.store().messages() {
                    println!(
                        "{} {}",
                        console::style(format!("{}:", msg.role.as_str())).bold(),
                        msg.content
                    );
                }
                println!("{}", console::style(format!("({} messages)", count)).dim());
            }
            Err(e) => eprintln!("{} {}", console::style("Warning:").yellow().bold(), e),
        }
    }

    if let Some(text) = message {
        if let TurnOutcome::Failed { message } = run_turn(&engine, &text).await {
            anyhow::bail!("Chat turn failed: {}", message);
        }
        return Ok(());
    }

    println!(
        "{}",
        console::style("Chat session. /clear resets, /quit exits, Ctrl-C stops a reply.").dim()
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", console::style(">").cyan().bold());
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                engine.clear();
                println!("{}", console::style("Conversation cleared.").dim());
            }
            text => {
                run_turn(&engine, text).await;
            }
        }
    }
    Ok(())
}

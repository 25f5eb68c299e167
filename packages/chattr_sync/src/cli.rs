//! `chattr watch` / `chattr send`: console consumers of the sync client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::info;

use chattr_sync::{
    Agent, AgentStatus, ChatMessage, ClientConfig, ConnectionState, MessageKind, SessionSnapshot,
    SyncClient,
};

/// Follow the session until Ctrl-C, printing what changes.
pub async fn watch_command(config: ClientConfig) -> Result<()> {
    let host = config.endpoint.target_host();
    let client = SyncClient::new(config).start();
    let mut snapshots = client.subscribe();
    let mut connection = client.watch_connection();
    let mut printer = Printer::default();

    info!(host = %host, "watching session");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                eprintln!("[chattr: {}]", state_label(state));
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                for line in printer.render(&snapshot) {
                    println!("{line}");
                }
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

/// Connect, send one message, disconnect.
pub async fn send_command(config: ClientConfig, text: &str, wait_secs: u64) -> Result<()> {
    let host = config.endpoint.target_host();
    let client = SyncClient::new(config).start();
    let mut connection = client.watch_connection();

    let connected = matches!(
        tokio::time::timeout(
            Duration::from_secs(wait_secs),
            connection.wait_for(|s| s.is_connected()),
        )
        .await,
        Ok(Ok(_))
    );
    if !connected {
        client.shutdown().await;
        bail!("could not connect to {} within {}s", host, wait_secs);
    }

    let result = client.send_message(text);
    client.shutdown().await;
    result?;
    eprintln!("[chattr: sent]");
    Ok(())
}

fn state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected - reconnecting",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
    }
}

fn status_label(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Idle => "idle",
        AgentStatus::Thinking => "thinking",
        AgentStatus::Responding => "responding",
        AgentStatus::Error => "unavailable",
    }
}

fn format_message(message: &ChatMessage, agents: &[Agent]) -> String {
    match message.kind {
        MessageKind::System => format!("[{}] * {}", message.timestamp, message.text),
        MessageKind::User => format!("[{}] you: {}", message.timestamp, message.text),
        MessageKind::Agent => {
            let handle = message.agent.as_deref().unwrap_or_default();
            let name = agents
                .iter()
                .find(|a| a.id == handle)
                .map(|a| a.name.as_str())
                .unwrap_or(handle);
            format!("[{}] {}: {}", message.timestamp, name, message.text)
        }
    }
}

/// Turns successive snapshots into printable lines.
#[derive(Default)]
struct Printer {
    printed: usize,
    /// Id of the last printed message, to spot a clear followed by new
    /// messages between two snapshots.
    last_id: Option<String>,
    agents: Arc<Vec<Agent>>,
}

impl Printer {
    fn render(&mut self, snapshot: &SessionSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        let same_roster = self.agents.len() == snapshot.agents.len()
            && self
                .agents
                .iter()
                .zip(snapshot.agents.iter())
                .all(|(a, b)| a.id == b.id && a.name == b.name);
        if !same_roster {
            let names: Vec<String> = snapshot
                .agents
                .iter()
                .map(|a| format!("{} ({})", a.name, status_label(a.status)))
                .collect();
            lines.push(format!("-- agents: {}", names.join(", ")));
        } else {
            for (before, after) in self.agents.iter().zip(snapshot.agents.iter()) {
                if before.status != after.status {
                    lines.push(format!(
                        "-- {} is {}",
                        after.name,
                        status_label(after.status)
                    ));
                }
            }
        }
        self.agents = Arc::clone(&snapshot.agents);

        let cleared = match self.printed.checked_sub(1) {
            Some(last) => snapshot.messages.get(last).map(|m| &m.id) != self.last_id.as_ref(),
            None => false,
        };
        if cleared {
            lines.push("-- log cleared".to_string());
            self.printed = 0;
        }
        for message in &snapshot.messages[self.printed..] {
            lines.push(format_message(message, &snapshot.agents));
        }
        self.printed = snapshot.messages.len();
        self.last_id = snapshot.messages.last().map(|m| m.id.clone());

        lines
    }
}

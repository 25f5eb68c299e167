//! Session State Store
//!
//! Owns the reduced session state: the message log, the agent roster and the
//! session settings. Events are applied one at a time by the connection
//! driver; every operation is synchronous and total.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::identity;
use crate::protocol::{AgentEntry, InboundEvent, Liveness, MessageEvent, MessageKind, SettingsEvent};

/// Username assumed until the server sends `settings`.
pub const DEFAULT_USERNAME: &str = "user";

const DEFAULT_ROLE: &str = "Agent";
const DEFAULT_LAST_ACTIVE: &str = "recently";

/// The current status of an agent in the roster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Waiting for work
    #[default]
    Idle,

    /// Typing indicator is on
    Thinking,

    /// Server reports the agent busy
    Responding,

    /// Server reports the agent unavailable
    Error,
}

impl AgentStatus {
    /// Status implied by a liveness record.
    pub fn from_liveness(liveness: &Liveness) -> Self {
        if liveness.busy {
            AgentStatus::Responding
        } else if !liveness.available {
            AgentStatus::Error
        } else {
            AgentStatus::Idle
        }
    }

    /// Returns true if the agent is doing something
    pub fn is_active(&self) -> bool {
        matches!(self, AgentStatus::Thinking | AgentStatus::Responding)
    }
}

/// One entry in the message log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub kind: MessageKind,
    /// Handle of the authoring agent; only set for `MessageKind::Agent`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub text: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Lowercase handle, unique in the roster.
    pub id: String,
    pub name: String,
    pub role: String,
    pub status: AgentStatus,
    pub last_active: String,
    pub color: String,
    pub initials: String,
}

impl Agent {
    fn from_entry(entry: AgentEntry) -> Self {
        let name = entry.label.unwrap_or_else(|| entry.handle.clone());
        let color = entry
            .color
            .unwrap_or_else(|| identity::color_for(&entry.handle).to_string());
        Self {
            initials: identity::initials(&name),
            id: entry.handle,
            name,
            role: entry.role.unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            status: AgentStatus::default(),
            last_active: DEFAULT_LAST_ACTIVE.to_string(),
            color,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub username: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            username: DEFAULT_USERNAME.to_string(),
        }
    }
}

/// Immutable view of the store handed to presentation.
///
/// Collections are shared with the store; taking a snapshot only bumps
/// reference counts, and a collection is copied when the store next changes
/// it while a snapshot still holds it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub messages: Arc<Vec<ChatMessage>>,
    pub agents: Arc<Vec<Agent>>,
    pub settings: SessionSettings,
}

impl SessionSnapshot {
    pub fn agent(&self, handle: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == handle)
    }
}

/// Which part of the state an applied event touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Duplicate, unknown handle, or otherwise a no-op
    None,
    Messages,
    Agents,
    /// The local username changed; identity is bound at connect time, so the
    /// connection must be re-established.
    Username,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    messages: Arc<Vec<ChatMessage>>,
    message_ids: HashSet<String>,
    agents: Arc<Vec<Agent>>,
    settings: SessionSettings,
    /// Counter for ids generated when the server omitted one
    local_seq: u64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_username(username: impl Into<String>) -> Self {
        Self {
            settings: SessionSettings {
                username: username.into(),
            },
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: Arc::clone(&self.messages),
            agents: Arc::clone(&self.agents),
            settings: self.settings.clone(),
        }
    }

    /// Apply one decoded event.
    pub fn apply(&mut self, event: InboundEvent) -> Change {
        match event {
            InboundEvent::Message(message) => {
                if self.apply_message(message) {
                    Change::Messages
                } else {
                    Change::None
                }
            }
            InboundEvent::Agents(roster) => {
                self.apply_agents(roster);
                Change::Agents
            }
            InboundEvent::Settings(settings) => {
                if self.apply_settings(settings) {
                    Change::Username
                } else {
                    Change::None
                }
            }
            InboundEvent::Status(map) => {
                if self.apply_status(&map) {
                    Change::Agents
                } else {
                    Change::None
                }
            }
            InboundEvent::Typing { agent, active } => {
                if self.apply_typing(&agent, active) {
                    Change::Agents
                } else {
                    Change::None
                }
            }
            InboundEvent::Clear => {
                if self.apply_clear() {
                    Change::Messages
                } else {
                    Change::None
                }
            }
        }
    }

    /// Append a message unless its id is already in the log.
    ///
    /// Returns true if the log grew.
    pub fn apply_message(&mut self, event: MessageEvent) -> bool {
        if let Some(id) = &event.id {
            if self.message_ids.contains(id) {
                return false;
            }
        }

        let (kind, agent) = event.classify(&self.settings.username);
        let id = match event.id {
            Some(id) => id,
            None => self.next_local_id(),
        };
        let timestamp = event.time.unwrap_or_else(display_time_now);

        self.message_ids.insert(id.clone());
        Arc::make_mut(&mut self.messages).push(ChatMessage {
            id,
            kind,
            agent,
            text: event.text,
            timestamp,
        });
        true
    }

    /// Replace the whole roster. Every agent starts idle.
    pub fn apply_agents(&mut self, roster: Vec<AgentEntry>) {
        self.agents = Arc::new(roster.into_iter().map(Agent::from_entry).collect());
    }

    /// Returns true if the username changed. Stored messages keep the
    /// classification they were given on arrival.
    pub fn apply_settings(&mut self, settings: SettingsEvent) -> bool {
        match settings.username {
            Some(username) if username != self.settings.username => {
                self.settings.username = username;
                true
            }
            _ => false,
        }
    }

    /// Returns true if any agent's status changed.
    pub fn apply_status(&mut self, map: &HashMap<String, Liveness>) -> bool {
        let updates: Vec<(usize, AgentStatus)> = self
            .agents
            .iter()
            .enumerate()
            .filter_map(|(i, agent)| {
                let status = AgentStatus::from_liveness(map.get(&agent.id)?);
                (agent.status != status).then_some((i, status))
            })
            .collect();
        if updates.is_empty() {
            return false;
        }
        let agents = Arc::make_mut(&mut self.agents);
        for (i, status) in updates {
            agents[i].status = status;
        }
        true
    }

    /// Returns true if the named agent's status changed.
    pub fn apply_typing(&mut self, handle: &str, active: bool) -> bool {
        let Some(i) = self.agents.iter().position(|a| a.id == handle) else {
            return false;
        };
        let status = if active {
            AgentStatus::Thinking
        } else {
            AgentStatus::Idle
        };
        if self.agents[i].status == status {
            return false;
        }
        Arc::make_mut(&mut self.agents)[i].status = status;
        true
    }

    /// Empty the message log. Returns true if it had entries.
    pub fn apply_clear(&mut self) -> bool {
        let had_messages = !self.messages.is_empty();
        self.messages = Arc::default();
        self.message_ids.clear();
        had_messages
    }

    fn next_local_id(&mut self) -> String {
        loop {
            self.local_seq += 1;
            let id = format!("local-{}-{:08x}", self.local_seq, rand::random::<u32>());
            if !self.message_ids.contains(&id) {
                return id;
            }
        }
    }
}

fn display_time_now() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}

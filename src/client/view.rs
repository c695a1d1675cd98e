use std::{collections::BTreeSet, fmt};

use time::{macros::format_description, OffsetDateTime};

use crate::chat::ServerEvent;

/// Who the client believes is online.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PresenceSet {
    names: BTreeSet<String>,
}

impl PresenceSet {
    pub fn replace(&mut self, names: impl IntoIterator<Item = String>) {
        self.names = names.into_iter().collect();
    }

    /// Returns false when the name was already there.
    pub fn insert(&mut self, name: String) -> bool {
        self.names.insert(name)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.names.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Message {
        username: String,
        message: String,
        timestamp: OffsetDateTime,
        own: bool,
    },
    Notice(String),
    Error(String),
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Message {
                username,
                message,
                timestamp,
                own,
            } => {
                let clock = timestamp
                    .format(format_description!("[hour]:[minute]:[second]"))
                    .map_err(|_| fmt::Error)?;
                let who = if *own { " (you)" } else { "" };
                write!(f, "[{clock}] {username}{who}: {message}")
            }
            Line::Notice(notice) => write!(f, "* {notice}"),
            Line::Error(message) => write!(f, "! {message}"),
        }
    }
}

/// Local mirror of one room: presence plus the transcript so far.
#[derive(Debug)]
pub struct ChatView {
    me: String,
    presence: PresenceSet,
    transcript: Vec<Line>,
}

impl ChatView {
    pub fn new(me: impl Into<String>) -> Self {
        let me = me.into();
        let mut presence = PresenceSet::default();
        presence.insert(me.clone());
        ChatView {
            me,
            presence,
            transcript: Vec::new(),
        }
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn presence(&self) -> &PresenceSet {
        &self.presence
    }

    pub fn transcript(&self) -> &[Line] {
        &self.transcript
    }

    /// Folds a server event into the view. Returns the line to show, if any.
    pub fn apply(&mut self, event: ServerEvent) -> Option<Line> {
        let line = match event {
            ServerEvent::UsersList(names) => {
                self.presence.replace(names);
                let online: Vec<&str> = self.presence.iter().collect();
                Line::Notice(format!("online: {}", online.join(", ")))
            }
            ServerEvent::UserJoined(name) => {
                let notice = format!("{name} joined the chat");
                if !self.presence.insert(name) {
                    return None;
                }
                Line::Notice(notice)
            }
            ServerEvent::UserLeft(name) => {
                if !self.presence.remove(&name) {
                    return None;
                }
                Line::Notice(format!("{name} left the chat"))
            }
            ServerEvent::ChatMessage(message) => Line::Message {
                own: message.username == self.me,
                username: message.username,
                message: message.message,
                timestamp: message.timestamp,
            },
            ServerEvent::Error(notice) => Line::Error(notice.message),
        };
        self.transcript.push(line.clone());
        Some(line)
    }
}

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";

/// Canonical protocol address: `user[.agent][:device]@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    pub user: String,
    pub agent: Option<u8>,
    pub device: Option<u16>,
    pub server: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JidError {
    #[error("address is empty")]
    Empty,
    #[error("phone number must contain only digits: {0}")]
    InvalidNumber(String),
    #[error("address has no user part: {0}")]
    MissingUser(String),
    #[error("invalid server in address: {0}")]
    InvalidServer(String),
    #[error("invalid agent or device suffix in address: {0}")]
    InvalidDevice(String),
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            agent: None,
            device: None,
            server: server.into(),
        }
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    /// Same account without the agent/device qualifiers.
    pub fn to_non_ad(&self) -> Jid {
        Jid::new(self.user.clone(), self.server.clone())
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user)?;
        if let Some(agent) = self.agent {
            write!(f, ".{agent}")?;
        }
        if let Some(device) = self.device {
            write!(f, ":{device}")?;
        }
        write!(f, "@{}", self.server)
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_jid(raw)
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_jid(&value)
    }
}

impl From<Jid> for String {
    fn from(value: Jid) -> Self {
        value.to_string()
    }
}

/// Parses a human-entered phone number or a full address.
///
/// A bare number (optionally prefixed with `+`) becomes a user address on
/// [`DEFAULT_USER_SERVER`]; anything containing `@` is parsed as a full address.
pub fn parse_jid(raw: &str) -> Result<Jid, JidError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(JidError::Empty);
    }

    let Some((user_part, server)) = trimmed.split_once('@') else {
        if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(JidError::InvalidNumber(raw.to_string()));
        }
        return Ok(Jid::new(trimmed, DEFAULT_USER_SERVER));
    };

    let valid_server = !server.is_empty()
        && server
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.');
    if !valid_server {
        return Err(JidError::InvalidServer(raw.to_string()));
    }

    let (user_agent, device) = match user_part.split_once(':') {
        Some((user_agent, device)) => {
            let device = device
                .parse::<u16>()
                .map_err(|_| JidError::InvalidDevice(raw.to_string()))?;
            (user_agent, Some(device))
        }
        None => (user_part, None),
    };
    let (user, agent) = match user_agent.split_once('.') {
        Some((user, agent)) => {
            let agent = agent
                .parse::<u8>()
                .map_err(|_| JidError::InvalidDevice(raw.to_string()))?;
            (user, Some(agent))
        }
        None => (user_agent, None),
    };

    if user.is_empty() || user.chars().any(char::is_whitespace) {
        return Err(JidError::MissingUser(raw.to_string()));
    }

    Ok(Jid {
        user: user.to_string(),
        agent,
        device,
        server: server.to_string(),
    })
}

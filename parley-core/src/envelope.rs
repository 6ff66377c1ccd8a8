//! Message envelope data model
//!
//! Every message on the wire, in either direction, is one [`Envelope`]
//! serialized by the configured codec and terminated by the frame delimiter.
//! Client-initiated request/response pairs carry a correlation `id`;
//! out-of-band pushes from the server do not.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt::{self, Display};

/// Fixed command names understood by the server
///
/// Serialized as the lowercase wire strings. `Other` carries any
/// application-defined command verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Authentication exchange that upgrades a connection to a session.
    Handshake,
    /// Start a re-authentication flow on an open connection.
    RequestAuth,
    /// Drop the current authenticated session without closing the socket.
    DropAuth,
    /// Ask the server process to quit.
    ServerQuit,
    /// Ask the server process to restart.
    ServerRestart,
    /// Ordinary application call.
    Call,
    /// Application-defined command.
    Other(String),
}

impl Command {
    /// Wire representation of this command
    pub fn as_str(&self) -> &str {
        match self {
            Self::Handshake => "handshake",
            Self::RequestAuth => "requestauth",
            Self::DropAuth => "dropauth",
            Self::ServerQuit => "serverquit",
            Self::ServerRestart => "serverrestart",
            Self::Call => "call",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        match s {
            "handshake" => Self::Handshake,
            "requestauth" => Self::RequestAuth,
            "dropauth" => Self::DropAuth,
            "serverquit" => Self::ServerQuit,
            "serverrestart" => Self::ServerRestart,
            "call" => Self::Call,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(D::Error::custom("command must not be empty"));
        }
        Ok(Command::from(s.as_str()))
    }
}

/// Structured error attached to a reply by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Numeric code from the fixed error code table
    pub code: u16,
    /// Human-readable message
    pub msg: String,
}

/// One protocol message
///
/// `id` and `error` are omitted from the serialized form when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id; present on client-initiated request/response pairs
    ///
    /// Accepted as either a string or a number on the wire; normalized to
    /// a string so correlation lookups have one key type.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_id"
    )]
    pub id: Option<String>,
    /// Session token, empty when unauthenticated
    #[serde(default)]
    pub session: String,
    /// Display name of the sending party
    pub name: String,
    /// Command this message carries or replies to
    pub command: Command,
    /// Application payload
    #[serde(default)]
    pub data: Value,
    /// Server-assigned error, absent on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(serde_json::Number),
        Text(String),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Number(n) => n.to_string(),
        Id::Text(s) => s,
    }))
}

impl Envelope {
    /// Build a request envelope
    ///
    /// The correlation id is assigned later, at send time, by the
    /// connection's correlator.
    pub fn request(
        session: impl Into<String>,
        name: impl Into<String>,
        command: Command,
        data: Value,
    ) -> Self {
        Self {
            id: None,
            session: session.into(),
            name: name.into(),
            command,
            data,
            error: None,
        }
    }
}

/// Version triplets reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Core server version
    pub core: [u16; 3],
    /// Database schema version
    pub db: [u16; 3],
    /// Torrent subsystem version
    pub torrent: [u16; 3],
}

/// Server capabilities captured from the first exchange after connect
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerInfo {
    /// Server version triplets, if the greeting carried them
    pub version: Option<Version>,
    /// Whether the server accepts unauthenticated guest sessions
    pub guest_allowed: bool,
}

impl ServerInfo {
    /// Extract server info from an envelope payload
    ///
    /// Returns `None` when the payload does not look like a server greeting
    /// (i.e. carries no `version` field).
    pub fn from_payload(data: &Value) -> Option<Self> {
        let map = data.as_object()?;
        let version = map.get("version")?;
        let version = serde_json::from_value(version.clone()).ok();
        let guest_allowed = map
            .get("guest_allowed")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Some(Self {
            version,
            guest_allowed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_names() {
        assert_eq!(Command::Handshake.as_str(), "handshake");
        assert_eq!(Command::RequestAuth.as_str(), "requestauth");
        assert_eq!(Command::DropAuth.as_str(), "dropauth");
        assert_eq!(Command::ServerQuit.as_str(), "serverquit");
        assert_eq!(Command::ServerRestart.as_str(), "serverrestart");
        assert_eq!(Command::from("fetch"), Command::Other("fetch".into()));
    }

    #[test]
    fn test_envelope_serialization_omits_absent_fields() {
        let env = Envelope::request("", "test-client", Command::Call, json!({"a": 1}));
        let text = serde_json::to_string(&env).unwrap();
        assert!(!text.contains("\"id\""));
        assert!(!text.contains("\"error\""));
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_envelope_with_id_and_error() {
        let mut env = Envelope::request("sess", "c", Command::Handshake, Value::Null);
        env.id = Some("42".into());
        env.error = Some(WireError {
            code: 406,
            msg: "denied".into(),
        });
        let text = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back.id.as_deref(), Some("42"));
        assert_eq!(back.error.unwrap().code, 406);
    }

    #[test]
    fn test_numeric_id_normalized_to_string() {
        let env: Envelope = serde_json::from_str(
            r#"{"id": 42, "session": "", "name": "server", "command": "call"}"#,
        )
        .unwrap();
        assert_eq!(env.id.as_deref(), Some("42"));
    }

    #[test]
    fn test_server_info_from_payload() {
        let data = json!({
            "version": { "core": [1, 2, 3], "db": [0, 1, 0], "torrent": [0, 0, 1] },
            "guest_allowed": true,
        });
        let info = ServerInfo::from_payload(&data).unwrap();
        assert!(info.guest_allowed);
        assert_eq!(info.version.unwrap().core, [1, 2, 3]);
    }

    #[test]
    fn test_server_info_missing_version() {
        assert!(ServerInfo::from_payload(&json!({"a": 1})).is_none());
        assert!(ServerInfo::from_payload(&Value::Null).is_none());
    }
}

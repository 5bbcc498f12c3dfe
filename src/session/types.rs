// ABOUTME: Session data model — a system message plus an ordered history of user/assistant turns.
// ABOUTME: Attachments are raw bytes in memory and base64 strings on the wire.

use serde::{Deserialize, Serialize};

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message within a session's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Image bytes carried by a user turn.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        rename = "images",
        with = "base64_blobs"
    )]
    pub attachments: Vec<Vec<u8>>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    /// Attach image bytes to this turn.
    pub fn with_attachments(mut self, attachments: Vec<Vec<u8>>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// The durable record of one conversation.
///
/// The identifier is not part of the serialized document; backends key
/// documents by it (the file backend uses it as the file stem).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(skip)]
    pub id: String,
    pub system: String,
    #[serde(default)]
    pub history: Vec<Turn>,
}

impl Session {
    /// A fresh session with the given system message and no history.
    pub fn new(id: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            system: system.into(),
            history: Vec::new(),
        }
    }

    /// True when history ends with a user turn immediately followed by an
    /// assistant turn.
    pub fn ends_with_exchange(&self) -> bool {
        matches!(
            self.history.as_slice(),
            [.., user, assistant] if user.role == Role::User && assistant.role == Role::Assistant
        )
    }
}

/// Serde adapter storing a list of byte blobs as base64 strings.
mod base64_blobs {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _, ser::SerializeSeq};

    pub fn serialize<S: Serializer>(blobs: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(blobs.len()))?;
        for blob in blobs {
            seq.serialize_element(&BASE64.encode(blob))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded: Vec<String> = Vec::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|s| BASE64.decode(s).map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn session_document_has_system_and_history_only() {
        let mut session = Session::new("conv_1", "be brief");
        session.history.push(Turn::user("hi"));
        session.history.push(Turn::assistant("hello"));

        let value = serde_json::to_value(&session).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["system"], "be brief");
        assert_eq!(obj["history"].as_array().unwrap().len(), 2);
        // Turns without images omit the field entirely.
        assert!(obj["history"][0].get("images").is_none());
    }

    #[test]
    fn attachments_are_stored_as_base64() {
        let turn = Turn::user("look").with_attachments(vec![vec![0xff, 0x00, 0x10]]);
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["images"][0], "/wAQ");

        let back: Turn = serde_json::from_value(value).unwrap();
        assert_eq!(back.attachments, vec![vec![0xff, 0x00, 0x10]]);
    }

    #[test]
    fn ends_with_exchange_checks_order() {
        let mut session = Session::new("c", "s");
        assert!(!session.ends_with_exchange());
        session.history.push(Turn::assistant("a"));
        session.history.push(Turn::user("u"));
        assert!(!session.ends_with_exchange());
        session.history.push(Turn::assistant("a"));
        assert!(session.ends_with_exchange());
    }
}

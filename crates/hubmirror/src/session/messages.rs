//! Wire messages for the delta-sync protocol.
//!
//! JSON-shaped payloads over a message-boundary-preserving duplex channel.
//! Client messages are tagged by `msg`; unrecognized kinds deserialize to
//! [`ClientMessage::Unknown`] and are ignored for forward compatibility.

use serde::{Deserialize, Serialize};

use crate::versions::VersionVector;

/// Client → server messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    Hello(HelloMessage),
    /// Any message kind this server version does not know.
    #[serde(other)]
    Unknown,
}

/// The reconciliation handshake: the client's known version vector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HelloMessage {
    #[serde(default)]
    pub versions: VersionDetails,
}

/// Wire form of a version vector: explicit (id, version) entry lists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionDetails {
    #[serde(default)]
    pub repositories: Vec<VersionEntry>,
    #[serde(default)]
    pub organizations: Vec<VersionEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub id: i64,
    pub version: i64,
}

impl From<VersionDetails> for VersionVector {
    fn from(details: VersionDetails) -> Self {
        let mut vector = VersionVector::new();
        for entry in details.repositories {
            vector.set_repository(entry.id, entry.version);
        }
        for entry in details.organizations {
            vector.set_organization(entry.id, entry.version);
        }
        vector
    }
}

impl From<&VersionVector> for VersionDetails {
    fn from(vector: &VersionVector) -> Self {
        Self {
            repositories: vector
                .repositories
                .iter()
                .map(|(&id, &version)| VersionEntry { id, version })
                .collect(),
            organizations: vector
                .organizations
                .iter()
                .map(|(&id, &version)| VersionEntry { id, version })
                .collect(),
        }
    }
}

/// Server → client messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerMessage {
    Sync(SyncMessage),
}

/// One page of the delta stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub logs: Vec<SyncLogEntry>,
    /// Entries not yet sent for this reconciliation.
    pub remaining: i64,
    /// Versions covered by entries sent so far (not the final target), so a
    /// client that disconnects mid-stream resumes from what it last received.
    pub versions: VersionDetails,
}

/// Whether a log entry sets or deletes its record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Set,
    Delete,
}

/// One unit of the delta stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub action: SyncAction,
    #[serde(flatten)]
    pub record: EntryRecord,
}

impl SyncLogEntry {
    pub fn set(record: EntryRecord) -> Self {
        Self {
            action: SyncAction::Set,
            record,
        }
    }

    pub fn delete(record: EntryRecord) -> Self {
        Self {
            action: SyncAction::Delete,
            record,
        }
    }
}

/// Typed entry payloads, tagged by entity kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "data", rename_all = "snake_case")]
pub enum EntryRecord {
    User(AccountEntry),
    Organization(OrganizationEntry),
    Repository(RepositoryEntry),
    Issue(IssueEntry),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationEntry {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    /// Member user ids; populated in organization pages, empty elsewhere.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<LabelEntry>,
}

impl RepositoryEntry {
    /// Tombstone form carrying only the identifier.
    pub fn tombstone(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

impl OrganizationEntry {
    /// Tombstone form carrying only the identifier.
    pub fn tombstone(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssueEntry {
    pub id: i64,
    pub repository: i64,
    pub number: i64,
    pub state: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub user: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<LabelEntry>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub name: String,
    pub color: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_with_partial_vector_deserializes() {
        let json = r#"{"msg": "hello", "versions": {"repositories": [{"id": 7, "version": 3}]}}"#;
        let msg: ClientMessage = serde_json::from_str(json).expect("deserialize");
        let ClientMessage::Hello(hello) = msg else {
            panic!("expected hello");
        };
        let vector: VersionVector = hello.versions.into();
        assert_eq!(vector.repository(7), 3);
        assert_eq!(vector.organization(1), 0);
    }

    #[test]
    fn hello_without_versions_is_empty_vector() {
        let json = r#"{"msg": "hello"}"#;
        let msg: ClientMessage = serde_json::from_str(json).expect("deserialize");
        let ClientMessage::Hello(hello) = msg else {
            panic!("expected hello");
        };
        assert_eq!(hello.versions, VersionDetails::default());
    }

    #[test]
    fn unknown_message_kinds_deserialize_to_unknown() {
        let json = r#"{"msg": "telemetry", "payload": {"x": 1}}"#;
        let msg: ClientMessage = serde_json::from_str(json).expect("deserialize");
        assert_eq!(msg, ClientMessage::Unknown);
    }

    #[test]
    fn sync_log_entry_tags_entity_and_action() {
        let entry = SyncLogEntry::delete(EntryRecord::Repository(RepositoryEntry::tombstone(9)));
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["action"], "delete");
        assert_eq!(json["entity"], "repository");
        assert_eq!(json["data"]["id"], 9);

        let back: SyncLogEntry = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, entry);
    }

    #[test]
    fn version_vector_wire_round_trip() {
        let mut vector = VersionVector::new();
        vector.set_repository(7, 5);
        vector.set_organization(2, 1);

        let details: VersionDetails = (&vector).into();
        let back: VersionVector = details.into();
        assert_eq!(back, vector);
    }

    #[test]
    fn sync_message_serializes_with_msg_tag() {
        let msg = ServerMessage::Sync(SyncMessage {
            logs: vec![],
            remaining: 0,
            versions: VersionDetails::default(),
        });
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["msg"], "sync");
        assert_eq!(json["remaining"], 0);
    }
}

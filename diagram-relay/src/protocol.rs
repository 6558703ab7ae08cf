//! JSON text protocol spoken between drawer clients and the relay.
//!
//! Wire format (one JSON object per WebSocket text frame):
//! ```text
//! client → server   {"action":"textEditOT","elementId":"e1","partId":"p1",
//!                    "originalText":"hello","newText":"hello world"}
//! server → others   {"action":"applyPatch","elementId":"e1","partId":"p1",
//!                    "patch":"@@ -1,5 +1,11 @@\n hello\n+ world\n"}
//! any → others      {"action":"sync","url":"..."}   (relayed verbatim)
//! ```
//!
//! Only `textEditOT` is interpreted by the relay. Every other action is
//! opaque and forwarded byte-for-byte.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Action tag of a client edit.
pub const EDIT_ACTION: &str = "textEditOT";
/// Action tag of a server-produced patch.
pub const APPLY_PATCH_ACTION: &str = "applyPatch";
/// Action tag of the GUI's canvas resync signal.
pub const SYNC_ACTION: &str = "sync";

/// Separator between element and part in a [`DocKey`].
pub const DOC_KEY_SEPARATOR: char = '/';

/// Identifies one editable text fragment inside a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocKey {
    pub element_id: String,
    pub part_id: String,
}

impl DocKey {
    pub fn new(element_id: impl Into<String>, part_id: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            part_id: part_id.into(),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.element_id, DOC_KEY_SEPARATOR, self.part_id)
    }
}

/// A client's locally computed edit of one text fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditAction {
    pub element_id: String,
    pub part_id: String,
    /// What the client believed was canonical when it started editing
    pub original_text: String,
    /// The client's edited result
    pub new_text: String,
}

impl EditAction {
    pub fn doc_key(&self) -> DocKey {
        DocKey::new(self.element_id.clone(), self.part_id.clone())
    }
}

/// Patch distributed to the other members of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPatch {
    pub element_id: String,
    pub part_id: String,
    /// Serialized patch text
    pub patch: String,
}

impl ApplyPatch {
    pub fn doc_key(&self) -> DocKey {
        DocKey::new(self.element_id.clone(), self.part_id.clone())
    }
}

/// Canvas resync request interpreted by the GUI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSignal {
    pub url: String,
}

/// Every action shape this crate knows how to produce or read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Action {
    #[serde(rename = "textEditOT")]
    TextEdit(EditAction),
    #[serde(rename = "applyPatch")]
    ApplyPatch(ApplyPatch),
    #[serde(rename = "sync")]
    Sync(SyncSignal),
}

impl Action {
    /// Serialize to a single-line JSON text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Parse any known action. Unknown tags are an error here; the relay's
    /// inbound path uses [`InboundAction::parse`] instead.
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::InvalidJson)
    }
}

/// Any inbound message the relay does not interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueAction {
    pub action: String,
    /// The frame exactly as received
    pub raw: String,
}

/// Result of parsing one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundAction {
    Edit(EditAction),
    Opaque(OpaqueAction),
}

#[derive(Deserialize)]
struct ActionTag {
    action: String,
}

impl InboundAction {
    /// Structured parse of an inbound frame.
    ///
    /// A frame that is not JSON, lacks a string `action`, or is a
    /// `textEditOT` missing any of its four fields is a typed error.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let tag: ActionTag = serde_json::from_str(raw).map_err(ProtocolError::InvalidJson)?;

        if tag.action == EDIT_ACTION {
            let edit: EditAction = serde_json::from_str(raw).map_err(|source| {
                ProtocolError::MalformedAction {
                    action: EDIT_ACTION,
                    source,
                }
            })?;
            return Ok(Self::Edit(edit));
        }

        Ok(Self::Opaque(OpaqueAction {
            action: tag.action,
            raw: raw.to_owned(),
        }))
    }
}

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("malformed {action} message: {source}")]
    MalformedAction {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("connection closed")]
    ConnectionClosed,
}

//! Reconciliation of a client edit against the room's canonical text.
//!
//! ```text
//! lock(doc) ─► server = canonical ?? originalText
//!           ─► script = diff(server, newText)
//!           ─► updated = apply(script, server)
//!           ─► patch = serialize(script)
//!           ─► canonical = updated ─► unlock
//! ```
//!
//! The diff is always taken against canonical text, never the client's
//! possibly stale `originalText`. Canonical state is written only after
//! every fallible step has succeeded.

use crate::document::DocumentStore;
use crate::patch::{PatchEngine, PatchError};
use crate::protocol::{Action, ApplyPatch, EditAction, ProtocolError};

/// What the router should broadcast for an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Serialized `applyPatch` frame
    Reconciled(String),
    /// The original frame, to be relayed verbatim
    Fallback(String),
}

impl Reconciliation {
    pub fn payload(&self) -> &str {
        match self {
            Self::Reconciled(msg) | Self::Fallback(msg) => msg,
        }
    }

    pub fn is_reconciled(&self) -> bool {
        matches!(self, Self::Reconciled(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub struct Reconciler<P: PatchEngine> {
    engine: P,
}

impl<P: PatchEngine> Reconciler<P> {
    pub fn new(engine: P) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &P {
        &self.engine
    }

    /// Reconcile `edit`, falling back to `raw` on any failure.
    pub async fn reconcile(&self, documents: &DocumentStore, edit: &EditAction, raw: &str) -> Reconciliation {
        match self.try_reconcile(documents, edit).await {
            Ok(message) => Reconciliation::Reconciled(message),
            Err(e) => {
                log::warn!(
                    "Reconciliation of {} failed, relaying original message: {e}",
                    edit.doc_key()
                );
                Reconciliation::Fallback(raw.to_owned())
            }
        }
    }

    /// Run the locked get → diff → apply → set sequence and build the
    /// outbound `applyPatch` frame.
    ///
    /// The lock is released before the frame is broadcast, so two edits to
    /// the same key may reach a peer in the opposite order to the one they
    /// were applied here. Peers rely on fuzzy apply to absorb that.
    pub async fn try_reconcile(&self, documents: &DocumentStore, edit: &EditAction) -> Result<String, ReconcileError> {
        let doc_key = edit.doc_key();
        let mut guard = documents.lock(&doc_key).await;
        let server_text = guard.text_or(&edit.original_text);

        let script = self.engine.diff(server_text, &edit.new_text)?;
        let outcome = self.engine.apply(&script, server_text)?;
        let patch = self.engine.serialize(&script)?;
        let message = Action::ApplyPatch(ApplyPatch {
            element_id: edit.element_id.clone(),
            part_id: edit.part_id.clone(),
            patch,
        })
        .to_json()?;

        if !outcome.is_clean() {
            log::debug!("Patch for {doc_key} applied partially on server: {:?}", outcome.applied);
        }
        guard.replace(outcome.text);
        log::trace!("Canonical {doc_key} updated");

        Ok(message)
    }
}

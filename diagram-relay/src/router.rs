//! Inbound message routing.
//!
//! Pure dispatch over the parsed action: edits go to reconciliation,
//! everything else (including frames that fail to parse) is relayed as-is.

use crate::protocol::{EditAction, InboundAction, ProtocolError};

#[derive(Debug)]
pub enum Route {
    /// Reconcile this edit against canonical state
    Reconcile(EditAction),
    /// Relay the raw frame verbatim
    Passthrough { action: String },
    /// Parse failure; relay the raw frame verbatim
    Unparsed(ProtocolError),
}

pub fn route(raw: &str) -> Route {
    match InboundAction::parse(raw) {
        Ok(InboundAction::Edit(edit)) => Route::Reconcile(edit),
        Ok(InboundAction::Opaque(opaque)) => Route::Passthrough {
            action: opaque.action,
        },
        Err(e) => Route::Unparsed(e),
    }
}

//! The relay service object.
//!
//! One `RelayHub` is built at startup and shared by every connection task.
//! It owns the room registry, the reconciler and the broadcast dispatcher,
//! and implements the callbacks the transport drives:
//!
//! ```text
//! on_join ──────► RoomRegistry::join
//! on_message ───► route ─┬─ Reconcile ─► Reconciler ─┬─ Reconciled(applyPatch) ─┐
//!                        │                          └─ Fallback(raw) ──────────┤
//!                        └─ Passthrough/Unparsed(raw) ─────────────────────────┴─► BroadcastDispatcher
//! on_leave ─────► RoomRegistry::leave (drops room + documents when empty)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::broadcast::{BroadcastDispatcher, BroadcastStats, DeliveryReport};
use crate::patch::{DmpPatchEngine, PatchEngine};
use crate::reconcile::{Reconciler, Reconciliation};
use crate::registry::{LeaveOutcome, RoomRegistry};
use crate::router::{self, Route};
use crate::session::{SessionHandle, SessionId};

/// Routing counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub reconciled: u64,
    pub fallbacks: u64,
    pub passthroughs: u64,
    pub transport_errors: u64,
    pub broadcast: BroadcastStats,
}

#[derive(Default)]
struct AtomicRelayStats {
    reconciled: AtomicU64,
    fallbacks: AtomicU64,
    passthroughs: AtomicU64,
    transport_errors: AtomicU64,
}

pub struct RelayHub<P: PatchEngine = DmpPatchEngine> {
    registry: Arc<RoomRegistry>,
    reconciler: Reconciler<P>,
    dispatcher: BroadcastDispatcher,
    stats: AtomicRelayStats,
}

impl RelayHub<DmpPatchEngine> {
    pub fn new() -> Self {
        Self::with_engine(DmpPatchEngine::new())
    }
}

impl Default for RelayHub<DmpPatchEngine> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PatchEngine> RelayHub<P> {
    pub fn with_engine(engine: P) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        Self {
            dispatcher: BroadcastDispatcher::new(registry.clone()),
            registry,
            reconciler: Reconciler::new(engine),
            stats: AtomicRelayStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub async fn on_join(&self, room_key: &str, session: SessionHandle) {
        self.registry.join(room_key, session).await;
    }

    pub async fn on_leave(&self, room_key: &str, session_id: SessionId) -> LeaveOutcome {
        self.registry.leave(room_key, session_id).await
    }

    /// Route one inbound frame from `sender` and broadcast the result to the
    /// rest of the room.
    pub async fn on_message(&self, room_key: &str, sender: SessionId, raw: &str) -> DeliveryReport {
        let payload = self.resolve_payload(room_key, raw).await;
        self.dispatcher.broadcast(room_key, &payload, Some(sender)).await
    }

    pub fn on_transport_error(&self, error: &dyn std::error::Error) {
        self.stats.transport_errors.fetch_add(1, Ordering::Relaxed);
        log::error!("Transport error: {error}");
    }

    /// Decide what to broadcast for `raw`.
    async fn resolve_payload(&self, room_key: &str, raw: &str) -> String {
        match router::route(raw) {
            Route::Reconcile(edit) => {
                let Some(documents) = self.registry.documents(room_key).await else {
                    log::debug!("Edit for {} in unknown room {room_key}", edit.doc_key());
                    self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                    return raw.to_owned();
                };
                match self.reconciler.reconcile(&documents, &edit, raw).await {
                    Reconciliation::Reconciled(message) => {
                        self.stats.reconciled.fetch_add(1, Ordering::Relaxed);
                        log::debug!("Reconciled {} in room {room_key}", edit.doc_key());
                        message
                    }
                    Reconciliation::Fallback(original) => {
                        self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                        original
                    }
                }
            }
            Route::Passthrough { action } => {
                self.stats.passthroughs.fetch_add(1, Ordering::Relaxed);
                log::debug!("Relaying {action} in room {room_key}");
                raw.to_owned()
            }
            Route::Unparsed(e) => {
                self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                log::warn!("Unparseable message in room {room_key}, relaying as-is: {e}");
                raw.to_owned()
            }
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            reconciled: self.stats.reconciled.load(Ordering::Relaxed),
            fallbacks: self.stats.fallbacks.load(Ordering::Relaxed),
            passthroughs: self.stats.passthroughs.load(Ordering::Relaxed),
            transport_errors: self.stats.transport_errors.load(Ordering::Relaxed),
            broadcast: self.dispatcher.stats(),
        }
    }
}

//! Fan-out of one text frame to every other member of a room.
//!
//! Delivery is a non-blocking push into each member's outbound queue, so a
//! slow or dead recipient never stalls the others. Failures are counted and
//! logged, never returned to the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::registry::RoomRegistry;
use crate::session::{SessionHandle, SessionId};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub broadcasts: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
}

/// Lock-free counters behind [`BroadcastStats`].
#[derive(Default)]
struct AtomicBroadcastStats {
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    /// Excluded sender and already-closed sessions
    pub skipped: usize,
}

pub struct BroadcastDispatcher {
    registry: Arc<RoomRegistry>,
    stats: AtomicBroadcastStats,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            stats: AtomicBroadcastStats::default(),
        }
    }

    /// Send `message` to every open member of `room_key` except `exclude`.
    ///
    /// An unknown room has no members, so this is a no-op.
    pub async fn broadcast(
        &self,
        room_key: &str,
        message: &str,
        exclude: Option<SessionId>,
    ) -> DeliveryReport {
        let members = self.registry.members_of(room_key).await;
        self.deliver(room_key, &members, message, exclude)
    }

    /// Deliver to an explicit member snapshot.
    pub fn deliver(
        &self,
        room_key: &str,
        members: &[SessionHandle],
        message: &str,
        exclude: Option<SessionId>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for member in members {
            if Some(member.id()) == exclude || !member.is_open() {
                report.skipped += 1;
                continue;
            }
            match member.send(message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!("Delivery to {} in room {room_key} failed: {e}", member.id());
                }
            }
        }

        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.stats
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .delivery_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);

        log::trace!(
            "Broadcast in room {room_key}: {} delivered, {} failed, {} skipped",
            report.delivered,
            report.failed,
            report.skipped
        );
        report
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.stats.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

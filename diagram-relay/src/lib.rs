//! # diagram-relay: Real-time collaboration relay for the UML drawer
//!
//! Clients editing the same exercise diagram connect to a room. Label edits
//! are reconciled against a server-held canonical copy and redistributed to
//! every other participant as compact text patches.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   {"action":"textEditOT",…}   ┌──────────────┐
//! │ RelayClient │ ─────────────────────────────► │ RelayServer  │
//! │ (per user)  │ ◄───────────────────────────── │ (WebSocket)  │
//! └─────────────┘   {"action":"applyPatch",…}   └──────┬───────┘
//!                                                      │
//!                                               ┌──────┴───────┐
//!                                               │   RelayHub   │
//!                                               └──────┬───────┘
//!                         ┌──────────────┬─────────────┼───────────────┐
//!                         ▼              ▼             ▼               ▼
//!                    ┌─────────┐  ┌────────────┐ ┌───────────┐ ┌──────────────┐
//!                    │ router  │  │ Reconciler │ │ Registry  │ │ Broadcast    │
//!                    │         │  │ (+patch)   │ │ (+docs)   │ │ Dispatcher   │
//!                    └─────────┘  └────────────┘ └───────────┘ └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire actions and document keys
//! - [`patch`]: diff/patch primitive behind the [`PatchEngine`] trait
//! - [`session`]: session handles and best-effort unicast
//! - [`document`]: per-room canonical text with per-document locking
//! - [`registry`]: room membership and lifecycle
//! - [`router`]: inbound action dispatch
//! - [`reconcile`]: edit reconciliation and patch derivation
//! - [`broadcast`]: fan-out to room members
//! - [`hub`]: the service object driven by the transport
//! - [`server`]: WebSocket host
//! - [`client`]: WebSocket peer that applies incoming patches

pub mod protocol;
pub mod patch;
pub mod session;
pub mod document;
pub mod registry;
pub mod router;
pub mod reconcile;
pub mod broadcast;
pub mod hub;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{Action, ApplyPatch, DocKey, EditAction, InboundAction, ProtocolError, SyncSignal};
pub use patch::{DmpPatchEngine, PatchEngine, PatchError, PatchOutcome};
pub use session::{DeliveryError, SessionHandle, SessionId};
pub use document::DocumentStore;
pub use registry::{LeaveOutcome, RoomRegistry};
pub use reconcile::{Reconciler, Reconciliation};
pub use broadcast::{BroadcastDispatcher, BroadcastStats, DeliveryReport};
pub use hub::{RelayHub, RelayStats};
pub use server::{RelayServer, ServerConfig, ServerError, ServerStats};
pub use client::{ConnectionState, LocalDocuments, RelayClient, RelayEvent};

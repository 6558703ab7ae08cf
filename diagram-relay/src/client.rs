//! WebSocket client for the relay, as used by a drawer peer.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Edits of local text fragments sent as `textEditOT`
//! - Incoming `applyPatch` frames applied to the local copies with the same
//!   fuzzy patch semantics as the server
//! - `sync` signals and any other relayed frame surfaced as events

use std::collections::HashMap;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::patch::{DmpPatchEngine, PatchEngine, PatchError};
use crate::protocol::{Action, DocKey, EditAction, ProtocolError, SyncSignal};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the relay client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// A peer's edit was applied to the local copy of `doc_key`
    PatchApplied {
        doc_key: DocKey,
        text: String,
        /// Every hunk found its place
        clean: bool,
    },
    /// A patch could not be parsed or applied; the local copy is unchanged
    PatchRejected { doc_key: DocKey, reason: String },
    /// Canvas resync requested by a peer
    Sync { url: String },
    /// Any other frame, exactly as relayed
    Relayed(String),
}

/// The peer's local copies of the text fragments it has seen.
#[derive(Debug, Default, Clone)]
pub struct LocalDocuments {
    texts: HashMap<DocKey, String>,
}

impl LocalDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &DocKey) -> Option<&str> {
        self.texts.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: DocKey, text: impl Into<String>) {
        self.texts.insert(key, text.into());
    }

    /// Apply serialized patch text to the local copy (empty if unseen).
    pub fn apply_patch<P: PatchEngine>(
        &mut self,
        engine: &P,
        key: &DocKey,
        patch_text: &str,
    ) -> Result<(String, bool), PatchError> {
        let script = engine.deserialize(patch_text)?;
        let base = self.get(key).unwrap_or_default();
        let outcome = engine.apply(&script, base)?;
        let clean = outcome.is_clean();
        self.texts.insert(key.clone(), outcome.text.clone());
        Ok((outcome.text, clean))
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Turn one relayed frame into an event, updating local copies on
/// `applyPatch`.
pub fn handle_frame<P: PatchEngine>(engine: &P, documents: &mut LocalDocuments, raw: &str) -> RelayEvent {
    match Action::from_json(raw) {
        Ok(Action::ApplyPatch(patch)) => {
            let doc_key = patch.doc_key();
            match documents.apply_patch(engine, &doc_key, &patch.patch) {
                Ok((text, clean)) => RelayEvent::PatchApplied { doc_key, text, clean },
                Err(e) => {
                    log::warn!("Could not apply patch for {doc_key}: {e}");
                    RelayEvent::PatchRejected {
                        doc_key,
                        reason: e.to_string(),
                    }
                }
            }
        }
        Ok(Action::Sync(SyncSignal { url })) => RelayEvent::Sync { url },
        _ => RelayEvent::Relayed(raw.to_owned()),
    }
}

/// Report an event without waiting on the consumer.
fn emit(event_tx: &mpsc::Sender<RelayEvent>, event: RelayEvent) {
    if let Err(e) = event_tx.try_send(event) {
        log::debug!("Dropping client event: {e}");
    }
}

/// The relay client.
///
/// Connects to `{server_url}/{room_key}` and keeps local copies of every
/// text fragment it edits or receives patches for.
pub struct RelayClient {
    room_key: String,

    server_url: String,

    state: Arc<RwLock<ConnectionState>>,

    documents: Arc<Mutex<LocalDocuments>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    event_rx: Option<mpsc::Receiver<RelayEvent>>,

    event_tx: mpsc::Sender<RelayEvent>,
}

impl RelayClient {
    pub fn new(room_key: impl Into<String>, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            room_key: room_key.into(),
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            documents: Arc::new(Mutex::new(LocalDocuments::new())),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx.take()
    }

    /// Connect to the relay.
    ///
    /// Spawns background tasks for reading and writing WebSocket frames.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = format!("{}/{}", self.server_url.trim_end_matches('/'), self.room_key);
        let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(connected) => connected,
            Err(e) => {
                log::warn!("Failed to connect to {url}: {e}");
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);

        // Writer task: forward outgoing channel to WebSocket
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        emit(&self.event_tx, RelayEvent::Connected);
        log::info!("Connected to {url}");

        // Reader task: apply patches and surface events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let documents = self.documents.clone();
        tokio::spawn(async move {
            let engine = DmpPatchEngine::new();
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        // Local copies advance even when nobody drains events
                        let event = {
                            let mut docs = documents.lock().await;
                            handle_frame(&engine, &mut docs, text.as_str())
                        };
                        emit(&event_tx, event);
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            emit(&event_tx, RelayEvent::Disconnected);
        });

        Ok(())
    }

    /// Close the connection; the writer task shuts the socket down.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Edit a text fragment locally and send the edit to the room.
    ///
    /// `originalText` is the local copy before the edit, or empty if the
    /// fragment was never seen.
    pub async fn send_edit(
        &self,
        element_id: impl Into<String>,
        part_id: impl Into<String>,
        new_text: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        let doc_key = DocKey::new(element_id, part_id);
        let new_text = new_text.into();

        let original_text = {
            let mut docs = self.documents.lock().await;
            let original = docs.get(&doc_key).unwrap_or_default().to_owned();
            docs.set(doc_key.clone(), new_text.clone());
            original
        };

        let action = Action::TextEdit(EditAction {
            element_id: doc_key.element_id,
            part_id: doc_key.part_id,
            original_text,
            new_text,
        });
        self.send_raw(action.to_json()?).await
    }

    /// Ask peers to resync their canvas from `url`.
    pub async fn send_sync(&self, url: impl Into<String>) -> Result<(), ProtocolError> {
        let action = Action::Sync(SyncSignal { url: url.into() });
        self.send_raw(action.to_json()?).await
    }

    /// Send a frame as-is.
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<(), ProtocolError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(text.into())
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Seed a local copy without sending anything.
    pub async fn set_local_text(&self, key: DocKey, text: impl Into<String>) {
        self.documents.lock().await.set(key, text);
    }

    pub async fn local_text(&self, key: &DocKey) -> Option<String> {
        self.documents.lock().await.get(key).map(str::to_owned)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn room_key(&self) -> &str {
        &self.room_key
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

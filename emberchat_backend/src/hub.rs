use crate::events::ServerEvent;
use crate::messages::{extract_media_keys, ChatMessage, MessageBody, SendMessageInput};
use crate::notify::{NotifyEvent, Notifier};
use crate::pending::{PendingEntry, PendingQueue};
use crate::resolution::MediaResolutionMap;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

/// Everything the relay mutates lives behind one lock: the client registry,
/// the resolution map, and the pending queue. `on_send`,
/// `on_upload_complete`, and the sweep's invalidation step each take the
/// lock once for their whole mutation, so none of them interleave
/// mid-operation.
#[derive(Default)]
pub struct RelayState {
    clients: HashMap<String, UnboundedSender<ServerEvent>>,
    pub resolutions: MediaResolutionMap,
    pub pending: PendingQueue,
}

impl RelayState {
    fn broadcast(&mut self, event: ServerEvent) {
        let mut dead = Vec::new();
        for (client_id, sender) in &self.clients {
            if sender.send(event.clone()).is_err() {
                dead.push(client_id.clone());
            }
        }
        for client_id in dead {
            self.clients.remove(&client_id);
            tracing::debug!(client_id = %client_id, "pruned closed client during broadcast");
        }
    }

    fn send_to(&self, client_id: &str, event: ServerEvent) {
        match self.clients.get(client_id) {
            Some(sender) => {
                if sender.send(event).is_err() {
                    tracing::warn!(client_id = %client_id, "client channel closed, event dropped");
                }
            }
            None => {
                tracing::warn!(client_id = %client_id, "no such client for directed event");
            }
        }
    }
}

/// Owns client connections and coordinates deferred media resolution
/// between the resolution map and the pending queue.
#[derive(Clone)]
pub struct ConnectionHub {
    state: Arc<Mutex<RelayState>>,
    notifier: Notifier,
}

impl ConnectionHub {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            state: Arc::new(Mutex::new(RelayState::default())),
            notifier,
        }
    }

    /// Shared handle to the relay state, used by the lifecycle manager for
    /// its invalidation and eviction steps.
    pub fn state(&self) -> Arc<Mutex<RelayState>> {
        self.state.clone()
    }

    pub async fn on_connect(&self, client_id: &str, sender: UnboundedSender<ServerEvent>) {
        let mut state = self.state.lock().await;
        state.clients.insert(client_id.to_string(), sender);
        tracing::info!(client_id = %client_id, clients = state.clients.len(), "client connected");
        drop(state);
        self.notifier.notify_detached(NotifyEvent::ClientConnected {
            client_id: client_id.to_string(),
        });
    }

    /// Deregisters the client. Pending entries referencing it stay queued:
    /// the upload may still arrive out-of-band, and TTL eviction bounds the
    /// wait.
    pub async fn on_disconnect(&self, client_id: &str) {
        let mut state = self.state.lock().await;
        state.clients.remove(client_id);
        tracing::info!(client_id = %client_id, clients = state.clients.len(), "client disconnected");
        drop(state);
        self.notifier.notify_detached(NotifyEvent::ClientDisconnected {
            client_id: client_id.to_string(),
        });
    }

    /// Relays a message, deferring broadcast until every referenced media
    /// key has a durable URL. Messages with nothing to resolve broadcast
    /// while the lock is held, which keeps them in submission order.
    pub async fn on_send(&self, client_id: &str, input: SendMessageInput) -> Result<()> {
        let ChatMessage {
            id,
            sender,
            body,
            created_at,
        } = ChatMessage::from_input(client_id, input);
        let mut state = self.state.lock().await;

        match body {
            MessageBody::DirectMedia { url } => {
                if url.trim().is_empty() {
                    anyhow::bail!("media url may not be empty");
                }
                tracing::debug!(message_id = %id, "broadcasting pre-resolved media message");
                state.broadcast(ServerEvent::NewMessage(ChatMessage {
                    id,
                    sender,
                    body: MessageBody::DirectMedia { url },
                    created_at,
                }));
            }
            MessageBody::Text { mut text } => {
                if text.trim().is_empty() {
                    anyhow::bail!("message text may not be empty");
                }
                let mut unresolved = Vec::new();
                for key in extract_media_keys(&text) {
                    match state.resolutions.get(&key) {
                        Some(url) => text = text.replace(&key, url),
                        None => unresolved.push(key),
                    }
                }

                let message = ChatMessage {
                    id,
                    sender,
                    body: MessageBody::Text { text },
                    created_at,
                };

                if unresolved.is_empty() {
                    state.broadcast(ServerEvent::NewMessage(message));
                } else {
                    tracing::info!(
                        message_id = %message.id,
                        client_id = %client_id,
                        unresolved = unresolved.len(),
                        "queueing message pending media upload"
                    );
                    for key in &unresolved {
                        state.send_to(
                            client_id,
                            ServerEvent::RequestBlobUpload { key: key.clone() },
                        );
                    }
                    state.pending.insert(PendingEntry::new(message, unresolved));
                }
            }
        }
        Ok(())
    }

    /// Records the key's durable URL, then reruns resolution over the
    /// queue and broadcasts every message that became fully resolved.
    pub async fn on_upload_complete(&self, key: &str, url: &str) {
        let mut state = self.state.lock().await;
        state.resolutions.put(key, url);
        let ready = state.pending.resolve(key, url);
        for message in ready {
            tracing::info!(message_id = %message.id, key = %key, "pending message fully resolved");
            state.broadcast(ServerEvent::NewMessage(message));
        }
    }

    pub async fn connected_clients(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    pub async fn pending_messages(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn connect(hub: &ConnectionHub, client_id: &str) -> UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.on_connect(client_id, tx).await;
        rx
    }

    fn text_input(id: &str, text: &str) -> SendMessageInput {
        SendMessageInput {
            id: Some(id.into()),
            body: MessageBody::Text { text: text.into() },
        }
    }

    fn recv_new_message(rx: &mut UnboundedReceiver<ServerEvent>) -> ChatMessage {
        match rx.try_recv().expect("event expected") {
            ServerEvent::NewMessage(message) => message,
            other => panic!("expected NewMessage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_message_broadcasts_to_everyone_immediately() {
        let hub = ConnectionHub::new(Notifier::disabled());
        let mut alice = connect(&hub, "alice").await;
        let mut bob = connect(&hub, "bob").await;

        hub.on_send("alice", text_input("1", "hello there")).await.unwrap();

        assert_eq!(recv_new_message(&mut alice).text(), Some("hello there"));
        assert_eq!(recv_new_message(&mut bob).text(), Some("hello there"));
        assert_eq!(hub.pending_messages().await, 0);
    }

    #[tokio::test]
    async fn direct_media_skips_text_scanning() {
        let hub = ConnectionHub::new(Notifier::disabled());
        let mut alice = connect(&hub, "alice").await;

        hub.on_send(
            "alice",
            SendMessageInput {
                id: Some("1".into()),
                body: MessageBody::DirectMedia {
                    url: "https://host/files/pre.png".into(),
                },
            },
        )
        .await
        .unwrap();

        let message = recv_new_message(&mut alice);
        assert!(matches!(message.body, MessageBody::DirectMedia { .. }));
    }

    #[tokio::test]
    async fn unresolved_key_defers_broadcast_and_asks_originator() {
        let hub = ConnectionHub::new(Notifier::disabled());
        let mut alice = connect(&hub, "alice").await;
        let mut bob = connect(&hub, "bob").await;

        hub.on_send("alice", text_input("1", "see blob:abc")).await.unwrap();

        // Only the originating client is asked to upload.
        match alice.try_recv().expect("upload request") {
            ServerEvent::RequestBlobUpload { key } => assert_eq!(key, "blob:abc"),
            other => panic!("expected RequestBlobUpload, got {other:?}"),
        }
        assert!(bob.try_recv().is_err());
        assert_eq!(hub.pending_messages().await, 1);

        hub.on_upload_complete("blob:abc", "https://host/files/xyz.png").await;

        let to_alice = recv_new_message(&mut alice);
        let to_bob = recv_new_message(&mut bob);
        assert_eq!(to_alice.text(), Some("see https://host/files/xyz.png"));
        assert_eq!(to_bob.text(), Some("see https://host/files/xyz.png"));
        assert_eq!(hub.pending_messages().await, 0);

        // No duplicate broadcast when the completion is reported twice.
        hub.on_upload_complete("blob:abc", "https://host/files/xyz.png").await;
        assert!(alice.try_recv().is_err());
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn already_resolved_keys_substitute_synchronously() {
        let hub = ConnectionHub::new(Notifier::disabled());
        let mut alice = connect(&hub, "alice").await;

        hub.on_upload_complete("blob:abc", "https://host/files/xyz.png").await;
        hub.on_send("alice", text_input("1", "see blob:abc")).await.unwrap();

        let message = recv_new_message(&mut alice);
        assert_eq!(message.text(), Some("see https://host/files/xyz.png"));
        assert_eq!(hub.pending_messages().await, 0);
    }

    #[tokio::test]
    async fn one_upload_releases_every_message_sharing_the_key() {
        let hub = ConnectionHub::new(Notifier::disabled());
        let mut alice = connect(&hub, "alice").await;
        let mut bob = connect(&hub, "bob").await;

        hub.on_send("alice", text_input("1", "first blob:shared")).await.unwrap();
        hub.on_send("bob", text_input("2", "second blob:shared")).await.unwrap();
        // Drain the two upload requests.
        alice.try_recv().expect("request to alice");
        bob.try_recv().expect("request to bob");
        assert_eq!(hub.pending_messages().await, 2);

        hub.on_upload_complete("blob:shared", "https://host/files/s.png").await;

        let first = recv_new_message(&mut alice);
        let second = recv_new_message(&mut alice);
        assert_eq!(first.text(), Some("first https://host/files/s.png"));
        assert_eq!(second.text(), Some("second https://host/files/s.png"));
        assert_eq!(hub.pending_messages().await, 0);
    }

    #[tokio::test]
    async fn multi_key_message_waits_for_the_last_upload() {
        let hub = ConnectionHub::new(Notifier::disabled());
        let mut alice = connect(&hub, "alice").await;

        hub.on_send("alice", text_input("1", "blob:a and blob:b")).await.unwrap();
        // Two distinct keys, one upload request each.
        alice.try_recv().expect("first request");
        alice.try_recv().expect("second request");

        hub.on_upload_complete("blob:b", "https://host/files/b.png").await;
        assert!(alice.try_recv().is_err());
        assert_eq!(hub.pending_messages().await, 1);

        hub.on_upload_complete("blob:a", "https://host/files/a.png").await;
        let message = recv_new_message(&mut alice);
        assert_eq!(
            message.text(),
            Some("https://host/files/a.png and https://host/files/b.png")
        );
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_touching_state() {
        let hub = ConnectionHub::new(Notifier::disabled());
        let mut alice = connect(&hub, "alice").await;

        assert!(hub.on_send("alice", text_input("1", "   ")).await.is_err());
        assert!(alice.try_recv().is_err());
        assert_eq!(hub.pending_messages().await, 0);
    }

    #[tokio::test]
    async fn disconnect_keeps_pending_entries() {
        let hub = ConnectionHub::new(Notifier::disabled());
        let mut alice = connect(&hub, "alice").await;
        let mut bob = connect(&hub, "bob").await;
        hub.on_send("alice", text_input("1", "see blob:late")).await.unwrap();
        alice.try_recv().expect("upload request");

        hub.on_disconnect("alice").await;
        assert_eq!(hub.pending_messages().await, 1);

        // Upload still lands (e.g. via the HTTP endpoint) and bob gets it.
        hub.on_upload_complete("blob:late", "https://host/files/l.png").await;
        let message = recv_new_message(&mut bob);
        assert_eq!(message.text(), Some("see https://host/files/l.png"));
    }
}

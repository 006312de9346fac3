use crate::messages::{ChatMessage, SendMessageInput};
use serde::{Deserialize, Serialize};

/// Events a client may submit over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientEvent {
    SendMessage(SendMessageInput),
    BlobUploadComplete { key: String, url: String },
}

/// Events the server pushes to connected clients. `NewMessage` goes to
/// every client; `RequestBlobUpload` is directed at the originating client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerEvent {
    NewMessage(ChatMessage),
    RequestBlobUpload { key: String },
}

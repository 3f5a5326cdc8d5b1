//! Wire protocol for the import websocket.
//!
//! Text frames carry JSON `{type, payload}` envelopes in both directions;
//! binary frames carry raw CSV bytes. Header fields are all optional and
//! fall back to the defaults in [`crate::types::context`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    ImportContext, ImportError, ImportKind, DEFAULT_BATCH_SIZE, DEFAULT_DELIMITER,
};

/// Messages received from the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session opener carrying the import configuration.
    Header {
        #[serde(default)]
        payload: Option<HeaderPayload>,
    },
    /// End of upload; the client has no more bytes to send.
    Done,
}

/// Header payload as sent by the admin UI. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderPayload {
    #[serde(default)]
    pub import_kind: Option<String>,
    #[serde(default)]
    pub contact_group: Option<Uuid>,
    #[serde(default)]
    pub recipient_list: Option<Uuid>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub delimiter: Option<String>,
}

impl HeaderPayload {
    /// Apply defaulting rules and validate into an [`ImportContext`]:
    /// kind "insert", batch size 50000, delimiter "," unless specified.
    pub fn into_context(self) -> Result<ImportContext, ImportError> {
        let kind = match self.import_kind.as_deref() {
            None => ImportKind::InsertAndSkipExisting,
            Some(value) => ImportKind::parse(value)?,
        };
        let groups: Vec<Uuid> = self
            .contact_group
            .into_iter()
            .chain(self.recipient_list)
            .collect();
        ImportContext::new(
            groups,
            self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            self.delimiter.as_deref().unwrap_or(DEFAULT_DELIMITER),
            kind,
        )
    }
}

/// Messages sent to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Header accepted; the client may start streaming binary frames.
    HeaderConfirmed(String),
    /// Byte count of the binary frame just received.
    Progress(usize),
    /// The server is falling behind; the client should pause briefly.
    Toofast(String),
    /// Human-readable status line for the UI log panel.
    Msg(String),
    /// Import complete; the client may close the connection.
    Finished(String),
}

impl ServerMessage {
    pub fn header_confirmed() -> Self {
        Self::HeaderConfirmed(String::new())
    }

    pub fn too_fast() -> Self {
        Self::Toofast(String::new())
    }

    pub fn finished() -> Self {
        Self::Finished(String::new())
    }
}

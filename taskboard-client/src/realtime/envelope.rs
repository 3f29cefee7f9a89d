//! Push channel wire format (JSON text frames)

use serde::{Deserialize, Serialize};

use crate::models::{Notification, NotificationId};

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEnvelope {
    Notification {
        notification: Notification,
    },
    ReadConfirmation {
        notification_id: NotificationId,
    },
    AllReadConfirmation,
    #[serde(other)]
    Unknown,
}

/// Client → server actions. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    MarkRead { notification_id: NotificationId },
    MarkAllRead,
}

impl OutboundEnvelope {
    pub fn to_text(&self) -> String {
        // Only integer and tag fields, serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

//! Push channel: connection lifecycle, dedup and fan-out of notifications.

pub mod backoff;
pub mod channel;
pub mod dedup;
pub mod envelope;
pub mod socket;
pub mod subscribers;

pub use backoff::BackoffPolicy;
pub use channel::{ConnectionState, RealtimeChannel, ReconnectState};
pub use dedup::{NotificationDeduplicator, DEFAULT_DEDUP_CAPACITY};
pub use envelope::{InboundEnvelope, OutboundEnvelope};
pub use socket::{InboundFrames, OutboundFrames, PushConnection, PushConnector, WebSocketConnector};
pub use subscribers::{Listener, SubscriberRegistry, Subscription};

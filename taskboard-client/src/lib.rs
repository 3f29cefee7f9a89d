//! Resilient client transport for the taskboard backend
//!
//! Turns an unreliable backend conversation (expiring bearer credentials,
//! anti-abuse challenges, a push channel that can drop at any time) into a
//! plain request/response and publish/subscribe surface.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskboard_client::{
//!     ChannelChallengeHandler, ChannelConfig, ClientConfig, CredentialStore, RealtimeChannel,
//!     RequestGateway, TaskboardApi,
//! };
//!
//! # async fn example() -> taskboard_client::Result<()> {
//! let (handler, mut prompts) = ChannelChallengeHandler::channel(1);
//! let gateway = RequestGateway::builder(ClientConfig::default())
//!     .challenge_handler(Arc::new(handler))
//!     .build()?;
//! let api = TaskboardApi::new(gateway.clone());
//!
//! // Answer challenges somewhere in the UI
//! tokio::spawn(async move {
//!     while let Some(prompt) = prompts.recv().await {
//!         prompt.answer("42");
//!     }
//! });
//!
//! api.login("alice", "hunter2").await?;
//!
//! let channel = RealtimeChannel::new(ChannelConfig::default());
//! let _subscription = channel.subscribe(|n| println!("{}", n.message));
//! if let Some(credential) = gateway.credentials().get() {
//!     channel.connect(credential.access);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod challenge;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod gateway;
pub mod models;
pub mod realtime;
pub mod refresh;
pub mod request;
pub mod testing;
pub mod transport;

// Re-export main types
pub use api::TaskboardApi;
pub use challenge::{
    CaptchaChallengeBroker, Challenge, ChallengeHandler, ChallengePrompt,
    ChannelChallengeHandler, DeclineChallenges,
};
pub use config::{ChannelConfig, ClientConfig};
pub use credentials::{Credential, CredentialStore, MemoryCredentialStore};
pub use error::{ClientError, Result};
pub use events::{SessionEvent, SessionEvents};
pub use gateway::{GatewayBuilder, RequestGateway};
pub use models::*;
pub use realtime::{
    BackoffPolicy, ConnectionState, NotificationDeduplicator, PushConnector, RealtimeChannel,
    Subscription,
};
pub use refresh::RefreshCoordinator;
pub use request::{RequestDescriptor, Response};
pub use transport::{HttpTransport, ReqwestTransport};

//! Anti-abuse challenge hand-off
//!
//! A call rejected with a challenge is parked here while a human answers the
//! question. Each challenge carries its own id and reply channel, and prompts
//! are presented one at a time, so an answer can only ever resume the call it
//! was asked for.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::gateway::RequestGateway;
use crate::request::{RequestDescriptor, Response};

/// A server-issued human-verification question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub id: Uuid,
    pub question: String,
}

impl Challenge {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
        }
    }
}

/// UI-side solver. `None` cancels the challenge.
#[async_trait]
pub trait ChallengeHandler: Send + Sync {
    async fn on_challenge(&self, challenge: Challenge) -> Option<String>;
}

/// A challenge waiting for the UI, with its reply slot.
#[derive(Debug)]
pub struct ChallengePrompt {
    pub challenge: Challenge,
    reply: oneshot::Sender<Option<String>>,
}

impl ChallengePrompt {
    pub fn answer(self, answer: impl Into<String>) {
        let _ = self.reply.send(Some(answer.into()));
    }

    pub fn cancel(self) {
        let _ = self.reply.send(None);
    }
}

/// Forwards challenges to the UI over a channel.
///
/// Dropping a prompt without answering it counts as cancellation.
#[derive(Debug, Clone)]
pub struct ChannelChallengeHandler {
    tx: mpsc::Sender<ChallengePrompt>,
}

impl ChannelChallengeHandler {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ChallengePrompt>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ChallengeHandler for ChannelChallengeHandler {
    async fn on_challenge(&self, challenge: Challenge) -> Option<String> {
        let (reply, answer) = oneshot::channel();
        if self.tx.send(ChallengePrompt { challenge, reply }).await.is_err() {
            warn!("Challenge receiver is gone, cancelling challenge");
            return None;
        }
        answer.await.unwrap_or(None)
    }
}

/// Handler that cancels every challenge, for contexts with nobody to ask.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclineChallenges;

#[async_trait]
impl ChallengeHandler for DeclineChallenges {
    async fn on_challenge(&self, _challenge: Challenge) -> Option<String> {
        None
    }
}

/// Suspends challenged calls and resumes them with the human's answer.
pub struct CaptchaChallengeBroker {
    handler: Arc<dyn ChallengeHandler>,
    answer_header: String,
    timeout: Duration,
    presenting: Mutex<()>,
}

impl CaptchaChallengeBroker {
    pub fn new(
        handler: Arc<dyn ChallengeHandler>,
        answer_header: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            handler,
            answer_header: answer_header.into(),
            timeout,
            presenting: Mutex::new(()),
        }
    }

    /// Present a question and wait for the answer.
    ///
    /// An unanswered challenge is cancelled once the timeout elapses.
    pub async fn open(&self, question: &str) -> Option<String> {
        let _turn = self.presenting.lock().await;
        let challenge = Challenge::new(question);
        let id = challenge.id;
        info!(challenge_id = %id, "Presenting challenge");

        match tokio::time::timeout(self.timeout, self.handler.on_challenge(challenge)).await {
            Ok(answer) => {
                debug!(challenge_id = %id, answered = answer.is_some(), "Challenge resolved");
                answer
            }
            Err(_) => {
                warn!(
                    challenge_id = %id,
                    timeout_secs = self.timeout.as_secs(),
                    "Challenge unanswered, cancelling"
                );
                None
            }
        }
    }

    /// Resolve a challenge for `request` and resubmit it with the answer.
    ///
    /// The resubmission's outcome is the caller's outcome. A cancelled
    /// challenge rejects with `original` and nothing is resubmitted.
    pub(crate) async fn challenge_and_retry(
        &self,
        gateway: &RequestGateway,
        mut request: RequestDescriptor,
        question: String,
        original: ClientError,
    ) -> Result<Response> {
        match self.open(&question).await {
            Some(answer) => {
                request.set_header(&self.answer_header, &answer)?;
                info!(path = %request.path, "Resubmitting challenged request");
                gateway.send(request).await
            }
            None => Err(original),
        }
    }
}

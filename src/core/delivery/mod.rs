//! Delivery of results back into the realtime session.
//!
//! The data channel may not be open when a result becomes available, so
//! delivery checks readiness and backs off exponentially between checks. Once
//! the channel is open every message of a [`DeliveryPlan`] is sent in order,
//! each send awaited before the next. Nothing is retried after a successful
//! sequence.
//!
//! The retry loop polls the session's active flag before every check and
//! stops silently once the session has ended.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;

use crate::core::realtime::{ClientEvent, DataChannel};

/// Errors that end a delivery without sending the full plan.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The channel never became ready within the attempt budget
    #[error("Data channel not ready after {attempts} attempts")]
    ChannelUnavailable { attempts: u32 },

    /// A send failed part way through the sequence
    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

/// How a delivery finished when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// All messages were sent, on the given (1-based) readiness check
    Delivered { attempts: u32 },
    /// The session ended or lost its channel before the plan could be sent
    Aborted,
}

/// Retry policy for readiness checks.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPolicy {
    /// Number of readiness checks before giving up.
    /// Default: 5
    pub max_attempts: u32,

    /// Wait after the first failed check.
    /// Default: 1000ms
    pub initial_delay: Duration,

    /// Multiplier for exponential backoff.
    /// Default: 2
    pub multiplier: u32,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            multiplier: 2,
        }
    }
}

impl DeliveryPolicy {
    /// Wait after the failed check with the given 0-based index:
    /// `initial_delay * multiplier^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.initial_delay.saturating_mul(factor)
    }

    /// Total wait before a channel that opens on check `n` (1-based) is used.
    pub fn elapsed_before(&self, n: u32) -> Duration {
        (0..n.saturating_sub(1)).map(|i| self.delay_for(i)).sum()
    }
}

/// Shared view of a session used by background delivery tasks.
///
/// Cloning is cheap; all clones observe the same active flag and channel slot.
#[derive(Clone, Default)]
pub struct SessionHandle {
    active: Arc<AtomicBool>,
    channel: Arc<RwLock<Option<Arc<dyn DataChannel>>>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Install the data channel for this session.
    pub fn attach(&self, channel: Arc<dyn DataChannel>) {
        *self.channel.write() = Some(channel);
    }

    /// Remove and return the data channel.
    pub fn detach(&self) -> Option<Arc<dyn DataChannel>> {
        self.channel.write().take()
    }

    pub fn channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.channel.read().clone()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("active", &self.is_active())
            .field("has_channel", &self.channel.read().is_some())
            .finish()
    }
}

/// Messages to deliver for one outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryPlan {
    /// Answer a tool call: function result, assistant message, speech trigger
    AnalysisResult {
        call_id: Option<String>,
        text: String,
    },
    /// Speak an apology: assistant message, speech trigger
    Apology { text: String },
}

impl DeliveryPlan {
    /// The ordered client events of this plan.
    pub fn messages(&self) -> Vec<ClientEvent> {
        match self {
            DeliveryPlan::AnalysisResult { call_id, text } => {
                let output = serde_json::json!({ "description": text }).to_string();
                vec![
                    ClientEvent::function_result(call_id.as_deref(), output),
                    ClientEvent::assistant_message(text),
                    ClientEvent::speak(),
                ]
            }
            DeliveryPlan::Apology { text } => {
                vec![ClientEvent::assistant_message(text), ClientEvent::speak()]
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DeliveryPlan::AnalysisResult { .. } => "analysis result",
            DeliveryPlan::Apology { .. } => "apology",
        }
    }
}

/// Sends delivery plans over a session's data channel.
#[derive(Debug, Clone)]
pub struct DeliveryAdapter {
    session: SessionHandle,
    policy: DeliveryPolicy,
}

impl DeliveryAdapter {
    pub fn new(session: SessionHandle, policy: DeliveryPolicy) -> Self {
        Self { session, policy }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Deliver every message of `plan`, waiting for the channel if needed.
    pub async fn deliver(&self, plan: &DeliveryPlan) -> Result<DeliveryOutcome, DeliveryError> {
        let max_attempts = self.policy.max_attempts;

        for attempt in 0..max_attempts {
            if !self.session.is_active() {
                tracing::debug!("Session inactive, dropping {} delivery", plan.kind());
                return Ok(DeliveryOutcome::Aborted);
            }
            let Some(channel) = self.session.channel() else {
                tracing::debug!("No data channel, dropping {} delivery", plan.kind());
                return Ok(DeliveryOutcome::Aborted);
            };

            if channel.is_open() {
                for message in plan.messages() {
                    channel
                        .send(message)
                        .await
                        .map_err(|e| DeliveryError::SendFailed(e.to_string()))?;
                }
                tracing::info!(
                    "Delivered {} on attempt {}/{}",
                    plan.kind(),
                    attempt + 1,
                    max_attempts
                );
                return Ok(DeliveryOutcome::Delivered {
                    attempts: attempt + 1,
                });
            }

            let delay = self.policy.delay_for(attempt);
            tracing::debug!(
                "Data channel not ready (attempt {}/{}), waiting {:?}",
                attempt + 1,
                max_attempts,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        Err(DeliveryError::ChannelUnavailable {
            attempts: max_attempts,
        })
    }

    /// Deliver and log any failure. Used by background delivery tasks.
    pub async fn deliver_logged(&self, plan: &DeliveryPlan) -> Option<DeliveryOutcome> {
        match self.deliver(plan).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!("Failed to deliver {}: {}", plan.kind(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::{RealtimeError, RealtimeResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;
    use tokio::time::Instant;

    /// Channel that reports open from the `open_on`-th readiness check onwards.
    struct ScriptedChannel {
        open_on: Option<u32>,
        checks: AtomicU32,
        fail_on_send: Option<usize>,
        sent: Mutex<Vec<ClientEvent>>,
    }

    impl ScriptedChannel {
        fn opening_on(n: Option<u32>) -> Arc<Self> {
            Arc::new(Self {
                open_on: n,
                checks: AtomicU32::new(0),
                fail_on_send: None,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<ClientEvent> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl DataChannel for ScriptedChannel {
        fn is_open(&self) -> bool {
            let check = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            self.open_on.is_some_and(|n| check >= n)
        }

        async fn send(&self, event: ClientEvent) -> RealtimeResult<()> {
            let mut sent = self.sent.lock();
            if self.fail_on_send == Some(sent.len()) {
                return Err(RealtimeError::WebSocketError("broken pipe".to_string()));
            }
            sent.push(event);
            Ok(())
        }
    }

    fn active_session(channel: Arc<ScriptedChannel>) -> SessionHandle {
        let session = SessionHandle::new();
        session.set_active(true);
        session.attach(channel);
        session
    }

    fn result_plan() -> DeliveryPlan {
        DeliveryPlan::AnalysisResult {
            call_id: Some("call_1".to_string()),
            text: "A cup on a table.".to_string(),
        }
    }

    #[test]
    fn test_policy_defaults_and_delays() {
        let policy = DeliveryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(16000));
        assert_eq!(policy.elapsed_before(1), Duration::ZERO);
        assert_eq!(policy.elapsed_before(5), Duration::from_millis(15000));
    }

    #[test]
    fn test_plan_messages() {
        let messages = result_plan().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[0],
            ClientEvent::function_result(
                Some("call_1"),
                r#"{"description":"A cup on a table."}"#.into()
            )
        );
        assert_eq!(messages[1], ClientEvent::assistant_message("A cup on a table."));
        assert_eq!(messages[2], ClientEvent::speak());

        let apology = DeliveryPlan::Apology {
            text: "Sorry".to_string(),
        }
        .messages();
        assert_eq!(
            apology,
            vec![ClientEvent::assistant_message("Sorry"), ClientEvent::speak()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_waits_for_channel_to_open() {
        let policy = DeliveryPolicy::default();
        for n in 1..=5 {
            let channel = ScriptedChannel::opening_on(Some(n));
            let adapter = DeliveryAdapter::new(active_session(channel.clone()), policy.clone());

            let start = Instant::now();
            let outcome = adapter.deliver(&result_plan()).await.unwrap();

            assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: n });
            assert_eq!(start.elapsed(), policy.elapsed_before(n));
            assert_eq!(channel.sent(), result_plan().messages());
            assert_eq!(channel.checks.load(Ordering::SeqCst), n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_never_opens() {
        let channel = ScriptedChannel::opening_on(None);
        let adapter = DeliveryAdapter::new(active_session(channel.clone()), DeliveryPolicy::default());

        let start = Instant::now();
        let err = adapter.deliver(&result_plan()).await.unwrap_err();

        assert_eq!(err, DeliveryError::ChannelUnavailable { attempts: 5 });
        assert!(channel.sent().is_empty());
        assert_eq!(channel.checks.load(Ordering::SeqCst), 5);
        // 1s + 2s + 4s + 8s + 16s, one wait after each failed check
        assert_eq!(start.elapsed(), Duration::from_millis(31000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_session_aborts_silently() {
        let channel = ScriptedChannel::opening_on(Some(1));
        let session = active_session(channel.clone());
        session.set_active(false);

        let adapter = DeliveryAdapter::new(session, DeliveryPolicy::default());
        let outcome = adapter.deliver(&result_plan()).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Aborted);
        assert!(channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_ending_during_backoff_aborts() {
        let channel = ScriptedChannel::opening_on(Some(4));
        let session = active_session(channel.clone());
        let adapter = DeliveryAdapter::new(session.clone(), DeliveryPolicy::default());

        let task = tokio::spawn(async move { adapter.deliver(&result_plan()).await });
        tokio::time::sleep(Duration::from_millis(1500)).await;
        session.set_active(false);

        assert_eq!(task.await.unwrap().unwrap(), DeliveryOutcome::Aborted);
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_channel_aborts() {
        let session = SessionHandle::new();
        session.set_active(true);
        let adapter = DeliveryAdapter::new(session, DeliveryPolicy::default());
        assert_eq!(
            adapter.deliver(&result_plan()).await.unwrap(),
            DeliveryOutcome::Aborted
        );
    }

    #[tokio::test]
    async fn test_send_failure_is_not_retried() {
        let channel = Arc::new(ScriptedChannel {
            open_on: Some(1),
            checks: AtomicU32::new(0),
            fail_on_send: Some(1),
            sent: Mutex::new(Vec::new()),
        });
        let adapter = DeliveryAdapter::new(active_session(channel.clone()), DeliveryPolicy::default());

        let err = adapter.deliver(&result_plan()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::SendFailed(_)));
        assert_eq!(channel.sent().len(), 1);
        assert_eq!(channel.checks.load(Ordering::SeqCst), 1);
        assert!(adapter.deliver_logged(&result_plan()).await.is_none());
    }

    #[test]
    fn test_session_handle_attach_detach() {
        let session = SessionHandle::new();
        assert!(!session.is_active());
        assert!(session.channel().is_none());

        session.attach(ScriptedChannel::opening_on(Some(1)));
        let clone = session.clone();
        assert!(clone.channel().is_some());
        assert!(session.detach().is_some());
        assert!(clone.channel().is_none());
    }
}

//! Secure-then-send orchestration.
//!
//! Phase one asks a [`SecureStep`] for the secured message, phase two hands it
//! to a [`TransportSender`]. Both phases share one timeout budget. When neither
//! phase suspends, the whole operation completes inside [`SecureAndSendPipeline::begin`]
//! and no future is allocated for the continuation.

use crate::correlation::CorrelationState;
use crate::error::{Result, WsSecurityError};
use crate::message::Message;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of a step that either finished on the calling stack or suspended.
pub enum Completion<'a, T> {
    Ready(T),
    Pending(BoxFuture<'a, T>),
}

impl<'a, T> Completion<'a, T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub async fn resolve(self) -> T {
        match self {
            Self::Ready(value) => value,
            Self::Pending(future) => future.await,
        }
    }
}

/// Output of phase one.
#[derive(Debug, Default)]
pub struct SecureOutput {
    /// Secured message; `None` is a broken step
    pub message: Option<Message>,
    /// State for the next message of the exchange
    pub correlation_state: Option<Arc<CorrelationState>>,
}

/// Builds the security header of an outgoing message.
pub trait SecureStep: Send + Sync {
    fn secure<'a>(
        &'a self,
        message: Message,
        correlation: Option<Arc<CorrelationState>>,
        timeout: Duration,
    ) -> Completion<'a, Result<SecureOutput>>;
}

/// Puts a secured message on the wire.
pub trait TransportSender: Send + Sync {
    fn send<'a>(&'a self, message: Message, timeout: Duration) -> Completion<'a, Result<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    SecuringInFlight,
    Secured,
    SendingInFlight,
    Completed,
}

/// Handle returned by [`SecureAndSendPipeline::begin`].
pub enum SendOperation<'a> {
    /// Both phases finished without suspending
    CompletedSynchronously(Result<Option<Arc<CorrelationState>>>),
    /// At least one phase suspended; await the future for the outcome
    InFlight(BoxFuture<'a, Result<Option<Arc<CorrelationState>>>>),
}

impl<'a> SendOperation<'a> {
    pub fn completed_synchronously(&self) -> bool {
        matches!(self, Self::CompletedSynchronously(_))
    }

    /// Correlation state for the reply, once both phases are done.
    pub async fn wait(self) -> Result<Option<Arc<CorrelationState>>> {
        match self {
            Self::CompletedSynchronously(result) => result,
            Self::InFlight(future) => future.await,
        }
    }
}

/// Remaining time shared by both phases.
#[derive(Debug, Clone, Copy)]
struct TimeoutBudget {
    total: Duration,
    deadline: Instant,
}

impl TimeoutBudget {
    fn new(total: Duration) -> Self {
        Self {
            total,
            deadline: Instant::now() + total,
        }
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn expired(&self) -> WsSecurityError {
        WsSecurityError::Timeout { budget: self.total }
    }
}

enum PhaseOutcome {
    Secured(Result<SecureOutput>),
    Sent(Result<()>),
}

/// One in-flight secure-and-send operation.
struct PipelineOperation<'a> {
    sender: &'a dyn TransportSender,
    state: PipelineState,
    secured: bool,
    budget: TimeoutBudget,
    correlation_state: Option<Arc<CorrelationState>>,
}

impl<'a> PipelineOperation<'a> {
    fn transition(&mut self, state: PipelineState) {
        debug!(from = ?self.state, to = ?state, "Pipeline transition");
        self.state = state;
    }

    /// Record phase one's output and start phase two.
    fn on_secured(&mut self, output: SecureOutput) -> Result<Completion<'a, Result<()>>> {
        let message = output
            .message
            .ok_or(WsSecurityError::ArgumentNull("secured message"))?;
        self.correlation_state = output.correlation_state;
        self.secured = true;
        self.transition(PipelineState::Secured);

        let remaining = self.budget.remaining();
        if remaining.is_zero() {
            return Err(self.budget.expired());
        }
        self.transition(PipelineState::SendingInFlight);
        Ok(self.sender.send(message, remaining))
    }

    fn complete(&mut self) -> Option<Arc<CorrelationState>> {
        self.transition(PipelineState::Completed);
        self.correlation_state.take()
    }

    /// Shared continuation for whichever phase suspended.
    fn resume(
        mut self,
        pending: BoxFuture<'a, PhaseOutcome>,
    ) -> BoxFuture<'a, Result<Option<Arc<CorrelationState>>>> {
        async move {
            let mut pending = pending;
            loop {
                let outcome = match tokio::time::timeout(self.budget.remaining(), pending).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(state = ?self.state, budget = ?self.budget.total, "Pipeline timed out");
                        return Err(self.budget.expired());
                    }
                };

                if !self.secured {
                    let output = match outcome {
                        PhaseOutcome::Secured(result) => result?,
                        PhaseOutcome::Sent(_) => {
                            return Err(WsSecurityError::InvalidState(
                                "send completed before the message was secured".into(),
                            ))
                        }
                    };
                    match self.on_secured(output)? {
                        Completion::Ready(result) => {
                            result?;
                            return Ok(self.complete());
                        }
                        Completion::Pending(future) => pending = future.map(PhaseOutcome::Sent).boxed(),
                    }
                } else {
                    match outcome {
                        PhaseOutcome::Sent(result) => result?,
                        PhaseOutcome::Secured(_) => {
                            return Err(WsSecurityError::InvalidState(
                                "message was secured twice".into(),
                            ))
                        }
                    }
                    return Ok(self.complete());
                }
            }
        }
        .boxed()
    }
}

/// Two-phase secure-then-send workflow over borrowed collaborators.
pub struct SecureAndSendPipeline<'a> {
    secure_step: &'a dyn SecureStep,
    sender: &'a dyn TransportSender,
}

impl<'a> SecureAndSendPipeline<'a> {
    pub fn new(secure_step: &'a dyn SecureStep, sender: &'a dyn TransportSender) -> Self {
        Self {
            secure_step,
            sender,
        }
    }

    /// Start securing and sending `message` within `timeout`.
    pub fn begin(
        &self,
        message: Message,
        correlation: Option<Arc<CorrelationState>>,
        timeout: Duration,
    ) -> SendOperation<'a> {
        let mut operation = PipelineOperation {
            sender: self.sender,
            state: PipelineState::Idle,
            secured: false,
            budget: TimeoutBudget::new(timeout),
            correlation_state: None,
        };
        operation.transition(PipelineState::SecuringInFlight);

        match self.secure_step.secure(message, correlation, timeout) {
            Completion::Ready(result) => {
                let sending = match result.and_then(|output| operation.on_secured(output)) {
                    Ok(sending) => sending,
                    Err(e) => return SendOperation::CompletedSynchronously(Err(e)),
                };
                match sending {
                    Completion::Ready(result) => SendOperation::CompletedSynchronously(
                        result.map(|()| operation.complete()),
                    ),
                    Completion::Pending(future) => SendOperation::InFlight(
                        operation.resume(future.map(PhaseOutcome::Sent).boxed()),
                    ),
                }
            }
            Completion::Pending(future) => SendOperation::InFlight(
                operation.resume(future.map(PhaseOutcome::Secured).boxed()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoapVersion;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TestStep {
        delay: Option<Duration>,
        drop_message: bool,
        calls: AtomicUsize,
    }

    impl SecureStep for TestStep {
        fn secure<'a>(
            &'a self,
            message: Message,
            _correlation: Option<Arc<CorrelationState>>,
            _timeout: Duration,
        ) -> Completion<'a, Result<SecureOutput>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let output = SecureOutput {
                message: (!self.drop_message).then_some(message),
                correlation_state: Some(Arc::new(CorrelationState::default())),
            };
            match self.delay {
                None => Completion::Ready(Ok(output)),
                Some(delay) => Completion::Pending(Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    Ok(output)
                })),
            }
        }
    }

    #[derive(Default)]
    struct TestSender {
        delay: Option<Duration>,
        sent: AtomicUsize,
    }

    impl TransportSender for TestSender {
        fn send<'a>(&'a self, _message: Message, _timeout: Duration) -> Completion<'a, Result<()>> {
            match self.delay {
                None => {
                    self.sent.fetch_add(1, Ordering::SeqCst);
                    Completion::Ready(Ok(()))
                }
                Some(delay) => Completion::Pending(Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    self.sent.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            }
        }
    }

    fn message() -> Message {
        Message::new(SoapVersion::Soap11, "<m:Ping xmlns:m=\"urn:test\"/>")
    }

    #[test]
    fn test_fast_path_completes_synchronously() {
        let step = TestStep::default();
        let sender = TestSender::default();
        let pipeline = SecureAndSendPipeline::new(&step, &sender);

        let operation = pipeline.begin(message(), None, Duration::from_secs(5));
        assert!(operation.completed_synchronously());
        match operation {
            SendOperation::CompletedSynchronously(result) => assert!(result.unwrap().is_some()),
            SendOperation::InFlight(_) => unreachable!(),
        }
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_secured_message() {
        let step = TestStep {
            drop_message: true,
            ..TestStep::default()
        };
        let sender = TestSender::default();
        let pipeline = SecureAndSendPipeline::new(&step, &sender);

        match pipeline.begin(message(), None, Duration::from_secs(5)) {
            SendOperation::CompletedSynchronously(result) => assert!(matches!(
                result,
                Err(WsSecurityError::ArgumentNull("secured message"))
            )),
            SendOperation::InFlight(_) => panic!("expected synchronous failure"),
        }
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_secure_runs_once() {
        let step = TestStep {
            delay: Some(Duration::from_millis(100)),
            ..TestStep::default()
        };
        let sender = TestSender::default();
        let pipeline = SecureAndSendPipeline::new(&step, &sender);

        let operation = pipeline.begin(message(), None, Duration::from_secs(5));
        assert!(!operation.completed_synchronously());
        assert!(operation.wait().await.unwrap().is_some());
        assert_eq!(step.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_send() {
        let step = TestStep::default();
        let sender = TestSender {
            delay: Some(Duration::from_millis(100)),
            ..TestSender::default()
        };
        let pipeline = SecureAndSendPipeline::new(&step, &sender);

        let operation = pipeline.begin(message(), None, Duration::from_secs(5));
        assert!(!operation.completed_synchronously());
        operation.wait().await.unwrap();
        assert_eq!(step.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_is_shared_by_both_phases() {
        let step = TestStep {
            delay: Some(Duration::from_millis(600)),
            ..TestStep::default()
        };
        let sender = TestSender {
            delay: Some(Duration::from_millis(600)),
            ..TestSender::default()
        };
        let pipeline = SecureAndSendPipeline::new(&step, &sender);

        let err = pipeline
            .begin(message(), None, Duration::from_secs(1))
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, WsSecurityError::Timeout { budget } if budget == Duration::from_secs(1)));
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);
    }
}

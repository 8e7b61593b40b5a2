//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::mail::{EmailSender, MailTransport, SendError, SendOutcome, TransportError};
use crate::queue::{QueueClient, QueueError, QueueMessage};

/// Scripted queue that records every call.
pub struct FakeQueue {
    batches: Mutex<VecDeque<Result<Vec<QueueMessage>, QueueError>>>,
    receives: Mutex<Vec<(usize, Duration)>>,
    deletes: Mutex<Vec<String>>,
    fail_deletes: bool,
    cancel_when_drained: Option<CancellationToken>,
}

impl FakeQueue {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(VecDeque::new()),
            receives: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            fail_deletes: false,
            cancel_when_drained: None,
        }
    }

    pub fn with_batch(self, batch: Vec<QueueMessage>) -> Self {
        self.batches.lock().unwrap().push_back(Ok(batch));
        self
    }

    pub fn with_receive_error(self, error: &str) -> Self {
        self.batches
            .lock()
            .unwrap()
            .push_back(Err(QueueError::Transport(error.to_string())));
        self
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// Once the script runs out, cancel `token` and block the receive until dropped.
    pub fn cancel_when_drained(mut self, token: CancellationToken) -> Self {
        self.cancel_when_drained = Some(token);
        self
    }

    pub fn receives(&self) -> Vec<(usize, Duration)> {
        self.receives.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueClient for FakeQueue {
    async fn receive_batch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        self.receives.lock().unwrap().push((max_messages, wait));

        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => {
                if let Some(token) = &self.cancel_when_drained {
                    token.cancel();
                }
                std::future::pending().await
            }
        }
    }

    async fn delete_message(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.deletes.lock().unwrap().push(receipt_handle.to_string());
        if self.fail_deletes {
            return Err(QueueError::Transport("delete refused".to_string()));
        }
        Ok(())
    }
}

enum SenderBehavior {
    Succeed(String),
    Fail(String),
    Fault,
    Panic,
}

/// Email sender with a fixed behaviour that records recipients.
pub struct FakeSender {
    behavior: SenderBehavior,
    calls: Mutex<Vec<String>>,
    cancel_on_send: Option<CancellationToken>,
}

impl FakeSender {
    fn with(behavior: SenderBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
            cancel_on_send: None,
        }
    }

    /// Cancel `token` from inside every send, before it completes.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_send = Some(token);
        self
    }

    pub fn succeeding(message_id: &str) -> Self {
        Self::with(SenderBehavior::Succeed(message_id.to_string()))
    }

    pub fn failing(description: &str) -> Self {
        Self::with(SenderBehavior::Fail(description.to_string()))
    }

    pub fn faulting() -> Self {
        Self::with(SenderBehavior::Fault)
    }

    pub fn panicking() -> Self {
        Self::with(SenderBehavior::Panic)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for FakeSender {
    async fn send(&self, address: &str) -> Result<SendOutcome, SendError> {
        self.calls.lock().unwrap().push(address.to_string());
        if let Some(token) = &self.cancel_on_send {
            token.cancel();
            tokio::task::yield_now().await;
        }
        match &self.behavior {
            SenderBehavior::Succeed(id) => Ok(SendOutcome::Sent {
                provider_message_id: id.clone(),
            }),
            SenderBehavior::Fail(description) => Ok(SendOutcome::Failed {
                error_description: description.clone(),
            }),
            SenderBehavior::Fault => Err(SendError::Fault("connection reset".to_string())),
            SenderBehavior::Panic => panic!("sender exploded"),
        }
    }
}

/// One recorded transport call.
#[derive(Debug, Clone)]
pub struct TransportCall {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mail transport that either returns a fixed id or times out.
pub struct FakeTransport {
    message_id: Option<String>,
    calls: Mutex<Vec<TransportCall>>,
}

impl FakeTransport {
    pub fn succeeding(message_id: &str) -> Self {
        Self {
            message_id: Some(message_id.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            message_id: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for FakeTransport {
    async fn send_email(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(TransportCall {
            from: from.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        self.message_id.clone().ok_or(TransportError::Timeout)
    }
}

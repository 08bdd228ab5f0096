//! Process side of the control protocol.
//!
//! A [`ProcessReceiver`] consumes the launch queue and the control actions
//! addressed to any process, hands them to a [`ProcessController`] and
//! publishes the outcome to the reply subject of each message.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionKind, Pid, Response, decode, encode};
use crate::broker::{Message, MessageBroker, MessageSubscription};
use crate::error::ControlResult;
use crate::names::ChannelNames;

/// Runs and steers processes on behalf of remote callers.
///
/// Errors are plain messages; they reach the caller as
/// [`ControlError::RemoteFailure`](crate::ControlError::RemoteFailure).
#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Create and schedule a new process, returning its pid.
    async fn launch(
        &self,
        process_type: &str,
        init_args: &[Value],
        init_kwargs: &Map<String, Value>,
    ) -> Result<Pid, String>;

    /// Load a persisted process and schedule it again.
    async fn resume(&self, pid: Pid) -> Result<(), String>;

    /// Wait for the process to terminate and return its result.
    async fn result(&self, pid: Pid) -> Result<Value, String>;

    async fn pause(&self, pid: Pid) -> Result<Value, String>;

    async fn play(&self, pid: Pid) -> Result<Value, String>;

    async fn kill(&self, pid: Pid, message: Option<&str>) -> Result<Value, String>;

    async fn status(&self, pid: Pid) -> Result<Value, String>;
}

/// Serves control actions from a broker.
pub struct ProcessReceiver {
    broker: Arc<dyn MessageBroker>,
    names: ChannelNames,
    controller: Arc<dyn ProcessController>,
}

/// Running receiver loops.
pub struct ReceiverHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl ReceiverHandle {
    /// Stop serving immediately.
    pub fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }

    /// Wait until the broker closes.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

impl ProcessReceiver {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        names: ChannelNames,
        controller: Arc<dyn ProcessController>,
    ) -> Self {
        Self {
            broker,
            names,
            controller,
        }
    }

    /// Subscribe to the launch queue and the control subjects and start
    /// serving on the current runtime.
    pub async fn start(self) -> ControlResult<ReceiverHandle> {
        let tasks = self.broker.consume(self.names.launch_queue()).await?;
        let control = self
            .broker
            .subscribe(self.names.messages_exchange(), ChannelNames::control_pattern())
            .await?;
        info!(prefix = self.names.prefix(), "Process receiver started");

        let receiver = Arc::new(self);
        Ok(ReceiverHandle {
            tasks: vec![
                tokio::spawn(Arc::clone(&receiver).serve_tasks(tasks)),
                tokio::spawn(receiver.serve_control(control)),
            ],
        })
    }

    /// Tasks may run until their process terminates, so each one gets its
    /// own task.
    async fn serve_tasks(self: Arc<Self>, mut messages: Box<dyn MessageSubscription>) {
        while let Ok(Some(message)) = messages.next().await {
            let receiver = Arc::clone(&self);
            tokio::spawn(async move { receiver.handle(message).await });
        }
        debug!("Launch queue consumer stopped");
    }

    /// Control actions are handled in arrival order.
    async fn serve_control(self: Arc<Self>, mut messages: Box<dyn MessageSubscription>) {
        while let Ok(Some(message)) = messages.next().await {
            self.handle(message).await;
        }
        debug!("Control subscription stopped");
    }

    async fn handle(&self, message: Message) {
        let reply_to = message.reply_to.as_deref();
        let response: Response = match decode::<Action>(&message.payload) {
            Ok(action) => self.run(action, reply_to).await.into(),
            Err(e) => Response::failure(e.to_string()),
        };
        if let Some(reply_to) = reply_to {
            self.reply(reply_to, &response).await;
        }
    }

    async fn reply(&self, reply_to: &str, response: &Response) {
        let payload = match encode(response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(reply_to, error = %e, "Failed to encode response");
                return;
            }
        };
        if let Err(e) = self
            .broker
            .publish(self.names.messages_exchange(), Message::new(reply_to, payload))
            .await
        {
            // The caller stopped waiting.
            warn!(reply_to, error = %e, "Response not delivered");
        }
    }

    /// Execute one action against the controller.
    pub async fn perform(&self, action: Action) -> Result<Value, String> {
        self.run(action, None).await
    }

    /// Like [`perform`](Self::perform); a launch that waits for its result
    /// is acknowledged on `reply_to` as soon as the process exists.
    async fn run(&self, action: Action, reply_to: Option<&str>) -> Result<Value, String> {
        action.validate().map_err(|e| e.to_string())?;
        let controller = &self.controller;

        match (action.kind, action.pid) {
            (ActionKind::Launch, _) => {
                let process_type = action.process_type.as_deref().unwrap_or_default();
                let pid = controller
                    .launch(process_type, &action.init_args, &action.init_kwargs)
                    .await?;
                info!(pid, process_type, "Process launched");
                if let (true, Some(reply_to)) = (action.wait_for_result, reply_to) {
                    self.reply(reply_to, &Response::launched(pid)).await;
                }
                self.finish_task(pid, action.wait_for_result).await
            }
            (ActionKind::Continue, Some(pid)) => {
                controller.resume(pid).await?;
                info!(pid, "Process continued");
                self.finish_task(pid, action.wait_for_result).await
            }
            (ActionKind::Pause, Some(pid)) => controller.pause(pid).await,
            (ActionKind::Play, Some(pid)) => controller.play(pid).await,
            (ActionKind::Cancel, Some(pid)) => controller.kill(pid, action.message.as_deref()).await,
            (ActionKind::Status, Some(pid)) => controller.status(pid).await,
            (kind, None) => Err(format!("{kind} action requires a pid")),
        }
    }

    async fn finish_task(&self, pid: Pid, wait_for_result: bool) -> Result<Value, String> {
        if wait_for_result {
            self.controller.result(pid).await
        } else {
            Ok(Value::from(pid))
        }
    }
}

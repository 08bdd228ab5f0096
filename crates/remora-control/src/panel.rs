//! Asynchronous process control panel.
//!
//! Every operation builds an [`Action`], publishes it and returns an
//! [`ActionHandle`] as soon as the broker accepted the message. The handle
//! resolves once the remote side replies.
//!
//! Launch and continue tasks go to the durable launch queue. Pause, play,
//! cancel and status are published on the messages exchange under the
//! target process's routing key.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use remora_runtime::{ExponentialBackoffRetry, InterruptableFuture, ObjectRef, interruptable_task};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::action::{Action, Pid, Response, decode, encode};
use crate::broker::{BrokerStore, Message, MessageBroker, MessageSubscription};
use crate::config::Config;
use crate::error::{ControlError, ControlResult};
use crate::names::ChannelNames;

enum BrokerRef {
    Owned(Arc<dyn MessageBroker>),
    Shared(ObjectRef<String, Arc<dyn MessageBroker>>),
}

impl BrokerRef {
    fn get(&self) -> &Arc<dyn MessageBroker> {
        match self {
            BrokerRef::Owned(broker) => broker,
            BrokerRef::Shared(shared) => &**shared,
        }
    }
}

/// An action in flight.
///
/// Cloning the handle shares the pending outcome.
#[derive(Debug, Clone)]
pub struct ActionHandle {
    action: Action,
    message_id: Uuid,
    outcome: InterruptableFuture<Value, ControlError>,
    launched: InterruptableFuture<Pid, ControlError>,
}

impl ActionHandle {
    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Id of the published message, which replies are correlated with.
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Wait for the decoded response. A remote failure is reported as
    /// [`ControlError::RemoteFailure`].
    pub async fn wait(&self) -> ControlResult<Value> {
        self.outcome.wait().await
    }

    /// Wait for the response and deserialize it.
    pub async fn wait_as<T: DeserializeOwned>(&self) -> ControlResult<T> {
        let value = self.wait().await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Wait for the pid of the process the action addresses.
    ///
    /// Actions on an existing process resolve at once. An executed launch
    /// resolves when the process is created, before its result is known.
    pub async fn wait_launched(&self) -> ControlResult<Pid> {
        self.launched.wait().await
    }

    /// Stop waiting. The action may still take effect remotely.
    ///
    /// Returns `false` if the response had already arrived.
    pub fn interrupt(&self, reason: impl Into<String>) -> bool {
        let reason = ControlError::Interrupted(reason.into());
        self.launched.interrupt(reason.clone());
        self.outcome.interrupt(reason)
    }

    pub fn is_done(&self) -> bool {
        self.outcome.is_done()
    }
}

/// Sends control actions to remote processes.
pub struct ProcessControlPanel {
    broker: BrokerRef,
    names: ChannelNames,
    retry: Option<(Duration, u32)>,
    pid_locks: Mutex<FxHashMap<Pid, Arc<tokio::sync::Mutex<()>>>>,
    closed: AtomicBool,
}

impl ProcessControlPanel {
    pub fn new(broker: Arc<dyn MessageBroker>, names: ChannelNames) -> Self {
        Self::with_broker(BrokerRef::Owned(broker), names)
    }

    /// Use the broker registered under `url` in `store`, connecting through
    /// `connect` when no other panel holds it. The broker is released when
    /// the last panel using it is dropped.
    pub fn shared<F>(store: &BrokerStore, url: &str, names: ChannelNames, connect: F) -> Self
    where
        F: FnOnce() -> Arc<dyn MessageBroker>,
    {
        let broker = store.get_or_create(url.to_string(), connect);
        Self::with_broker(BrokerRef::Shared(broker), names)
    }

    /// Panel with channel names and retry taken from `config`.
    pub fn from_config(broker: Arc<dyn MessageBroker>, config: &Config) -> Self {
        let mut panel = Self::new(broker, config.channel_names());
        panel.retry = config.retry_policy();
        panel
    }

    fn with_broker(broker: BrokerRef, names: ChannelNames) -> Self {
        Self {
            broker,
            names,
            retry: None,
            pid_locks: Mutex::new(FxHashMap::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Retry undeliverable publishes with exponential backoff.
    #[must_use]
    pub fn with_retry(mut self, initial_interval: Duration, max_attempts: u32) -> Self {
        self.retry = Some((initial_interval, max_attempts));
        self
    }

    pub fn names(&self) -> &ChannelNames {
        &self.names
    }

    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        self.broker.get()
    }

    /// Whether the panel is open and the broker connected.
    pub async fn ready(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.broker.get().is_connected().await
    }

    /// Launch a new process. Resolves to its pid once accepted.
    pub async fn launch_process(
        &self,
        process_type: &str,
        init_args: Vec<Value>,
        init_kwargs: Map<String, Value>,
    ) -> ControlResult<ActionHandle> {
        self.dispatch(Action::launch(process_type, init_args, init_kwargs))
            .await
    }

    /// Launch a new process and resolve to its final result.
    pub async fn execute_process(
        &self,
        process_type: &str,
        init_args: Vec<Value>,
        init_kwargs: Map<String, Value>,
    ) -> ControlResult<ActionHandle> {
        self.dispatch(Action::launch(process_type, init_args, init_kwargs).waiting_for_result())
            .await
    }

    /// Resume a persisted process. Resolves to its pid once accepted.
    pub async fn continue_process(&self, pid: Pid) -> ControlResult<ActionHandle> {
        self.dispatch(Action::resume(pid)).await
    }

    pub async fn pause_process(&self, pid: Pid) -> ControlResult<ActionHandle> {
        self.dispatch(Action::pause(pid)).await
    }

    pub async fn play_process(&self, pid: Pid) -> ControlResult<ActionHandle> {
        self.dispatch(Action::play(pid)).await
    }

    /// Ask the process to stop, with an optional reason.
    pub async fn kill_process(&self, pid: Pid, message: Option<&str>) -> ControlResult<ActionHandle> {
        self.dispatch(Action::cancel(pid, message.map(str::to_string)))
            .await
    }

    pub async fn request_status(&self, pid: Pid) -> ControlResult<ActionHandle> {
        self.dispatch(Action::status(pid)).await
    }

    /// Close the panel. Pending handles keep waiting; new actions fail.
    ///
    /// A broker owned by this panel is disconnected, a shared one is left to
    /// its other users.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let BrokerRef::Owned(broker) = &self.broker {
            broker.close().await;
        }
        info!(prefix = self.names.prefix(), "Process control panel closed");
    }

    async fn dispatch(&self, action: Action) -> ControlResult<ActionHandle> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ControlError::DeliveryFailed(
                "process control panel is closed".to_string(),
            ));
        }
        action.validate()?;

        // First await point: actions on one pid are published in call order.
        let lock = action.pid.map(|pid| self.pid_lock(pid));
        let ordered = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        let sent = self.send(&action).await;
        drop(ordered);
        if let (Some(pid), Some(lock)) = (action.pid, lock) {
            self.release_pid_lock(pid, lock);
        }
        let (message_id, replies) = sent?;

        debug!(kind = %action.kind, pid = ?action.pid, id = %message_id, "Action sent");
        let launched = InterruptableFuture::new();
        if let Some(pid) = action.pid {
            launched.set_result(pid);
        }
        let settled = launched.clone();
        let outcome = interruptable_task(move |slot| await_reply(slot, settled, replies));
        Ok(ActionHandle {
            action,
            message_id,
            outcome,
            launched,
        })
    }

    /// Publish `action` with a fresh reply subject and return the
    /// subscription its responses arrive on.
    async fn send(&self, action: &Action) -> ControlResult<(Uuid, Box<dyn MessageSubscription>)> {
        let broker = self.broker.get();
        let message_id = Uuid::new_v4();
        let reply_subject = ChannelNames::reply_subject(&message_id);

        // Subscribe first so the reply is routable as soon as it is sent.
        let replies = broker
            .subscribe(self.names.messages_exchange(), &reply_subject)
            .await?;

        let published = match encode(action) {
            Ok(payload) => {
                let message = match action.pid.filter(|_| !action.kind.is_task()) {
                    Some(pid) => Message::new(ChannelNames::control_subject(pid), payload),
                    None => Message::new(action.kind.to_string(), payload),
                }
                .with_id(message_id)
                .with_reply_to(reply_subject);
                self.publish(action, message).await
            }
            Err(e) => Err(e),
        };
        match published {
            Ok(()) => Ok((message_id, replies)),
            Err(e) => {
                let _ = replies.unsubscribe().await;
                Err(e)
            }
        }
    }

    async fn publish(&self, action: &Action, message: Message) -> ControlResult<()> {
        let broker = self.broker.get();
        let send = || {
            let message = message.clone();
            async move {
                if action.kind.is_task() {
                    broker.enqueue(self.names.launch_queue(), message).await
                } else {
                    broker.publish(self.names.messages_exchange(), message).await
                }
            }
        };

        match self.retry {
            Some((initial_interval, max_attempts)) => {
                ExponentialBackoffRetry::new(initial_interval, max_attempts)
                    .with_non_retriable(|e: &ControlError| !e.is_retriable())
                    .with_label(format!("{} action", action.kind))
                    .run(send)
                    .await
            }
            None => send().await,
        }
    }

    fn pid_lock(&self, pid: Pid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.pid_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(pid).or_default())
    }

    /// Forget the lock of `pid` once no other action holds or awaits it.
    fn release_pid_lock(&self, pid: Pid, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.pid_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and `lock` itself.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&pid);
        }
    }
}

async fn await_reply(
    slot: InterruptableFuture<Value, ControlError>,
    launched: InterruptableFuture<Pid, ControlError>,
    mut replies: Box<dyn MessageSubscription>,
) -> ControlResult<Value> {
    let outcome = slot
        .with_interrupt(async {
            loop {
                let Some(reply) = replies.next().await? else {
                    return Err(ControlError::DeliveryFailed(
                        "broker closed before a response arrived".to_string(),
                    ));
                };
                let response = decode::<Response>(&reply.payload)?;
                match response.launched.filter(|_| response.is_launch_ack()) {
                    Some(pid) => {
                        launched.set_result(pid);
                    }
                    None => return response.into_result(),
                }
            }
        })
        .await;
    let _ = replies.unsubscribe().await;

    match &outcome {
        Ok(value) => match value.as_u64() {
            Some(pid) => launched.set_result(pid),
            None => launched.interrupt(ControlError::Encoding(
                "reply does not carry a pid".to_string(),
            )),
        },
        Err(e) => launched.interrupt(e.clone()),
    };
    outcome
}

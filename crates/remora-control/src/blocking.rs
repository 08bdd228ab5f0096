//! Blocking facade over [`ProcessControlPanel`].
//!
//! Owns a current-thread runtime and drives every action to completion
//! before returning. Must not be used from inside an async context.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::runtime::Runtime;
use tracing::warn;

use crate::action::Pid;
use crate::broker::MessageBroker;
use crate::config::Config;
use crate::error::{ControlError, ControlResult};
use crate::names::ChannelNames;
use crate::panel::{ActionHandle, ProcessControlPanel};

/// Synchronous process control panel.
pub struct BlockingProcessControlPanel {
    runtime: Runtime,
    panel: ProcessControlPanel,
    timeout: Option<Duration>,
}

impl BlockingProcessControlPanel {
    pub fn new(broker: Arc<dyn MessageBroker>, names: ChannelNames) -> ControlResult<Self> {
        Ok(Self {
            runtime: build_runtime()?,
            panel: ProcessControlPanel::new(broker, names),
            timeout: None,
        })
    }

    /// Panel with names, retry and response timeout taken from `config`.
    pub fn from_config(broker: Arc<dyn MessageBroker>, config: &Config) -> ControlResult<Self> {
        Ok(Self {
            runtime: build_runtime()?,
            panel: ProcessControlPanel::from_config(broker, config),
            timeout: config.action_timeout(),
        })
    }

    /// Give up waiting for a response after `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, initial_interval: Duration, max_attempts: u32) -> Self {
        self.panel = self.panel.with_retry(initial_interval, max_attempts);
        self
    }

    pub fn names(&self) -> &ChannelNames {
        self.panel.names()
    }

    pub fn ready(&self) -> bool {
        self.runtime.block_on(self.panel.ready())
    }

    /// Launch a process and return its pid once accepted.
    pub fn launch_process(
        &self,
        process_type: &str,
        init_args: Vec<Value>,
        init_kwargs: Map<String, Value>,
    ) -> ControlResult<Pid> {
        let value = self.complete(self.panel.launch_process(process_type, init_args, init_kwargs))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Launch a process and return its final result.
    pub fn execute_process(
        &self,
        process_type: &str,
        init_args: Vec<Value>,
        init_kwargs: Map<String, Value>,
    ) -> ControlResult<Value> {
        self.complete(self.panel.execute_process(process_type, init_args, init_kwargs))
    }

    /// Launch a process that reports its result, returning the pid as soon
    /// as the process exists. The result itself is not collected.
    pub fn execute_process_start(
        &self,
        process_type: &str,
        init_args: Vec<Value>,
        init_kwargs: Map<String, Value>,
    ) -> ControlResult<Pid> {
        self.run_until(
            self.panel.execute_process(process_type, init_args, init_kwargs),
            |handle| async move { handle.wait_launched().await },
        )
    }

    pub fn continue_process(&self, pid: Pid) -> ControlResult<Pid> {
        let value = self.complete(self.panel.continue_process(pid))?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn pause_process(&self, pid: Pid) -> ControlResult<Value> {
        self.complete(self.panel.pause_process(pid))
    }

    pub fn play_process(&self, pid: Pid) -> ControlResult<Value> {
        self.complete(self.panel.play_process(pid))
    }

    pub fn kill_process(&self, pid: Pid, message: Option<&str>) -> ControlResult<Value> {
        self.complete(self.panel.kill_process(pid, message))
    }

    pub fn request_status(&self, pid: Pid) -> ControlResult<Value> {
        self.complete(self.panel.request_status(pid))
    }

    pub fn close(&self) {
        self.runtime.block_on(self.panel.close());
    }

    fn complete<F>(&self, send: F) -> ControlResult<Value>
    where
        F: Future<Output = ControlResult<ActionHandle>>,
    {
        self.run_until(send, |handle| async move { handle.wait().await })
    }

    /// Send an action and block until `stage` of its handle resolves.
    fn run_until<F, S, Fut, T>(&self, send: F, stage: S) -> ControlResult<T>
    where
        F: Future<Output = ControlResult<ActionHandle>>,
        S: FnOnce(ActionHandle) -> Fut,
        Fut: Future<Output = ControlResult<T>>,
    {
        self.runtime.block_on(async {
            let handle = send.await?;
            let waiting = stage(handle.clone());
            let Some(limit) = self.timeout else {
                return waiting.await;
            };
            match tokio::time::timeout(limit, waiting).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    handle.interrupt("timed out");
                    warn!(kind = %handle.action().kind, id = %handle.message_id(), "No response in time");
                    Err(ControlError::Timeout(format!("{limit:?}")))
                }
            }
        })
    }
}

fn build_runtime() -> ControlResult<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ControlError::Runtime(e.to_string()))
}

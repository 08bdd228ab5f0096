//! Remora process control
//!
//! Remote control of long-running processes over a message broker. A caller
//! holds a [`ProcessControlPanel`] (or its [`BlockingProcessControlPanel`]
//! facade) and sends actions; a [`ProcessReceiver`] on the process side
//! executes them through a [`ProcessController`] and replies.
//!
//! | Action   | Channel         | Reply                               |
//! |----------|-----------------|-------------------------------------|
//! | launch   | launch queue    | pid, or the result when executing   |
//! | continue | launch queue    | pid                                 |
//! | pause    | `rpc.<pid>`     | controller-defined                  |
//! | play     | `rpc.<pid>`     | controller-defined                  |
//! | cancel   | `rpc.<pid>`     | controller-defined                  |
//! | status   | `rpc.<pid>`     | status document                     |
//!
//! All channel names are prefixed with `remora-<profile>` so that several
//! profiles can share a broker.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use remora_control::{ChannelNames, InMemoryBroker, ProcessControlPanel, ProcessReceiver};
//!
//! let broker = Arc::new(InMemoryBroker::new());
//! let names = ChannelNames::for_profile("default");
//! ProcessReceiver::new(broker.clone(), names.clone(), controller).start().await?;
//!
//! let panel = ProcessControlPanel::new(broker, names);
//! let pid: u64 = panel.launch_process("pw", vec![], Default::default()).await?.wait_as().await?;
//! let status = panel.request_status(pid).await?.wait().await?;
//! ```

pub mod action;
pub mod blocking;
pub mod broker;
pub mod config;
pub mod error;
pub mod names;
pub mod panel;
pub mod receiver;
pub mod tracing_config;

pub use action::{Action, ActionKind, Pid, Response};
pub use blocking::BlockingProcessControlPanel;
pub use broker::{BrokerStore, InMemoryBroker, Message, MessageBroker, MessageSubscription};
pub use config::{Config, ConfigError};
pub use error::{ControlError, ControlResult};
pub use names::ChannelNames;
pub use panel::{ActionHandle, ProcessControlPanel};
pub use receiver::{ProcessController, ProcessReceiver, ReceiverHandle};
pub use tracing_config::{TracingConfig, TracingFormat, init_default_tracing, init_tracing};

//! Exchange, queue and subject names for one deployment.

use uuid::Uuid;

use crate::action::Pid;

/// Prefix applied to every profile name.
pub const PREFIX_ROOT: &str = "remora";

/// Channel names derived from an explicit prefix.
///
/// Every name is `<prefix>.<suffix>`, so deployments with different
/// profiles never share an exchange or queue on the same broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    prefix: String,
    messages_exchange: String,
    launch_queue: String,
}

impl ChannelNames {
    /// Names for a profile: the prefix is `remora-<profile>`.
    pub fn for_profile(profile: &str) -> Self {
        Self::with_prefix(format!("{PREFIX_ROOT}-{profile}"))
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            messages_exchange: format!("{prefix}.messages"),
            launch_queue: format!("{prefix}.process.queue"),
            prefix,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Exchange carrying control actions and their replies.
    pub fn messages_exchange(&self) -> &str {
        &self.messages_exchange
    }

    /// Durable queue carrying launch and continue tasks.
    pub fn launch_queue(&self) -> &str {
        &self.launch_queue
    }

    /// Routing key of control actions addressed to `pid`.
    pub fn control_subject(pid: Pid) -> String {
        format!("rpc.{pid}")
    }

    /// Routing pattern matching control actions for every process.
    pub fn control_pattern() -> &'static str {
        "rpc.*"
    }

    /// Routing key a reply to message `id` is published under.
    pub fn reply_subject(id: &Uuid) -> String {
        format!("reply.{id}")
    }
}

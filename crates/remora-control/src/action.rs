//! Actions and responses exchanged with remote processes.
//!
//! Wire format of an action:
//!
//! ```json
//! {"type": "Pause", "pid": 42, "init_args": [], "init_kwargs": {}}
//! ```
//!
//! and of a response:
//!
//! ```json
//! {"ok": true, "result": "paused"}
//! {"ok": false, "error": "process 42 is not running"}
//! ```
//!
//! A launch that waits for its result is first acknowledged with
//! `{"ok": true, "launched": 42}`.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ControlError, ControlResult};

/// Identifier of a remote process.
pub type Pid = u64;

/// What an action asks the remote side to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Launch,
    Continue,
    Pause,
    Play,
    Cancel,
    Status,
}

impl ActionKind {
    /// Launch and continue travel over the task queue; everything else is
    /// addressed to a running process.
    pub fn is_task(&self) -> bool {
        matches!(self, ActionKind::Launch | ActionKind::Continue)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Launch => "Launch",
            ActionKind::Continue => "Continue",
            ActionKind::Pause => "Pause",
            ActionKind::Play => "Play",
            ActionKind::Cancel => "Cancel",
            ActionKind::Status => "Status",
        };
        f.write_str(name)
    }
}

/// A remote-control request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub pid: Option<Pid>,
    #[serde(default)]
    pub init_args: Vec<Value>,
    #[serde(default)]
    pub init_kwargs: Map<String, Value>,
    /// Process type to instantiate, for launches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_type: Option<String>,
    /// Human-readable reason, for cancellations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Reply with the final result of the process instead of acknowledging
    /// the task as soon as it is accepted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wait_for_result: bool,
}

impl Action {
    fn addressed(kind: ActionKind, pid: Pid) -> Self {
        Self {
            kind,
            pid: Some(pid),
            init_args: Vec::new(),
            init_kwargs: Map::new(),
            process_type: None,
            message: None,
            wait_for_result: false,
        }
    }

    pub fn launch(
        process_type: impl Into<String>,
        init_args: Vec<Value>,
        init_kwargs: Map<String, Value>,
    ) -> Self {
        Self {
            kind: ActionKind::Launch,
            pid: None,
            init_args,
            init_kwargs,
            process_type: Some(process_type.into()),
            message: None,
            wait_for_result: false,
        }
    }

    pub fn resume(pid: Pid) -> Self {
        Self::addressed(ActionKind::Continue, pid)
    }

    pub fn pause(pid: Pid) -> Self {
        Self::addressed(ActionKind::Pause, pid)
    }

    pub fn play(pid: Pid) -> Self {
        Self::addressed(ActionKind::Play, pid)
    }

    pub fn cancel(pid: Pid, message: Option<String>) -> Self {
        Self {
            message,
            ..Self::addressed(ActionKind::Cancel, pid)
        }
    }

    pub fn status(pid: Pid) -> Self {
        Self::addressed(ActionKind::Status, pid)
    }

    #[must_use]
    pub fn waiting_for_result(mut self) -> Self {
        self.wait_for_result = true;
        self
    }

    /// Check the fields the kind requires.
    pub fn validate(&self) -> ControlResult<()> {
        match self.kind {
            ActionKind::Launch => {
                if self.process_type.as_deref().is_none_or(str::is_empty) {
                    return Err(ControlError::Encoding(
                        "Launch action requires a process_type".to_string(),
                    ));
                }
                if let Some(pid) = self.pid {
                    return Err(ControlError::Encoding(format!(
                        "Launch action must not carry a pid, found {pid}"
                    )));
                }
            }
            kind => {
                if self.pid.is_none() {
                    return Err(ControlError::Encoding(format!("{kind} action requires a pid")));
                }
            }
        }
        Ok(())
    }
}

/// Reply to an action.
///
/// A launch that waits for the result first gets an acknowledgement carrying
/// only `launched`, then the final reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Pid of the process created for the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched: Option<Pid>,
}

impl Response {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            launched: None,
        }
    }

    /// Acknowledge that process `pid` was created; the final reply follows.
    pub fn launched(pid: Pid) -> Self {
        Self {
            ok: true,
            result: None,
            error: None,
            launched: Some(pid),
        }
    }

    pub fn is_launch_ack(&self) -> bool {
        self.ok && self.launched.is_some() && self.result.is_none()
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
            launched: None,
        }
    }

    /// A failed response becomes [`ControlError::RemoteFailure`].
    pub fn into_result(self) -> ControlResult<Value> {
        if self.ok {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(ControlError::RemoteFailure(
                self.error
                    .unwrap_or_else(|| "remote process failed without a message".to_string()),
            ))
        }
    }
}

impl From<Result<Value, String>> for Response {
    fn from(outcome: Result<Value, String>) -> Self {
        match outcome {
            Ok(value) => Response::success(value),
            Err(error) => Response::failure(error),
        }
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> ControlResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(payload: &[u8]) -> ControlResult<T> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_wire_shape() {
        let action = Action::pause(42);
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"type": "Pause", "pid": 42, "init_args": [], "init_kwargs": {}})
        );

        let Value::Object(kwargs) = json!({"x": 1}) else {
            unreachable!()
        };
        let launch = Action::launch("ArithmeticAdd", vec![json!(1)], kwargs).waiting_for_result();
        assert_eq!(
            serde_json::to_value(&launch).unwrap(),
            json!({
                "type": "Launch",
                "pid": null,
                "init_args": [1],
                "init_kwargs": {"x": 1},
                "process_type": "ArithmeticAdd",
                "wait_for_result": true
            })
        );
    }

    #[test]
    fn test_action_decodes_minimal_record() {
        let action: Action = decode(br#"{"type": "Status", "pid": 7}"#).unwrap();
        assert_eq!(action, Action::status(7));
        assert!(action.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let mut launch = Action::launch("Relax", Vec::new(), Map::new());
        assert!(launch.validate().is_ok());
        launch.pid = Some(3);
        assert!(launch.validate().is_err());

        let mut pause = Action::pause(1);
        pause.pid = None;
        assert!(matches!(pause.validate(), Err(ControlError::Encoding(_))));
    }

    #[test]
    fn test_response_into_result() {
        assert_eq!(Response::success(json!(5)).into_result().unwrap(), json!(5));

        let err = Response::failure("process 9 not found").into_result().unwrap_err();
        assert_eq!(err, ControlError::RemoteFailure("process 9 not found".to_string()));

        let bare: Response = decode(br#"{"ok": false}"#).unwrap();
        assert!(matches!(bare.into_result(), Err(ControlError::RemoteFailure(_))));
    }

    #[test]
    fn test_launch_ack() {
        let ack = Response::launched(12);
        assert!(ack.is_launch_ack());
        assert_eq!(serde_json::to_value(&ack).unwrap(), json!({"ok": true, "launched": 12}));

        assert!(!Response::success(json!(12)).is_launch_ack());
        let plain: Response = decode(br#"{"ok": true, "result": 3}"#).unwrap();
        assert_eq!(plain.launched, None);
    }
}

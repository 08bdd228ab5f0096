//! End-to-end tests of the control panels against a receiver driving a fake
//! process controller over the in-memory broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{LocalBoxFuture, join_all};
use remora_control::{
    Action, ActionHandle, ActionKind, BlockingProcessControlPanel, BrokerStore, ChannelNames,
    ControlError, ControlResult, InMemoryBroker, Message, MessageBroker, MessageSubscription, Pid,
    ProcessControlPanel, ProcessController, ProcessReceiver, ReceiverHandle, Response,
};
use serde_json::{Map, Value, json};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct FakeProcess {
    process_type: String,
    args: Vec<Value>,
    state: &'static str,
    message: Option<String>,
}

/// Keeps processes in a map. A process of type `failing` reports an error as
/// its result.
#[derive(Default)]
struct FakeController {
    next_pid: AtomicU64,
    processes: Mutex<HashMap<Pid, FakeProcess>>,
    /// Results are held back until notified.
    result_gate: Option<Arc<Notify>>,
    pause_delay: Option<Duration>,
}

impl FakeController {
    fn update(&self, pid: Pid, state: &'static str, message: Option<&str>) -> Result<Value, String> {
        let mut processes = self.processes.lock().unwrap();
        let process = processes.get_mut(&pid).ok_or(format!("no process with pid {pid}"))?;
        process.state = state;
        process.message = message.map(str::to_string);
        Ok(json!(true))
    }
}

#[async_trait]
impl ProcessController for FakeController {
    async fn launch(
        &self,
        process_type: &str,
        init_args: &[Value],
        _init_kwargs: &Map<String, Value>,
    ) -> Result<Pid, String> {
        if process_type == "unknown" {
            return Err(format!("unknown process type '{process_type}'"));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst) + 1;
        self.processes.lock().unwrap().insert(
            pid,
            FakeProcess {
                process_type: process_type.to_string(),
                args: init_args.to_vec(),
                state: "running",
                message: None,
            },
        );
        Ok(pid)
    }

    async fn resume(&self, pid: Pid) -> Result<(), String> {
        self.update(pid, "running", None).map(|_| ())
    }

    async fn result(&self, pid: Pid) -> Result<Value, String> {
        if let Some(gate) = &self.result_gate {
            gate.notified().await;
        }
        let process = self.processes.lock().unwrap().get(&pid).cloned();
        let process = process.ok_or(format!("no process with pid {pid}"))?;
        if process.process_type == "failing" {
            return Err("process excepted".to_string());
        }
        let sum: i64 = process.args.iter().filter_map(Value::as_i64).sum();
        Ok(json!({ "pid": pid, "sum": sum }))
    }

    async fn pause(&self, pid: Pid) -> Result<Value, String> {
        if let Some(delay) = self.pause_delay {
            tokio::time::sleep(delay).await;
        }
        self.update(pid, "paused", None)
    }

    async fn play(&self, pid: Pid) -> Result<Value, String> {
        self.update(pid, "running", None)
    }

    async fn kill(&self, pid: Pid, message: Option<&str>) -> Result<Value, String> {
        self.update(pid, "killed", message)
    }

    async fn status(&self, pid: Pid) -> Result<Value, String> {
        let processes = self.processes.lock().unwrap();
        let process = processes.get(&pid).ok_or(format!("no process with pid {pid}"))?;
        Ok(json!({
            "process_type": process.process_type,
            "state": process.state,
            "message": process.message,
        }))
    }
}

async fn start_receiver(broker: Arc<InMemoryBroker>, names: ChannelNames) -> ReceiverHandle {
    start_receiver_with(broker, names, FakeController::default()).await
}

async fn start_receiver_with(
    broker: Arc<InMemoryBroker>,
    names: ChannelNames,
    controller: FakeController,
) -> ReceiverHandle {
    ProcessReceiver::new(broker, names, Arc::new(controller))
        .start()
        .await
        .unwrap()
}

async fn setup() -> (ProcessControlPanel, ReceiverHandle) {
    let broker = Arc::new(InMemoryBroker::new());
    let names = ChannelNames::for_profile("test");
    let receiver = start_receiver(broker.clone(), names.clone()).await;
    (ProcessControlPanel::new(broker, names), receiver)
}

#[tokio::test]
async fn test_launch_and_control() {
    let (panel, _receiver) = setup().await;

    let handle = panel
        .launch_process("pw", vec![json!(1)], Map::new())
        .await
        .unwrap();
    let pid: Pid = handle.wait_as().await.unwrap();
    assert_eq!(pid, 1);
    assert!(handle.is_done());

    let status = panel.request_status(pid).await.unwrap().wait().await.unwrap();
    assert_eq!(status["state"], "running");
    assert_eq!(status["process_type"], "pw");

    panel.pause_process(pid).await.unwrap().wait().await.unwrap();
    let status = panel.request_status(pid).await.unwrap().wait().await.unwrap();
    assert_eq!(status["state"], "paused");

    panel.play_process(pid).await.unwrap().wait().await.unwrap();
    let status = panel.request_status(pid).await.unwrap().wait().await.unwrap();
    assert_eq!(status["state"], "running");

    panel
        .kill_process(pid, Some("walltime exceeded"))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    let status = panel.request_status(pid).await.unwrap().wait().await.unwrap();
    assert_eq!(status["state"], "killed");
    assert_eq!(status["message"], "walltime exceeded");
}

#[tokio::test]
async fn test_concurrent_launches_get_distinct_pids() {
    let (panel, _receiver) = setup().await;

    let mut handles = Vec::new();
    for i in 0..5 {
        handles.push(
            panel
                .launch_process("pw", vec![json!(i)], Map::new())
                .await
                .unwrap(),
        );
    }
    let mut pids: Vec<Pid> = join_all(handles.iter().map(|h| h.wait_as::<Pid>()))
        .await
        .into_iter()
        .collect::<ControlResult<_>>()
        .unwrap();
    pids.sort_unstable();
    assert_eq!(pids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_execute_resolves_to_result() {
    let (panel, _receiver) = setup().await;

    let result = panel
        .execute_process("add", vec![json!(2), json!(3)], Map::new())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(result, json!({ "pid": 1, "sum": 5 }));

    let err = panel
        .execute_process("failing", vec![], Map::new())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err, ControlError::RemoteFailure("process excepted".to_string()));
}

#[tokio::test]
async fn test_execute_reports_pid_before_result() {
    let broker = Arc::new(InMemoryBroker::new());
    let names = ChannelNames::for_profile("test");
    let gate = Arc::new(Notify::new());
    let controller = FakeController {
        result_gate: Some(gate.clone()),
        ..Default::default()
    };
    let _receiver = start_receiver_with(broker.clone(), names.clone(), controller).await;
    let panel = ProcessControlPanel::new(broker, names);

    let handle = panel
        .execute_process("add", vec![json!(1), json!(2)], Map::new())
        .await
        .unwrap();
    let pid = tokio::time::timeout(Duration::from_secs(1), handle.wait_launched())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pid, 1);
    assert!(!handle.is_done());

    gate.notify_one();
    assert_eq!(handle.wait().await.unwrap(), json!({ "pid": 1, "sum": 3 }));
    assert_eq!(handle.wait_launched().await.unwrap(), 1);
}

#[tokio::test]
async fn test_launched_pid_of_other_actions() {
    let (panel, _receiver) = setup().await;

    let launch = panel.launch_process("pw", vec![], Map::new()).await.unwrap();
    assert_eq!(launch.wait_launched().await.unwrap(), 1);

    // Known up front for actions addressed to a process.
    let status = panel.request_status(1).await.unwrap();
    assert_eq!(status.wait_launched().await.unwrap(), 1);

    let failed = panel.execute_process("unknown", vec![], Map::new()).await.unwrap();
    assert!(matches!(
        failed.wait_launched().await.unwrap_err(),
        ControlError::RemoteFailure(msg) if msg.contains("unknown process type")
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_actions_all_get_replies() {
    let broker = Arc::new(InMemoryBroker::new());
    let names = ChannelNames::for_profile("test");
    let controller = FakeController {
        pause_delay: Some(Duration::from_millis(1)),
        ..Default::default()
    };
    let _receiver = start_receiver_with(broker.clone(), names.clone(), controller).await;
    let panel = Arc::new(ProcessControlPanel::new(broker, names));

    // More actions than a subscription buffers, on distinct pids.
    let tasks: Vec<_> = (1..=400)
        .map(|pid| {
            let panel = Arc::clone(&panel);
            tokio::spawn(async move { panel.pause_process(pid).await?.wait().await })
        })
        .collect();
    let outcomes = tokio::time::timeout(Duration::from_secs(20), join_all(tasks))
        .await
        .expect("actions stalled");

    // No process exists, so every reply is a remote failure.
    for (pid, outcome) in (1..).zip(outcomes) {
        assert_eq!(
            outcome.unwrap().unwrap_err(),
            ControlError::RemoteFailure(format!("no process with pid {pid}"))
        );
    }
}

#[tokio::test]
async fn test_continue_resolves_to_pid() {
    let (panel, _receiver) = setup().await;

    let pid: Pid = panel
        .launch_process("pw", vec![], Map::new())
        .await
        .unwrap()
        .wait_as()
        .await
        .unwrap();
    panel.pause_process(pid).await.unwrap().wait().await.unwrap();

    let continued: Pid = panel
        .continue_process(pid)
        .await
        .unwrap()
        .wait_as()
        .await
        .unwrap();
    assert_eq!(continued, pid);
    let status = panel.request_status(pid).await.unwrap().wait().await.unwrap();
    assert_eq!(status["state"], "running");
}

#[tokio::test]
async fn test_remote_failures() {
    let (panel, _receiver) = setup().await;

    let err = panel.request_status(7).await.unwrap().wait().await.unwrap_err();
    assert_eq!(
        err,
        ControlError::RemoteFailure("no process with pid 7".to_string())
    );

    let err = panel
        .launch_process("unknown", vec![], Map::new())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::RemoteFailure(msg) if msg.contains("unknown process type")));

    let err = panel.continue_process(99).await.unwrap().wait().await.unwrap_err();
    assert!(matches!(err, ControlError::RemoteFailure(_)));
}

#[tokio::test]
async fn test_malformed_action_gets_failure_reply() {
    let broker = Arc::new(InMemoryBroker::new());
    let names = ChannelNames::for_profile("test");
    let _receiver = start_receiver(broker.clone(), names.clone()).await;

    let mut replies = broker
        .subscribe(names.messages_exchange(), "reply.raw")
        .await
        .unwrap();
    broker
        .publish(
            names.messages_exchange(),
            Message::new(ChannelNames::control_subject(1), b"not json".to_vec())
                .with_reply_to("reply.raw"),
        )
        .await
        .unwrap();

    let reply = replies.next().await.unwrap().unwrap();
    let response: Response = serde_json::from_slice(&reply.payload).unwrap();
    assert!(!response.ok);
    assert!(response.error.is_some());
}

#[tokio::test]
async fn test_control_action_without_receiver_fails() {
    let broker = Arc::new(InMemoryBroker::new());
    let panel = ProcessControlPanel::new(broker, ChannelNames::for_profile("test"));

    let err = panel.pause_process(1).await.unwrap_err();
    assert!(matches!(err, ControlError::DeliveryFailed(_)));
}

#[tokio::test]
async fn test_profiles_are_isolated() {
    let broker = Arc::new(InMemoryBroker::new());
    let _receiver = start_receiver(broker.clone(), ChannelNames::for_profile("a")).await;

    let other = ProcessControlPanel::new(broker.clone(), ChannelNames::for_profile("b"));
    assert!(matches!(
        other.request_status(1).await.unwrap_err(),
        ControlError::DeliveryFailed(_)
    ));

    let same = ProcessControlPanel::new(broker, ChannelNames::for_profile("a"));
    assert!(matches!(
        same.request_status(1).await.unwrap().wait().await.unwrap_err(),
        ControlError::RemoteFailure(_)
    ));
}

#[tokio::test]
async fn test_task_waits_for_receiver() {
    let broker = Arc::new(InMemoryBroker::new());
    let names = ChannelNames::for_profile("test");
    let panel = ProcessControlPanel::new(broker.clone(), names.clone());

    let handle = panel.launch_process("pw", vec![], Map::new()).await.unwrap();
    assert_eq!(broker.pending(names.launch_queue()).await, 1);
    assert!(!handle.is_done());

    let _receiver = start_receiver(broker.clone(), names.clone()).await;
    let pid: Pid = handle.wait_as().await.unwrap();
    assert_eq!(pid, 1);
    assert_eq!(broker.pending(names.launch_queue()).await, 0);
}

#[tokio::test]
async fn test_interrupt_stops_waiting() {
    let broker = Arc::new(InMemoryBroker::new());
    let panel = ProcessControlPanel::new(broker, ChannelNames::for_profile("test"));

    let handle = panel.launch_process("pw", vec![], Map::new()).await.unwrap();
    let waiter = handle.clone();
    assert!(handle.interrupt("shutting down"));
    assert!(!handle.interrupt("again"));

    assert_eq!(
        waiter.wait().await.unwrap_err(),
        ControlError::Interrupted("shutting down".to_string())
    );
}

/// Fails the first `failures` publishes, then delegates.
struct FlakyBroker {
    inner: Arc<InMemoryBroker>,
    failures: u32,
    attempts: AtomicU32,
}

#[async_trait]
impl MessageBroker for FlakyBroker {
    async fn publish(&self, exchange: &str, message: Message) -> ControlResult<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(ControlError::DeliveryFailed("connection reset".to_string()));
        }
        self.inner.publish(exchange, message).await
    }

    async fn subscribe(
        &self,
        exchange: &str,
        pattern: &str,
    ) -> ControlResult<Box<dyn MessageSubscription>> {
        self.inner.subscribe(exchange, pattern).await
    }

    async fn enqueue(&self, queue: &str, message: Message) -> ControlResult<()> {
        self.inner.enqueue(queue, message).await
    }

    async fn consume(&self, queue: &str) -> ControlResult<Box<dyn MessageSubscription>> {
        self.inner.consume(queue).await
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_publish_retried_with_backoff() {
    let inner = Arc::new(InMemoryBroker::new());
    let names = ChannelNames::for_profile("test");
    let _receiver = start_receiver(inner.clone(), names.clone()).await;

    let flaky = Arc::new(FlakyBroker {
        inner,
        failures: 2,
        attempts: AtomicU32::new(0),
    });
    let panel = ProcessControlPanel::new(flaky.clone(), names.clone())
        .with_retry(Duration::from_millis(10), 3);

    let err = panel.request_status(5).await.unwrap().wait().await.unwrap_err();
    assert!(matches!(err, ControlError::RemoteFailure(_)));
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);

    let exhausted = Arc::new(FlakyBroker {
        inner: Arc::new(InMemoryBroker::new()),
        failures: 10,
        attempts: AtomicU32::new(0),
    });
    let panel = ProcessControlPanel::new(exhausted.clone(), names).with_retry(Duration::from_millis(10), 3);
    assert!(matches!(
        panel.request_status(5).await.unwrap_err(),
        ControlError::DeliveryFailed(_)
    ));
    assert_eq!(exhausted.attempts.load(Ordering::SeqCst), 3);
}

/// Records the kind of every control action published, then delegates.
struct RecordingBroker {
    inner: Arc<InMemoryBroker>,
    published: Mutex<Vec<ActionKind>>,
}

#[async_trait]
impl MessageBroker for RecordingBroker {
    async fn publish(&self, exchange: &str, message: Message) -> ControlResult<()> {
        if message.subject.starts_with("rpc.") {
            let action: Action = serde_json::from_slice(&message.payload).unwrap();
            self.published.lock().unwrap().push(action.kind);
        }
        self.inner.publish(exchange, message).await
    }

    async fn subscribe(
        &self,
        exchange: &str,
        pattern: &str,
    ) -> ControlResult<Box<dyn MessageSubscription>> {
        self.inner.subscribe(exchange, pattern).await
    }

    async fn enqueue(&self, queue: &str, message: Message) -> ControlResult<()> {
        self.inner.enqueue(queue, message).await
    }

    async fn consume(&self, queue: &str) -> ControlResult<Box<dyn MessageSubscription>> {
        self.inner.consume(queue).await
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_actions_on_one_pid_published_in_call_order() {
    let inner = Arc::new(InMemoryBroker::new());
    let names = ChannelNames::for_profile("test");
    let _receiver = start_receiver(inner.clone(), names.clone()).await;
    let recording = Arc::new(RecordingBroker {
        inner,
        published: Mutex::new(Vec::new()),
    });
    let panel = ProcessControlPanel::new(recording.clone(), names);

    let pid: Pid = panel
        .launch_process("pw", vec![], Map::new())
        .await
        .unwrap()
        .wait_as()
        .await
        .unwrap();

    let issued = [
        ActionKind::Pause,
        ActionKind::Play,
        ActionKind::Status,
        ActionKind::Pause,
        ActionKind::Play,
        ActionKind::Pause,
        ActionKind::Cancel,
        ActionKind::Status,
    ];
    let sends: Vec<LocalBoxFuture<'_, ControlResult<ActionHandle>>> = issued
        .iter()
        .map(|kind| match kind {
            ActionKind::Pause => panel.pause_process(pid).boxed_local(),
            ActionKind::Play => panel.play_process(pid).boxed_local(),
            ActionKind::Cancel => panel.kill_process(pid, Some("done")).boxed_local(),
            _ => panel.request_status(pid).boxed_local(),
        })
        .collect();
    let handles: Vec<ActionHandle> = join_all(sends)
        .await
        .into_iter()
        .collect::<ControlResult<_>>()
        .unwrap();

    assert_eq!(*recording.published.lock().unwrap(), issued);
    for handle in &handles {
        handle.wait().await.unwrap();
    }
    let status = handles[7].wait().await.unwrap();
    assert_eq!(status["state"], "killed");
    assert_eq!(status["message"], "done");
}

#[tokio::test]
async fn test_shared_broker_is_reference_counted() {
    let store = BrokerStore::new();
    let url = "memory://".to_string();
    let connect = || Arc::new(InMemoryBroker::new()) as Arc<dyn MessageBroker>;

    let first = ProcessControlPanel::shared(&store, &url, ChannelNames::for_profile("test"), connect);
    let second = ProcessControlPanel::shared(&store, &url, ChannelNames::for_profile("test"), connect);
    assert_eq!(store.ref_count(&url), 2);
    assert!(Arc::ptr_eq(first.broker(), second.broker()));

    // Closing a panel leaves a shared broker connected.
    first.close().await;
    assert!(!first.ready().await);
    assert!(second.ready().await);

    drop(first);
    assert_eq!(store.ref_count(&url), 1);
    drop(second);
    assert!(!store.contains(&url));
}

#[tokio::test]
async fn test_closed_panel_rejects_actions() {
    let broker = Arc::new(InMemoryBroker::new());
    let panel = ProcessControlPanel::new(broker.clone(), ChannelNames::for_profile("test"));
    assert!(panel.ready().await);

    panel.close().await;
    assert!(!panel.ready().await);
    assert!(!broker.is_connected().await);
    assert!(matches!(
        panel.request_status(1).await.unwrap_err(),
        ControlError::DeliveryFailed(_)
    ));
}

#[test]
fn test_blocking_panel() {
    let broker = Arc::new(InMemoryBroker::new());
    let names = ChannelNames::for_profile("test");

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _receiver = runtime.block_on(start_receiver(broker.clone(), names.clone()));

    let panel = BlockingProcessControlPanel::new(broker, names).unwrap();
    assert!(panel.ready());

    let pid = panel.launch_process("pw", vec![], Map::new()).unwrap();
    assert_eq!(pid, 1);
    assert_eq!(panel.request_status(pid).unwrap()["state"], "running");
    panel.kill_process(pid, None).unwrap();
    assert_eq!(panel.request_status(pid).unwrap()["state"], "killed");

    let result = panel
        .execute_process("add", vec![json!(4), json!(4)], Map::new())
        .unwrap();
    assert_eq!(result["sum"], 8);

    let started = panel
        .execute_process_start("add", vec![json!(1)], Map::new())
        .unwrap();
    assert_eq!(started, 3);
    assert_eq!(panel.request_status(started).unwrap()["process_type"], "add");

    let err = panel
        .execute_process_start("unknown", vec![], Map::new())
        .unwrap_err();
    assert!(matches!(err, ControlError::RemoteFailure(_)));

    panel.close();
    assert!(!panel.ready());
}

#[test]
fn test_blocking_panel_times_out() {
    let broker = Arc::new(InMemoryBroker::new());
    let panel = BlockingProcessControlPanel::new(broker, ChannelNames::for_profile("test"))
        .unwrap()
        .with_timeout(Duration::from_millis(50));

    let err = panel.launch_process("pw", vec![], Map::new()).unwrap_err();
    assert!(matches!(err, ControlError::Timeout(_)));
}

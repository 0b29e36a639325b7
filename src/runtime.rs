// Receive loop: poll for documents, validate them, execute them one at a time
// A new document is only read once the previous sequence has finished.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::time::interval;
use tracing::{debug, info, warn};

// local imports
use crate::clock::{Clock, SystemClock};
use crate::config::{Args, LOOP_HZ};
use crate::display::{ChannelDisplay, LogDisplay, StatusDisplay};
use crate::executor::{ExecutionError, MotionExecutor};
use crate::messages::{Command, RuntimeStatus, StatusLine};
use crate::motor::{MotorBus, PwmBridge, ServoBus, SimBus};
use crate::parser;
use crate::transport::{Transport, ZenohTransport};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DESTINATION_KEY: &str = "ip_destino";

pub struct Runtime<S: ServoBus, M: MotorBus, C: Clock> {
    executor: MotionExecutor<S, M, C>,
    display: Box<dyn StatusDisplay>,
    address: Option<String>,
    status: RuntimeStatus,
}

impl<S: ServoBus, M: MotorBus, C: Clock> Runtime<S, M, C> {
    pub fn new(
        executor: MotionExecutor<S, M, C>,
        display: Box<dyn StatusDisplay>,
        address: Option<String>,
    ) -> Self {
        Self {
            executor,
            display,
            address,
            status: RuntimeStatus::Idle,
        }
    }

    pub fn status(&self) -> RuntimeStatus {
        self.status
    }

    /// Read at most one pending document. Returns its commands if it was accepted;
    /// the caller runs them with `execute` before taking the next one.
    pub fn take(&mut self, transport: &mut impl Transport) -> Option<Vec<Command>> {
        match transport.receive() {
            Some(payload) => self.accept(&payload),
            None => {
                self.idle();
                None
            }
        }
    }

    /// Validate a raw document. Returns the commands to run, or None if it was rejected
    /// or addressed to another rover.
    pub fn accept(&mut self, payload: &[u8]) -> Option<Vec<Command>> {
        info!("Received document ({} bytes)", payload.len());

        let document: Value = match serde_json::from_slice(payload) {
            Ok(document) => document,
            Err(e) => {
                self.reject(&parser::ParseError::InvalidJson(e.to_string()));
                return None;
            }
        };

        if !self.addressed_to_us(&document) {
            return None;
        }

        match parser::parse(&document) {
            Ok(commands) => {
                info!("Accepted sequence of {} steps", commands.len());
                self.display.write_text(&format!("Steps: {}", commands.len()), 0, 20);
                self.status = RuntimeStatus::Executing;
                Some(commands)
            }
            Err(e) => {
                self.reject(&e);
                None
            }
        }
    }

    /// Run an accepted sequence to completion or to its first failure
    pub fn execute(&mut self, commands: &[Command]) {
        self.status = match self.executor.run(commands) {
            Ok(steps) => {
                info!("Sequence completed ({} steps)", steps);
                self.display.write_text("Sequence done", 0, 20);
                RuntimeStatus::Completed
            }
            Err(ExecutionError::ActuationFailure { step, source }) => {
                warn!("Sequence aborted at Paso_{}: {}", step, source);
                self.display.write_text(&format!("Aborted Paso_{}", step), 0, 20);
                RuntimeStatus::Aborted
            }
        };
    }

    /// Nothing pending
    pub fn idle(&mut self) {
        if self.status != RuntimeStatus::Idle {
            self.display.write_text("No messages", 0, 20);
            self.status = RuntimeStatus::Idle;
        }
    }

    /// Home the arm and show the ready banner
    pub fn startup(&mut self) {
        self.display.write_text("Rover ready", 0, 0);
        if let Err(e) = self.executor.home() {
            warn!("Arm homing failed: {}", e);
            self.display.write_text("Arm home failed", 0, 10);
        }
    }

    pub fn shutdown(&mut self) {
        info!("Shutting down actuators");
        self.executor.shutdown();
        self.display.write_text("Stopped", 0, 0);
    }

    /// With an address configured, only documents whose `ip_destino` matches it are ours
    fn addressed_to_us(&self, document: &Value) -> bool {
        let Some(ours) = self.address.as_deref() else {
            return true;
        };

        match document.get(DESTINATION_KEY).and_then(Value::as_str) {
            Some(theirs) if theirs == ours => true,
            Some(theirs) => {
                debug!("Ignoring document addressed to {}", theirs);
                false
            }
            None => {
                debug!("Ignoring document without {}", DESTINATION_KEY);
                false
            }
        }
    }

    fn reject(&mut self, error: &parser::ParseError) {
        warn!("Rejected document: {}", error);
        self.display.write_text(&format!("Invalid: {}", error.kind()), 0, 20);
        self.status = RuntimeStatus::Rejected;
    }
}

pub async fn run(args: Args) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(args.cmd_topic.clone()).await?;
    let pub_status = session.declare_publisher(args.status_topic.clone()).await?;

    // Status changes are reported synchronously and published from their own task
    let (status_tx, mut status_rx) = unbounded_channel::<RuntimeStatus>();
    tokio::spawn(async move {
        while let Some(status) = status_rx.recv().await {
            publish_json(&pub_status, &status).await;
        }
    });

    let display: Box<dyn StatusDisplay> = if args.display_topic.is_empty() {
        info!("No display topic: display lines go to the log");
        Box::new(LogDisplay)
    } else {
        let pub_display = session.declare_publisher(args.display_topic.clone()).await?;
        let (display_tx, mut display_rx) = unbounded_channel::<StatusLine>();
        tokio::spawn(async move {
            while let Some(line) = display_rx.recv().await {
                publish_json(&pub_display, &line).await;
            }
        });
        info!("Publishing display to: {}", args.display_topic);
        Box::new(ChannelDisplay::new(display_tx))
    };

    info!("Subscribed to: {}", args.cmd_topic);
    info!("Publishing status to: {}", args.status_topic);

    let transport = ZenohTransport::new(subscriber);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    if args.simulate {
        info!("Simulation mode: actuators are not connected");
        let executor = MotionExecutor::new(SimBus::new(), SimBus::new(), SystemClock)?;
        let runtime = Runtime::new(executor, display, args.address);
        serve(runtime, transport, status_tx, shutdown).await;
    } else {
        info!("Opening PWM bridge on {}", args.port);
        let mut bridge = PwmBridge::open(&args.port)?;
        if !bridge.ping()? {
            warn!("PWM bridge on {} is not answering pings", args.port);
        }
        let servo_bus = bridge.try_clone()?;
        let executor = MotionExecutor::new(servo_bus, bridge, SystemClock)?;
        let runtime = Runtime::new(executor, display, args.address);
        serve(runtime, transport, status_tx, shutdown).await;
    }

    session.close().await?;
    Ok(())
}

/// Poll `transport` at LOOP_HZ until `shutdown` resolves, reporting each status change on
/// `status_tx`. Sequences run to completion inside the loop.
pub async fn serve<S: ServoBus, M: MotorBus, C: Clock>(
    mut runtime: Runtime<S, M, C>,
    mut transport: impl Transport,
    status_tx: UnboundedSender<RuntimeStatus>,
    shutdown: impl Future<Output = ()>,
) {
    runtime.startup();

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    tokio::pin!(shutdown);
    let mut reported: Option<RuntimeStatus> = None;

    info!("Runtime started: polling at {}Hz", LOOP_HZ);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                runtime.shutdown();
                return;
            }
        }

        // 1. Take at most one document; the next is only read once this one is done
        if let Some(commands) = runtime.take(&mut transport) {
            report(&status_tx, runtime.status(), &mut reported);
            // Actuation blocks for the computed durations
            tokio::task::block_in_place(|| runtime.execute(&commands));
        }

        // 2. Report status on change
        report(&status_tx, runtime.status(), &mut reported);
    }
}

/// Record `status` as reported. Returns false if it was already the last one reported.
fn status_changed(reported: &mut Option<RuntimeStatus>, status: RuntimeStatus) -> bool {
    if *reported == Some(status) {
        return false;
    }
    *reported = Some(status);
    true
}

fn report(
    status_tx: &UnboundedSender<RuntimeStatus>,
    status: RuntimeStatus,
    reported: &mut Option<RuntimeStatus>,
) {
    if status_changed(reported, status) && status_tx.send(status).is_err() {
        debug!("Status channel closed, dropping {:?}", status);
    }
}

async fn publish_json(publisher: &zenoh::pubsub::Publisher<'_>, value: &impl serde::Serialize) {
    match serde_json::to_string(value) {
        Ok(json) => {
            if let Err(e) = publisher.put(json).await {
                warn!("Failed to publish on {}: {}", publisher.key_expr(), e);
            }
        }
        Err(e) => warn!("Failed to encode message: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::config::CHANNEL_MOTOR_LEFT;
    use crate::motor::{BusEvent, Spin};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use tokio::sync::oneshot;

    /// Display that keeps every line
    #[derive(Clone, Default)]
    struct MemoryDisplay(Rc<RefCell<Vec<String>>>);

    impl StatusDisplay for MemoryDisplay {
        fn write_text(&mut self, text: &str, _x: i32, _y: i32) {
            self.0.borrow_mut().push(text.to_string());
        }
    }

    /// Queue that signals once it has been polled while empty
    struct DrainingQueue {
        documents: VecDeque<Vec<u8>>,
        drained: Option<oneshot::Sender<()>>,
    }

    impl Transport for DrainingQueue {
        fn receive(&mut self) -> Option<Vec<u8>> {
            let document = self.documents.pop_front();
            if document.is_none() {
                if let Some(drained) = self.drained.take() {
                    let _ = drained.send(());
                }
            }
            document
        }
    }

    type TestRuntime = Runtime<SimBus, SimBus, VirtualClock>;

    fn runtime(bus: &SimBus, address: Option<&str>) -> (TestRuntime, MemoryDisplay) {
        let executor = MotionExecutor::new(bus.clone(), bus.clone(), VirtualClock::new()).unwrap();
        let display = MemoryDisplay::default();
        let runtime = Runtime::new(
            executor,
            Box::new(display.clone()),
            address.map(str::to_string),
        );
        (runtime, display)
    }

    /// Run the receive loop until every document is handled, returning the reported statuses
    async fn serve_all(runtime: TestRuntime, documents: &[&[u8]]) -> Vec<RuntimeStatus> {
        let (drained_tx, drained_rx) = oneshot::channel();
        let transport = DrainingQueue {
            documents: documents.iter().map(|d| d.to_vec()).collect(),
            drained: Some(drained_tx),
        };
        let (status_tx, mut status_rx) = unbounded_channel();

        serve(runtime, transport, status_tx, async {
            let _ = drained_rx.await;
        })
        .await;

        let mut statuses = Vec::new();
        while let Ok(status) = status_rx.try_recv() {
            statuses.push(status);
        }
        statuses
    }

    const VALID: &[u8] = br#"{"Carro_1": {"Paso_1": {"Movimiento":
        {"distancia_mm": 50, "velocidad_mm_s": 25, "radio_mm": "inf"}}}}"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_valid_document_completes() {
        let bus = SimBus::recording();
        let (rt, display) = runtime(&bus, None);

        let statuses = serve_all(rt, &[VALID]).await;

        assert_eq!(
            statuses,
            vec![RuntimeStatus::Executing, RuntimeStatus::Completed, RuntimeStatus::Idle]
        );
        assert!(bus.events().contains(&BusEvent::Spin {
            channel: CHANNEL_MOTOR_LEFT,
            spin: Spin::Forward
        }));
        assert_eq!(
            *display.0.borrow(),
            vec!["Rover ready", "Steps: 1", "Sequence done", "No messages", "Stopped"]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_document_is_rejected_and_loop_continues() {
        let bus = SimBus::recording();
        let (rt, display) = runtime(&bus, None);

        let statuses = serve_all(
            rt,
            &[&br#"{"Carro_1": {"Paso_1": {}}}"#[..], &b"not json"[..], VALID],
        )
        .await;

        assert_eq!(
            statuses,
            vec![
                RuntimeStatus::Rejected,
                RuntimeStatus::Executing,
                RuntimeStatus::Completed,
                RuntimeStatus::Idle,
            ]
        );
        let lines = display.0.borrow();
        assert_eq!(lines[1], "Invalid: MissingMovimiento");
        assert_eq!(lines[2], "Invalid: InvalidJson");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_actuation_failure_reports_aborted() {
        let bus = SimBus::recording()
            .fail_when(|e| *e == BusEvent::Spin { channel: CHANNEL_MOTOR_LEFT, spin: Spin::Forward });
        let (rt, display) = runtime(&bus, None);

        let statuses = serve_all(rt, &[VALID]).await;

        assert_eq!(
            statuses,
            vec![RuntimeStatus::Executing, RuntimeStatus::Aborted, RuntimeStatus::Idle]
        );
        assert!(display.0.borrow().contains(&"Aborted Paso_1".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_serve_homes_on_startup_and_releases_on_shutdown() {
        let bus = SimBus::recording();
        let (rt, _) = runtime(&bus, None);

        assert_eq!(serve_all(rt, &[]).await, vec![RuntimeStatus::Idle]);

        let events = bus.events();
        assert!(events.iter().any(|e| matches!(e, BusEvent::Pulse { .. })));
        assert_eq!(
            events.iter().filter(|e| matches!(e, BusEvent::Release { .. })).count(),
            3
        );
    }

    #[test]
    fn test_documents_for_other_rovers_are_ignored() {
        let bus = SimBus::recording();
        let (mut rt, _) = runtime(&bus, Some("192.168.0.123"));
        let other = br#"{"ip_destino": "192.168.0.50", "Carro_1": {"Paso_1": {"Movimiento":
            {"distancia_mm": 50, "velocidad_mm_s": 25, "radio_mm": "inf"}}}}"#;
        let ours = br#"{"ip_destino": "192.168.0.123", "Carro_1": {"Paso_1": {"Movimiento":
            {"distancia_mm": 50, "velocidad_mm_s": 25, "radio_mm": "inf"}}}}"#;

        assert!(rt.accept(other).is_none());
        assert_eq!(rt.status(), RuntimeStatus::Idle);
        assert!(rt.accept(ours).is_some());
        assert_eq!(rt.status(), RuntimeStatus::Executing);
    }

    #[test]
    fn test_missing_destination_ignored_when_address_set() {
        let bus = SimBus::recording();

        // With an address configured, a document without ip_destino is not ours
        let (mut rt, _) = runtime(&bus, Some("192.168.0.123"));
        assert!(rt.accept(VALID).is_none());
        assert_eq!(rt.status(), RuntimeStatus::Idle);

        let (mut rt, _) = runtime(&bus, None);
        assert!(rt.accept(VALID).is_some());
    }

    #[test]
    fn test_take_goes_idle_on_empty_transport() {
        let bus = SimBus::recording();
        let (mut rt, display) = runtime(&bus, None);
        let mut queue: VecDeque<Vec<u8>> = VecDeque::from(vec![VALID.to_vec()]);

        let commands = rt.take(&mut queue).unwrap();
        rt.execute(&commands);
        assert_eq!(rt.status(), RuntimeStatus::Completed);

        assert!(rt.take(&mut queue).is_none());
        assert_eq!(rt.status(), RuntimeStatus::Idle);
        // Already idle: the banner is not repeated
        assert!(rt.take(&mut queue).is_none());
        let idle_lines = display.0.borrow().iter().filter(|l| *l == "No messages").count();
        assert_eq!(idle_lines, 1);
    }

    #[test]
    fn test_status_changed_reports_transitions_only() {
        let mut reported = None;
        assert!(status_changed(&mut reported, RuntimeStatus::Idle));
        assert!(!status_changed(&mut reported, RuntimeStatus::Idle));
        assert!(status_changed(&mut reported, RuntimeStatus::Executing));
        assert!(status_changed(&mut reported, RuntimeStatus::Idle));
        assert_eq!(reported, Some(RuntimeStatus::Idle));
    }

    #[test]
    fn test_log_display_runs_a_sequence() {
        let bus = SimBus::recording();
        let executor = MotionExecutor::new(bus.clone(), bus.clone(), VirtualClock::new()).unwrap();
        let mut rt = Runtime::new(executor, Box::new(LogDisplay), None);

        let commands = rt.accept(VALID).unwrap();
        rt.execute(&commands);
        assert_eq!(rt.status(), RuntimeStatus::Completed);
    }
}

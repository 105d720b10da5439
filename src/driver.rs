//! Async front end for the guidance state machine.
//!
//! One tokio task owns the `Navigator` and drains a command channel, so every
//! sensor event is processed to completion before the next one is looked at.
//! Sensor sources are separate tasks, each writing into its own event channel;
//! only one runs at a time and its channel is dropped when it is replaced.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

use crate::analytics::AnalyticsSink;
use crate::guidance::{GuidanceOutput, GuidanceState, Navigator, ReplacePolicy};
use crate::live_status::current_timestamp;
use crate::types::{Destination, SensorEvent};

/// Task body feeding sensor events into the driver
pub type SensorSource =
    Box<dyn FnOnce(Sender<SensorEvent>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

pub enum DriverCommand {
    Select(Destination),
    /// Start guidance; a running source is aborted before `source` is spawned
    Start {
        policy: ReplacePolicy,
        source: Option<SensorSource>,
    },
    Sensor(SensorEvent),
    Stop,
    /// Teardown: finish any active session, close the usage session, exit
    Shutdown,
}

impl fmt::Debug for DriverCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DriverCommand::Select(destination) => {
                f.debug_tuple("Select").field(&destination.name).finish()
            }
            DriverCommand::Start { policy, source } => f
                .debug_struct("Start")
                .field("policy", policy)
                .field("source", &source.is_some())
                .finish(),
            DriverCommand::Sensor(event) => f.debug_tuple("Sensor").field(event).finish(),
            DriverCommand::Stop => write!(f, "Stop"),
            DriverCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Running source task and the receiving end of its event channel
struct ActiveSource {
    events: Receiver<SensorEvent>,
    task: JoinHandle<()>,
}

pub struct GuidanceDriver {
    navigator: Navigator,
    sink: Arc<dyn AnalyticsSink>,
    outputs: Sender<GuidanceOutput>,
    source: Option<ActiveSource>,
    source_buffer: usize,
    clock: fn() -> f64,
}

/// Handles returned by [`GuidanceDriver::spawn`]
pub struct DriverHandle {
    pub commands: Sender<DriverCommand>,
    pub outputs: Receiver<GuidanceOutput>,
    pub task: JoinHandle<Navigator>,
}

impl GuidanceDriver {
    pub fn new(
        navigator: Navigator,
        sink: Arc<dyn AnalyticsSink>,
        outputs: Sender<GuidanceOutput>,
    ) -> Self {
        Self {
            navigator,
            sink,
            outputs,
            source: None,
            source_buffer: 32,
            clock: current_timestamp,
        }
    }

    /// Replace the wall clock used for stop/teardown timestamps.
    pub fn with_clock(mut self, clock: fn() -> f64) -> Self {
        self.clock = clock;
        self
    }

    /// Run on a new task with channels of the given capacity.
    pub fn spawn(
        navigator: Navigator,
        sink: Arc<dyn AnalyticsSink>,
        buffer: usize,
        clock: fn() -> f64,
    ) -> DriverHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(buffer);
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let mut driver = GuidanceDriver::new(navigator, sink, out_tx).with_clock(clock);
        driver.source_buffer = buffer.max(1);
        let task = tokio::spawn(driver.run(cmd_rx));
        DriverHandle {
            commands: cmd_tx,
            outputs: out_rx,
            task,
        }
    }

    /// Process commands and source events until `Shutdown` or until every
    /// command sender is gone. Returns the navigator for inspection.
    pub async fn run(mut self, mut commands: Receiver<DriverCommand>) -> Navigator {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.apply(command).await {
                        break;
                    }
                }
                Some(event) = next_event(&mut self.source) => {
                    self.on_sensor(event).await;
                }
            }
        }
        self.abort_source();
        self.navigator
    }

    /// Returns `false` once the driver should exit.
    async fn apply(&mut self, command: DriverCommand) -> bool {
        match command {
            DriverCommand::Select(destination) => {
                self.navigator.select_destination(destination);
            }
            DriverCommand::Start { policy, source } => {
                self.abort_source();
                match self.navigator.start(policy, (self.clock)()) {
                    Ok(outputs) => self.dispatch(outputs).await,
                    Err(e) => {
                        log::warn!("Cannot start guidance: {}", e);
                        self.emit(GuidanceOutput::SensorStatus(e.to_string())).await;
                        return true;
                    }
                }
                if let Some(source) = source {
                    let (tx, events) = mpsc::channel(self.source_buffer);
                    let task = tokio::spawn(source(tx));
                    self.source = Some(ActiveSource { events, task });
                }
            }
            DriverCommand::Sensor(event) => self.on_sensor(event).await,
            DriverCommand::Stop => {
                self.abort_source();
                let outputs = self.navigator.stop((self.clock)());
                self.dispatch(outputs).await;
            }
            DriverCommand::Shutdown => {
                self.abort_source();
                let outputs = self.navigator.teardown((self.clock)());
                self.dispatch(outputs).await;
                self.sink.end_session_beacon();
                return false;
            }
        }
        true
    }

    async fn on_sensor(&mut self, event: SensorEvent) {
        let outputs = self.navigator.handle(event);
        self.dispatch(outputs).await;
        if self.navigator.state() == GuidanceState::Arrived {
            self.abort_source();
        }
    }

    /// Abort the source task and drop its channel, discarding anything it
    /// queued but the driver has not read yet.
    fn abort_source(&mut self) {
        if let Some(source) = self.source.take() {
            source.task.abort();
            log::debug!("Sensor source aborted");
        }
    }

    async fn dispatch(&self, outputs: Vec<GuidanceOutput>) {
        for output in outputs {
            if let GuidanceOutput::Completed(record) = &output {
                self.sink.record_navigation(record.clone());
            }
            self.emit(output).await;
        }
    }

    async fn emit(&self, output: GuidanceOutput) {
        if self.outputs.send(output).await.is_err() {
            log::debug!("Output receiver dropped");
        }
    }
}

/// Next event of the running source; pending forever when there is none.
async fn next_event(source: &mut Option<ActiveSource>) -> Option<SensorEvent> {
    match source {
        Some(source) => source.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Source that plays back recorded events, `pace` apart.
pub fn replay_source(events: Vec<SensorEvent>, pace: Duration) -> SensorSource {
    Box::new(move |tx| Box::pin(replay_loop(tx, events, pace)))
}

async fn replay_loop(tx: Sender<SensorEvent>, events: Vec<SensorEvent>, pace: Duration) {
    let total = events.len();
    for (sent, event) in events.into_iter().enumerate() {
        if !pace.is_zero() {
            tokio::time::sleep(pace).await;
        }
        if tx.send(event).await.is_err() {
            log::debug!("Driver gone after {}/{} events", sent, total);
            return;
        }
    }
    log::debug!("Replay source finished ({} events)", total);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::RecordingSink;
    use crate::config::GuidanceConfig;
    use crate::geodesy::destination_point;
    use crate::types::{Fix, GeoPoint};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BLOQUE_B: GeoPoint = GeoPoint::new(4.6612256555812, -74.0595379523924);

    fn fixed_clock() -> f64 {
        1_700_000_100.0
    }

    fn fix(point: GeoPoint, t: f64) -> SensorEvent {
        SensorEvent::Fix(Fix {
            position: point,
            accuracy: 6.0,
            timestamp: t,
        })
    }

    fn walk_in() -> Vec<SensorEvent> {
        let t0 = 1_700_000_000.0;
        let mut events = vec![SensorEvent::Heading { degrees: Some(10.0) }];
        for (i, remaining) in [45.0, 30.0, 15.0, 0.0].iter().enumerate() {
            let p = destination_point(BLOQUE_B, 180.0, *remaining);
            events.push(fix(p, t0 + 12.0 * i as f64));
        }
        events
    }

    #[tokio::test]
    async fn test_replay_reaches_destination() {
        let sink = RecordingSink::new();
        let mut handle = GuidanceDriver::spawn(
            Navigator::new(GuidanceConfig::default()),
            Arc::new(sink.clone()),
            32,
            fixed_clock,
        );

        handle
            .commands
            .send(DriverCommand::Select(Destination::new(
                2,
                "Bloque B",
                BLOQUE_B.latitude,
                BLOQUE_B.longitude,
            )))
            .await
            .unwrap();
        handle
            .commands
            .send(DriverCommand::Start {
                policy: ReplacePolicy::FinishPrevious,
                source: Some(replay_source(walk_in(), Duration::ZERO)),
            })
            .await
            .unwrap();

        let mut renders = 0;
        let record = loop {
            match handle.outputs.recv().await.unwrap() {
                GuidanceOutput::Render(_) => renders += 1,
                GuidanceOutput::Completed(record) => break record,
                other => panic!("unexpected {:?}", other),
            }
        };
        assert!(renders >= 2);
        assert!(record.completed);
        assert_eq!(record.destination_id, 2);
        assert_eq!(sink.records(), vec![record]);

        handle.commands.send(DriverCommand::Shutdown).await.unwrap();
        let navigator = handle.task.await.unwrap();
        assert_eq!(navigator.state(), GuidanceState::Arrived);
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_then_shutdown_reports_once() {
        let sink = RecordingSink::new();
        let mut handle = GuidanceDriver::spawn(
            Navigator::new(GuidanceConfig::default()),
            Arc::new(sink.clone()),
            32,
            fixed_clock,
        );
        let tx = handle.commands.clone();

        tx.send(DriverCommand::Select(Destination::new(
            2,
            "Bloque B",
            BLOQUE_B.latitude,
            BLOQUE_B.longitude,
        )))
        .await
        .unwrap();
        tx.send(DriverCommand::Start {
            policy: ReplacePolicy::FinishPrevious,
            source: None,
        })
        .await
        .unwrap();
        let far = destination_point(BLOQUE_B, 90.0, 80.0);
        tx.send(DriverCommand::Sensor(fix(far, 1_700_000_000.0)))
            .await
            .unwrap();
        tx.send(DriverCommand::Stop).await.unwrap();
        tx.send(DriverCommand::Shutdown).await.unwrap();

        let navigator = handle.task.await.unwrap();
        assert_eq!(navigator.state(), GuidanceState::Idle);

        let mut outputs = Vec::new();
        while let Ok(output) = handle.outputs.try_recv() {
            outputs.push(output);
        }
        let completed: Vec<_> = outputs
            .iter()
            .filter(|o| matches!(o, GuidanceOutput::Completed(_)))
            .collect();
        assert_eq!(completed.len(), 1);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].completed);
        assert_eq!(records[0].duration_seconds, 100);
    }

    /// Source that never ends: a fix every 5 ms, 200 m south of Bloque B
    fn endless_source(sent: Arc<AtomicUsize>) -> SensorSource {
        Box::new(move |tx| {
            Box::pin(async move {
                let start = destination_point(BLOQUE_B, 180.0, 200.0);
                for i in 0u64.. {
                    let p = destination_point(start, 90.0, 3.0 * i as f64);
                    if tx.send(fix(p, 1_700_000_000.0 + i as f64)).await.is_err() {
                        return;
                    }
                    sent.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        })
    }

    #[tokio::test]
    async fn test_restart_cancels_previous_source() {
        let sink = RecordingSink::new();
        let mut handle = GuidanceDriver::spawn(
            Navigator::new(GuidanceConfig::default()),
            Arc::new(sink.clone()),
            32,
            fixed_clock,
        );
        let sent = Arc::new(AtomicUsize::new(0));

        handle
            .commands
            .send(DriverCommand::Select(Destination::new(
                2,
                "Bloque B",
                BLOQUE_B.latitude,
                BLOQUE_B.longitude,
            )))
            .await
            .unwrap();
        handle
            .commands
            .send(DriverCommand::Start {
                policy: ReplacePolicy::FinishPrevious,
                source: Some(endless_source(sent.clone())),
            })
            .await
            .unwrap();

        let mut renders = 0;
        while renders < 3 {
            if let Some(GuidanceOutput::Render(_)) = handle.outputs.recv().await {
                renders += 1;
            }
        }

        handle
            .commands
            .send(DriverCommand::Start {
                policy: ReplacePolicy::FinishPrevious,
                source: None,
            })
            .await
            .unwrap();
        let record = loop {
            match handle.outputs.recv().await.unwrap() {
                GuidanceOutput::Completed(record) => break record,
                GuidanceOutput::Render(_) => {}
                other => panic!("unexpected {:?}", other),
            }
        };
        assert!(!record.completed);
        assert_eq!(record.destination_id, 2);

        // The first source keeps nothing alive and nothing more arrives
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_restart = sent.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sent.load(Ordering::SeqCst), after_restart);

        handle.commands.send(DriverCommand::Shutdown).await.unwrap();
        let mut late = Vec::new();
        while let Some(output) = handle.outputs.recv().await {
            late.push(output);
        }
        assert!(late.is_empty(), "{:?}", late);

        let navigator = handle.task.await.unwrap();
        assert_eq!(navigator.state(), GuidanceState::Idle);
        assert_eq!(sink.records(), vec![record]);
    }

    #[tokio::test]
    async fn test_start_without_destination_reports_status() {
        let sink = RecordingSink::new();
        let mut handle = GuidanceDriver::spawn(
            Navigator::new(GuidanceConfig::default()),
            Arc::new(sink),
            8,
            fixed_clock,
        );
        handle
            .commands
            .send(DriverCommand::Start {
                policy: ReplacePolicy::Discard,
                source: None,
            })
            .await
            .unwrap();
        assert!(matches!(
            handle.outputs.recv().await,
            Some(GuidanceOutput::SensorStatus(_))
        ));
        drop(handle.commands);
        let navigator = handle.task.await.unwrap();
        assert_eq!(navigator.state(), GuidanceState::Idle);
    }
}

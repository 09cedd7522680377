//! Tick runner
//!
//! A tokio task that exclusively owns a [`MotionController`] and serialises
//! every event reaching it: operator requests arrive over an mpsc channel,
//! and while motion is outstanding the task ticks the controller on a fixed
//! interval. Nothing else holds a reference to the controller, so `tick`
//! can never race a start or an abort.
//!
//! Dropping every [`MotionHandle`] while the roof is moving stops the motor
//! before the task exits.

use crate::error::Rejection;
use crate::motion::{MotionController, MotionState, StartOutcome, TickOutcome};
use crate::park::ParkStatus;
use crate::status::StatusEvent;
use crate::switch::{Direction, LimitSwitchState};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Default poll period while the roof is moving.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("motion runner has stopped")]
    Stopped,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerSnapshot {
    pub state: MotionState,
    pub park: ParkStatus,
    pub direction: Option<Direction>,
    pub elapsed_ms: Option<u64>,
    pub link_degraded: bool,
    pub switches: Option<LimitSwitchState>,
}

impl ControllerSnapshot {
    fn of(controller: &MotionController) -> Self {
        let request = controller.request();
        Self {
            state: controller.state(),
            park: controller.park_status(),
            direction: request.map(|r| r.direction),
            elapsed_ms: request.map(|r| r.elapsed().as_millis() as u64),
            link_degraded: controller.link_degraded(),
            switches: controller.last_switches(),
        }
    }
}

enum RunnerCommand {
    Start {
        direction: Direction,
        reply: oneshot::Sender<StartOutcome>,
    },
    Cancel {
        reply: oneshot::Sender<bool>,
    },
    Abort {
        reply: oneshot::Sender<StatusEvent>,
    },
    Refresh {
        reply: oneshot::Sender<ParkStatus>,
    },
    Snapshot {
        reply: oneshot::Sender<ControllerSnapshot>,
    },
}

/// Cloneable handle to a running [`MotionRunner`].
#[derive(Clone)]
pub struct MotionHandle {
    tx: mpsc::Sender<RunnerCommand>,
}

impl MotionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RunnerCommand,
    ) -> Result<T, RunnerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| RunnerError::Stopped)?;
        rx.await.map_err(|_| RunnerError::Stopped)
    }

    pub async fn start(&self, direction: Direction) -> Result<StartOutcome, RunnerError> {
        self.request(|reply| RunnerCommand::Start { direction, reply })
            .await
    }

    /// Convenience for `start(Direction::Open)` with the rejection as an error.
    pub async fn open(&self) -> Result<Result<(), Rejection>, RunnerError> {
        Ok(into_result(self.start(Direction::Open).await?))
    }

    /// Convenience for `start(Direction::Close)` with the rejection as an error.
    pub async fn close(&self) -> Result<Result<(), Rejection>, RunnerError> {
        Ok(into_result(self.start(Direction::Close).await?))
    }

    /// Request cancellation, honoured on the next tick.
    pub async fn cancel(&self) -> Result<bool, RunnerError> {
        self.request(|reply| RunnerCommand::Cancel { reply }).await
    }

    /// Stop immediately.
    pub async fn abort(&self) -> Result<StatusEvent, RunnerError> {
        self.request(|reply| RunnerCommand::Abort { reply }).await
    }

    pub async fn refresh(&self) -> Result<ParkStatus, RunnerError> {
        self.request(|reply| RunnerCommand::Refresh { reply }).await
    }

    pub async fn snapshot(&self) -> Result<ControllerSnapshot, RunnerError> {
        self.request(|reply| RunnerCommand::Snapshot { reply }).await
    }
}

fn into_result(outcome: StartOutcome) -> Result<(), Rejection> {
    match outcome {
        StartOutcome::Busy => Ok(()),
        StartOutcome::Rejected(rejection) => Err(rejection),
    }
}

pub struct MotionRunner;

impl MotionRunner {
    /// Move `controller` into a new task and return a handle to it.
    pub fn spawn(
        controller: MotionController,
        tick_interval: Duration,
    ) -> (MotionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(controller, rx, tick_interval));
        (MotionHandle { tx }, task)
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn run(
    mut controller: MotionController,
    mut rx: mpsc::Receiver<RunnerCommand>,
    tick_interval: Duration,
) {
    let mut ticking: Option<Interval> = None;

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else {
                    if !controller.state().is_idle() {
                        tracing::warn!("motion handles dropped mid-motion, stopping roof");
                        controller.abort().await;
                    }
                    break;
                };
                match command {
                    RunnerCommand::Start { direction, reply } => {
                        let outcome = controller.start_motion(direction).await;
                        if outcome.is_busy() {
                            ticking = Some(ticker(tick_interval));
                        }
                        let _ = reply.send(outcome);
                    }
                    RunnerCommand::Cancel { reply } => {
                        let _ = reply.send(controller.cancel());
                    }
                    RunnerCommand::Abort { reply } => {
                        let event = controller.abort().await;
                        ticking = None;
                        let _ = reply.send(event);
                    }
                    RunnerCommand::Refresh { reply } => {
                        let _ = reply.send(controller.refresh().await);
                    }
                    RunnerCommand::Snapshot { reply } => {
                        let _ = reply.send(ControllerSnapshot::of(&controller));
                    }
                }
            }
            _ = next_tick(&mut ticking) => {
                match controller.tick().await {
                    TickOutcome::Continue => {}
                    TickOutcome::Finished(_) | TickOutcome::Idle => ticking = None,
                }
            }
        }
    }

    tracing::debug!("motion runner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{Connection, StaticInterlock};
    use crate::error::TransportError;
    use crate::motion::MotionConfig;
    use crate::status::{BroadcastSink, TerminalReason};
    use crate::switch::SwitchSnapshot;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Roof that reaches the end of travel after a fixed number of polls
    /// while the motor runs.
    struct CountingRoof {
        polls_to_limit: u32,
        inner: Mutex<(Option<Direction>, u32, SwitchSnapshot)>,
        sent: Mutex<Vec<String>>,
    }

    impl CountingRoof {
        fn new(polls_to_limit: u32, start: SwitchSnapshot) -> Arc<Self> {
            Arc::new(Self {
                polls_to_limit,
                inner: Mutex::new((None, 0, start)),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Connection for CountingRoof {
        async fn send_command(&self, command: &str) -> Result<(), TransportError> {
            self.sent.lock().push(command.to_string());
            let mut inner = self.inner.lock();
            inner.0 = match command {
                "OPEN" => Some(Direction::Open),
                "CLOSE" => Some(Direction::Close),
                _ => None,
            };
            inner.1 = 0;
            Ok(())
        }

        async fn query_state(&self) -> Result<SwitchSnapshot, TransportError> {
            let mut inner = self.inner.lock();
            if let Some(direction) = inner.0 {
                inner.1 += 1;
                inner.2 = if inner.1 >= self.polls_to_limit {
                    match direction {
                        Direction::Open => SwitchSnapshot::fully_open(),
                        Direction::Close => SwitchSnapshot::fully_closed(),
                    }
                } else {
                    SwitchSnapshot::between()
                };
            }
            Ok(inner.2)
        }
    }

    fn spawn(roof: Arc<CountingRoof>) -> (MotionHandle, BroadcastSink) {
        let sink = BroadcastSink::new(8);
        let controller = MotionController::new(
            roof,
            Arc::new(StaticInterlock::permissive()),
            Arc::new(sink.clone()),
            MotionConfig::default(),
        );
        let (handle, _task) = MotionRunner::spawn(controller, DEFAULT_TICK_INTERVAL);
        (handle, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn runner_ticks_until_limit() {
        let roof = CountingRoof::new(4, SwitchSnapshot::fully_closed());
        let (handle, sink) = spawn(roof.clone());
        let mut events = sink.subscribe();

        assert_eq!(handle.open().await.expect("runner"), Ok(()));
        let event = events.recv().await.expect("terminal event");

        assert_eq!(event.reason, TerminalReason::LimitReached);
        assert_eq!(event.park, ParkStatus::Unparked);
        assert_eq!(roof.sent.lock().as_slice(), &["OPEN", "ABORT"]);

        let snapshot = handle.snapshot().await.expect("runner");
        assert_eq!(snapshot.state, MotionState::Idle);
        assert_eq!(snapshot.park, ParkStatus::Unparked);
    }

    #[tokio::test(start_paused = true)]
    async fn runner_cancel_stops_on_next_tick() {
        let roof = CountingRoof::new(1000, SwitchSnapshot::fully_open());
        let (handle, sink) = spawn(roof.clone());
        let mut events = sink.subscribe();

        assert_eq!(handle.close().await.expect("runner"), Ok(()));
        assert!(handle.cancel().await.expect("runner"));
        assert_eq!(
            handle.snapshot().await.expect("runner").state,
            MotionState::Aborting
        );

        let event = events.recv().await.expect("terminal event");
        assert_eq!(event.reason, TerminalReason::Aborted);
        assert_eq!(event.direction, Some(Direction::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_reported_to_caller() {
        let roof = CountingRoof::new(4, SwitchSnapshot::fully_open());
        let (handle, _sink) = spawn(roof.clone());

        assert_eq!(
            handle.open().await.expect("runner"),
            Err(Rejection::AlreadyAtLimit)
        );
        assert!(roof.sent.lock().is_empty());
        assert_eq!(handle.refresh().await.expect("runner"), ParkStatus::Unparked);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handles_mid_motion_stops_roof() {
        let roof = CountingRoof::new(1000, SwitchSnapshot::fully_closed());
        let sink = BroadcastSink::new(8);
        let controller = MotionController::new(
            roof.clone(),
            Arc::new(StaticInterlock::permissive()),
            Arc::new(sink),
            MotionConfig::default(),
        );
        let (handle, task) = MotionRunner::spawn(controller, DEFAULT_TICK_INTERVAL);

        assert_eq!(handle.open().await.expect("runner"), Ok(()));
        drop(handle);
        task.await.expect("runner task");

        assert_eq!(roof.sent.lock().last().map(String::as_str), Some("ABORT"));
    }

    /// Link that answers once, then lets every query run into a long timeout.
    struct DeadLink {
        answered: Mutex<bool>,
        stopped_at: Mutex<Option<Instant>>,
    }

    #[async_trait]
    impl Connection for DeadLink {
        async fn send_command(&self, command: &str) -> Result<(), TransportError> {
            let mut stopped_at = self.stopped_at.lock();
            if command == "ABORT" && stopped_at.is_none() {
                *stopped_at = Some(Instant::now());
            }
            Ok(())
        }

        async fn query_state(&self) -> Result<SwitchSnapshot, TransportError> {
            if !std::mem::replace(&mut *self.answered.lock(), true) {
                return Ok(SwitchSnapshot::fully_closed());
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
            Err(TransportError::timeout("no reply"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dead_link_overrun_fires_within_one_tick_of_deadline() {
        let link = Arc::new(DeadLink {
            answered: Mutex::new(false),
            stopped_at: Mutex::new(None),
        });
        let sink = BroadcastSink::new(8);
        let mut events = sink.subscribe();
        let controller = MotionController::new(
            link.clone(),
            Arc::new(StaticInterlock::permissive()),
            Arc::new(sink),
            MotionConfig::default().with_deadline(Duration::from_secs(17)),
        );
        let (handle, _task) = MotionRunner::spawn(controller, DEFAULT_TICK_INTERVAL);

        let started = Instant::now();
        assert_eq!(handle.open().await.expect("runner"), Ok(()));
        let event = events.recv().await.expect("terminal event");

        assert_eq!(event.reason, TerminalReason::Overrun);
        assert!(event.degraded);
        let stopped_at = (*link.stopped_at.lock()).expect("abort sent");
        let late = stopped_at.duration_since(started);
        assert!(
            late <= Duration::from_secs(17) + DEFAULT_TICK_INTERVAL,
            "stopped after {late:?}"
        );
    }
}

//! Motion controller
//!
//! Owns the drive cycle of the roof: interlock checks before motion starts,
//! the polled end-of-travel detection, the safety deadline, and the stop
//! reconciliation that follows every terminal condition.
//!
//! # State machine
//!
//! ```text
//! Idle --start(Open)--> MovingOpen  --limit | deadline | abort--> Idle
//! Idle --start(Close)-> MovingClose --limit | deadline | abort--> Idle
//! Moving* --cancel--> Aborting --tick--> Idle
//! ```
//!
//! At most one [`MotionRequest`] is outstanding. Every path back to `Idle`
//! goes through [`MotionController::stop_and_reconcile`], which sends ABORT
//! explicitly (retried), recomputes the park status and emits one
//! [`StatusEvent`].
//!
//! # Scheduling
//!
//! The controller never waits on hardware. `tick()` must be called
//! periodically while [`MotionController::state`] is not `Idle`;
//! [`MotionRunner`](crate::runner::MotionRunner) does that on a tokio interval.

use crate::actuator::{ActuatorCommand, ActuatorLink};
use crate::capabilities::{Connection, Interlock, StatusSink};
use crate::error::Rejection;
use crate::park::{reconcile, MotionOutcome, ParkStatus};
use crate::sensor::SwitchSensor;
use crate::status::{StatusEvent, TerminalReason};
use crate::switch::{Direction, LimitSwitchState, SwitchReading};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default ceiling on motor on-time per drive cycle.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(19);

/// Default number of extra ABORT attempts after a failed stop send.
pub const DEFAULT_STOP_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    #[default]
    Idle,
    MovingOpen,
    MovingClose,
    Aborting,
}

impl MotionState {
    fn moving(direction: Direction) -> Self {
        match direction {
            Direction::Open => MotionState::MovingOpen,
            Direction::Close => MotionState::MovingClose,
        }
    }

    pub fn is_idle(self) -> bool {
        self == MotionState::Idle
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MotionState::Idle => "idle",
            MotionState::MovingOpen => "opening",
            MotionState::MovingClose => "closing",
            MotionState::Aborting => "aborting",
        }
    }
}

impl std::fmt::Display for MotionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables for the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionConfig {
    /// Safety ceiling on motor on-time. Not a travel-time estimate.
    pub deadline: Duration,
    /// Extra ABORT sends after a failed one. At least one retry is always made.
    pub stop_retries: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            stop_retries: DEFAULT_STOP_RETRIES,
        }
    }
}

impl MotionConfig {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_stop_retries(mut self, retries: u32) -> Self {
        self.stop_retries = retries;
        self
    }

    fn stop_attempts(&self) -> u32 {
        1 + self.stop_retries.max(1)
    }
}

/// The single outstanding drive cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionRequest {
    pub direction: Direction,
    pub deadline: Duration,
    pub started_at: Instant,
    pub cancelled: bool,
}

impl MotionRequest {
    fn new(direction: Direction, deadline: Duration) -> Self {
        Self {
            direction,
            deadline,
            started_at: Instant::now(),
            cancelled: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_overdue(&self) -> bool {
        self.elapsed() >= self.deadline
    }
}

/// Result of [`MotionController::start_motion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Motion started; ticks are now required.
    Busy,
    Rejected(Rejection),
}

impl StartOutcome {
    pub fn is_busy(self) -> bool {
        self == StartOutcome::Busy
    }
}

/// Result of [`MotionController::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing outstanding; no further ticks needed.
    Idle,
    /// Still moving; schedule another tick.
    Continue,
    /// The drive cycle ended with this event.
    Finished(StatusEvent),
}

pub struct MotionController {
    sensor: SwitchSensor,
    actuator: ActuatorLink,
    interlock: Arc<dyn Interlock>,
    sink: Arc<dyn StatusSink>,
    config: MotionConfig,
    state: MotionState,
    request: Option<MotionRequest>,
    last_switches: Option<LimitSwitchState>,
    last_outcome: MotionOutcome,
    park: ParkStatus,
    unreachable_polls: u32,
    consecutive_unreachable: u32,
}

impl MotionController {
    pub fn new(
        connection: Arc<dyn Connection>,
        interlock: Arc<dyn Interlock>,
        sink: Arc<dyn StatusSink>,
        config: MotionConfig,
    ) -> Self {
        Self {
            sensor: SwitchSensor::new(connection.clone()),
            actuator: ActuatorLink::new(connection),
            interlock,
            sink,
            config,
            state: MotionState::Idle,
            request: None,
            last_switches: None,
            last_outcome: MotionOutcome::None,
            park: ParkStatus::Unknown,
            unreachable_polls: 0,
            consecutive_unreachable: 0,
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn request(&self) -> Option<&MotionRequest> {
        self.request.as_ref()
    }

    /// Park status as of the last terminal transition or refresh.
    pub fn park_status(&self) -> ParkStatus {
        self.park
    }

    pub fn last_switches(&self) -> Option<LimitSwitchState> {
        self.last_switches
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// The most recent switch read went unanswered.
    pub fn link_degraded(&self) -> bool {
        self.consecutive_unreachable > 0
    }

    /// Begin a drive cycle.
    ///
    /// Checks, in order: already at the requested limit, close interlock,
    /// open safety, switch readability, command delivery. The first failing
    /// check wins and nothing changes.
    pub async fn start_motion(&mut self, direction: Direction) -> StartOutcome {
        if !self.state.is_idle() {
            tracing::warn!(%direction, state = %self.state, "start rejected, motion in progress");
            return StartOutcome::Rejected(Rejection::Busy);
        }

        let switches = self.sensor.read().await;
        self.last_switches = Some(switches);

        if switches.is_at_limit(direction) {
            return self.reject(direction, Rejection::AlreadyAtLimit);
        }
        if direction == Direction::Close && self.interlock.is_close_locked() {
            return self.reject(direction, Rejection::ExternalLock);
        }
        if direction == Direction::Open && self.interlock.is_unsafe_to_open() {
            return self.reject(direction, Rejection::UnsafeToOpen);
        }
        if switches.any_unreachable() {
            return self.reject(direction, Rejection::TransportError);
        }

        if let Err(err) = self.actuator.send(ActuatorCommand::from(direction)).await {
            tracing::error!(%direction, error = %err, "directional command not delivered");
            // The command may still have reached the controller.
            if let Err(err) = self.actuator.send(ActuatorCommand::Abort).await {
                tracing::error!(error = %err, "best-effort stop after failed start not delivered");
            }
            return self.reject(direction, Rejection::TransportError);
        }

        self.request = Some(MotionRequest::new(direction, self.config.deadline));
        self.state = MotionState::moving(direction);
        self.unreachable_polls = 0;
        self.consecutive_unreachable = 0;
        tracing::info!(
            %direction,
            deadline_secs = self.config.deadline.as_secs_f64(),
            "roof motion started"
        );
        StartOutcome::Busy
    }

    fn reject(&self, direction: Direction, rejection: Rejection) -> StartOutcome {
        tracing::warn!(%direction, reason = ?rejection, "start rejected: {}", rejection);
        StartOutcome::Rejected(rejection)
    }

    /// Mark the outstanding request cancelled; honoured on the next tick.
    ///
    /// Returns `false` when nothing was outstanding.
    pub fn cancel(&mut self) -> bool {
        match self.request.as_mut() {
            Some(request) => {
                if !request.cancelled {
                    request.cancelled = true;
                    self.state = MotionState::Aborting;
                    tracing::info!(direction = %request.direction, "roof motion cancel requested");
                }
                true
            }
            None => false,
        }
    }

    /// Advance the drive cycle by one poll.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.state.is_idle() {
            return TickOutcome::Idle;
        }

        let Some(request) = self.request else {
            tracing::error!(state = %self.state, "moving without a request, forcing stop");
            return TickOutcome::Finished(self.stop_and_reconcile(MotionOutcome::Aborted).await);
        };

        if request.cancelled {
            return TickOutcome::Finished(self.stop_and_reconcile(MotionOutcome::Aborted).await);
        }
        if request.is_overdue() {
            return TickOutcome::Finished(self.overrun(&request).await);
        }

        // A stalled link must not hold the motor past the deadline.
        let remaining = request.deadline.saturating_sub(request.elapsed());
        let switches = self.sensor.read_within(remaining).await;
        self.last_switches = Some(switches);
        self.note_poll(&switches);

        match switches.get(request.direction.limit()) {
            SwitchReading::Engaged => {
                tracing::info!(direction = %request.direction, "end-of-travel switch engaged");
                return TickOutcome::Finished(
                    self.stop_and_reconcile(MotionOutcome::LimitReached(request.direction))
                        .await,
                );
            }
            SwitchReading::Unreachable => {
                tracing::warn!(
                    direction = %request.direction,
                    consecutive = self.consecutive_unreachable,
                    "limit switch unreachable, continuing to poll"
                );
            }
            SwitchReading::NotEngaged => {}
        }

        if request.is_overdue() {
            return TickOutcome::Finished(self.overrun(&request).await);
        }

        TickOutcome::Continue
    }

    async fn overrun(&mut self, request: &MotionRequest) -> StatusEvent {
        tracing::error!(
            direction = %request.direction,
            elapsed_secs = request.elapsed().as_secs_f64(),
            "exceeded max motor run duration, aborting"
        );
        self.stop_and_reconcile(MotionOutcome::Overrun).await
    }

    /// Count an unanswered read against link health.
    fn note_poll(&mut self, switches: &LimitSwitchState) {
        if switches.any_unreachable() {
            self.unreachable_polls += 1;
            self.consecutive_unreachable += 1;
        } else {
            self.consecutive_unreachable = 0;
        }
    }

    /// Stop the motor now.
    ///
    /// ABORT is sent unconditionally, even when idle. Calling this twice
    /// leaves the same end state as calling it once.
    pub async fn abort(&mut self) -> StatusEvent {
        tracing::info!(state = %self.state, "abort requested");
        self.stop_and_reconcile(MotionOutcome::Aborted).await
    }

    /// Re-read both switches and recompute the park status.
    ///
    /// Only polls while idle; during motion the last computed status is returned.
    pub async fn refresh(&mut self) -> ParkStatus {
        if !self.state.is_idle() {
            return self.park;
        }
        let switches = self.sensor.read().await;
        self.last_switches = Some(switches);
        if switches.any_unreachable() {
            self.consecutive_unreachable += 1;
            tracing::warn!("controller did not answer the switch query");
        } else {
            self.consecutive_unreachable = 0;
        }
        let outcome = match self.last_outcome {
            MotionOutcome::StopUnconfirmed => MotionOutcome::StopUnconfirmed,
            _ => MotionOutcome::None,
        };
        self.park = reconcile(&switches, outcome);
        self.park
    }

    async fn stop_and_reconcile(&mut self, outcome: MotionOutcome) -> StatusEvent {
        let delivered = match self
            .actuator
            .send_with_retry(ActuatorCommand::Abort, self.config.stop_attempts())
            .await
        {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(error = %err, ?outcome, "stop command failed on every attempt, roof state unknown");
                false
            }
        };

        let request = self.request.take();
        let elapsed_ms = request.map(|r| r.elapsed().as_millis() as u64);
        self.state = MotionState::Idle;

        let outcome = if delivered {
            outcome
        } else {
            MotionOutcome::StopUnconfirmed
        };

        // A limit stop is reconciled against the reading that triggered it.
        let switches = match (outcome, self.last_switches) {
            (MotionOutcome::LimitReached(_), Some(switches)) => switches,
            (MotionOutcome::StopUnconfirmed, last) => {
                last.unwrap_or_else(LimitSwitchState::unreachable)
            }
            _ => {
                let switches = self.sensor.read().await;
                self.note_poll(&switches);
                switches
            }
        };
        self.last_switches = Some(switches);
        self.last_outcome = outcome;
        self.park = reconcile(&switches, outcome);

        let reason = match outcome {
            MotionOutcome::LimitReached(_) => TerminalReason::LimitReached,
            MotionOutcome::Overrun => TerminalReason::Overrun,
            MotionOutcome::StopUnconfirmed => TerminalReason::Unknown,
            MotionOutcome::Aborted | MotionOutcome::None => TerminalReason::Aborted,
        };

        let event = StatusEvent::new(self.state, self.park, reason)
            .with_direction(request.map(|r| r.direction))
            .with_link_health(self.unreachable_polls)
            .with_stop_confirmed(delivered)
            .with_elapsed_ms(elapsed_ms);

        self.unreachable_polls = 0;

        if self.park == ParkStatus::Unknown {
            tracing::warn!(reason = %reason, "roof stopped in an indeterminate position");
        } else {
            tracing::info!(reason = %reason, park = %self.park, "roof motion finished");
        }

        self.sink.emit(&event);
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::StaticInterlock;
    use crate::error::TransportError;
    use crate::switch::SwitchSnapshot;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Connection whose replies are scripted; the last reply repeats.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<SwitchSnapshot, TransportError>>>,
        fallback: Mutex<Option<Result<SwitchSnapshot, TransportError>>>,
        send_failures: Mutex<VecDeque<&'static str>>,
        sent: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn always(snapshot: SwitchSnapshot) -> Arc<Self> {
            let conn = Self::default();
            *conn.fallback.lock() = Some(Ok(snapshot));
            Arc::new(conn)
        }

        fn then(&self, reply: Result<SwitchSnapshot, TransportError>) -> &Self {
            self.replies.lock().push_back(reply);
            self
        }

        fn fail_send(&self, command: &'static str) -> &Self {
            self.send_failures.lock().push_back(command);
            self
        }

        fn set_fallback(&self, snapshot: SwitchSnapshot) {
            *self.fallback.lock() = Some(Ok(snapshot));
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }

        fn count(&self, command: &str) -> usize {
            self.sent.lock().iter().filter(|c| *c == command).count()
        }
    }

    #[async_trait]
    impl Connection for Scripted {
        async fn send_command(&self, command: &str) -> Result<(), TransportError> {
            self.sent.lock().push(command.to_string());
            let mut failures = self.send_failures.lock();
            if failures.front() == Some(&command) {
                failures.pop_front();
                return Err(TransportError::io("write failed"));
            }
            Ok(())
        }

        async fn query_state(&self) -> Result<SwitchSnapshot, TransportError> {
            if let Some(reply) = self.replies.lock().pop_front() {
                return reply;
            }
            self.fallback
                .lock()
                .clone()
                .unwrap_or_else(|| Err(TransportError::timeout("no reply")))
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<StatusEvent>>);

    impl StatusSink for Events {
        fn emit(&self, event: &StatusEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn controller(
        conn: Arc<Scripted>,
        interlock: Arc<StaticInterlock>,
        deadline: Duration,
    ) -> (MotionController, Arc<Events>) {
        let events = Arc::new(Events::default());
        let ctrl = MotionController::new(
            conn,
            interlock,
            events.clone(),
            MotionConfig::default().with_deadline(deadline),
        );
        (ctrl, events)
    }

    const TICK: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn start_at_limit_is_rejected_without_commands() {
        for (direction, snapshot) in [
            (Direction::Open, SwitchSnapshot::fully_open()),
            (Direction::Close, SwitchSnapshot::fully_closed()),
        ] {
            let conn = Scripted::always(snapshot);
            let (mut ctrl, events) =
                controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

            assert_eq!(
                ctrl.start_motion(direction).await,
                StartOutcome::Rejected(Rejection::AlreadyAtLimit)
            );
            assert!(conn.sent().is_empty());
            assert_eq!(ctrl.state(), MotionState::Idle);
            assert!(events.0.lock().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_until_limit_reports_unparked() {
        let conn = Scripted::always(SwitchSnapshot::between());
        let (mut ctrl, events) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert_eq!(ctrl.start_motion(Direction::Open).await, StartOutcome::Busy);
        assert_eq!(ctrl.state(), MotionState::MovingOpen);

        tokio::time::advance(TICK).await;
        assert_eq!(ctrl.tick().await, TickOutcome::Continue);

        conn.set_fallback(SwitchSnapshot::fully_open());
        tokio::time::advance(TICK).await;
        let TickOutcome::Finished(event) = ctrl.tick().await else {
            panic!("expected terminal tick");
        };

        assert_eq!(event.state, MotionState::Idle);
        assert_eq!(event.reason, TerminalReason::LimitReached);
        assert_eq!(event.park, ParkStatus::Unparked);
        assert_eq!(event.direction, Some(Direction::Open));
        assert!(event.stop_confirmed);
        assert_eq!(conn.sent(), vec!["OPEN", "ABORT"]);
        assert!(ctrl.request().is_none());
        assert_eq!(ctrl.tick().await, TickOutcome::Idle);
        assert_eq!(events.0.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_locked_by_interlock() {
        let conn = Scripted::always(SwitchSnapshot::fully_open());
        let interlock = Arc::new(StaticInterlock::new(true, false));
        let (mut ctrl, _) = controller(conn.clone(), interlock, DEFAULT_DEADLINE);

        assert_eq!(
            ctrl.start_motion(Direction::Close).await,
            StartOutcome::Rejected(Rejection::ExternalLock)
        );
        assert!(conn.sent().is_empty());
        assert_eq!(ctrl.state(), MotionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn unsafe_weather_blocks_open_only() {
        let conn = Scripted::always(SwitchSnapshot::between());
        let interlock = Arc::new(StaticInterlock::new(false, true));
        let (mut ctrl, _) = controller(conn.clone(), interlock, DEFAULT_DEADLINE);

        assert_eq!(
            ctrl.start_motion(Direction::Open).await,
            StartOutcome::Rejected(Rejection::UnsafeToOpen)
        );
        assert_eq!(ctrl.start_motion(Direction::Close).await, StartOutcome::Busy);
    }

    #[tokio::test(start_paused = true)]
    async fn precondition_order_limit_before_lock() {
        let conn = Scripted::always(SwitchSnapshot::fully_closed());
        let interlock = Arc::new(StaticInterlock::new(true, false));
        let (mut ctrl, _) = controller(conn, interlock, DEFAULT_DEADLINE);

        assert_eq!(
            ctrl.start_motion(Direction::Close).await,
            StartOutcome::Rejected(Rejection::AlreadyAtLimit)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_switches_reject_start() {
        let conn = Arc::new(Scripted::default());
        let (mut ctrl, _) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert_eq!(
            ctrl.start_motion(Direction::Open).await,
            StartOutcome::Rejected(Rejection::TransportError)
        );
        assert!(conn.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_send_stays_idle() {
        let conn = Scripted::always(SwitchSnapshot::between());
        conn.fail_send("CLOSE");
        let (mut ctrl, _) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert_eq!(
            ctrl.start_motion(Direction::Close).await,
            StartOutcome::Rejected(Rejection::TransportError)
        );
        assert_eq!(ctrl.state(), MotionState::Idle);
        assert!(ctrl.request().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_while_moving_is_busy_rejection() {
        let conn = Scripted::always(SwitchSnapshot::between());
        let (mut ctrl, _) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert!(ctrl.start_motion(Direction::Open).await.is_busy());
        assert_eq!(
            ctrl.start_motion(Direction::Close).await,
            StartOutcome::Rejected(Rejection::Busy)
        );
        assert_eq!(conn.sent(), vec!["OPEN"]);
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_after_deadline_sends_one_abort() {
        let conn = Scripted::always(SwitchSnapshot::between());
        let (mut ctrl, events) = controller(
            conn.clone(),
            Arc::new(StaticInterlock::permissive()),
            Duration::from_secs(17),
        );

        assert!(ctrl.start_motion(Direction::Close).await.is_busy());
        let started = Instant::now();

        let event = loop {
            tokio::time::advance(TICK).await;
            match ctrl.tick().await {
                TickOutcome::Continue => continue,
                TickOutcome::Finished(event) => break event,
                TickOutcome::Idle => panic!("went idle without an event"),
            }
        };

        let at = started.elapsed();
        assert!(at >= Duration::from_secs(17) && at <= Duration::from_millis(17_500));
        assert_eq!(event.reason, TerminalReason::Overrun);
        assert_eq!(event.park, ParkStatus::Unknown);
        assert_eq!(ctrl.state(), MotionState::Idle);
        assert_eq!(conn.count("ABORT"), 1);
        assert_eq!(events.0.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_unreachable_does_not_abort() {
        let conn = Scripted::always(SwitchSnapshot::between());
        let (mut ctrl, _) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert!(ctrl.start_motion(Direction::Close).await.is_busy());
        for _ in 0..3 {
            conn.then(Err(TransportError::timeout("no answer")));
        }
        for _ in 0..3 {
            tokio::time::advance(TICK).await;
            assert_eq!(ctrl.tick().await, TickOutcome::Continue);
            assert!(ctrl.link_degraded());
        }

        conn.set_fallback(SwitchSnapshot::fully_closed());
        tokio::time::advance(TICK).await;
        let TickOutcome::Finished(event) = ctrl.tick().await else {
            panic!("expected terminal tick");
        };
        assert_eq!(event.reason, TerminalReason::LimitReached);
        assert_eq!(event.park, ParkStatus::Parked);
        assert!(event.degraded);
        assert_eq!(event.unreachable_polls, 3);
        assert!(!ctrl.link_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_honoured_on_next_tick() {
        let conn = Scripted::always(SwitchSnapshot::between());
        let (mut ctrl, _) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert!(!ctrl.cancel());
        assert!(ctrl.start_motion(Direction::Open).await.is_busy());
        assert!(ctrl.cancel());
        assert_eq!(ctrl.state(), MotionState::Aborting);

        let TickOutcome::Finished(event) = ctrl.tick().await else {
            panic!("expected terminal tick");
        };
        assert_eq!(event.reason, TerminalReason::Aborted);
        assert_eq!(event.park, ParkStatus::Unknown);
        assert_eq!(conn.count("ABORT"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_twice_is_idempotent() {
        let conn = Scripted::always(SwitchSnapshot::between());
        let (mut ctrl, _) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert!(ctrl.start_motion(Direction::Open).await.is_busy());
        let first = ctrl.abort().await;
        let second = ctrl.abort().await;

        assert_eq!(first.state, MotionState::Idle);
        assert_eq!(second.state, MotionState::Idle);
        assert_eq!(first.park, ParkStatus::Unknown);
        assert_eq!(second.park, first.park);
        assert_eq!(conn.count("ABORT"), 2);
        assert!(ctrl.request().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_reconciles_from_single_engaged_switch() {
        let conn = Scripted::always(SwitchSnapshot::between());
        let (mut ctrl, _) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert!(ctrl.start_motion(Direction::Close).await.is_busy());
        conn.set_fallback(SwitchSnapshot::fully_closed());
        let event = ctrl.abort().await;
        assert_eq!(event.park, ParkStatus::Parked);
        assert_eq!(event.reason, TerminalReason::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stop_is_retried_then_forced_unknown() {
        let conn = Scripted::always(SwitchSnapshot::between());
        let (mut ctrl, events) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert!(ctrl.start_motion(Direction::Open).await.is_busy());
        conn.fail_send("ABORT").fail_send("ABORT").fail_send("ABORT");
        conn.set_fallback(SwitchSnapshot::fully_open());

        tokio::time::advance(TICK).await;
        let TickOutcome::Finished(event) = ctrl.tick().await else {
            panic!("expected terminal tick");
        };

        assert_eq!(conn.count("ABORT"), 3);
        assert_eq!(event.state, MotionState::Idle);
        assert_eq!(event.park, ParkStatus::Unknown);
        assert_eq!(event.reason, TerminalReason::Unknown);
        assert!(!event.stop_confirmed);
        assert_eq!(events.0.lock().len(), 1);

        // Unknown survives a refresh until a confirmed stop.
        assert_eq!(ctrl.refresh().await, ParkStatus::Unknown);
        assert_eq!(ctrl.abort().await.park, ParkStatus::Unparked);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stop_recovers_on_retry() {
        let conn = Scripted::always(SwitchSnapshot::between());
        let (mut ctrl, _) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert!(ctrl.start_motion(Direction::Close).await.is_busy());
        conn.fail_send("ABORT");
        conn.set_fallback(SwitchSnapshot::fully_closed());

        let event = ctrl.abort().await;
        assert_eq!(conn.count("ABORT"), 2);
        assert!(event.stop_confirmed);
        assert_eq!(event.park, ParkStatus::Parked);
    }

    #[tokio::test(start_paused = true)]
    async fn double_positive_stops_but_stays_unknown() {
        let conn = Scripted::always(SwitchSnapshot::between());
        let (mut ctrl, _) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert!(ctrl.start_motion(Direction::Open).await.is_busy());
        conn.set_fallback(SwitchSnapshot {
            open_engaged: true,
            closed_engaged: true,
        });
        let TickOutcome::Finished(event) = ctrl.tick().await else {
            panic!("expected terminal tick");
        };
        assert_eq!(event.reason, TerminalReason::LimitReached);
        assert_eq!(event.park, ParkStatus::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_derives_park_status_while_idle() {
        let conn = Scripted::always(SwitchSnapshot::fully_closed());
        let (mut ctrl, _) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert_eq!(ctrl.park_status(), ParkStatus::Unknown);
        assert_eq!(ctrl.refresh().await, ParkStatus::Parked);

        conn.set_fallback(SwitchSnapshot::between());
        assert!(ctrl.start_motion(Direction::Open).await.is_busy());
        conn.set_fallback(SwitchSnapshot::fully_open());
        // No poll during motion.
        assert_eq!(ctrl.refresh().await, ParkStatus::Parked);
        assert!(conn.sent().iter().all(|c| c != "ABORT"));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_over_silent_link_is_degraded() {
        let conn = Arc::new(Scripted::default());
        let (mut ctrl, _) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert_eq!(ctrl.refresh().await, ParkStatus::Unknown);
        assert!(ctrl.link_degraded());
        assert_eq!(ctrl.last_switches(), Some(LimitSwitchState::unreachable()));

        conn.set_fallback(SwitchSnapshot::fully_closed());
        assert_eq!(ctrl.refresh().await, ParkStatus::Parked);
        assert!(!ctrl.link_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_reconciliation_read_marks_event_degraded() {
        let conn = Scripted::always(SwitchSnapshot::between());
        let (mut ctrl, _) =
            controller(conn.clone(), Arc::new(StaticInterlock::permissive()), DEFAULT_DEADLINE);

        assert!(ctrl.start_motion(Direction::Open).await.is_busy());
        conn.then(Err(TransportError::timeout("no answer")));
        let event = ctrl.abort().await;

        assert!(event.stop_confirmed);
        assert_eq!(event.park, ParkStatus::Unknown);
        assert!(event.degraded);
        assert_eq!(event.unreachable_polls, 1);
        assert!(ctrl.link_degraded());

        // The next cycle starts with a clean count.
        let event = ctrl.abort().await;
        assert!(!event.degraded);
        assert!(!ctrl.link_degraded());
    }

    /// Answers the first query, then stalls every later one before failing.
    struct StallingLink {
        answered: Mutex<bool>,
        sent: Mutex<Vec<(String, Instant)>>,
    }

    #[async_trait]
    impl Connection for StallingLink {
        async fn send_command(&self, command: &str) -> Result<(), TransportError> {
            self.sent.lock().push((command.to_string(), Instant::now()));
            Ok(())
        }

        async fn query_state(&self) -> Result<SwitchSnapshot, TransportError> {
            if !std::mem::replace(&mut *self.answered.lock(), true) {
                return Ok(SwitchSnapshot::between());
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
            Err(TransportError::timeout("no reply within 2000 ms"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_polls_cannot_push_stop_past_deadline() {
        let conn = Arc::new(StallingLink {
            answered: Mutex::new(false),
            sent: Mutex::new(Vec::new()),
        });
        let events = Arc::new(Events::default());
        let mut ctrl = MotionController::new(
            conn.clone(),
            Arc::new(StaticInterlock::permissive()),
            events.clone(),
            MotionConfig::default().with_deadline(Duration::from_secs(17)),
        );

        let started = Instant::now();
        assert!(ctrl.start_motion(Direction::Open).await.is_busy());

        let event = loop {
            tokio::time::sleep(TICK).await;
            if let TickOutcome::Finished(event) = ctrl.tick().await {
                break event;
            }
        };

        let sent = conn.sent.lock().clone();
        let (command, at) = sent.last().cloned().expect("stop sent");
        assert_eq!(command, "ABORT");
        let stopped_after = at.duration_since(started);
        assert!(
            stopped_after >= Duration::from_secs(17) && stopped_after <= Duration::from_millis(17_500),
            "stopped after {stopped_after:?}"
        );
        assert_eq!(event.reason, TerminalReason::Overrun);
        assert_eq!(event.park, ParkStatus::Unknown);
        assert!(event.degraded);
        assert_eq!(event.elapsed_ms, Some(stopped_after.as_millis() as u64));
    }
}

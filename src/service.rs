//! Wiring from configuration to a running motion controller.

use crate::config::{ConnectionConfig, ConnectionKind, ParkStateConfig, RoofConfig};
use crate::error::{RoofError, RoofResult};
use crate::interlock::FlagFileInterlock;
use crate::sinks::{ParkFlagFile, StatusFile, TracingSink};
use roof_core::{
    BroadcastSink, Connection, ControllerSnapshot, Direction, FanoutSink, Interlock,
    MotionController, MotionHandle, MotionRunner, ParkStatus, StartOutcome, StatusEvent,
};
use roof_driver_mock::MockRoof;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Terminal events buffered for slow subscribers.
const EVENT_CAPACITY: usize = 16;

/// Build the configured controller link.
pub async fn connect(config: &ConnectionConfig) -> RoofResult<Arc<dyn Connection>> {
    match config.kind {
        ConnectionKind::Mock => {
            let mock = config.mock_config()?;
            tracing::info!(travel_secs = mock.travel_secs, start = ?mock.start, "using simulated roof");
            Ok(Arc::new(MockRoof::with_config(mock)))
        }
        #[cfg(feature = "firmata")]
        ConnectionKind::Firmata => {
            let firmata = config.firmata_config()?;
            tracing::info!(port = %firmata.port, wire = ?firmata.wire, "connecting to Firmata board");
            roof_driver_firmata::connect(&firmata)
                .await
                .map_err(RoofError::Connect)
        }
        #[cfg(not(feature = "firmata"))]
        ConnectionKind::Firmata => Err(RoofError::FeatureNotEnabled("firmata".into())),
    }
}

/// Status sinks for the configured park state outputs, plus logging and
/// the event broadcast.
pub fn build_sinks(config: &ParkStateConfig, events: &BroadcastSink) -> FanoutSink {
    let mut sinks = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(events.clone()));
    if let Some(path) = &config.file {
        sinks.push(Arc::new(ParkFlagFile::new(path)));
    }
    if let Some(path) = &config.status_file {
        sinks.push(Arc::new(StatusFile::new(path)));
    }
    sinks
}

/// A spawned motion runner together with its event stream.
pub struct RoofService {
    handle: MotionHandle,
    events: BroadcastSink,
    task: JoinHandle<()>,
}

impl RoofService {
    /// Connect to the configured hardware and spawn the runner.
    pub async fn start(config: &RoofConfig) -> RoofResult<Self> {
        let connection = connect(&config.connection).await?;
        let interlock = Arc::new(FlagFileInterlock::from_config(&config.interlock));
        Self::with_parts(config, connection, interlock)
    }

    /// Spawn the runner over explicit collaborators.
    pub fn with_parts(
        config: &RoofConfig,
        connection: Arc<dyn Connection>,
        interlock: Arc<dyn Interlock>,
    ) -> RoofResult<Self> {
        let events = BroadcastSink::new(EVENT_CAPACITY);
        let sinks = build_sinks(&config.park_state, &events);
        let controller = MotionController::new(
            connection,
            interlock,
            Arc::new(sinks),
            config.motion.motion_config()?,
        );
        let (handle, task) = MotionRunner::spawn(controller, config.motion.tick_interval());
        Ok(Self {
            handle,
            events,
            task,
        })
    }

    pub fn handle(&self) -> MotionHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Start a drive cycle and wait for its terminal event.
    pub async fn drive(&self, direction: Direction) -> RoofResult<StatusEvent> {
        let mut events = self.subscribe();
        match self.handle.start(direction).await? {
            StartOutcome::Busy => {}
            StartOutcome::Rejected(rejection) => return Err(RoofError::Rejected(rejection)),
        }
        wait_terminal(&mut events).await
    }

    pub async fn abort(&self) -> RoofResult<StatusEvent> {
        Ok(self.handle.abort().await?)
    }

    pub async fn refresh(&self) -> RoofResult<ParkStatus> {
        Ok(self.handle.refresh().await?)
    }

    pub async fn snapshot(&self) -> RoofResult<ControllerSnapshot> {
        Ok(self.handle.snapshot().await?)
    }

    /// Drop the handle and wait for the runner to stop the roof and exit.
    pub async fn shutdown(self, grace: Duration) {
        let Self { handle, task, .. } = self;
        drop(handle);
        if tokio::time::timeout(grace, task).await.is_err() {
            tracing::warn!("motion runner did not exit in time");
        }
    }
}

/// Next terminal event, skipping over lag.
pub async fn wait_terminal(
    events: &mut broadcast::Receiver<StatusEvent>,
) -> RoofResult<StatusEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Ok(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "status events lagged");
            }
            Err(RecvError::Closed) => return Err(roof_core::RunnerError::Stopped.into()),
        }
    }
}

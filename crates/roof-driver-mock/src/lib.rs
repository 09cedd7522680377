//! Simulated roof hardware for tests and dry runs.
//!
//! - [`MockRoof`]: a [`roof_core::Connection`] with simulated travel time,
//!   command recording and [`FaultScenario`] injection
//! - [`RecordingSink`]: a [`roof_core::StatusSink`] that keeps every event
//!
//! Interlocks need no mock; use [`roof_core::StaticInterlock`].
//!
//! ```rust,ignore
//! use roof_driver_mock::{FaultScenario, MockRoof};
//!
//! let roof = Arc::new(MockRoof::closed(Duration::from_secs(10)));
//! roof.inject(FaultScenario::UnreachableQueries { count: 3 });
//! ```

mod faults;
mod mock_roof;
mod recording;

pub use faults::FaultScenario;
pub use mock_roof::{MockRoof, MockRoofConfig, Motor, StartPosition};
pub use recording::RecordingSink;

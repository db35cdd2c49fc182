//! # beatload
//!
//! Load harness for a real-time collaborative board server. Many simulated
//! actors mutate a shared board through the HTTP API while each one listens on
//! the server's push stream; the harness pairs every confirmed action with the
//! broadcast notifications it produced and reports how completely and how
//! fast the fan-out happened.
//!
//! - [`correlator`] pairs sent actions with received notifications
//! - [`sse`] decodes the push stream
//! - [`actor`] drives one simulated participant
//! - [`orchestrator`] provisions a board, runs the actors and builds the report
//!
//! ```no_run
//! use beatload::{Orchestrator, RunConfig};
//!
//! # async fn run() -> beatload::Result<()> {
//! let orchestrator = Orchestrator::http(RunConfig::default())?;
//! let shutdown = tokio::time::sleep(std::time::Duration::from_secs(600));
//! let report = orchestrator.run(shutdown).await?;
//! println!("{:.2}% delivered", report.delivery_rate());
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod api;
pub mod config;
pub mod correlator;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod sse;
pub mod ticker;

pub use actor::{ActorPhase, SimulatedActor};
pub use config::RunConfig;
pub use correlator::{DeliveryReport, EventCorrelator, LatencyStats, TypeStats};
pub use error::{ApiError, Error, Result};
pub use event::{ActorId, EventKind, ReceivedEvent, SentEvent};
pub use orchestrator::{
    MonitorSnapshot, Orchestrator, RunEnd, RunEvent, RunReport, StepStatus, Verdict,
};

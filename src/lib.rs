//! Build orchestration engine for nuggets.
//!
//! A build session plans a task graph from a spec, runs each task through an
//! external worker with retries, gates and cancellation, then tests and
//! deploys the result while streaming `BuildEvent`s to a consumer.

pub mod config;
pub mod dag;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod feedback;
pub mod gates;
pub mod logging;
pub mod orchestrator;
pub mod phases;
pub mod session_store;
pub mod worker;

pub use errors::{BuildError, BuildResult};
pub use events::{EventReceiver, EventSink};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorHandle, RunOutcome};
pub use session_store::{SessionHandle, SessionStore};

pub use nugget_common as common;

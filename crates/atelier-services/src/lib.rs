//! atelier-services — the moving parts of task tracking.
//!
//! The socket manager keeps the push channel alive, the poller is the
//! pull-side fallback, the orchestrator decides which of the two follows a
//! submitted task, and the history cache pages through past tasks. Network
//! access goes through the [`TaskApi`] and [`Connector`] traits so every
//! piece runs against fakes in tests.

pub mod api;
pub mod history;
pub mod observers;
pub mod orchestrator;
pub mod poller;
pub mod socket;
pub mod transport;

#[cfg(test)]
pub(crate) mod fakes;

pub use api::{SharedToken, TaskApi, TokenSource};
pub use history::TaskHistory;
pub use observers::{ObserverHandle, Observers};
pub use orchestrator::{Channel, GenerateError, GenerationState, Orchestrator, Phase};
pub use poller::{PollHandle, PollSettings, TaskPoller};
pub use socket::{ConnectionState, SocketManager, SocketSettings};
pub use transport::{Connector, Link, LinkEvent};

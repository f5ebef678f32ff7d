//! atelier-client — network adapters and session wiring.
//!
//! [`HttpTaskApi`] talks to the REST endpoints, [`WsConnector`] opens the
//! push channel, and [`Session`] assembles both with the services from
//! `atelier-services` according to an [`AtelierConfig`](atelier_core::config::AtelierConfig).

pub mod http;
pub mod session;
pub mod ws;

pub use http::HttpTaskApi;
pub use session::Session;
pub use ws::WsConnector;

//! Push-channel transport seam.
//!
//! A [`Connector`] opens a duplex text channel and hands back a [`Link`]:
//! a sender for outbound frames and a receiver of [`LinkEvent`]s. The
//! socket manager never sees the WebSocket library. Dropping the outbound
//! sender asks the transport to close the connection.

use async_trait::async_trait;
use tokio::sync::mpsc;

use atelier_core::TransportError;

/// Something that happened on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame from the server.
    Text(String),
    /// A transport error. The connection is about to close.
    Error(String),
    /// The connection is gone. Nothing follows.
    Closed,
}

/// One open connection.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Link {
    /// Build a link and return the far ends, for transports that bridge a
    /// socket onto channels.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<LinkEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            out_rx,
            in_tx,
        )
    }
}

/// Opens push connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}

//! WebSocket transport for the push channel.
//!
//! Each connection gets a pump task that bridges the socket onto the
//! channels of a [`Link`]. The pump ends, and reports `Closed`, when the
//! server closes, the socket errors, or the manager drops its sender.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_tungstenite::tungstenite::Message;

use atelier_core::TransportError;
use atelier_services::{Connector, Link, LinkEvent};

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (link, outbound, inbound) = Link::pair();
        tokio::spawn(pump(ws, outbound, inbound));
        Ok(link)
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn pump(
    ws: Socket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<LinkEvent>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(LinkEvent::Text(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = inbound.send(LinkEvent::Error(e.to_string()));
                    break;
                }
            },
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        let _ = inbound.send(LinkEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
        }
    }
    tracing::debug!("push socket pump finished");
    let _ = inbound.send(LinkEvent::Closed);
}

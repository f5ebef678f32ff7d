//! Push channel lifecycle against a live WebSocket endpoint.

use std::time::Duration;

use atelier_client::Session;
use atelier_core::TaskId;
use atelier_services::ConnectionState;

use crate::backend::{MockBackend, TOKEN};
use crate::{fast_config, wait_until};

#[tokio::test]
async fn reconnect_resends_remembered_subscriptions() {
    let backend = MockBackend::start().await;
    let session = Session::new(&fast_config(&backend.base_url(), TOKEN)).unwrap();
    session.start().await;
    assert_eq!(session.socket.state(), ConnectionState::Connected);

    assert!(session.socket.subscribe(&TaskId::from("task-7")));
    wait_until("first subscribe", || backend.subscribes().len() == 1).await;

    backend.drop_sockets();
    wait_until("second connection", || backend.ws_connects() == 2).await;
    wait_until("resubscribe", || backend.subscribes().len() == 2).await;
    assert_eq!(backend.subscribes(), vec!["task-7", "task-7"]);
    wait_until("reconnected", || session.socket.is_connected()).await;
    assert_eq!(session.socket.reconnect_attempts(), 0);

    session.socket.release(&TaskId::from("task-7"));
    backend.drop_sockets();
    wait_until("third connection", || backend.ws_connects() == 3).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.subscribes().len(), 2, "released task is not resent");
}

#[tokio::test]
async fn heartbeats_flow_while_connected() {
    let backend = MockBackend::start().await;
    let session = Session::new(&fast_config(&backend.base_url(), TOKEN)).unwrap();
    session.start().await;

    wait_until("two heartbeats", || backend.heartbeats() >= 2).await;
    assert!(session.socket.is_connected());
}

#[tokio::test]
async fn rejected_token_gives_up_after_the_retry_budget() {
    let backend = MockBackend::start().await;
    let session = Session::new(&fast_config(&backend.base_url(), "wrong-token")).unwrap();
    session.start().await;

    wait_until("initial attempt plus five retries", || backend.ws_attempts() == 6).await;
    wait_until("settled", || session.socket.state() == ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(backend.ws_attempts(), 6);
    assert_eq!(backend.ws_connects(), 0);
    assert_eq!(session.socket.reconnect_attempts(), 5);
}

#[tokio::test]
async fn sign_in_connects_and_sign_out_stays_down() {
    let backend = MockBackend::start().await;
    let session = Session::new(&fast_config(&backend.base_url(), "")).unwrap();
    session.start().await;
    assert_eq!(session.socket.state(), ConnectionState::Disconnected);
    assert_eq!(backend.ws_attempts(), 0);

    session.sign_in(TOKEN).await;
    assert!(session.socket.is_connected());
    assert_eq!(backend.ws_connects(), 1);

    session.sign_out();
    assert_eq!(session.socket.state(), ConnectionState::Disconnected);
    wait_until("server sees the close", || backend.open_sockets() == 0).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.ws_attempts(), 1, "manual disconnect never reconnects");
}

//! One signed-in client: REST API, push channel, orchestrator, history.

use std::sync::Arc;

use atelier_core::config::AtelierConfig;
use atelier_core::ApiError;
use atelier_services::{
    Connector, Orchestrator, PollSettings, SharedToken, SocketManager, SocketSettings, TaskApi,
    TaskHistory, TaskPoller,
};

use crate::http::HttpTaskApi;
use crate::ws::WsConnector;

/// Everything a front end needs, wired from one config.
pub struct Session {
    pub token: Arc<SharedToken>,
    pub api: Arc<dyn TaskApi>,
    pub socket: SocketManager,
    pub poller: TaskPoller,
    pub orchestrator: Orchestrator,
    pub history: TaskHistory,
    auto_connect: bool,
}

impl Session {
    /// Wire a session against the real backend. Does not connect; see
    /// [`start`](Self::start).
    pub fn new(config: &AtelierConfig) -> Result<Self, ApiError> {
        let token = Arc::new(SharedToken::new(config.token().map(str::to_string)));
        let api: Arc<dyn TaskApi> = Arc::new(HttpTaskApi::new(&config.api.base_url, token.clone())?);
        Ok(Self::with_parts(config, token, api, Arc::new(WsConnector)))
    }

    /// Wire a session from explicit collaborators.
    pub fn with_parts(
        config: &AtelierConfig,
        token: Arc<SharedToken>,
        api: Arc<dyn TaskApi>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let socket = SocketManager::new(
            SocketSettings::from_config(config),
            connector,
            token.clone(),
        );
        let poller = TaskPoller::new(api.clone(), PollSettings::from(&config.poller));
        let orchestrator = Orchestrator::new(
            api.clone(),
            socket.clone(),
            poller.clone(),
            config.push_timeout(),
        );
        let history = TaskHistory::from_config(api.clone(), &config.history);
        Self {
            token,
            api,
            socket,
            poller,
            orchestrator,
            history,
            auto_connect: config.socket.auto_connect,
        }
    }

    /// Open the push channel if the config asks for it and a token is set.
    pub async fn start(&self) {
        if self.auto_connect {
            self.socket.connect().await;
        }
        tracing::debug!(socket = %self.socket.state(), "session started");
    }

    /// Sign in: store the token and (re)open the push channel.
    pub async fn sign_in(&self, token: impl Into<String>) {
        self.token.set(token);
        self.socket.disconnect();
        self.socket.connect().await;
    }

    /// Sign out: drop the token, cancel any generation, close the channel.
    pub fn sign_out(&self) {
        self.orchestrator.cancel();
        self.token.clear();
        self.socket.disconnect();
    }
}

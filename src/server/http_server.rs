use crate::config::{format_duration, Config};
use crate::server::listener::ListenerSupervisor;
use crate::server::request_handler::RequestHandler;
use crate::shutdown::{ShutdownCoordinator, ShutdownState};
use anyhow::Result;
use futures::stream::Stream;
use std::sync::Arc;
use tracing::{info, warn};

/// Both listeners plus the shutdown coordinator that ends them.
pub struct HttpServer {
    config: Arc<Config>,
    supervisors: Vec<ListenerSupervisor>,
}

impl HttpServer {
    /// Builds the enabled supervisors. TLS credentials are loaded here, so a
    /// bad key pair fails before any socket is opened.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let handler = Arc::new(RequestHandler::new(&config));

        let mut supervisors = Vec::with_capacity(2);
        if let Some(http) = ListenerSupervisor::plaintext(&config, handler.clone()) {
            supervisors.push(http);
        }
        if let Some(https) = ListenerSupervisor::tls(&config, handler)? {
            supervisors.push(https);
        }

        Ok(Self {
            config,
            supervisors,
        })
    }

    pub fn supervisors(&self) -> &[ListenerSupervisor] {
        &self.supervisors
    }

    /// Runs until the first termination signal plus the shutdown deadline.
    pub async fn run<S>(self, signals: S) -> ShutdownState
    where
        S: Stream<Item = i32> + Unpin,
    {
        if self.supervisors.is_empty() {
            warn!("no listen addresses configured, waiting for shutdown");
        }

        info!(
            log_level = self.config.log_level.as_str(),
            shutdown_deadline = %format_duration(self.config.shutdown_deadline),
            https_offloaded = self.config.https.is_offloaded,
            "Starting bounce"
        );

        let coordinator = ShutdownCoordinator::new(self.config.shutdown_deadline);
        for supervisor in self.supervisors {
            tokio::spawn(supervisor.run(coordinator.subscribe()));
        }

        let state = coordinator.run(signals).await;
        info!("Server stopped");
        state
    }
}

pub mod classify;
pub mod config;
pub mod error;
pub mod forward;
pub mod logging;
pub mod monitor;
pub mod routes;
pub mod scheduler;
pub mod test_util;

pub use classify::{CharLengthEstimator, Classifier, CostEstimator};
pub use config::{Config, ConfigError, ReleaseMode, SchedulerConfig};
pub use error::RouterError;
pub use forward::{ForwardError, ForwardedResponse, Forwarder, HttpForwarder};
pub use monitor::TrafficMonitor;
pub use scheduler::Scheduler;

use std::sync::Arc;

use axum::Router;

use adasplit_common::RouterStatus;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub scheduler: Scheduler,
    pub classifier: Classifier,
    /// Arrival statistics, shared with the background reporter.
    pub monitor: Arc<TrafficMonitor>,
}

impl AppState {
    pub fn new(config: Config, forwarder: Arc<dyn Forwarder>) -> Result<Self, ConfigError> {
        config.validate()?;
        let scheduler = Scheduler::new(&config.scheduler, forwarder)?;
        let classifier = Classifier::from_config(&config.classifier);
        let monitor = Arc::new(TrafficMonitor::from_config(&config.monitor));

        Ok(Self {
            config,
            scheduler,
            classifier,
            monitor,
        })
    }

    /// Scheduler snapshot with traffic statistics attached.
    pub fn status(&self) -> RouterStatus {
        let mut status = self.scheduler.status();
        status.traffic = Some(self.monitor.stats());
        status
    }
}

/// All routes plus request logging. Transport layers (CORS, tracing) are
/// added by the binary.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::status::router(state.clone()))
        .merge(routes::chat::router(state))
        .layer(axum::middleware::from_fn(logging::request_logger))
}

use crate::capture::CaptureStore;
use crate::config::Config;
use crate::events::EventBus;
use crate::export::{HttpTraceExporter, TraceExporter};
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub config: Config,
    pub store: Arc<CaptureStore>,
    pub events: EventBus,
    pub exporter: Option<Arc<dyn TraceExporter>>,
    pub http: reqwest::Client,
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl AppState {
    pub fn new(config: Config) -> (Arc<Self>, tokio::sync::broadcast::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(16);

        let store = Arc::new(CaptureStore::new(config.capture.capacity));

        // Redirects must pass through untouched for the capture to reflect
        // what the client actually received.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("http client creation failed");

        let exporter: Option<Arc<dyn TraceExporter>> = config
            .exporter
            .as_ref()
            .map(|cfg| Arc::new(HttpTraceExporter::new(cfg.clone())) as Arc<dyn TraceExporter>);

        let state = Arc::new(Self {
            config,
            store,
            events: EventBus::new(),
            exporter,
            http,
            shutdown_tx,
        });

        (state, shutdown_rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_has_empty_store() {
        let (state, _shutdown_rx) = AppState::new(Config::default());
        assert!(state.store.is_empty());
        assert_eq!(state.store.capacity(), 2000);
        assert!(state.exporter.is_none());
    }

    #[test]
    fn test_exporter_enabled_by_config() {
        let mut config = Config::default();
        config.exporter = Some(crate::config::ExporterConfig {
            endpoint: "http://localhost:6006/v1/traces".to_string(),
            api_key: None,
        });
        let (state, _shutdown_rx) = AppState::new(config);
        assert!(state.exporter.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_signals_subscribers() {
        let (state, mut shutdown_rx) = AppState::new(Config::default());
        state.shutdown();
        assert!(shutdown_rx.recv().await.is_ok());
    }
}

//! Prometheus metrics.

use crate::config::MetricsSettings;
use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::OnceLock;
use std::thread;

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,
    /// Address to bind the scrape listener.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9090),
        }
    }
}

impl MetricsConfig {
    /// Builds metrics configuration from config settings with env overrides.
    #[must_use]
    pub fn from_settings(settings: Option<&MetricsSettings>) -> Self {
        let mut config = Self::default();
        if let Some(enabled) = settings.and_then(|s| s.enabled) {
            config.enabled = enabled;
        }
        if let Some(port) = settings.and_then(|s| s.port) {
            config.listen_addr.set_port(port);
        }

        if let Some(enabled) = parse_bool_env("NEUROPROMPT_METRICS_ENABLED") {
            config.enabled = enabled;
        }
        if let Some(port) = parse_port_env("NEUROPROMPT_METRICS_PORT") {
            config.listen_addr.set_port(port);
        }
        config
    }
}

/// Handle to the installed recorder.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
}

impl MetricsHandle {
    /// Renders the current exposition text.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus.render()
    }
}

static GLOBAL_METRICS: OnceLock<MetricsHandle> = OnceLock::new();

/// Renders the process-wide recorder, if one is installed.
#[must_use]
pub fn render_global() -> Option<String> {
    GLOBAL_METRICS.get().map(MetricsHandle::render)
}

/// Installs the Prometheus recorder, with an HTTP listener when `expose`.
pub fn install_prometheus(config: &MetricsConfig, expose: bool) -> Result<Option<MetricsHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let builder = PrometheusBuilder::new();
    let prometheus = if expose {
        install_listener(builder.with_http_listener(config.listen_addr))?
    } else {
        let recorder = builder.build_recorder();
        let handle = recorder.handle();
        set_global_recorder(recorder)?;
        handle
    };

    let handle = MetricsHandle { prometheus };
    let _ = GLOBAL_METRICS.set(handle.clone());
    tracing::debug!(expose, addr = %config.listen_addr, "Installed Prometheus recorder");
    Ok(Some(handle))
}

fn install_listener(builder: PrometheusBuilder) -> Result<PrometheusHandle> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_runtime_init".to_string(),
            cause: e.to_string(),
        })?;
    let (recorder, exporter) = {
        let _guard = runtime.enter();
        builder.build().map_err(|e| Error::OperationFailed {
            operation: "metrics_exporter_build".to_string(),
            cause: e.to_string(),
        })?
    };
    let handle = recorder.handle();
    set_global_recorder(recorder)?;
    thread::Builder::new()
        .name("metrics-exporter-prometheus-http".to_string())
        .spawn(move || {
            let _ = runtime.block_on(exporter);
        })
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_runtime_thread".to_string(),
            cause: e.to_string(),
        })?;
    Ok(handle)
}

fn set_global_recorder(recorder: PrometheusRecorder) -> Result<()> {
    metrics::set_global_recorder(recorder).map_err(|e| Error::OperationFailed {
        operation: "metrics_recorder_install".to_string(),
        cause: e.to_string(),
    })
}

fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|value| {
        let value = value.to_lowercase();
        value == "true" || value == "1" || value == "yes"
    })
}

fn parse_port_env(key: &str) -> Option<u16> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_smoke() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("pipeline_runs_total", "outcome" => "accepted").increment(1);
        });
        let rendered = handle.render();
        assert!(rendered.contains("pipeline_runs_total"));
    }

    #[test]
    fn test_disabled_installs_nothing() {
        let config = MetricsConfig::default();
        assert!(install_prometheus(&config, false).unwrap().is_none());
    }

    #[test]
    fn test_settings_port() {
        let settings = MetricsSettings {
            enabled: Some(true),
            port: Some(9400),
        };
        let config = MetricsConfig::from_settings(Some(&settings));
        if std::env::var("NEUROPROMPT_METRICS_PORT").is_err() {
            assert_eq!(config.listen_addr.port(), 9400);
        }
    }
}

//! zipcore daemon: entry point for running the zip service.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use zipcore_node::{init_logging, ServiceConfig, ZipService};
use zipcore_types::Network;
use zipcore_websocket::WebSocketServer;

#[derive(Parser)]
#[command(name = "zipcore-daemon", about = "Supervises zipd and relays its notifications")]
struct Cli {
    /// Path to a TOML configuration file. CLI flags and env vars override
    /// its settings.
    #[arg(long, env = "ZIPCORE_CONFIG")]
    config: Option<PathBuf>,

    /// Network: "livenet", "testnet" or "regtest".
    #[arg(long, env = "ZIPCORE_NETWORK")]
    network: Option<String>,

    /// Log level or filter directives, e.g. "info" or "debug,zipcore_node=trace".
    #[arg(long, env = "ZIPCORE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable the WebSocket relay.
    #[arg(long, env = "ZIPCORE_ENABLE_WEBSOCKET")]
    websocket: bool,

    /// WebSocket relay port.
    #[arg(long, env = "ZIPCORE_WS_PORT")]
    websocket_port: Option<u16>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let path = path.to_string_lossy();
                ServiceConfig::from_toml_file(&path)
                    .with_context(|| format!("loading config from {path}"))?
            }
            None => ServiceConfig::default(),
        };

        if let Some(name) = self.network.as_deref() {
            let Some(network) = Network::from_name(name) else {
                bail!("unknown network {name:?}");
            };
            config.network = network;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config.enable_websocket |= self.websocket;
        if let Some(port) = self.websocket_port {
            config.websocket_port = port;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;
    init_logging(config.log_format, &config.log_level)?;

    tracing::info!(
        network = config.network.as_str(),
        spawn = config.spawn.is_some(),
        connect = config.connect.len(),
        websocket = config.enable_websocket,
        "starting zip service"
    );

    let service = ZipService::new(config.clone())?;
    let shutdown = service.shutdown_controller().clone();
    serve(&service, &config, async move { shutdown.wait_for_signal().await }).await?;

    tracing::info!("zipcore daemon exited cleanly");
    Ok(())
}

/// Start the service and run it until `signal` resolves. A signal during
/// start-up still stops the service, and with it any spawned zipd.
async fn serve<F>(service: &Arc<ZipService>, config: &ServiceConfig, signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(signal);

    tokio::select! {
        started = service.start() => {
            if let Err(e) = started {
                if let Err(stop) = service.stop().await {
                    tracing::warn!(error = %stop, "failed to stop zip service after failed start");
                }
                return Err(anyhow::Error::new(e).context("starting zip service"));
            }
        }
        _ = &mut signal => {
            tracing::info!("shutdown signal received during start-up, stopping zip service");
            service.stop().await?;
            return Ok(());
        }
    }

    let relay = config.enable_websocket.then(|| {
        let server = WebSocketServer::new(config.websocket_port, service.clone());
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                tracing::error!(error = %e, "WebSocket relay failed");
            }
        })
    });

    signal.await;
    tracing::info!("shutdown signal received, stopping zip service");
    service.stop().await?;

    if let Some(relay) = relay {
        let _ = relay.await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zipcore_node::ConnectConfig;

    fn unreachable_daemon() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.connect.push(ConnectConfig {
            rpchost: "127.0.0.1".into(),
            rpcport: 1,
            rpcuser: "zip".into(),
            rpcpassword: "local321".into(),
            rpcprotocol: "http".into(),
            zmqpubrawtx: None,
        });
        config
    }

    #[tokio::test]
    async fn signal_during_start_up_stops_the_service() {
        let config = unreachable_daemon();
        let service = ZipService::new(config.clone()).unwrap();

        let served = tokio::time::timeout(
            Duration::from_secs(5),
            serve(&service, &config, tokio::time::sleep(Duration::from_millis(200))),
        )
        .await
        .expect("start-up should not outlive the signal");

        served.unwrap();
        assert!(service.shutdown_controller().is_stopping());
    }

    #[tokio::test]
    async fn failed_start_is_reported_and_stops_the_service() {
        let config = ServiceConfig::default();
        let service = ZipService::new(config.clone()).unwrap();

        let err = serve(&service, &config, std::future::pending()).await.unwrap_err();

        assert!(err.to_string().contains("starting zip service"));
        assert!(service.shutdown_controller().is_stopping());
    }

    #[test]
    fn cli_network_overrides_config() {
        let cli = Cli::parse_from(["zipcore-daemon", "--network", "testnet", "--websocket"]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert!(config.enable_websocket);
    }
}

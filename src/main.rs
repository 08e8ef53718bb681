//! fabric-node: one node of the messaging fabric over an MQTT broker.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use fabric::{
    init_logging, Fabric, MemoryRegistry, MqttBroker, MqttConnector, ServiceRegistry, Settings,
};
use tracing::info;

/// Аргументы командной строки узла.
#[derive(Parser)]
#[command(name = "fabric-node")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fabric node - transport and routing core", long_about = None)]
struct Cli {
    /// Файл настроек (toml, yaml, json)
    #[arg(short, long, env = "FABRIC_CONFIG")]
    config: Option<PathBuf>,
    /// Имя узла
    #[arg(short, long)]
    node: Option<String>,
    /// Домашний брокер `host[:port]`, порт по умолчанию 1883
    #[arg(short, long)]
    broker: Option<String>,
    /// Уровень логирования
    #[arg(long)]
    log_level: Option<String>,
}

/// Порт брокера, если в адресе он не указан.
const DEFAULT_BROKER_PORT: u16 = 1883;

fn parse_broker(address: &str) -> Result<(String, u16)> {
    let Some((host, port)) = address.rsplit_once(':') else {
        return Ok((address.to_string(), DEFAULT_BROKER_PORT));
    };
    let port = port
        .parse()
        .with_context(|| format!("invalid broker port in '{address}'"))?;
    Ok((host.to_string(), port))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(cli.config.as_deref()).context("loading settings")?;
    if let Some(node) = cli.node {
        settings.node.name = node;
    }
    if let Some(broker) = cli.broker.as_deref() {
        let (host, port) = parse_broker(broker)?;
        settings.node.broker_host = host;
        settings.node.broker_port = port;
    }
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }

    let logging = init_logging(settings.logging.clone())?;

    // топология приходит из внешнего реестра; без него узел работает один
    let registry = Arc::new(MemoryRegistry::new());
    let connector = Arc::new(MqttConnector::new(settings.home_endpoint_config()));
    let fabric = Fabric::start(
        settings,
        Arc::new(MqttBroker::new()),
        registry,
        connector,
        &ServiceRegistry::with_builtins(),
    )
    .await?;

    tokio::signal::ctrl_c().await?;
    info!(node = %fabric.home(), "shutdown requested");
    fabric.shutdown().await?;
    logging.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет разбор адреса брокера и порт по умолчанию.
    #[test]
    fn test_parse_broker() {
        assert_eq!(parse_broker("10.0.0.1:1884").unwrap(), ("10.0.0.1".to_string(), 1884));
        assert_eq!(parse_broker("nohost").unwrap(), ("nohost".to_string(), 1883));
        assert!(parse_broker("h:port").is_err());
    }
}

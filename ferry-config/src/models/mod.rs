use ferry_core::broker::{DEFAULT_BROKER_PORT, broker_url};
use serde::{Deserialize, Serialize};

pub use ferry_core::consume::ConsumerConfig as ConsumerSettings;
pub use ferry_core::publish::PublisherConfig as PublisherSettings;
pub use ferry_core::transfer::TransferConfig as TransferSettings;
pub use ferry_core::watch::WatchConfig as WatchSettings;

/// Effective configuration for one node. Every section falls back to its
/// defaults when absent from the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub publisher: PublisherSettings,
    pub watch: WatchSettings,
    pub transfer: TransferSettings,
    pub consumer: ConsumerSettings,
}

impl Config {
    /// Check every section. Errors name the offending key.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.broker.validate()?;
        self.publisher.validate()?;
        self.watch.validate()?;
        self.transfer.validate()?;
        self.consumer.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Port used when the broker is given as a bare host.
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_BROKER_PORT,
        }
    }
}

impl BrokerConfig {
    /// Connection URL for a broker named on the command line.
    pub fn url_for(&self, host: &str) -> String {
        broker_url(host.trim(), self.port)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.port != 0, "broker.port must be > 0");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_wire_constants() {
        let config = Config::default();
        assert_eq!(config.publisher.queue, "file_transfer");
        assert_eq!(config.publisher.publish_interval_ms, 500);
        assert_eq!(config.publisher.reconnect_delay_ms, 5_000);
        assert_eq!(config.transfer.port, 48463);
        assert_eq!(config.transfer.chunk_size, 4096);
        assert_eq!(config.watch.extensions, vec![".jpg".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bare_hosts_use_the_configured_port() {
        let broker = BrokerConfig { port: 6380 };
        assert_eq!(broker.url_for(" 10.0.0.2 "), "redis://10.0.0.2:6380/");
        assert_eq!(broker.url_for("redis://b:1/0"), "redis://b:1/0");
    }
}

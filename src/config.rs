use std::{collections::HashMap, fs::read_to_string, str::FromStr};

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use url::Url;

use rib::{PeerInfo, PortRange};

/// This node's own identity, the one loop detection looks for in node
/// paths and the origin of every local advertisement.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Node {
    ///
    /// Fully qualified, globally unique node name.
    ///
    pub name: String,
    ///
    /// Domain suffixes this node answers for.
    ///
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub endpoint: Option<Url>,
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
    ///
    /// Address of the local dataplane proxy, advertised to peers so
    /// their egress listeners know where to forward.
    ///
    #[serde(default)]
    pub envoy_address: Option<String>,
}

impl Node {
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            name: self.name.clone(),
            domains: self.domains.clone(),
            endpoint: self.endpoint.clone(),
            labels: self.labels.clone(),
            peer_token: None,
            envoy_address: self.envoy_address.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Runtime {
    ///
    /// Port ranges the proxy listeners are drawn from, walked in
    /// configuration order. Each range is a closed interval written as
    /// "start..end".
    ///
    #[serde(default = "Runtime::port_ranges")]
    pub port_ranges: Vec<PortRange>,
    ///
    /// Seconds a peer may stay silent before its session is dead.
    ///
    #[serde(default = "Runtime::default_hold_seconds")]
    pub default_hold_seconds: u64,
    ///
    /// Cadence of the expiry/keepalive clock.
    ///
    #[serde(default = "Runtime::tick_interval_ms")]
    pub tick_interval_ms: u64,
    ///
    /// Seconds a single peer send may take before it is written off.
    ///
    #[serde(default = "Runtime::send_timeout")]
    pub send_timeout: u64,
    ///
    /// Maximum number of runtime worker threads.
    ///
    #[serde(default = "Runtime::max_threads")]
    pub max_threads: usize,
}

impl Runtime {
    fn port_ranges() -> Vec<PortRange> {
        vec![PortRange::default()]
    }

    fn default_hold_seconds() -> u64 {
        60
    }

    fn tick_interval_ms() -> u64 {
        1000
    }

    fn send_timeout() -> u64 {
        5
    }

    fn max_threads() -> usize {
        num_cpus::get()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            port_ranges: Self::port_ranges(),
            default_hold_seconds: Self::default_hold_seconds(),
            tick_interval_ms: Self::tick_interval_ms(),
            send_timeout: Self::send_timeout(),
            max_threads: Self::max_threads(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub node: Node,
    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default)]
    pub log: Log,
    ///
    /// Peers to create at startup, before the first session opens.
    /// Entries use the same camelCase field names as the peer RPC
    /// surface.
    ///
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: catalyst --config /etc/catalyst/config.json5
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    /// Load command line parameters, read the configuration from the
    /// file they point at; every section except `node` falls back to
    /// defaults.
    ///
    pub fn load() -> Result<Self> {
        Self::from_str(&read_to_string(&Cli::parse().config)?)
    }

    pub fn from_str(body: &str) -> Result<Self> {
        Ok(serde_json5::from_str(body)?)
    }
}

//! Node configuration types and persistence
//!
//! Handles loading and saving the launcher configuration from disk and
//! turning it into the flag list handed to the node on start.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Fee estimation endpoint used by the regtest harness
pub const DEFAULT_FEE_URL: &str = "https://nodes.lightning.computer/fees/v1/btc-fee-estimates.json";

/// Neutrino peer of a local regtest setup
pub const DEFAULT_NEUTRINO_PEER: &str = "localhost:19444";

/// Bitcoin network the node joins
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    #[default]
    Regtest,
    Signet,
    Simnet,
}

impl Network {
    /// Get the network name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
            Network::Signet => "signet",
            Network::Simnet => "simnet",
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            "signet" => Ok(Network::Signet),
            "simnet" => Ok(Network::Simnet),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

/// Chain backend the node syncs from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChainBackend {
    #[default]
    Neutrino,
    Bitcoind,
    Btcd,
}

impl ChainBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainBackend::Neutrino => "neutrino",
            ChainBackend::Bitcoind => "bitcoind",
            ChainBackend::Btcd => "btcd",
        }
    }
}

impl FromStr for ChainBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "neutrino" => Ok(ChainBackend::Neutrino),
            "bitcoind" => Ok(ChainBackend::Bitcoind),
            "btcd" => Ok(ChainBackend::Btcd),
            other => Err(format!("unknown chain backend: {}", other)),
        }
    }
}

/// Configuration errors found before the node is started
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("lnd directory must not be empty")]
    EmptyLndDir,

    #[error("invalid fee url {url}: {reason}")]
    InvalidFeeUrl { url: String, reason: String },

    #[error("invalid neutrino peer {0}, expected HOST:PORT")]
    InvalidPeer(String),
}

/// Launcher configuration stored in launcher.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Node data directory (--lnddir)
    #[serde(default = "default_lnd_dir")]
    pub lnd_dir: String,

    /// Skip the seed backup prompt
    #[serde(default = "default_true")]
    pub no_seed_backup: bool,

    /// Do not listen for inbound peers
    #[serde(default = "default_true")]
    pub no_listen: bool,

    #[serde(default)]
    pub network: Network,

    #[serde(default)]
    pub backend: ChainBackend,

    /// Fee estimation endpoint (--feeurl)
    #[serde(default = "default_fee_url")]
    pub fee_url: Option<String>,

    #[serde(default = "default_true")]
    pub assume_chan_valid: bool,

    #[serde(default = "default_true")]
    pub tls_disable_autofill: bool,

    #[serde(default = "default_true")]
    pub db_auto_compact: bool,

    #[serde(default = "default_compact_min_age")]
    pub db_auto_compact_min_age: Option<String>,

    /// Neutrino peers, one --neutrino.connect flag each
    #[serde(default = "default_neutrino_connect")]
    pub neutrino_connect: Vec<String>,

    /// Extra flags appended verbatim after the generated ones
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_lnd_dir() -> String {
    "./lnd".to_string()
}

fn default_true() -> bool {
    true
}

fn default_fee_url() -> Option<String> {
    Some(DEFAULT_FEE_URL.to_string())
}

fn default_compact_min_age() -> Option<String> {
    Some("0".to_string())
}

fn default_neutrino_connect() -> Vec<String> {
    vec![DEFAULT_NEUTRINO_PEER.to_string()]
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            lnd_dir: default_lnd_dir(),
            no_seed_backup: true,
            no_listen: true,
            network: Network::default(),
            backend: ChainBackend::default(),
            fee_url: default_fee_url(),
            assume_chan_valid: true,
            tls_disable_autofill: true,
            db_auto_compact: true,
            db_auto_compact_min_age: default_compact_min_age(),
            neutrino_connect: default_neutrino_connect(),
            extra_args: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Get the path to the default config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lnd-launcher")
            .join("launcher.json")
    }

    /// Load config from disk, or return default if not found
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded launcher config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!(
                        "Ignoring unreadable config {}: {}, using defaults",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config dir {}", parent.display())
                })?;
            }
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config {}", path.display()))?;

        log::info!("Launcher config saved to {}", path.display());
        Ok(())
    }

    /// Check the values the node would otherwise reject late
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lnd_dir.trim().is_empty() {
            return Err(ConfigError::EmptyLndDir);
        }

        if let Some(fee_url) = &self.fee_url {
            let parsed = url::Url::parse(fee_url).map_err(|e| ConfigError::InvalidFeeUrl {
                url: fee_url.clone(),
                reason: e.to_string(),
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(ConfigError::InvalidFeeUrl {
                    url: fee_url.clone(),
                    reason: format!("unsupported scheme {}", parsed.scheme()),
                });
            }
        }

        if self.backend == ChainBackend::Neutrino {
            for peer in &self.neutrino_connect {
                if !is_host_port(peer) {
                    return Err(ConfigError::InvalidPeer(peer.clone()));
                }
            }
        }

        Ok(())
    }

    /// Build the ordered flag list passed to the node's start call
    pub fn to_blob(&self) -> ConfigBlob {
        let mut args = vec![format!("--lnddir={}", self.lnd_dir)];

        if self.no_seed_backup {
            args.push("--noseedbackup".to_string());
        }
        if self.no_listen {
            args.push("--nolisten".to_string());
        }

        args.push("--bitcoin.active".to_string());
        args.push(format!("--bitcoin.{}", self.network.as_str()));
        args.push(format!("--bitcoin.node={}", self.backend.as_str()));

        if let Some(fee_url) = &self.fee_url {
            args.push(format!("--feeurl=\"{}\"", fee_url));
        }
        if self.assume_chan_valid {
            args.push("--routing.assumechanvalid".to_string());
        }
        if self.tls_disable_autofill {
            args.push("--tlsdisableautofill".to_string());
        }
        if self.db_auto_compact {
            args.push("--db.bolt.auto-compact".to_string());
            if let Some(min_age) = &self.db_auto_compact_min_age {
                args.push(format!("--db.bolt.auto-compact-min-age={}", min_age));
            }
        }

        if self.backend == ChainBackend::Neutrino {
            for peer in &self.neutrino_connect {
                args.push(format!("--neutrino.connect={}", peer));
            }
        }

        args.extend(self.extra_args.iter().cloned());

        ConfigBlob::new(args)
    }
}

fn is_host_port(peer: &str) -> bool {
    match peer.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Immutable, ordered list of CLI-style flags handed to the node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigBlob {
    args: Vec<String>,
}

impl ConfigBlob {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Newline-separated text, the form the node's start entry point parses
    pub fn to_text(&self) -> String {
        self.args.join("\n")
    }
}

impl fmt::Display for ConfigBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl FromIterator<String> for ConfigBlob {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self::new(iter)
    }
}

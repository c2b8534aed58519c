//! Command line interface

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::launcher::LauncherOptions;
use crate::node::config::{ChainBackend, Network, NodeConfig};
use crate::node::ffi::default_library_path;

/// Terminal launcher for an embedded LND node
#[derive(Parser, Debug)]
#[command(name = "lnd-launcher")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path of the LND shared library
    #[arg(long, env = "LND_LIB_PATH")]
    pub lib: Option<PathBuf>,

    /// Expected SHA256 of the library, checked before loading
    #[arg(long, value_name = "HEX")]
    pub lib_sha256: Option<String>,

    /// Launcher config file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    pub save_config: bool,

    /// Node data directory
    #[arg(long)]
    pub lnddir: Option<String>,

    /// Bitcoin network (mainnet, testnet, regtest, signet, simnet)
    #[arg(long)]
    pub network: Option<Network>,

    /// Chain backend (neutrino, bitcoind, btcd)
    #[arg(long)]
    pub backend: Option<ChainBackend>,

    /// Neutrino peer, repeatable. Replaces the configured peers.
    #[arg(long = "neutrino-connect", value_name = "HOST:PORT")]
    pub neutrino_connect: Vec<String>,

    /// Fee estimation endpoint
    #[arg(long)]
    pub feeurl: Option<String>,

    /// Extra flag passed to the node verbatim, repeatable
    #[arg(long = "extra-arg", value_name = "FLAG", allow_hyphen_values = true)]
    pub extra_args: Vec<String>,

    /// Run the fixed subscribe/getInfo timeline instead of reading keys
    #[arg(long)]
    pub scripted: bool,

    /// Base64 request passed to getInfo and subscribeState
    #[arg(long, default_value = "")]
    pub selector: String,

    /// Delay between a successful start and the state subscription
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    pub subscribe_delay_ms: u64,

    /// Delay between a successful start and the scripted getInfo call
    #[arg(long, default_value_t = 3000, value_name = "MS")]
    pub get_info_delay_ms: u64,

    /// Heartbeat period in seconds, 0 disables
    #[arg(long, default_value_t = 5, value_name = "SECS")]
    pub heartbeat: u64,

    /// Unsubscribe after this many state updates (scripted runs default to 1)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_state_updates: Option<u64>,

    /// Timeout for unary calls in seconds
    #[arg(
        long,
        default_value_t = 30,
        value_name = "SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub call_timeout: u64,

    /// Directory for rolling log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn library_path(&self) -> PathBuf {
        self.lib.clone().unwrap_or_else(default_library_path)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(NodeConfig::config_path)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout)
    }

    /// Override file settings with the flags given on the command line
    pub fn apply_to(&self, config: &mut NodeConfig) {
        if let Some(lnddir) = &self.lnddir {
            config.lnd_dir = lnddir.clone();
        }
        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(feeurl) = &self.feeurl {
            config.fee_url = Some(feeurl.clone());
        }
        if !self.neutrino_connect.is_empty() {
            config.neutrino_connect = self.neutrino_connect.clone();
        }
        config.extra_args.extend(self.extra_args.iter().cloned());
    }

    pub fn launcher_options(&self) -> LauncherOptions {
        LauncherOptions {
            interactive: !self.scripted,
            selector: self.selector.clone(),
            subscribe_delay: Duration::from_millis(self.subscribe_delay_ms),
            get_info_delay: Duration::from_millis(self.get_info_delay_ms),
            heartbeat: (self.heartbeat > 0).then(|| Duration::from_secs(self.heartbeat)),
            max_state_updates: self.max_state_updates.or(self.scripted.then_some(1)),
        }
    }
}

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

pub mod cli;
pub mod launcher;
pub mod logging;
pub mod node;

use cli::Args;
use launcher::terminal::{PlainTerminal, RawTerminal, TerminalMode};
use launcher::Launcher;
use node::{create_node_state, NativeRuntime, NodeConfig, NodeManager};

/// Expand environment variables and ~ in paths
/// Windows: %VAR% style
/// Unix: ~ expands to HOME
pub fn expand_path(path: &str) -> String {
    let mut result = path.to_string();

    #[cfg(windows)]
    {
        while let Some(start) = result.find('%') {
            if let Some(end) = result[start + 1..].find('%') {
                let var_name = &result[start + 1..start + 1 + end];
                if let Ok(value) = std::env::var(var_name) {
                    result = format!("{}{}{}", &result[..start], value, &result[start + 2 + end..]);
                } else {
                    break;
                }
            } else {
                break;
            }
        }
    }

    #[cfg(not(windows))]
    {
        if result.starts_with("~/") {
            if let Some(home) = dirs::home_dir() {
                result = format!("{}{}", home.display(), &result[1..]);
            }
        } else if result == "~" {
            if let Some(home) = dirs::home_dir() {
                result = home.to_string_lossy().to_string();
            }
        }
    }

    result
}

/// Load, override, validate and optionally persist the node configuration
fn resolve_config(args: &Args) -> anyhow::Result<NodeConfig> {
    let config_path = PathBuf::from(expand_path(&args.config_path().to_string_lossy()));
    let mut config = NodeConfig::load_from(&config_path);
    args.apply_to(&mut config);

    if args.save_config {
        config.save_to(&config_path)?;
    }

    config.lnd_dir = expand_path(&config.lnd_dir);
    config.validate().context("Invalid launcher configuration")?;
    Ok(config)
}

/// Parse arguments, load the node library and run the launcher until it
/// is told to quit. Returns the process exit code.
pub fn run() -> anyhow::Result<i32> {
    let args = Args::parse();

    logging::init_logger(&logging::LogOptions {
        dir: args.log_dir.clone(),
        verbose: args.verbose,
        raw_terminal: !args.scripted,
    })?;

    let config = resolve_config(&args)?;
    let blob = config.to_blob();

    let library = PathBuf::from(expand_path(&args.library_path().to_string_lossy()));
    if let Some(expected) = &args.lib_sha256 {
        node::hasher::ensure_file_hash(&library, expected)?;
    }

    let runtime = NativeRuntime::load(&library, args.call_timeout())
        .with_context(|| format!("Failed to load LND from {}", library.display()))?;
    log::info!(
        "Using {} (unary timeout {:?})",
        runtime.library_path().display(),
        runtime.call_timeout()
    );

    let state = create_node_state();
    let manager = Arc::new(NodeManager::new(Arc::new(runtime), state));

    let terminal: Box<dyn TerminalMode> = if args.scripted {
        Box::new(PlainTerminal)
    } else {
        Box::new(RawTerminal::new())
    };
    let launcher = Launcher::new(manager, blob, args.launcher_options(), terminal);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    let result = rt.block_on(launcher.run());

    // The node's own threads and the terminal reader must not hold up exit
    rt.shutdown_background();
    result
}

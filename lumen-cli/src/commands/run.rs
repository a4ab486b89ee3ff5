//! Run one configured chain

use anyhow::{Context, Result, bail};
use clap::Args;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use lumen_plugin_api::{ChainError, PluginChain};

use super::HostArgs;

#[derive(Args)]
pub struct RunArgs {
    /// Chain name from the config file
    pub chain: String,

    /// Cancel the run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

pub fn run(host: &HostArgs, args: RunArgs) -> Result<()> {
    let config = host.load_config()?;
    let Some(chain_config) = config.chain(&args.chain) else {
        bail!(
            "Chain '{}' is not defined in {}",
            args.chain,
            host.config.display()
        );
    };

    let registry = host.bring_up(&config)?;
    let chain = Arc::new(
        chain_config
            .build(&registry)
            .with_context(|| format!("Failed to assemble chain '{}'", args.chain))?,
    );

    match run_on_worker(&chain, args.timeout.map(Duration::from_secs)) {
        Ok(()) => {
            println!("Chain '{}' completed", chain.name());
            Ok(())
        }
        Err(ChainError::PluginFailed { failures, .. }) => {
            for f in &failures {
                println!("✗ {} ({}): {}", f.plugin, f.stage, f.message);
            }
            bail!("Chain '{}' failed", chain.name())
        }
        Err(e) => Err(e.into()),
    }
}

/// Run `chain` on its own thread, cancelling it once `timeout` elapses
pub fn run_on_worker(chain: &Arc<PluginChain>, timeout: Option<Duration>) -> Result<(), ChainError> {
    let (done_tx, done_rx) = mpsc::channel();
    let worker = {
        let chain = Arc::clone(chain);
        thread::spawn(move || {
            let result = chain.run();
            let _ = done_tx.send(());
            result
        })
    };

    if let Some(timeout) = timeout
        && done_rx.recv_timeout(timeout).is_err()
    {
        tracing::warn!(chain = %chain.name(), ?timeout, "Chain run timed out");
        chain.cancel();
    }

    match worker.join() {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(chain = %chain.name(), "Chain worker panicked");
            Err(ChainError::Cancelled {
                chain: chain.name().to_string(),
            })
        }
    }
}

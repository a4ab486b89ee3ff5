//! Poll periodic chains and run those that are due

use anyhow::Result;
use clap::Args;
use std::thread;
use std::time::Duration;

use lumen_plugin_api::PluginChain;

use super::HostArgs;

#[derive(Args)]
pub struct ScheduleArgs {
    /// Number of polling rounds; runs until interrupted when omitted
    #[arg(long)]
    pub ticks: Option<u64>,

    /// Milliseconds between polling rounds
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,
}

pub fn run(host: &HostArgs, args: ScheduleArgs) -> Result<()> {
    let config = host.load_config()?;
    let registry = host.bring_up(&config)?;
    let chains = config.build_chains(&registry)?;

    if chains.iter().all(|c| c.period() == 0) {
        println!("No periodic chains configured");
        return Ok(());
    }

    let interval = Duration::from_millis(args.interval_ms);
    let mut tick = 0u64;
    while args.ticks.is_none_or(|ticks| tick < ticks) {
        let ran = run_due(&chains);
        tracing::debug!(tick, ran, "Scheduler tick");
        tick += 1;
        thread::sleep(interval);
    }
    Ok(())
}

/// Run every chain that needs periodic execution. Returns how many ran.
pub fn run_due(chains: &[PluginChain]) -> usize {
    let mut ran = 0;
    for chain in chains.iter().filter(|c| c.needs_periodic_execution()) {
        ran += 1;
        match chain.run() {
            Ok(()) => {
                if !chain.is_hidden() {
                    tracing::info!(chain = %chain.name(), "Chain completed");
                }
            }
            Err(e) => tracing::warn!(chain = %chain.name(), error = %e, "Chain run failed"),
        }
    }
    ran
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::PluginRegistry;

    #[test]
    fn test_run_due_respects_period() {
        let mut registry = PluginRegistry::with_builtins();
        registry.bring_up();

        let mut once = registry.new_chain("once", "default");
        once.set_period(-1);
        let mut hourly = registry.new_chain("hourly", "default");
        hourly.set_period(3600);
        let never = registry.new_chain("never", "default");
        let chains = vec![once, hourly, never];

        assert_eq!(run_due(&chains), 2);
        // The run-once chain is spent and the hourly one is not due yet.
        assert_eq!(run_due(&chains), 0);
    }
}

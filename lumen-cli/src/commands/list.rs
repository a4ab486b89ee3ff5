//! List plugins and their bring-up status

use anyhow::Result;
use clap::Args;

use lumen_core::PluginInfo;
use lumen_plugin_api::LifecycleState;

use super::HostArgs;

#[derive(Args)]
pub struct ListArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn run(host: &HostArgs, args: ListArgs) -> Result<()> {
    let config = host.load_config()?;
    let registry = host.bring_up(&config)?;
    let plugins = registry.list_plugins();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plugins)?);
        return Ok(());
    }

    if plugins.is_empty() {
        println!("No plugins loaded");
        return Ok(());
    }

    for p in &plugins {
        println!("{}", format_plugin(p));
    }
    Ok(())
}

fn format_plugin(p: &PluginInfo) -> String {
    let status = match &p.state {
        LifecycleState::Runnable => "✓",
        LifecycleState::Rejected { .. } => "✗",
        _ => "○",
    };
    let version = p
        .version
        .as_deref()
        .map(|v| format!(" v{v}"))
        .unwrap_or_default();
    let attributes = if p.attributes.is_empty() {
        String::new()
    } else {
        format!(" [{}]", p.attributes.join(", "))
    };

    let mut line = format!("{status} {}{version}{attributes}    {}", p.name, p.origin);
    if let LifecycleState::Rejected { stage, reason } = &p.state {
        line.push_str(&format!("\n    rejected in {stage:?}: {reason}"));
    }
    line
}

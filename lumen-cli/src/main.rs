use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "lumen", about = "Display calibration plugin host")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file with plugin directories and chains
    #[arg(short, long, global = true, default_value = "lumen.toml")]
    config: PathBuf,

    /// Extra plugin directory, searched after the configured ones
    #[arg(long = "plugin-dir", global = true)]
    plugin_dirs: Vec<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring up every plugin and list them
    List(commands::list::ListArgs),
    /// Run a configured chain once
    Run(commands::run::RunArgs),
    /// Run periodic chains whenever they are due
    Schedule(commands::schedule::ScheduleArgs),
    /// Print the entries of an XML dict file
    Dict(commands::dict::DictArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let host = commands::HostArgs {
        config: cli.config,
        plugin_dirs: cli.plugin_dirs,
    };

    match cli.command {
        Commands::List(args) => commands::list::run(&host, args),
        Commands::Run(args) => commands::run::run(&host, args),
        Commands::Schedule(args) => commands::schedule::run(&host, args),
        Commands::Dict(args) => commands::dict::run(&host, args),
    }
}

mod config;
mod observability;

use clap::{Args, Parser};
use config::Config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(version, about = "Unfurls VS Marketplace links shared in Slack")]
enum CliCommand {
    /// Serve the Slack events endpoint
    Run(ConfigArgs),
    /// Load and validate configuration, then exit
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// YAML config file. Environment variables override its values.
    #[arg(long)]
    config_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let (args, serve) = match &cli {
        CliCommand::Run(args) => (args, true),
        CliCommand::CheckConfig(args) => (args, false),
    };

    let config = match Config::load(args.config_file.as_deref()).and_then(|c| {
        c.validate()?;
        Ok(c)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if !serve {
        println!("Configuration is valid");
        return ExitCode::SUCCESS;
    }

    let _sentry = observability::init(&config.common);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Starting link unfurler");
    match runtime.block_on(link_unfurler::run(config.unfurler)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Link unfurler stopped");
            ExitCode::FAILURE
        }
    }
}

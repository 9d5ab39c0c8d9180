use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use port_hub::{cli, config::Config, logging, server};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    let config = cli.config.as_ref().map(Config::new_from_path).transpose()?;

    let file_logging = cli.file_logging();

    if let Some(command) = cli.command {
        cli::handle_command(command, config.as_ref())?;

        return Ok(());
    }

    logging::init(cli.log_level, file_logging).await;

    let Some(config) = config else {
        return Err(eyre!(
            "No configuration given, see `port-hub examples config` for what one looks like"
        ));
    };
    debug!(?cli.config, "Config from path");

    #[cfg(unix)]
    let mut hangup = signal(SignalKind::hangup())?;

    #[cfg(unix)]
    let hung_up = hangup.recv();

    #[cfg(not(unix))]
    let hung_up = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hung_up => {
            info!("Told to hang up, quitting")
        }
        result = server::run(config) => {
            error!("Hub returned");
            result?;
            return Err(eyre!("Hub stopped unexpectedly"));
        }
    }

    logging::shutdown();

    Ok(())
}

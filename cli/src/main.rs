//! A3S Pack CLI entry point.

use clap::Parser;

use a3s_pack_cli::commands::{dispatch, Cli};
use a3s_pack_cli::logging;
use a3s_pack_core::{PackConfig, PackError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match PackConfig::load_default() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init(cli.verbose, cli.quiet, config.log_level);

    if let Err(e) = dispatch(cli, config).await {
        let soft = e
            .downcast_ref::<PackError>()
            .is_some_and(PackError::is_soft);
        if !soft {
            eprintln!("Error: {e}");
        }
        std::process::exit(1);
    }
}

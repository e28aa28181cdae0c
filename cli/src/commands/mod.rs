//! CLI command definitions and dispatch.

mod create_builder;
mod inspect_builder;
mod rebase;
mod set_default_builder;
mod suggest;
mod version;

use std::path::PathBuf;
use std::sync::Arc;

use a3s_pack_core::config::{config_path, pack_home};
use a3s_pack_core::{PackConfig, PackError};
use a3s_pack_runtime::{Client, DefaultImageFetcher, HttpDownloader, ImageStore, RegistryAuth};
use clap::{Parser, Subcommand};

pub use suggest::{suggest_builders, suggest_stacks, SUGGESTED_BUILDERS, SUGGESTED_STACKS};

/// A3S Pack: assemble buildpack builders and rebase application images.
#[derive(Parser)]
#[command(name = "a3s-pack", version, about)]
pub struct Cli {
    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Show errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Create a builder image from a builder.toml
    CreateBuilder(create_builder::CreateBuilderArgs),
    /// Show information about a builder
    InspectBuilder(inspect_builder::InspectBuilderArgs),
    /// Rebase an application image onto the latest run image
    Rebase(rebase::RebaseArgs),
    /// Set the builder used when none is named
    SetDefaultBuilder(set_default_builder::SetDefaultBuilderArgs),
    /// List suggested builders
    SuggestBuilders,
    /// List suggested stacks
    SuggestStacks,
    /// Show version information
    Version(version::VersionArgs),
}

/// Return the path to the image store directory.
pub(crate) fn images_dir() -> PathBuf {
    pack_home().join("images")
}

/// Return the path to the download cache directory.
pub(crate) fn downloads_dir() -> PathBuf {
    pack_home().join("downloads")
}

/// Build a client over the local image store and the default registries.
pub(crate) fn open_client() -> Result<Client, Box<dyn std::error::Error>> {
    let store = Arc::new(ImageStore::new(&images_dir())?);
    let fetcher = Arc::new(DefaultImageFetcher::new(store, RegistryAuth::from_env()));
    let downloader = Arc::new(HttpDownloader::new(downloads_dir()));
    Ok(Client::new(fetcher, downloader))
}

/// Dispatch a parsed CLI to the appropriate command handler.
///
/// Ctrl+C (or SIGTERM) abandons the command with [`PackError::Cancelled`].
pub async fn dispatch(cli: Cli, config: PackConfig) -> Result<(), Box<dyn std::error::Error>> {
    let command = async move {
        match cli.command {
            Command::CreateBuilder(args) => create_builder::execute(args).await,
            Command::InspectBuilder(args) => inspect_builder::execute(args, &config).await,
            Command::Rebase(args) => rebase::execute(args, &config).await,
            Command::SetDefaultBuilder(args) => {
                set_default_builder::execute(args, config, &config_path()).await
            }
            Command::SuggestBuilders => {
                suggest_builders(&mut std::io::stdout(), &mut rand::thread_rng())?;
                Ok(())
            }
            Command::SuggestStacks => {
                suggest_stacks(&mut std::io::stdout())?;
                Ok(())
            }
            Command::Version(args) => version::execute(args).await,
        }
    };

    tokio::select! {
        result = command => result,
        _ = shutdown_signal() => {
            tracing::warn!("Interrupted");
            Err(PackError::Cancelled.into())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! `a3s-pack create-builder` command.

use std::path::PathBuf;

use a3s_pack_core::BuilderConfig;
use a3s_pack_runtime::CreateBuilderOptions;
use clap::Args;

#[derive(Args)]
pub struct CreateBuilderArgs {
    /// Reference to save the builder as
    pub name: String,

    /// Path to builder.toml
    #[arg(short, long)]
    pub builder_config: PathBuf,

    /// Push the builder to the registry instead of the local store
    #[arg(long)]
    pub publish: bool,

    /// Use local images without pulling updates
    #[arg(long)]
    pub no_pull: bool,
}

pub async fn execute(args: CreateBuilderArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = BuilderConfig::from_file(&args.builder_config)?;
    let client = super::open_client()?;

    let identifier = client
        .create_builder(&CreateBuilderOptions {
            builder_name: args.name.clone(),
            config,
            publish: args.publish,
            no_pull: args.no_pull,
        })
        .await?;

    println!("Successfully created builder image {}", args.name);
    println!("{identifier}");
    Ok(())
}

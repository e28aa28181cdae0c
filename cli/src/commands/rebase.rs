//! `a3s-pack rebase` command.

use a3s_pack_core::PackConfig;
use a3s_pack_runtime::RebaseOptions;
use clap::Args;

#[derive(Args)]
pub struct RebaseArgs {
    /// Application image to rebase
    pub image: String,

    /// Run image to use instead of the one recorded on the image
    #[arg(long)]
    pub run_image: Option<String>,

    /// Rebase the image in the registry instead of the local store
    #[arg(long)]
    pub publish: bool,

    /// Use local images without pulling updates
    #[arg(long)]
    pub no_pull: bool,
}

fn options(args: RebaseArgs, config: &PackConfig) -> RebaseOptions {
    RebaseOptions {
        repo_name: args.image,
        run_image: args.run_image,
        additional_mirrors: config.mirrors(),
        publish: args.publish,
        skip_pull: args.no_pull,
    }
}

pub async fn execute(args: RebaseArgs, config: &PackConfig) -> Result<(), Box<dyn std::error::Error>> {
    let opts = options(args, config);
    let identifier = super::open_client()?.rebase(&opts).await?;

    println!("Rebased {}", opts.repo_name);
    println!("{identifier}");
    Ok(())
}

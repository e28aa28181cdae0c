//! `a3s-pack version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("a3s-pack version {}", a3s_pack_core::VERSION);
    Ok(())
}

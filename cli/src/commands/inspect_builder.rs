//! `a3s-pack inspect-builder` command.

use a3s_pack_core::{PackConfig, PackError};
use clap::Args;

use crate::output;

use super::suggest::suggest_setting_builder;

#[derive(Args)]
pub struct InspectBuilderArgs {
    /// Builder to inspect; defaults to the configured default builder
    pub name: Option<String>,
}

pub async fn execute(
    args: InspectBuilderArgs,
    config: &PackConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let (name, is_default) = match args.name {
        Some(name) => (name, false),
        None => match &config.default_builder {
            Some(name) => (name.clone(), true),
            None => {
                suggest_setting_builder(&mut std::io::stdout(), &mut rand::thread_rng())?;
                return Err(PackError::Soft("no default builder is set".to_string()).into());
            }
        },
    };

    if is_default {
        println!("Inspecting default builder: {name}");
    } else {
        println!("Inspecting builder: {name}");
    }

    let client = super::open_client()?;
    for (title, daemon) in [("Remote", false), ("Local", true)] {
        println!();
        println!("{title}");
        println!();
        match client.inspect_builder(&name, daemon).await {
            Ok(Some(info)) => {
                let configured = config
                    .mirrors()
                    .remove(&info.run_image)
                    .unwrap_or_default();
                print!("{}", output::render_builder_info(&info, &configured));
            }
            Ok(None) => println!("Not present"),
            Err(e) => println!("ERROR: {e}"),
        }
    }
    Ok(())
}

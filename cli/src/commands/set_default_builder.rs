//! `a3s-pack set-default-builder` command.

use std::path::Path;

use a3s_pack_core::PackConfig;
use clap::Args;

#[derive(Args)]
pub struct SetDefaultBuilderArgs {
    /// Builder to use when none is named
    pub name: String,
}

pub async fn execute(
    args: SetDefaultBuilderArgs,
    mut config: PackConfig,
    config_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    config.default_builder = Some(args.name.clone());
    config.save(config_path)?;
    println!("Builder {} is now the default builder", args.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persists_default_builder() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");

        execute(
            SetDefaultBuilderArgs {
                name: "some/builder".to_string(),
            },
            PackConfig::default(),
            &path,
        )
        .await
        .unwrap();

        let config = PackConfig::load(&path).unwrap();
        assert_eq!(config.default_builder.as_deref(), Some("some/builder"));
    }
}

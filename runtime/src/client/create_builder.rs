//! Builder assembly.

use a3s_pack_core::error::{PackError, Result, ResultExt};
use a3s_pack_core::{BuilderConfig, BuildpackRef, LifecycleConfig};

use super::Client;
use crate::builder::{
    merge_mixins, read_mixins, resolve_lifecycle_uri, Builder, Buildpack, Lifecycle,
    STACK_ID_LABEL,
};
use crate::download::ArtifactSource;
use crate::image::Image;

#[derive(Debug, Clone)]
pub struct CreateBuilderOptions {
    /// Reference the new builder is saved as
    pub builder_name: String,
    pub config: BuilderConfig,
    /// Save to the registry instead of the local store
    pub publish: bool,
    /// Use local images as they are, without refreshing from the registry
    pub no_pull: bool,
}

impl Client {
    /// Assemble and save a builder image. Returns the saved identifier.
    ///
    /// Nothing is persisted unless every step succeeds.
    pub async fn create_builder(&self, opts: &CreateBuilderOptions) -> Result<String> {
        let config = &opts.config;
        config.validate().context("invalid builder config")?;

        self.validate_run_image_config(opts).await?;

        let daemon = !opts.publish;
        let pull = !opts.no_pull;

        let build_image = self
            .fetcher
            .fetch(&config.stack.build_image, daemon, pull)
            .await
            .with_context(|| format!("fetching build image '{}'", config.stack.build_image))?;

        let run_image = self
            .fetcher
            .fetch(&config.stack.run_image, daemon, pull)
            .await
            .with_context(|| format!("fetching run image '{}'", config.stack.run_image))?;

        let mixins = merge_mixins(&read_mixins(&*build_image)?, &read_mixins(&*run_image)?);

        tracing::debug!(
            builder = %opts.builder_name,
            build_image = %build_image.name(),
            "Creating builder"
        );
        let mut builder = Builder::new(build_image, &opts.builder_name)?;
        builder.set_description(&config.description);

        if builder.stack_id() != config.stack.id {
            return Err(PackError::StackMismatch {
                expected: config.stack.id.clone(),
                found: builder.stack_id().to_string(),
                origin: "build image".to_string(),
            });
        }

        builder.set_mixins(mixins);

        let lifecycle = self
            .fetch_lifecycle(&config.lifecycle)
            .await
            .context("fetch lifecycle")?;
        builder.set_lifecycle(lifecycle);

        for buildpack_ref in &config.buildpacks {
            let buildpack = self.fetch_buildpack(buildpack_ref).await?;
            builder.add_buildpack(buildpack);
        }

        builder.set_order(config.order.clone());
        builder.set_stack(&config.stack);

        builder.save().await
    }

    /// Check every accessible run image and mirror against the config stack.
    ///
    /// Unreachable candidates only produce a warning.
    async fn validate_run_image_config(&self, opts: &CreateBuilderOptions) -> Result<()> {
        let stack = &opts.config.stack;
        let mut run_images: Vec<Box<dyn Image>> = Vec::new();

        for reference in std::iter::once(&stack.run_image).chain(&stack.run_image_mirrors) {
            if !opts.publish {
                match self.fetcher.fetch(reference, true, false).await {
                    Ok(image) => {
                        run_images.push(image);
                        continue;
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }

            match self.fetcher.fetch(reference, false, false).await {
                Ok(image) => run_images.push(image),
                Err(e) if e.is_not_found() => {
                    tracing::warn!(image = %reference, "run image is not accessible");
                }
                Err(e) => return Err(e),
            }
        }

        for image in &run_images {
            let stack_id = image.label(STACK_ID_LABEL)?.unwrap_or_default();
            if stack_id != stack.id {
                return Err(PackError::StackMismatch {
                    expected: stack.id.clone(),
                    found: stack_id,
                    origin: format!("run image '{}'", image.name()),
                });
            }
        }

        Ok(())
    }

    async fn fetch_lifecycle(&self, config: &LifecycleConfig) -> Result<Lifecycle> {
        let uri = resolve_lifecycle_uri(config, &self.options.default_lifecycle_version)?;

        let blob = self
            .downloader
            .download(&uri)
            .await
            .context("downloading lifecycle")?;

        Lifecycle::from_blob(blob).context("invalid lifecycle")
    }

    async fn fetch_buildpack(&self, buildpack_ref: &BuildpackRef) -> Result<Buildpack> {
        let uri = &buildpack_ref.uri;
        ArtifactSource::parse(uri)?;

        let blob = self
            .downloader
            .download(uri)
            .await
            .with_context(|| format!("downloading buildpack from '{}'", uri))?;

        let buildpack = Buildpack::from_blob(blob)
            .with_context(|| format!("creating buildpack from '{}'", uri))?;
        buildpack
            .validate_identity(
                uri,
                buildpack_ref.id.as_deref(),
                buildpack_ref.version.as_deref(),
            )
            .context("invalid buildpack")?;

        Ok(buildpack)
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use a3s_pack_core::{ErrorKind, GroupBuildpack, OrderEntry, StackConfig};
    use tempfile::TempDir;

    use super::*;
    use crate::builder::{
        BuilderMetadata, BUILDER_METADATA_LABEL, DEFAULT_LIFECYCLE_VERSION, MIXINS_LABEL,
    };
    use crate::builder::lifecycle::{uri_from_version, LIFECYCLE_BINARIES};
    use crate::client::ClientOptions;
    use crate::testing::{FakeDownloader, FakeImage, FakeImageFetcher, FetchCall};

    const STACK_ID: &str = "io.buildpacks.stacks.bionic";

    struct Fixture {
        fetcher: Arc<FakeImageFetcher>,
        downloader: Arc<FakeDownloader>,
        build_image: FakeImage,
        run_image: FakeImage,
        dir: TempDir,
        client: Client,
    }

    fn stack_image(name: &str, stack_id: &str, mixins: &str) -> FakeImage {
        let image = FakeImage::new(name);
        image.set_label_value(STACK_ID_LABEL, stack_id);
        image.set_label_value(MIXINS_LABEL, mixins);
        image
    }

    fn write_buildpack(dir: &Path, id: &str, version: &str) -> PathBuf {
        let path = dir.join(format!("{}-{}", id, version));
        std::fs::create_dir_all(path.join("bin")).unwrap();
        std::fs::write(
            path.join("buildpack.toml"),
            format!(
                "[buildpack]\nid = \"{}\"\nversion = \"{}\"\n\n[[stacks]]\nid = \"{}\"\n",
                id, version, STACK_ID
            ),
        )
        .unwrap();
        std::fs::write(path.join("bin/detect"), "#!/bin/sh").unwrap();
        path
    }

    fn write_lifecycle(dir: &Path) -> PathBuf {
        let path = dir.join("lifecycle");
        std::fs::create_dir_all(path.join("lifecycle")).unwrap();
        std::fs::write(
            path.join("lifecycle.toml"),
            "[api]\nplatform = \"0.1\"\nbuildpack = \"0.2\"\n\n[lifecycle]\nversion = \"0.3.0\"\n",
        )
        .unwrap();
        for binary in LIFECYCLE_BINARIES {
            std::fs::write(path.join("lifecycle").join(binary), "bin").unwrap();
        }
        path
    }

    fn default_lifecycle_uri() -> String {
        uri_from_version(&semver::Version::parse(DEFAULT_LIFECYCLE_VERSION).unwrap())
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeImageFetcher::new());
        let downloader = Arc::new(FakeDownloader::new());

        let build_image = stack_image("some/build", STACK_ID, r#"["mixinX","build:mixinY"]"#);
        build_image.set_env_value("CNB_USER_ID", "1234");
        build_image.set_env_value("CNB_GROUP_ID", "4321");
        let run_image = stack_image("some/run", STACK_ID, r#"["mixinX","run:mixinZ"]"#);
        let mirror = stack_image("localhost:5000/some/run", STACK_ID, "");

        fetcher.add_local(&build_image);
        fetcher.add_local(&run_image);
        fetcher.add_remote(&mirror);

        downloader.register(&default_lifecycle_uri(), write_lifecycle(dir.path()));
        downloader.register(
            "https://example.fake/bp-one.tgz",
            write_buildpack(dir.path(), "bp.one", "1.2.3"),
        );
        downloader.register(
            "https://example.fake/bp-two.tgz",
            write_buildpack(dir.path(), "bp.two", "0.1.0"),
        );

        let client = Client::new(fetcher.clone(), downloader.clone());
        Fixture {
            fetcher,
            downloader,
            build_image,
            run_image,
            dir,
            client,
        }
    }

    fn options() -> CreateBuilderOptions {
        CreateBuilderOptions {
            builder_name: "some/builder".to_string(),
            config: BuilderConfig {
                description: "Some description".to_string(),
                buildpacks: vec![
                    BuildpackRef {
                        id: Some("bp.one".to_string()),
                        version: Some("1.2.3".to_string()),
                        uri: "https://example.fake/bp-one.tgz".to_string(),
                    },
                    BuildpackRef {
                        id: None,
                        version: None,
                        uri: "https://example.fake/bp-two.tgz".to_string(),
                    },
                ],
                order: vec![OrderEntry {
                    group: vec![GroupBuildpack {
                        id: "bp.one".to_string(),
                        version: None,
                        optional: false,
                    }],
                }],
                stack: StackConfig {
                    id: STACK_ID.to_string(),
                    build_image: "some/build".to_string(),
                    run_image: "some/run".to_string(),
                    run_image_mirrors: vec!["localhost:5000/some/run".to_string()],
                },
                lifecycle: LifecycleConfig::default(),
            },
            publish: false,
            no_pull: true,
        }
    }

    #[tokio::test]
    async fn test_creates_builder() {
        let f = fixture();
        f.client.create_builder(&options()).await.unwrap();

        assert_eq!(f.build_image.save_count(), 1);
        assert_eq!(f.build_image.current_name(), "some/builder");

        let metadata: BuilderMetadata =
            serde_json::from_str(&f.build_image.label_value(BUILDER_METADATA_LABEL).unwrap())
                .unwrap();
        assert_eq!(metadata.description, "Some description");
        assert_eq!(metadata.stack.run_image.image, "some/run");
        assert_eq!(metadata.stack.run_image.mirrors, vec!["localhost:5000/some/run"]);
        assert_eq!(metadata.buildpacks.len(), 2);
        assert_eq!(metadata.groups[0].buildpacks[0].version, "1.2.3");
        assert_eq!(metadata.lifecycle.version, "0.3.0");
        assert_eq!(metadata.lifecycle.api.platform, "0.1");

        assert_eq!(
            f.build_image.label_value(MIXINS_LABEL).unwrap(),
            r#"["build:mixinY","mixinX","run:mixinZ"]"#
        );
        assert_eq!(f.downloader.call_count(), 3);
    }

    #[tokio::test]
    async fn test_missing_stack_fields_fail_before_any_fetch() {
        for clear in [
            (|c: &mut StackConfig| c.id.clear()) as fn(&mut StackConfig),
            |c: &mut StackConfig| c.build_image.clear(),
            |c: &mut StackConfig| c.run_image.clear(),
        ] {
            let f = fixture();
            let mut opts = options();
            clear(&mut opts.config.stack);

            let err = f.client.create_builder(&opts).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config);
            assert!(f.fetcher.calls().is_empty());
            assert_eq!(f.downloader.call_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_run_image_lookup_policy() {
        let f = fixture();
        f.client.create_builder(&options()).await.unwrap();

        assert_eq!(
            f.fetcher.calls_for("some/run")[0],
            FetchCall { reference: "some/run".to_string(), daemon: true, pull: false }
        );
        // mirror is absent locally, found remotely
        assert_eq!(
            f.fetcher.calls_for("localhost:5000/some/run"),
            vec![
                FetchCall { reference: "localhost:5000/some/run".to_string(), daemon: true, pull: false },
                FetchCall { reference: "localhost:5000/some/run".to_string(), daemon: false, pull: false },
            ]
        );
    }

    #[tokio::test]
    async fn test_publish_skips_daemon_lookups() {
        let f = fixture();
        f.fetcher.add_remote(&f.build_image);
        f.fetcher.add_remote(&f.run_image);

        let mut opts = options();
        opts.publish = true;
        f.client.create_builder(&opts).await.unwrap();

        assert!(f.fetcher.calls().iter().all(|call| !call.daemon));
    }

    #[tokio::test]
    async fn test_inaccessible_mirror_is_only_a_warning() {
        let f = fixture();
        let mut opts = options();
        opts.config.stack.run_image_mirrors.push("gcr.io/missing/run".to_string());

        f.client.create_builder(&opts).await.unwrap();
        assert_eq!(f.build_image.save_count(), 1);
    }

    #[tokio::test]
    async fn test_run_image_stack_mismatch() {
        let f = fixture();
        f.run_image.set_label_value(STACK_ID_LABEL, "other.stack");

        let err = f.client.create_builder(&options()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "stack 'io.buildpacks.stacks.bionic' from builder config is incompatible with stack 'other.stack' from run image 'some/run'"
        );
        assert_eq!(f.build_image.save_count(), 0);
    }

    #[tokio::test]
    async fn test_run_image_fetch_error_aborts() {
        let f = fixture();
        f.fetcher.fail("localhost:5000/some/run", "unauthorized");

        let err = f.client.create_builder(&options()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Registry);
        assert!(err.to_string().contains("unauthorized"));
        assert_eq!(f.build_image.save_count(), 0);
        assert_eq!(f.downloader.call_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_mirror_stack_mismatch() {
        let f = fixture();
        f.fetcher
            .add_remote(&stack_image("localhost:5000/some/run", "other.stack", ""));

        let err = f.client.create_builder(&options()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StackMismatch);
        assert!(err
            .to_string()
            .contains("stack 'other.stack' from run image 'localhost:5000/some/run'"));
        assert_eq!(f.build_image.save_count(), 0);
    }

    #[tokio::test]
    async fn test_published_run_image_stack_mismatch() {
        let f = fixture();
        f.fetcher.add_remote(&f.build_image);
        f.fetcher
            .add_remote(&stack_image("some/run", "other.stack", ""));

        let mut opts = options();
        opts.publish = true;

        let err = f.client.create_builder(&opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StackMismatch);
        assert!(err.to_string().contains("from run image 'some/run'"));
        assert!(f.fetcher.calls().iter().all(|call| !call.daemon));
        assert_eq!(f.build_image.save_count(), 0);
    }

    #[tokio::test]
    async fn test_build_image_stack_mismatch() {
        let f = fixture();
        f.build_image.set_label_value(STACK_ID_LABEL, "other.stack");

        let err = f.client.create_builder(&options()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StackMismatch);
        assert!(err.to_string().contains("from build image"));
    }

    #[tokio::test]
    async fn test_build_image_missing_cnb_user() {
        let f = fixture();
        let build_image = stack_image("other/build", STACK_ID, "");
        f.fetcher.add_local(&build_image);

        let mut opts = options();
        opts.config.stack.build_image = "other/build".to_string();

        let err = f.client.create_builder(&opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBuilder);
        assert!(err.to_string().contains("invalid build-image"));
    }

    #[tokio::test]
    async fn test_missing_build_image_is_fatal() {
        let f = fixture();
        let mut opts = options();
        opts.config.stack.build_image = "missing/build".to_string();

        let err = f.client.create_builder(&opts).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_buildpack_identity_mismatch() {
        let f = fixture();
        let mut opts = options();
        opts.config.buildpacks[0].version = Some("9.9.9".to_string());

        let err = f.client.create_builder(&opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentityMismatch);
        assert!(err.to_string().contains("version '1.2.3' which does not match version '9.9.9'"));
        assert_eq!(f.build_image.save_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_buildpack_aborts_assembly() {
        let f = fixture();
        let mut opts = options();
        opts.config.buildpacks.push(BuildpackRef {
            id: None,
            version: None,
            uri: "https://example.fake/missing.tgz".to_string(),
        });

        let err = f.client.create_builder(&opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Download);
        assert!(err.to_string().contains("https://example.fake/missing.tgz"));
        assert_eq!(f.build_image.save_count(), 0);
        assert!(f.build_image.added_layers().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_buildpack_error_names_uri() {
        let f = fixture();
        let empty = f.dir.path().join("empty");
        std::fs::create_dir_all(&empty).unwrap();
        f.downloader.register("https://example.fake/empty.tgz", &empty);

        let mut opts = options();
        opts.config.buildpacks.push(BuildpackRef {
            id: None,
            version: None,
            uri: "https://example.fake/empty.tgz".to_string(),
        });

        let err = f.client.create_builder(&opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBuildpack);
        assert!(err
            .to_string()
            .starts_with("creating buildpack from 'https://example.fake/empty.tgz'"));
        assert_eq!(f.build_image.save_count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_buildpack_scheme_fails_before_download() {
        let f = fixture();
        let mut opts = options();
        opts.config.buildpacks.insert(
            0,
            BuildpackRef {
                id: None,
                version: None,
                uri: "ftp://example.fake/bp.tgz".to_string(),
            },
        );

        let err = f.client.create_builder(&opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedSource);
        // lifecycle only
        assert_eq!(f.downloader.call_count(), 1);
        assert_eq!(f.build_image.save_count(), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_version_and_uri_conflict() {
        let f = fixture();
        let mut opts = options();
        opts.config.lifecycle = LifecycleConfig {
            version: Some("0.3.0".to_string()),
            uri: Some("https://example.fake/lifecycle.tgz".to_string()),
        };

        let err = f.client.create_builder(&opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().starts_with("fetch lifecycle"));
    }

    #[tokio::test]
    async fn test_default_lifecycle_version_is_injectable() {
        let f = fixture();
        let uri = uri_from_version(&semver::Version::parse("1.0.0").unwrap());
        f.downloader.register(&uri, write_lifecycle(&f.dir.path().join("other")));

        let client = Client::new(f.fetcher.clone(), f.downloader.clone()).with_options(
            ClientOptions {
                default_lifecycle_version: "1.0.0".to_string(),
            },
        );
        client.create_builder(&options()).await.unwrap();
        assert_eq!(f.build_image.save_count(), 1);
    }
}

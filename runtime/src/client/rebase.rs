//! Swapping an application image onto a new run image.

use std::collections::HashMap;

use a3s_pack_core::error::{PackError, Result, ResultExt};

use super::{resolve_run_image, Client};
use crate::builder::{LifecycleMetadataLabel, RunImageLayerMetadata, LIFECYCLE_METADATA_LABEL};
use crate::image::Image;

#[derive(Debug, Clone, Default)]
pub struct RebaseOptions {
    /// Application image to rebase
    pub repo_name: String,
    /// Explicit run image; skips mirror selection when set
    pub run_image: Option<String>,
    /// Operator-configured mirrors, keyed by run image
    pub additional_mirrors: HashMap<String, Vec<String>>,
    /// Work against the registry instead of the local store
    pub publish: bool,
    /// Use local images as they are, without refreshing from the registry
    pub skip_pull: bool,
}

/// Replaces the run image layers underneath an application image.
pub trait Rebaser: Send + Sync {
    fn rebase(&self, app: &mut dyn Image, new_base: &dyn Image) -> Result<()>;
}

/// Rebases on the run image top layer recorded in the lifecycle label.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayerRebaser;

impl Rebaser for LayerRebaser {
    fn rebase(&self, app: &mut dyn Image, new_base: &dyn Image) -> Result<()> {
        let label = LifecycleMetadataLabel::read(app)?;
        let top_layer = label
            .run_image
            .map(|run_image| run_image.top_layer)
            .filter(|top_layer| !top_layer.is_empty())
            .ok_or_else(|| {
                PackError::OciImage(format!(
                    "image '{}' has no run image top layer in label '{}'",
                    app.name(),
                    LIFECYCLE_METADATA_LABEL
                ))
            })?;

        tracing::debug!(
            app = %app.name(),
            old_top_layer = %top_layer,
            new_base = %new_base.name(),
            "Rebasing"
        );
        app.rebase(&top_layer, new_base)
    }
}

impl Client {
    /// Rebase an application image onto its run image and save it.
    /// Returns the saved identifier.
    pub async fn rebase(&self, opts: &RebaseOptions) -> Result<String> {
        let daemon = !opts.publish;
        let pull = !opts.skip_pull;

        let mut app = self
            .fetcher
            .fetch(&opts.repo_name, daemon, pull)
            .await
            .with_context(|| format!("fetching image '{}'", opts.repo_name))?;

        let mut label = LifecycleMetadataLabel::read(&*app)?;

        let run_image_name = resolve_run_image(
            &opts.repo_name,
            &label.stack.run_image.image,
            &label.stack.run_image.mirrors,
            opts.run_image.as_deref(),
            &opts.additional_mirrors,
        )?;
        tracing::info!(app = %opts.repo_name, run_image = %run_image_name, "Selected run image");

        let base = self
            .fetcher
            .fetch(&run_image_name, daemon, pull)
            .await
            .with_context(|| format!("fetching run image '{}'", run_image_name))?;

        self.rebaser
            .rebase(&mut *app, &*base)
            .with_context(|| format!("rebasing '{}'", opts.repo_name))?;

        label.run_image = Some(RunImageLayerMetadata {
            top_layer: base.top_layer()?,
            reference: base.identifier()?,
        });
        label.write(&mut *app)?;

        let identifier = app.save().await?;
        tracing::info!(app = %opts.repo_name, identifier = %identifier, "Rebased");
        Ok(identifier)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use a3s_pack_core::ErrorKind;

    use super::*;
    use crate::testing::{FakeDownloader, FakeImage, FakeImageFetcher, FetchCall};

    const APP_LABEL: &str = r#"{
        "stack": {"runImage": {"image": "some/run", "mirrors": ["example.com/some/run"]}},
        "runImage": {"topLayer": "sha256:old-run-top", "reference": "some/run@sha256:old"}
    }"#;

    struct Fixture {
        fetcher: Arc<FakeImageFetcher>,
        app: FakeImage,
        client: Client,
    }

    fn app_image(name: &str) -> FakeImage {
        let app = FakeImage::new(name).with_layers(&["sha256:old-run-top", "sha256:app-layer"]);
        app.set_label_value(LIFECYCLE_METADATA_LABEL, APP_LABEL);
        app
    }

    fn run_image(name: &str) -> FakeImage {
        let top = format!("sha256:{}-top", name.replace(['/', '.'], "-"));
        FakeImage::new(name).with_layers(&["sha256:run-base", &top])
    }

    fn fixture() -> Fixture {
        let fetcher = Arc::new(FakeImageFetcher::new());
        let app = app_image("some/app");
        fetcher.add_local(&app);
        fetcher.add_local(&app_image("example.com/some/app"));
        for name in [
            "some/run",
            "example.com/some/run",
            "custom/run",
            "example.com/some/local-run",
        ] {
            fetcher.add_local(&run_image(name));
        }

        let client = Client::new(fetcher.clone(), Arc::new(FakeDownloader::new()));
        Fixture {
            fetcher,
            app,
            client,
        }
    }

    fn options(repo_name: &str) -> RebaseOptions {
        RebaseOptions {
            repo_name: repo_name.to_string(),
            skip_pull: true,
            ..Default::default()
        }
    }

    fn run_image_label(app: &FakeImage) -> RunImageLayerMetadata {
        let raw = app.label_value(LIFECYCLE_METADATA_LABEL).unwrap();
        serde_json::from_str::<LifecycleMetadataLabel>(&raw)
            .unwrap()
            .run_image
            .unwrap()
    }

    #[tokio::test]
    async fn test_rebases_on_label_run_image() {
        let f = fixture();
        f.client.rebase(&options("some/app")).await.unwrap();

        assert_eq!(
            f.app.rebased_on(),
            Some(("sha256:old-run-top".to_string(), "some/run".to_string()))
        );
        assert_eq!(
            f.app.layer_ids(),
            vec!["sha256:run-base", "sha256:some-run-top", "sha256:app-layer"]
        );
        assert_eq!(
            run_image_label(&f.app),
            RunImageLayerMetadata {
                top_layer: "sha256:some-run-top".to_string(),
                reference: "some/run@sha256:some-run".to_string(),
            }
        );
        assert_eq!(f.app.save_count(), 1);
    }

    #[tokio::test]
    async fn test_label_keeps_unrelated_fields() {
        let f = fixture();
        f.client.rebase(&options("some/app")).await.unwrap();

        let raw = f.app.label_value(LIFECYCLE_METADATA_LABEL).unwrap();
        let label: LifecycleMetadataLabel = serde_json::from_str(&raw).unwrap();
        assert_eq!(label.stack.run_image.image, "some/run");
        assert_eq!(label.stack.run_image.mirrors, vec!["example.com/some/run"]);
    }

    #[tokio::test]
    async fn test_override_run_image() {
        let f = fixture();
        let mut opts = options("some/app");
        opts.run_image = Some("custom/run".to_string());

        f.client.rebase(&opts).await.unwrap();
        assert_eq!(f.app.rebased_on().unwrap().1, "custom/run");
        assert_eq!(run_image_label(&f.app).top_layer, "sha256:custom-run-top");
    }

    #[tokio::test]
    async fn test_label_mirror_on_app_registry() {
        let f = fixture();
        let app = f.fetcher.local("example.com/some/app").unwrap();

        f.client.rebase(&options("example.com/some/app")).await.unwrap();
        assert_eq!(app.rebased_on().unwrap().1, "example.com/some/run");
        assert_eq!(
            run_image_label(&app).reference,
            "example.com/some/run@sha256:example-com-some-run"
        );
    }

    #[tokio::test]
    async fn test_configured_mirror_preferred() {
        let f = fixture();
        let app = f.fetcher.local("example.com/some/app").unwrap();
        let mut opts = options("example.com/some/app");
        opts.additional_mirrors.insert(
            "some/run".to_string(),
            vec!["example.com/some/local-run".to_string()],
        );

        f.client.rebase(&opts).await.unwrap();
        assert_eq!(app.rebased_on().unwrap().1, "example.com/some/local-run");
    }

    #[tokio::test]
    async fn test_missing_run_image_metadata() {
        let f = fixture();
        let app = FakeImage::new("other/app").with_layers(&["sha256:a"]);
        f.fetcher.add_local(&app);

        let err = f.client.rebase(&options("other/app")).await.unwrap_err();
        assert_eq!(err.to_string(), "run image must be specified");
        assert_eq!(app.save_count(), 0);
    }

    #[tokio::test]
    async fn test_absent_run_image_is_fatal() {
        let f = fixture();
        let mut opts = options("some/app");
        opts.run_image = Some("missing/run".to_string());

        let err = f.client.rebase(&opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(f.app.rebased_on().is_none());
        assert_eq!(f.app.save_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_top_layer_fails() {
        let f = fixture();
        let app = FakeImage::new("other/app").with_layers(&["sha256:a"]);
        app.set_label_value(
            LIFECYCLE_METADATA_LABEL,
            r#"{"stack": {"runImage": {"image": "some/run"}}}"#,
        );
        f.fetcher.add_local(&app);

        let err = f.client.rebase(&options("other/app")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Image);
        assert_eq!(app.save_count(), 0);
    }

    fn remote_run_image() -> FakeImage {
        FakeImage::new("some/run")
            .with_layers(&["sha256:run-base", "sha256:remote-run-top"])
            .with_digest("sha256:remote")
    }

    #[tokio::test]
    async fn test_local_with_pull_uses_refreshed_run_image() {
        let f = fixture();
        f.fetcher.add_remote(&remote_run_image());

        let mut opts = options("some/app");
        opts.skip_pull = false;
        f.client.rebase(&opts).await.unwrap();

        assert_eq!(
            f.fetcher.calls(),
            vec![
                FetchCall { reference: "some/app".to_string(), daemon: true, pull: true },
                FetchCall { reference: "some/run".to_string(), daemon: true, pull: true },
            ]
        );
        assert_eq!(
            run_image_label(&f.app),
            RunImageLayerMetadata {
                top_layer: "sha256:remote-run-top".to_string(),
                reference: "some/run@sha256:remote".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_local_skip_pull_uses_local_run_image() {
        let f = fixture();
        f.fetcher.add_remote(&remote_run_image());

        f.client.rebase(&options("some/app")).await.unwrap();

        assert_eq!(
            f.fetcher.calls(),
            vec![
                FetchCall { reference: "some/app".to_string(), daemon: true, pull: false },
                FetchCall { reference: "some/run".to_string(), daemon: true, pull: false },
            ]
        );
        assert_eq!(run_image_label(&f.app).top_layer, "sha256:some-run-top");
    }

    #[tokio::test]
    async fn test_publish_uses_registry_images() {
        let f = fixture();
        let remote_app = app_image("some/app");
        f.fetcher.add_remote(&remote_app);
        f.fetcher.add_remote(&remote_run_image());

        let mut opts = options("some/app");
        opts.publish = true;
        f.client.rebase(&opts).await.unwrap();

        assert!(f.fetcher.calls().iter().all(|call| !call.daemon && !call.pull));
        assert_eq!(remote_app.save_count(), 1);
        assert_eq!(run_image_label(&remote_app).top_layer, "sha256:remote-run-top");
        assert_eq!(f.app.save_count(), 0);
    }

    struct CountingRebaser(AtomicUsize);

    impl Rebaser for CountingRebaser {
        fn rebase(&self, _app: &mut dyn Image, _new_base: &dyn Image) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rebaser_is_injectable() {
        let f = fixture();
        let rebaser = Arc::new(CountingRebaser(AtomicUsize::new(0)));
        let client = Client::new(f.fetcher.clone(), Arc::new(FakeDownloader::new()))
            .with_rebaser(rebaser.clone());

        client.rebase(&options("some/app")).await.unwrap();
        assert_eq!(rebaser.0.load(Ordering::SeqCst), 1);
        assert!(f.app.rebased_on().is_none());
        assert_eq!(f.app.save_count(), 1);
    }
}

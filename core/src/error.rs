use thiserror::Error;

/// A3S Pack error types
#[derive(Error, Debug)]
pub enum PackError {
    /// Malformed or contradictory configuration
    #[error("{0}")]
    Config(String),

    /// Transport failure while fetching a buildpack, lifecycle or image
    #[error("Download failed: {uri} - {message}")]
    Download { uri: String, message: String },

    /// Image absent from the daemon store or the registry
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// Declared stack IDs disagree between config, build image or run image
    #[error("stack '{expected}' from builder config is incompatible with stack '{found}' from {origin}")]
    StackMismatch {
        expected: String,
        found: String,
        origin: String,
    },

    /// Buildpack ID or version differs from the builder config
    #[error("buildpack from URI '{uri}' has {field} '{found}' which does not match {field} '{expected}' from builder config")]
    IdentityMismatch {
        uri: String,
        field: &'static str,
        found: String,
        expected: String,
    },

    /// Rebase could not determine any run image
    #[error("run image must be specified")]
    MissingRunImage,

    /// Downloaded content is not a well-formed buildpack
    #[error("Invalid buildpack: {0}")]
    InvalidBuildpack(String),

    /// Downloaded content is not a well-formed lifecycle
    #[error("Invalid lifecycle: {0}")]
    InvalidLifecycle(String),

    /// Image cannot be used as (or decoded as) a builder
    #[error("invalid builder '{name}': {message}")]
    InvalidBuilder { name: String, message: String },

    /// Buildpack URI scheme is not supported
    #[error("buildpack source '{uri}' is not supported: {reason}")]
    UnsupportedBuildpackSource { uri: String, reason: String },

    /// OCI image error
    #[error("OCI image error: {0}")]
    OciImage(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation interrupted by the operator
    #[error("operation cancelled")]
    Cancelled,

    /// Non-zero exit whose diagnostics were already reported
    #[error("{0}")]
    Soft(String),

    /// Error enriched with the operation that produced it
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<PackError>,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Classification of a [`PackError`], independent of context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Download,
    NotFound,
    StackMismatch,
    IdentityMismatch,
    MissingRunImage,
    InvalidBuildpack,
    InvalidLifecycle,
    InvalidBuilder,
    UnsupportedSource,
    Image,
    Registry,
    Io,
    Serialization,
    Cancelled,
    Soft,
    Other,
}

impl PackError {
    /// Wrap this error with a description of the failing operation.
    pub fn context(self, context: impl Into<String>) -> Self {
        PackError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping all context layers.
    pub fn root(&self) -> &PackError {
        match self {
            PackError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Kind of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            PackError::Config(_) => ErrorKind::Config,
            PackError::Download { .. } => ErrorKind::Download,
            PackError::ImageNotFound(_) => ErrorKind::NotFound,
            PackError::StackMismatch { .. } => ErrorKind::StackMismatch,
            PackError::IdentityMismatch { .. } => ErrorKind::IdentityMismatch,
            PackError::MissingRunImage => ErrorKind::MissingRunImage,
            PackError::InvalidBuildpack(_) => ErrorKind::InvalidBuildpack,
            PackError::InvalidLifecycle(_) => ErrorKind::InvalidLifecycle,
            PackError::InvalidBuilder { .. } => ErrorKind::InvalidBuilder,
            PackError::UnsupportedBuildpackSource { .. } => ErrorKind::UnsupportedSource,
            PackError::OciImage(_) => ErrorKind::Image,
            PackError::Registry { .. } => ErrorKind::Registry,
            PackError::Io(_) => ErrorKind::Io,
            PackError::Serialization(_) => ErrorKind::Serialization,
            PackError::Cancelled => ErrorKind::Cancelled,
            PackError::Soft(_) => ErrorKind::Soft,
            PackError::Context { .. } | PackError::Other(_) => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Soft errors signal failure without further diagnostic output.
    pub fn is_soft(&self) -> bool {
        self.kind() == ErrorKind::Soft
    }
}

impl From<serde_json::Error> for PackError {
    fn from(err: serde_json::Error) -> Self {
        PackError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PackError {
    fn from(err: toml::de::Error) -> Self {
        PackError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for PackError {
    fn from(err: toml::ser::Error) -> Self {
        PackError::Serialization(err.to_string())
    }
}

impl From<semver::Error> for PackError {
    fn from(err: semver::Error) -> Self {
        PackError::Config(err.to_string())
    }
}

/// Result type alias for A3S Pack operations
pub type Result<T> = std::result::Result<T, PackError>;

/// Context enrichment for [`Result`].
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

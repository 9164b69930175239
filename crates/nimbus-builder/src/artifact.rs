//! The result of a successful build.

use std::fmt;
use std::path::PathBuf;

use crate::builder::Builder;
use crate::error::ArtifactError;

/// An image captured into the Nimbus repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    image: String,
}

impl Artifact {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }

    pub fn builder_id(&self) -> &'static str {
        Builder::ID
    }

    /// Repository name of the image.
    pub fn id(&self) -> &str {
        &self.image
    }

    /// Images live remotely; there are no local files.
    pub fn files(&self) -> &[PathBuf] {
        &[]
    }

    /// # Errors
    ///
    /// Always [`ArtifactError::DestroyUnsupported`]: the cloud client has no
    /// image deletion operation.
    pub fn destroy(&self) -> Result<(), ArtifactError> {
        Err(ArtifactError::DestroyUnsupported(self.image.clone()))
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.image)
    }
}

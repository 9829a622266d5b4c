use std::io;

/// All error types for the mesh-tiler pipeline.
#[derive(thiserror::Error, Debug)]
pub enum TilerError {
    #[error("Malformed mesh: {0}")]
    MalformedMesh(String),
    #[error("Malformed material: {0}")]
    MalformedMaterial(String),
    #[error("Bad texture: {0}")]
    BadTexture(String),
    #[error("External tool failed: {0}")]
    ExternalToolFailed(String),
    #[error("Output directory already exists: {0}")]
    OutputExists(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TilerError>;

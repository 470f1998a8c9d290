use std::io;

#[derive(Debug,thiserror::Error)]
pub enum DeviceError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}

#[derive(Debug,thiserror::Error)]
pub enum RendererError {
    #[error("renderer transport failed: {0}")]
    Transport(#[from] io::Error),
    #[error("renderer rejected the request: {0}")]
    Rejected(String),
    #[error("cannot encode renderer message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// failures of the manual control binary
#[derive(Debug,thiserror::Error)]
pub enum RigError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Renderer(#[from] RendererError),
    #[error("cannot read device file: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse device file: {0}")]
    Toml(#[from] toml::de::Error),
}

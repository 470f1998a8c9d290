use std::fmt;
use record::RecordError;
use rig_control::{DeviceError, RendererError};
use stim_lib::ProtocolError;
use crate::config::ConfigError;

/// what the status line reports after a failure
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub enum ErrorKind {
    ConfigError,
    BadPath,
    RecordExists,
    DuplicateSubject,
    SeriesCollision,
    InvalidRunParameters,
    InvalidProtocolParameters,
    InvalidSpec,
    DeviceUnavailable,
    RendererError,
    PresetNotFound,
    /// no record initialised, no subject selected, or the record cannot be read
    RecordState,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"{:?}",self)
    }
}

#[derive(Debug,thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Renderer(#[from] RendererError),
    #[error("{0}")]
    RecordState(String),
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Config(_) => ErrorKind::ConfigError,
            RunError::Record(e) => match e {
                RecordError::BadPath(_) => ErrorKind::BadPath,
                RecordError::RecordExists(_) => ErrorKind::RecordExists,
                RecordError::DuplicateSubject(_) => ErrorKind::DuplicateSubject,
                RecordError::SeriesCollision(_) => ErrorKind::SeriesCollision,
                _=> ErrorKind::RecordState,
            },
            RunError::Protocol(e) => match e {
                ProtocolError::InvalidRunParameters(_) => ErrorKind::InvalidRunParameters,
                ProtocolError::InvalidProtocolParameters(_) => ErrorKind::InvalidProtocolParameters,
                ProtocolError::InvalidSpec(_) => ErrorKind::InvalidSpec,
                ProtocolError::PresetNotFound(_) => ErrorKind::PresetNotFound,
                _=> ErrorKind::ConfigError,
            },
            RunError::Device(_) => ErrorKind::DeviceUnavailable,
            RunError::Renderer(_) => ErrorKind::RendererError,
            RunError::RecordState(_) => ErrorKind::RecordState,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_source_error(){
        assert_eq!(RunError::from(RecordError::SeriesCollision(5)).kind(),ErrorKind::SeriesCollision);
        assert_eq!(RunError::from(RecordError::NoSubject).kind(),ErrorKind::RecordState);
        assert_eq!(RunError::from(ProtocolError::InvalidSpec(String::new())).kind(),ErrorKind::InvalidSpec);
        assert_eq!(RunError::from(DeviceError::DeviceUnavailable(String::new())).kind(),ErrorKind::DeviceUnavailable);
        assert_eq!(ErrorKind::RendererError.to_string(),"RendererError");
    }
}

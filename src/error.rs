use crate::config::DisplayType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("{mode:?} mode is missing its {kernel} dependency")]
    MissingDependency {
        mode: DisplayType,
        kernel: &'static str,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid threshold table: {0}")]
    InvalidThresholds(String),
    #[error("resource cap exceeded: {requested} entries requested, cap is {cap}")]
    ResourceLimit { requested: usize, cap: usize },
    #[error("unknown {0} handle")]
    UnknownResource(&'static str),
    #[error("random write slot {slot} is still bound")]
    BindingHazard { slot: u32 },
    #[error("device error: {0}")]
    Device(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

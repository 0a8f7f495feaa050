//! Vertex density profiler.
//!
//! Measures how densely meshes pack vertices into screen space. Every frame
//! the active mode culls the collected entities, bins their vertices into
//! tiles or pixels on the device, and optionally reads the counters back
//! into a classified, sorted report.

pub mod camera;
pub mod config;
pub mod culling;
pub mod error;
pub mod export;
pub mod gpu;
pub mod modes;
pub mod overlay;
pub mod profiler;
pub mod readback;
pub mod record;
pub mod report;
pub mod scene;
pub mod threshold;
pub mod tiles;
pub mod utils;

pub use camera::ProfilerCamera;
pub use config::{DisplayType, ProfilerConfig, ProfilerType, UpdateType};
pub use error::ProfilerError;
pub use gpu::{ProfilerDevice, SoftwareDevice};
#[cfg(feature = "backend-wgpu")]
pub use gpu::WgpuDevice;
pub use profiler::{DisableReason, FrameOutcome, ProfilerState, VertexProfiler};
pub use readback::{FrameCapture, NoCapture, ReportStatus};
pub use record::{Density, DensityRecord};
pub use report::ProfilerReport;
pub use scene::{MeshData, MeshKey, SceneEntity};

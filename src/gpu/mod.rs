//! Device seam between the profiler and a compute/raster backend.
//!
//! Buffers hold `u32` words. Float data (densities, threshold tables) is
//! stored bit-cast. Every call is ordered after the previous one, so a
//! binning dispatch always precedes the merge and image passes issued after it.

pub mod software;
#[cfg(feature = "backend-wgpu")]
pub mod wgpu_device;

use crate::config::{DisplayType, HeatMapSettings};
use crate::error::ProfilerError;
use crate::scene::MeshData;
use crate::tiles::TileGrid;
use crate::utils::{mat4_to_cols, KernelParams};
use glam::Mat4;
use log::warn;

pub use software::SoftwareDevice;
#[cfg(feature = "backend-wgpu")]
pub use wgpu_device::WgpuDevice;

/// Random write slot the coverage passes accumulate into.
pub const COVERAGE_SLOT: u32 = 4;

pub const BINNING_GROUP_SIZE: u32 = 256;
pub const PIXEL_GROUP_SIZE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadbackId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    VertexBinning,
    CoverageCount,
    HeatMapMerge,
    ProfilerImage,
    IdRaster,
    OverdrawRaster,
    PostEffect,
}

impl KernelKind {
    pub const ALL: [KernelKind; 7] = [
        KernelKind::VertexBinning,
        KernelKind::CoverageCount,
        KernelKind::HeatMapMerge,
        KernelKind::ProfilerImage,
        KernelKind::IdRaster,
        KernelKind::OverdrawRaster,
        KernelKind::PostEffect,
    ];

    pub fn name(self) -> &'static str {
        match self {
            KernelKind::VertexBinning => "vertex binning kernel",
            KernelKind::CoverageCount => "coverage count kernel",
            KernelKind::HeatMapMerge => "heat map merge kernel",
            KernelKind::ProfilerImage => "profiler image kernel",
            KernelKind::IdRaster => "entity id raster pass",
            KernelKind::OverdrawRaster => "overdraw raster pass",
            KernelKind::PostEffect => "post effect",
        }
    }

    fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Set of kernels a device can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(u32);

impl Capabilities {
    pub fn all() -> Self {
        KernelKind::ALL.iter().fold(Self::none(), |c, k| c.with(*k))
    }

    pub fn none() -> Self {
        Self(0)
    }

    pub fn with(self, kind: KernelKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn without(self, kind: KernelKind) -> Self {
        Self(self.0 & !kind.bit())
    }

    pub fn supports(&self, kind: KernelKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

/// Camera and grid state shared by every pass of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameView {
    pub view_proj: Mat4,
    pub grid: TileGrid,
}

impl FrameView {
    pub fn width(&self) -> u32 {
        self.grid.screen.width
    }

    pub fn height(&self) -> u32 {
        self.grid.screen.height
    }

    pub fn pixel_count(&self) -> usize {
        self.grid.screen.area()
    }

    pub fn pixel_groups(&self) -> (u32, u32) {
        (
            self.width().div_ceil(PIXEL_GROUP_SIZE),
            self.height().div_ceil(PIXEL_GROUP_SIZE),
        )
    }
}

/// One entity submitted to a binning or raster pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterDraw {
    pub entity_index: u32,
    pub mesh: MeshHandle,
    pub local_to_world: Mat4,
    pub vertex_count: u32,
}

impl RasterDraw {
    pub fn binning_groups(&self) -> u32 {
        self.vertex_count.div_ceil(BINNING_GROUP_SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinTarget {
    /// `counters[tile]`
    Tiles { counters: BufferId },
    /// `counters[entity * tile_count + tile]`
    EntityTiles { counters: BufferId },
    /// `counts[pixel]`, only where the id image shows this entity.
    VisiblePixels { ids: TargetId, counts: BufferId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageGranularity {
    PerEntity,
    PerEntityTile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    TileCounts(BufferId),
    HeatDensity(BufferId),
    Overdraw(BufferId),
}

#[derive(Debug, Clone, Copy)]
pub enum Kernel<'a> {
    BinVertices {
        view: &'a FrameView,
        draw: &'a RasterDraw,
        target: BinTarget,
    },
    /// Scans an id image into the buffer bound at `COVERAGE_SLOT`.
    CountCoverage {
        view: &'a FrameView,
        ids: TargetId,
        entity_count: u32,
        granularity: CoverageGranularity,
    },
    MergeHeatMap {
        view: &'a FrameView,
        counts: BufferId,
        density: BufferId,
        heat: &'a HeatMapSettings,
    },
    /// Writes `bucket + 1` per pixel, 0 where the source is empty.
    GenerateImage {
        view: &'a FrameView,
        source: ImageSource,
        thresholds: BufferId,
        threshold_count: u32,
        output: BufferId,
    },
}

impl Kernel<'_> {
    pub fn kind(&self) -> KernelKind {
        match self {
            Kernel::BinVertices { .. } => KernelKind::VertexBinning,
            Kernel::CountCoverage { .. } => KernelKind::CoverageCount,
            Kernel::MergeHeatMap { .. } => KernelKind::HeatMapMerge,
            Kernel::GenerateImage { .. } => KernelKind::ProfilerImage,
        }
    }
}

#[derive(Debug)]
pub struct CompletedReadback {
    pub id: ReadbackId,
    pub data: Result<Vec<u32>, ProfilerError>,
}

/// Compute, raster and readback primitives the profiler drives.
pub trait ProfilerDevice {
    fn capabilities(&self) -> Capabilities;

    fn create_buffer(&mut self, label: &'static str, len: usize) -> Result<BufferId, ProfilerError>;
    fn write_buffer(&mut self, buffer: BufferId, data: &[u32]) -> Result<(), ProfilerError>;
    fn release_buffer(&mut self, buffer: BufferId);

    /// Id + depth image the size of the frame, cleared to 0 on each render.
    fn create_target(&mut self, label: &'static str, width: u32, height: u32) -> Result<TargetId, ProfilerError>;
    fn release_target(&mut self, target: TargetId);

    fn upload_mesh(&mut self, mesh: &MeshData) -> Result<MeshHandle, ProfilerError>;
    fn release_mesh(&mut self, mesh: MeshHandle);

    fn bind_random_write(&mut self, slot: u32, buffer: BufferId) -> Result<(), ProfilerError>;
    fn clear_random_write_targets(&mut self);

    /// Depth tested replacement render writing `entity_index + 1` per pixel.
    fn render_ids(&mut self, view: &FrameView, target: TargetId, draws: &[RasterDraw]) -> Result<(), ProfilerError>;
    /// Untested render adding one per fragment into `counters[pixel]`.
    fn render_overdraw(&mut self, view: &FrameView, counters: BufferId, draws: &[RasterDraw]) -> Result<(), ProfilerError>;

    fn dispatch(&mut self, kernel: &Kernel<'_>) -> Result<(), ProfilerError>;

    /// Snapshots a buffer; the data arrives through `poll_readbacks`.
    fn request_readback(&mut self, buffer: BufferId) -> Result<ReadbackId, ProfilerError>;
    /// Snapshots an id image as `width * height` words.
    fn request_target_readback(&mut self, target: TargetId) -> Result<ReadbackId, ProfilerError>;
    fn poll_readbacks(&mut self) -> Vec<CompletedReadback>;
}

/// Tracks which mode holds each random write slot.
#[derive(Debug, Default)]
pub struct RandomWriteBinder {
    bound: Vec<(u32, BufferId, DisplayType)>,
}

impl RandomWriteBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `buffer`, clearing every slot first if `slot` is already held.
    pub fn bind(
        &mut self,
        device: &mut dyn ProfilerDevice,
        slot: u32,
        buffer: BufferId,
        owner: DisplayType,
    ) -> Result<(), ProfilerError> {
        let held = self.bound.iter().find(|(s, _, _)| *s == slot).copied();
        if let Some((_, prev, prev_owner)) = held {
            warn!(
                "slot {} still bound to {:?} by {:?}, clearing before {:?} binds",
                slot, prev, prev_owner, owner
            );
            self.clear(device);
        }
        device.bind_random_write(slot, buffer)?;
        self.bound.push((slot, buffer, owner));
        Ok(())
    }

    pub fn clear(&mut self, device: &mut dyn ProfilerDevice) {
        device.clear_random_write_targets();
        self.bound.clear();
    }

    pub fn current_binder(&self, slot: u32) -> Option<DisplayType> {
        self.bound
            .iter()
            .find(|(s, _, _)| *s == slot)
            .map(|(_, _, owner)| *owner)
    }

    pub fn is_bound(&self, buffer: BufferId) -> bool {
        self.bound.iter().any(|(_, b, _)| *b == buffer)
    }
}

/// Uniform block for a kernel or draw.
pub(crate) fn kernel_params(view: &FrameView, draw: Option<&RasterDraw>) -> KernelParams {
    let grid = &view.grid;
    KernelParams {
        view_proj: mat4_to_cols(&view.view_proj),
        local_to_world: mat4_to_cols(&draw.map(|d| d.local_to_world).unwrap_or(Mat4::IDENTITY)),
        screen: [view.width(), view.height(), view.width(), 0],
        tile: [grid.tile_width, grid.tile_height, grid.num_x, grid.num_y],
        draw: [
            draw.map(|d| d.vertex_count).unwrap_or(0),
            draw.map(|d| d.entity_index).unwrap_or(0),
            grid.tile_count(),
            0,
        ],
        heat: [0; 4],
    }
}

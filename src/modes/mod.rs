//! Measurement strategies.
//!
//! Each mode owns the GPU handles it needs for one frame. The lifecycle the
//! orchestrator drives is: `check_enabled`, `collect_entities`,
//! `sync_thresholds`, `setup_frame_buffers`, `dispatch`, `report_request`,
//! then `release` at the start of the next frame or on a transition.

mod mesh_heat_map;
mod only_mesh;
mod only_tile;
mod overdraw;
mod tile_based_mesh;

pub use mesh_heat_map::MeshHeatMapMode;
pub use only_mesh::OnlyMeshMode;
pub use only_tile::OnlyTileMode;
pub use overdraw::OverdrawMode;
pub use tile_based_mesh::TileBasedMeshMode;

use crate::camera::ProfilerCamera;
use crate::config::{DisplayType, ProfilerConfig, ProfilerType};
use crate::culling::FrustumCuller;
use crate::error::ProfilerError;
use crate::gpu::{
    BufferId, Capabilities, FrameView, KernelKind, ProfilerDevice, RandomWriteBinder, RasterDraw,
    TargetId,
};
use crate::report::{EntitySummary, ReadbackSlot, ReadbackSource, ReportInputs, ReportRequest};
use crate::scene::{MeshCache, ProfiledEntity};
use crate::threshold::ThresholdTable;
use crate::tiles::TileGrid;
use log::debug;

/// Everything a mode may touch while setting up or dispatching a frame.
pub struct FrameContext<'a> {
    pub device: &'a mut dyn ProfilerDevice,
    pub binder: &'a mut RandomWriteBinder,
    pub meshes: &'a mut MeshCache,
    pub camera: &'a ProfilerCamera,
    pub config: &'a ProfilerConfig,
}

/// Buffers and targets allocated for one frame, released together.
#[derive(Debug, Default)]
pub struct FrameResources {
    buffers: Vec<BufferId>,
    targets: Vec<TargetId>,
}

impl FrameResources {
    pub fn buffer(
        &mut self,
        device: &mut dyn ProfilerDevice,
        label: &'static str,
        len: usize,
    ) -> Result<BufferId, ProfilerError> {
        let id = device.create_buffer(label, len)?;
        self.buffers.push(id);
        Ok(id)
    }

    pub fn buffer_with(
        &mut self,
        device: &mut dyn ProfilerDevice,
        label: &'static str,
        data: &[u32],
    ) -> Result<BufferId, ProfilerError> {
        let id = self.buffer(device, label, data.len())?;
        device.write_buffer(id, data)?;
        Ok(id)
    }

    pub fn target(
        &mut self,
        device: &mut dyn ProfilerDevice,
        label: &'static str,
        view: &FrameView,
    ) -> Result<TargetId, ProfilerError> {
        let id = device.create_target(label, view.width(), view.height())?;
        self.targets.push(id);
        Ok(id)
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.targets.is_empty()
    }

    /// Unbinds random write targets, then disposes everything.
    pub fn release(&mut self, device: &mut dyn ProfilerDevice, binder: &mut RandomWriteBinder) {
        binder.clear(device);
        for buffer in self.buffers.drain(..) {
            device.release_buffer(buffer);
        }
        for target in self.targets.drain(..) {
            device.release_target(target);
        }
    }
}

/// State every mode shares: the collected entities, this frame's
/// visibility and draw list, the active threshold table.
#[derive(Debug)]
pub struct ModeCore {
    pub display_type: DisplayType,
    pub entities: Vec<ProfiledEntity>,
    pub visible: Vec<bool>,
    pub draws: Vec<RasterDraw>,
    pub table: Option<ThresholdTable>,
    pub view: Option<FrameView>,
    pub thresholds: Option<BufferId>,
    pub resources: FrameResources,
}

impl ModeCore {
    pub fn new(display_type: DisplayType) -> Self {
        Self {
            display_type,
            entities: Vec::new(),
            visible: Vec::new(),
            draws: Vec::new(),
            table: None,
            view: None,
            thresholds: None,
            resources: FrameResources::default(),
        }
    }

    pub fn entity_count(&self) -> u32 {
        self.entities.len() as u32
    }

    /// Runs culling, resolves mesh uploads into draws and uploads the
    /// threshold table. Entities whose mesh cannot be made resident are
    /// skipped for this frame.
    pub fn prepare_frame(&mut self, ctx: &mut FrameContext<'_>) -> Result<FrameView, ProfilerError> {
        let view = FrameView {
            view_proj: ctx.camera.view_proj(),
            grid: TileGrid::new(
                ctx.camera.pixel_size,
                ctx.config.tile_width,
                ctx.config.tile_height,
            ),
        };

        let bounds: Vec<_> = self.entities.iter().map(|e| e.bounds).collect();
        self.visible = FrustumCuller::new(ctx.camera.frustum_planes()).run(&bounds);

        self.draws.clear();
        for (entity, visible) in self.entities.iter().zip(&self.visible) {
            if !*visible || !entity.enabled || entity.vertex_count == 0 {
                continue;
            }
            match ctx.meshes.resident_handle(ctx.device, entity.mesh) {
                Ok(Some(mesh)) => self.draws.push(RasterDraw {
                    entity_index: entity.index,
                    mesh,
                    local_to_world: entity.local_to_world,
                    vertex_count: entity.vertex_count,
                }),
                Ok(None) => debug!("{}: mesh unavailable this frame", entity.hierarchy_path),
                Err(e) => debug!("{}: mesh upload failed: {}", entity.hierarchy_path, e),
            }
        }

        let table = self
            .table
            .as_ref()
            .ok_or_else(|| ProfilerError::InvalidThresholds("table not synced".into()))?;
        let words: Vec<u32> = bytemuck::cast_slice(table.gpu_settings().as_slice()).to_vec();
        self.thresholds = Some(self.resources.buffer_with(ctx.device, "thresholds", &words)?);

        debug!(
            "{:?}: {} of {} entities dispatched, {}x{} tiles",
            self.display_type,
            self.draws.len(),
            self.entities.len(),
            view.grid.num_x,
            view.grid.num_y
        );
        self.view = Some(view);
        Ok(view)
    }

    pub fn view(&self) -> Result<FrameView, ProfilerError> {
        self.view
            .ok_or_else(|| ProfilerError::Device("frame buffers not set up".into()))
    }

    pub fn thresholds(&self) -> Result<(BufferId, u32), ProfilerError> {
        let buffer = self.thresholds.ok_or(ProfilerError::UnknownResource("threshold buffer"))?;
        let count = self.table.as_ref().map(|t| t.len() as u32).unwrap_or(0);
        Ok((buffer, count))
    }

    pub fn release(&mut self, device: &mut dyn ProfilerDevice, binder: &mut RandomWriteBinder) {
        self.resources.release(device, binder);
        self.thresholds = None;
        self.view = None;
        self.draws.clear();
    }

    /// Metadata captured at dispatch time for the report builder.
    pub fn report_inputs(&self, frame_index: u64, profiler_type: ProfilerType, config: &ProfilerConfig) -> Option<ReportInputs> {
        let view = self.view?;
        let table = self.table.clone()?;
        let mut drawn = vec![false; self.entities.len()];
        for draw in &self.draws {
            if let Some(flag) = drawn.get_mut(draw.entity_index as usize) {
                *flag = true;
            }
        }
        let entities = self
            .entities
            .iter()
            .map(|e| EntitySummary {
                index: e.index,
                mesh_name: e.mesh_name.clone(),
                hierarchy_path: e.hierarchy_path.clone(),
                vertex_count: e.vertex_count,
                drawn: drawn.get(e.index as usize).copied().unwrap_or(false),
            })
            .collect();
        Some(ReportInputs {
            display_type: self.display_type,
            profiler_type,
            frame_index,
            grid: view.grid,
            table,
            entities,
            heat_map: config.heat_map,
        })
    }
}

pub trait ProfilerMode {
    fn core(&self) -> &ModeCore;
    fn core_mut(&mut self) -> &mut ModeCore;

    /// Kernels this mode cannot run without.
    fn required_kernels(&self) -> &'static [KernelKind];

    fn setup_frame_buffers(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), ProfilerError>;
    fn dispatch(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), ProfilerError>;

    /// Buffers to read back for a report, in the slots the builder expects.
    fn readback_sources(&self) -> Vec<(ReadbackSlot, ReadbackSource)>;

    /// Drops the mode specific handles after the shared release.
    fn forget_handles(&mut self);

    fn display_type(&self) -> DisplayType {
        self.core().display_type
    }

    fn check_enabled(&self, capabilities: Capabilities) -> Result<(), ProfilerError> {
        match self
            .required_kernels()
            .iter()
            .find(|k| !capabilities.supports(**k))
        {
            Some(kind) => Err(ProfilerError::MissingDependency {
                mode: self.display_type(),
                kernel: kind.name(),
            }),
            None => Ok(()),
        }
    }

    fn collect_entities(&mut self, entities: Vec<ProfiledEntity>) {
        let core = self.core_mut();
        core.visible = vec![false; entities.len()];
        core.entities = entities;
    }

    fn entities(&self) -> &[ProfiledEntity] {
        &self.core().entities
    }

    fn entities_mut(&mut self) -> &mut [ProfiledEntity] {
        &mut self.core_mut().entities
    }

    fn sync_thresholds(&mut self, table: ThresholdTable) {
        self.core_mut().table = Some(table);
    }

    fn table(&self) -> Option<&ThresholdTable> {
        self.core().table.as_ref()
    }

    fn report_request(&self, frame_index: u64, profiler_type: ProfilerType, config: &ProfilerConfig) -> Option<ReportRequest> {
        let inputs = self.core().report_inputs(frame_index, profiler_type, config)?;
        Some(ReportRequest {
            inputs,
            sources: self.readback_sources(),
        })
    }

    fn release(&mut self, device: &mut dyn ProfilerDevice, binder: &mut RandomWriteBinder) {
        self.core_mut().release(device, binder);
        self.forget_handles();
    }
}

/// Instantiates the strategy for a display type.
pub fn create_mode(display_type: DisplayType) -> Box<dyn ProfilerMode> {
    match display_type {
        DisplayType::OnlyTile => Box::new(OnlyTileMode::new()),
        DisplayType::OnlyMesh => Box::new(OnlyMeshMode::new()),
        DisplayType::TileBasedMesh => Box::new(TileBasedMeshMode::new()),
        DisplayType::MeshHeatMap => Box::new(MeshHeatMapMode::new()),
        DisplayType::Overdraw => Box::new(OverdrawMode::new()),
    }
}

use super::{FrameContext, ModeCore, ProfilerMode};
use crate::config::DisplayType;
use crate::error::ProfilerError;
use crate::gpu::{BufferId, CoverageGranularity, Kernel, KernelKind, TargetId, COVERAGE_SLOT};
use crate::report::{ReadbackSlot, ReadbackSource};

/// Mesh vertex count against the pixels the mesh wins in the depth test.
pub struct OnlyMeshMode {
    core: ModeCore,
    pixel_counts: Option<BufferId>,
    ids: Option<TargetId>,
}

impl OnlyMeshMode {
    pub fn new() -> Self {
        Self {
            core: ModeCore::new(DisplayType::OnlyMesh),
            pixel_counts: None,
            ids: None,
        }
    }
}

impl Default for OnlyMeshMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfilerMode for OnlyMeshMode {
    fn core(&self) -> &ModeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModeCore {
        &mut self.core
    }

    fn required_kernels(&self) -> &'static [KernelKind] {
        &[
            KernelKind::IdRaster,
            KernelKind::CoverageCount,
            KernelKind::PostEffect,
        ]
    }

    fn setup_frame_buffers(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), ProfilerError> {
        let view = self.core.prepare_frame(ctx)?;
        let count = self.core.entity_count() as usize;
        let res = &mut self.core.resources;
        let pixel_counts = res.buffer(ctx.device, "mesh_pixel_counts", count)?;
        self.ids = Some(res.target(ctx.device, "mesh_id_depth", &view)?);
        ctx.binder
            .bind(ctx.device, COVERAGE_SLOT, pixel_counts, DisplayType::OnlyMesh)?;
        self.pixel_counts = Some(pixel_counts);
        Ok(())
    }

    fn dispatch(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), ProfilerError> {
        let view = self.core.view()?;
        let ids = self.ids.ok_or(ProfilerError::UnknownResource("id target"))?;
        ctx.device.render_ids(&view, ids, &self.core.draws)?;
        ctx.device.dispatch(&Kernel::CountCoverage {
            view: &view,
            ids,
            entity_count: self.core.entity_count(),
            granularity: CoverageGranularity::PerEntity,
        })
    }

    fn readback_sources(&self) -> Vec<(ReadbackSlot, ReadbackSource)> {
        let mut out = Vec::new();
        if let Some(b) = self.pixel_counts {
            out.push((ReadbackSlot::PixelCounts, ReadbackSource::Buffer(b)));
        }
        if let Some(t) = self.ids {
            out.push((ReadbackSlot::EntityIds, ReadbackSource::Target(t)));
        }
        out
    }

    fn forget_handles(&mut self) {
        self.pixel_counts = None;
        self.ids = None;
    }
}

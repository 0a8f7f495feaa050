use super::{FrameContext, ModeCore, ProfilerMode};
use crate::config::DisplayType;
use crate::error::ProfilerError;
use crate::gpu::{
    BinTarget, BufferId, CoverageGranularity, Kernel, KernelKind, TargetId, COVERAGE_SLOT,
};
use crate::report::{ReadbackSlot, ReadbackSource};
use log::warn;

/// Vertex and pixel counts per (entity, tile) pair, indexed
/// `entity * tile_count + tile`.
pub struct TileBasedMeshMode {
    core: ModeCore,
    vertex_counts: Option<BufferId>,
    pixel_counts: Option<BufferId>,
    ids: Option<TargetId>,
}

impl TileBasedMeshMode {
    pub fn new() -> Self {
        Self {
            core: ModeCore::new(DisplayType::TileBasedMesh),
            vertex_counts: None,
            pixel_counts: None,
            ids: None,
        }
    }
}

impl Default for TileBasedMeshMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfilerMode for TileBasedMeshMode {
    fn core(&self) -> &ModeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModeCore {
        &mut self.core
    }

    fn required_kernels(&self) -> &'static [KernelKind] {
        &[
            KernelKind::VertexBinning,
            KernelKind::IdRaster,
            KernelKind::CoverageCount,
            KernelKind::PostEffect,
        ]
    }

    fn setup_frame_buffers(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), ProfilerError> {
        let view = self.core.prepare_frame(ctx)?;
        let entries = self.core.entity_count() as usize * view.grid.tile_count() as usize;
        let cap = ctx.config.max_entity_tile_entries;
        if entries > cap {
            warn!(
                "{} entities x {} tiles exceeds the entity tile cap of {}",
                self.core.entity_count(),
                view.grid.tile_count(),
                cap
            );
            return Err(ProfilerError::ResourceLimit {
                requested: entries,
                cap,
            });
        }

        let res = &mut self.core.resources;
        self.vertex_counts = Some(res.buffer(ctx.device, "entity_tile_vertex_counts", entries)?);
        let pixel_counts = res.buffer(ctx.device, "entity_tile_pixel_counts", entries)?;
        self.ids = Some(res.target(ctx.device, "entity_tile_id_depth", &view)?);
        ctx.binder
            .bind(ctx.device, COVERAGE_SLOT, pixel_counts, DisplayType::TileBasedMesh)?;
        self.pixel_counts = Some(pixel_counts);
        Ok(())
    }

    fn dispatch(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), ProfilerError> {
        let view = self.core.view()?;
        let counters = self.vertex_counts.ok_or(ProfilerError::UnknownResource("vertex counts"))?;
        let ids = self.ids.ok_or(ProfilerError::UnknownResource("id target"))?;

        for draw in &self.core.draws {
            ctx.device.dispatch(&Kernel::BinVertices {
                view: &view,
                draw,
                target: BinTarget::EntityTiles { counters },
            })?;
        }
        ctx.device.render_ids(&view, ids, &self.core.draws)?;
        ctx.device.dispatch(&Kernel::CountCoverage {
            view: &view,
            ids,
            entity_count: self.core.entity_count(),
            granularity: CoverageGranularity::PerEntityTile,
        })
    }

    fn readback_sources(&self) -> Vec<(ReadbackSlot, ReadbackSource)> {
        let mut out = Vec::new();
        if let Some(b) = self.vertex_counts {
            out.push((ReadbackSlot::VertexCounts, ReadbackSource::Buffer(b)));
        }
        if let Some(b) = self.pixel_counts {
            out.push((ReadbackSlot::PixelCounts, ReadbackSource::Buffer(b)));
        }
        if let Some(t) = self.ids {
            out.push((ReadbackSlot::EntityIds, ReadbackSource::Target(t)));
        }
        out
    }

    fn forget_handles(&mut self) {
        self.vertex_counts = None;
        self.pixel_counts = None;
        self.ids = None;
    }
}

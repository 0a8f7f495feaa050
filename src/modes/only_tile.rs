use super::{FrameContext, ModeCore, ProfilerMode};
use crate::config::DisplayType;
use crate::error::ProfilerError;
use crate::gpu::{BinTarget, BufferId, ImageSource, Kernel, KernelKind};
use crate::report::{ReadbackSlot, ReadbackSource};

/// Vertex count per screen tile.
pub struct OnlyTileMode {
    core: ModeCore,
    tile_counts: Option<BufferId>,
    image: Option<BufferId>,
}

impl OnlyTileMode {
    pub fn new() -> Self {
        Self {
            core: ModeCore::new(DisplayType::OnlyTile),
            tile_counts: None,
            image: None,
        }
    }
}

impl Default for OnlyTileMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfilerMode for OnlyTileMode {
    fn core(&self) -> &ModeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModeCore {
        &mut self.core
    }

    fn required_kernels(&self) -> &'static [KernelKind] {
        &[
            KernelKind::VertexBinning,
            KernelKind::ProfilerImage,
            KernelKind::PostEffect,
        ]
    }

    fn setup_frame_buffers(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), ProfilerError> {
        let view = self.core.prepare_frame(ctx)?;
        let res = &mut self.core.resources;
        self.tile_counts = Some(res.buffer(ctx.device, "tile_vertex_counts", view.grid.tile_count() as usize)?);
        self.image = Some(res.buffer(ctx.device, "tile_profiler_image", view.pixel_count())?);
        Ok(())
    }

    fn dispatch(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), ProfilerError> {
        let view = self.core.view()?;
        let counters = self.tile_counts.ok_or(ProfilerError::UnknownResource("tile counts"))?;
        let output = self.image.ok_or(ProfilerError::UnknownResource("profiler image"))?;
        let (thresholds, threshold_count) = self.core.thresholds()?;

        for draw in &self.core.draws {
            ctx.device.dispatch(&Kernel::BinVertices {
                view: &view,
                draw,
                target: BinTarget::Tiles { counters },
            })?;
        }
        ctx.device.dispatch(&Kernel::GenerateImage {
            view: &view,
            source: ImageSource::TileCounts(counters),
            thresholds,
            threshold_count,
            output,
        })
    }

    fn readback_sources(&self) -> Vec<(ReadbackSlot, ReadbackSource)> {
        let mut out = Vec::new();
        if let Some(b) = self.tile_counts {
            out.push((ReadbackSlot::VertexCounts, ReadbackSource::Buffer(b)));
        }
        if let Some(b) = self.image {
            out.push((ReadbackSlot::ProfilerImage, ReadbackSource::Buffer(b)));
        }
        out
    }

    fn forget_handles(&mut self) {
        self.tile_counts = None;
        self.image = None;
    }
}

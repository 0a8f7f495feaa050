use super::{FrameContext, ModeCore, ProfilerMode};
use crate::config::DisplayType;
use crate::error::ProfilerError;
use crate::gpu::{BinTarget, BufferId, ImageSource, Kernel, KernelKind, TargetId};
use crate::report::{ReadbackSlot, ReadbackSource};

/// Visible vertices per pixel, smoothed over a checkerboard neighbourhood.
pub struct MeshHeatMapMode {
    core: ModeCore,
    ids: Option<TargetId>,
    counts: Option<BufferId>,
    density: Option<BufferId>,
    image: Option<BufferId>,
}

impl MeshHeatMapMode {
    pub fn new() -> Self {
        Self {
            core: ModeCore::new(DisplayType::MeshHeatMap),
            ids: None,
            counts: None,
            density: None,
            image: None,
        }
    }
}

impl Default for MeshHeatMapMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfilerMode for MeshHeatMapMode {
    fn core(&self) -> &ModeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModeCore {
        &mut self.core
    }

    fn required_kernels(&self) -> &'static [KernelKind] {
        &[
            KernelKind::IdRaster,
            KernelKind::VertexBinning,
            KernelKind::HeatMapMerge,
            KernelKind::ProfilerImage,
            KernelKind::PostEffect,
        ]
    }

    fn setup_frame_buffers(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), ProfilerError> {
        let view = self.core.prepare_frame(ctx)?;
        let pixels = view.pixel_count();
        let res = &mut self.core.resources;
        self.ids = Some(res.target(ctx.device, "heat_map_id_depth", &view)?);
        self.counts = Some(res.buffer(ctx.device, "heat_map_vertex_counts", pixels)?);
        self.density = Some(res.buffer(ctx.device, "heat_map_density", pixels)?);
        self.image = Some(res.buffer(ctx.device, "heat_map_profiler_image", pixels)?);
        Ok(())
    }

    fn dispatch(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), ProfilerError> {
        let view = self.core.view()?;
        let ids = self.ids.ok_or(ProfilerError::UnknownResource("id target"))?;
        let counts = self.counts.ok_or(ProfilerError::UnknownResource("vertex counts"))?;
        let density = self.density.ok_or(ProfilerError::UnknownResource("density"))?;
        let output = self.image.ok_or(ProfilerError::UnknownResource("profiler image"))?;
        let (thresholds, threshold_count) = self.core.thresholds()?;

        ctx.device.render_ids(&view, ids, &self.core.draws)?;
        for draw in &self.core.draws {
            ctx.device.dispatch(&Kernel::BinVertices {
                view: &view,
                draw,
                target: BinTarget::VisiblePixels { ids, counts },
            })?;
        }
        ctx.device.dispatch(&Kernel::MergeHeatMap {
            view: &view,
            counts,
            density,
            heat: &ctx.config.heat_map,
        })?;
        ctx.device.dispatch(&Kernel::GenerateImage {
            view: &view,
            source: ImageSource::HeatDensity(density),
            thresholds,
            threshold_count,
            output,
        })
    }

    fn readback_sources(&self) -> Vec<(ReadbackSlot, ReadbackSource)> {
        self.image
            .map(|b| vec![(ReadbackSlot::ProfilerImage, ReadbackSource::Buffer(b))])
            .unwrap_or_default()
    }

    fn forget_handles(&mut self) {
        self.ids = None;
        self.counts = None;
        self.density = None;
        self.image = None;
    }
}

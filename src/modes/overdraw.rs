use super::{FrameContext, ModeCore, ProfilerMode};
use crate::config::DisplayType;
use crate::error::ProfilerError;
use crate::gpu::{BufferId, ImageSource, Kernel, KernelKind};
use crate::report::{ReadbackSlot, ReadbackSource};

/// Fragment invocations per pixel, without depth testing.
pub struct OverdrawMode {
    core: ModeCore,
    counts: Option<BufferId>,
    image: Option<BufferId>,
}

impl OverdrawMode {
    pub fn new() -> Self {
        Self {
            core: ModeCore::new(DisplayType::Overdraw),
            counts: None,
            image: None,
        }
    }
}

impl Default for OverdrawMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfilerMode for OverdrawMode {
    fn core(&self) -> &ModeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModeCore {
        &mut self.core
    }

    fn required_kernels(&self) -> &'static [KernelKind] {
        &[
            KernelKind::OverdrawRaster,
            KernelKind::ProfilerImage,
            KernelKind::PostEffect,
        ]
    }

    fn setup_frame_buffers(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), ProfilerError> {
        let view = self.core.prepare_frame(ctx)?;
        let res = &mut self.core.resources;
        self.counts = Some(res.buffer(ctx.device, "overdraw_counts", view.pixel_count())?);
        self.image = Some(res.buffer(ctx.device, "overdraw_profiler_image", view.pixel_count())?);
        Ok(())
    }

    fn dispatch(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), ProfilerError> {
        let view = self.core.view()?;
        let counts = self.counts.ok_or(ProfilerError::UnknownResource("overdraw counts"))?;
        let output = self.image.ok_or(ProfilerError::UnknownResource("profiler image"))?;
        let (thresholds, threshold_count) = self.core.thresholds()?;

        ctx.device.render_overdraw(&view, counts, &self.core.draws)?;
        ctx.device.dispatch(&Kernel::GenerateImage {
            view: &view,
            source: ImageSource::Overdraw(counts),
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
        self.counts = None;
        self.image = None;
    }
}

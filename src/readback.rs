//! Two phase report completion.
//!
//! Phase one joins every readback the report depends on and builds the
//! records ("data ready"). Phase two runs on the host's frame completed
//! event and attaches the captured frame images ("capture ready").
//! Completions that do not belong to the active task are dropped.

use crate::config::DisplayType;
use crate::gpu::{CompletedReadback, ReadbackId};
use crate::overlay;
use crate::report::{build_report, ProfilerReport, ReadbackSlot, ReadbackSnapshot, ReportInputs};
use image::RgbaImage;
use log::{debug, info, warn};

/// Host side frame grabber, called after the frame has been presented.
pub trait FrameCapture {
    /// Color buffer before the profiler overlay.
    fn capture_color(&mut self) -> Option<RgbaImage>;

    /// Presented frame including the host's overlay, if it draws one.
    fn capture_presented(&mut self) -> Option<RgbaImage> {
        None
    }
}

/// Capture that provides nothing; reports complete without images.
pub struct NoCapture;

impl FrameCapture for NoCapture {
    fn capture_color(&mut self) -> Option<RgbaImage> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportStatus {
    pub pending: bool,
    pub data_ready: bool,
    pub capture_ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingData,
    AwaitingFrameEnd,
    Complete,
}

struct ReadbackTask {
    generation: u64,
    inputs: ReportInputs,
    waiting: Vec<(ReadbackId, ReadbackSlot)>,
    snapshot: ReadbackSnapshot,
    capture: bool,
    phase: Phase,
    report: Option<ProfilerReport>,
}

impl ReadbackTask {
    fn owns(&self, id: ReadbackId) -> bool {
        self.waiting.iter().any(|(w, _)| *w == id)
    }
}

#[derive(Default)]
pub struct ReadbackTracker {
    generation: u64,
    task: Option<ReadbackTask>,
    finished: Option<ProfilerReport>,
    status: ReportStatus,
    discarded: u64,
}

impl ReadbackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> ReportStatus {
        self.status
    }

    pub fn is_busy(&self) -> bool {
        self.task.is_some()
    }

    /// Completions dropped because their task was no longer active.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Aborts the in-flight task; its late completions become no-ops.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        if self.task.take().is_some() {
            debug!("readback task aborted, generation now {}", self.generation);
        }
        self.status = ReportStatus::default();
    }

    pub fn begin(&mut self, inputs: ReportInputs, waiting: Vec<(ReadbackId, ReadbackSlot)>, capture: bool) {
        if self.task.is_some() {
            warn!("replacing an unfinished report task");
        }
        self.generation += 1;
        self.status = ReportStatus {
            pending: true,
            data_ready: false,
            capture_ready: false,
        };
        self.task = Some(ReadbackTask {
            generation: self.generation,
            inputs,
            waiting,
            snapshot: ReadbackSnapshot::default(),
            capture,
            phase: Phase::AwaitingData,
            report: None,
        });
        self.finish_if_joined();
    }

    /// Phase one. Returns true when the data became ready in this call.
    pub fn deliver(&mut self, completions: Vec<CompletedReadback>) -> bool {
        let was_ready = self.status.data_ready;
        for done in completions {
            let Some(task) = self.task.as_mut().filter(|t| t.owns(done.id)) else {
                self.discarded += 1;
                debug!("discarding stale readback {:?}", done.id);
                continue;
            };
            match done.data {
                Ok(data) => {
                    if let Some(pos) = task.waiting.iter().position(|(w, _)| *w == done.id) {
                        let (_, slot) = task.waiting.swap_remove(pos);
                        task.snapshot.set(slot, data);
                    }
                }
                Err(e) => {
                    warn!("readback {:?} failed, abandoning report: {}", done.id, e);
                    self.invalidate();
                    return false;
                }
            }
        }
        self.finish_if_joined();
        !was_ready && self.status.data_ready
    }

    fn finish_if_joined(&mut self) {
        let Some(task) = self.task.as_mut() else {
            return;
        };
        if task.phase != Phase::AwaitingData || !task.waiting.is_empty() {
            return;
        }
        let report = build_report(&task.inputs, &task.snapshot);
        info!(
            "{:?} report ready: {} records (generation {})",
            task.inputs.display_type,
            report.records.len(),
            task.generation
        );
        task.report = Some(report);
        self.status.data_ready = true;
        if task.capture {
            task.phase = Phase::AwaitingFrameEnd;
        } else {
            task.phase = Phase::Complete;
            self.complete();
        }
    }

    /// Phase two, driven by the host's frame completed event.
    pub fn on_frame_completed(&mut self, capture: &mut dyn FrameCapture) {
        let Some(task) = self.task.as_mut() else {
            return;
        };
        if task.phase != Phase::AwaitingFrameEnd {
            return;
        }
        if let Some(report) = task.report.as_mut() {
            let color = capture.capture_color();
            let presented = capture.capture_presented().or_else(|| {
                color.as_ref().map(|frame| {
                    let inputs = &task.inputs;
                    let grid = inputs.display_type.uses_tiles().then_some(&inputs.grid);
                    let ramp = (inputs.display_type == DisplayType::MeshHeatMap)
                        .then_some(&inputs.heat_map);
                    overlay::compose_overlay(frame, report.image.as_ref(), &inputs.table, grid, ramp)
                })
            });
            report.screenshot = color;
            report.screenshot_with_overlay = presented;
        }
        task.phase = Phase::Complete;
        self.status.capture_ready = true;
        self.complete();
    }

    fn complete(&mut self) {
        if let Some(task) = self.task.take() {
            self.finished = task.report;
        }
        self.status.pending = false;
    }

    /// The latest completed report, if any.
    pub fn take_report(&mut self) -> Option<ProfilerReport> {
        let report = self.finished.take();
        if report.is_some() {
            self.status = ReportStatus::default();
        }
        report
    }

    /// Report whose data is ready but whose capture may still be pending.
    pub fn peek_report(&self) -> Option<&ProfilerReport> {
        self.finished
            .as_ref()
            .or_else(|| self.task.as_ref().and_then(|t| t.report.as_ref()))
    }
}

//! Per-frame driver for the measurement modes.

use crate::camera::ProfilerCamera;
use crate::config::{DisplayType, HeatMapSettings, ProfilerConfig, ProfilerType, UpdateType};
use crate::error::ProfilerError;
use crate::gpu::{ProfilerDevice, RandomWriteBinder};
use crate::modes::{create_mode, FrameContext, ProfilerMode};
use crate::readback::{FrameCapture, ReadbackTracker, ReportStatus};
use crate::report::{ProfilerReport, ReadbackSource};
use crate::scene::{collect_entities, refresh_entities, MeshCache, MeshData, MeshKey, SceneEntity};
use crate::threshold::{ThresholdTable, MAX_THRESHOLDS};
use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilerState {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisableReason {
    /// Profiling switched off by the host.
    Off,
    /// The device lacks a kernel the active mode needs.
    MissingKernel(&'static str),
    /// Nothing with a mesh was collected.
    NoEntities,
}

#[derive(Debug)]
pub enum FrameOutcome {
    Profiled { dispatched: usize },
    Disabled(DisableReason),
    /// Setup or dispatch failed; the frame's resources were released.
    Aborted(ProfilerError),
}

impl FrameOutcome {
    pub fn is_profiled(&self) -> bool {
        matches!(self, FrameOutcome::Profiled { .. })
    }
}

pub struct VertexProfiler<D: ProfilerDevice> {
    device: D,
    config: ProfilerConfig,
    mode: Option<Box<dyn ProfilerMode>>,
    binder: RandomWriteBinder,
    meshes: MeshCache,
    tracker: ReadbackTracker,
    state: ProfilerState,
    frame_index: u64,
    needs_recollect: bool,
    table_dirty: bool,
    report_requested: bool,
    inactive_buckets: [bool; MAX_THRESHOLDS],
}

impl<D: ProfilerDevice> VertexProfiler<D> {
    pub fn new(device: D, config: ProfilerConfig) -> Result<Self, ProfilerError> {
        let config = config.validated()?;
        info!(
            "vertex profiler starting in {} ({:?}) mode",
            config.display_type.name(),
            config.profiler_type
        );
        Ok(Self {
            device,
            mode: Some(create_mode(config.display_type)),
            config,
            binder: RandomWriteBinder::new(),
            meshes: MeshCache::new(),
            tracker: ReadbackTracker::new(),
            state: ProfilerState::Enabled,
            frame_index: 0,
            needs_recollect: true,
            table_dirty: true,
            report_requested: false,
            inactive_buckets: [false; MAX_THRESHOLDS],
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn state(&self) -> ProfilerState {
        self.state
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn display_type(&self) -> DisplayType {
        self.config.display_type
    }

    pub fn meshes(&self) -> &MeshCache {
        &self.meshes
    }

    pub fn register_mesh(&mut self, mesh: MeshData) -> MeshKey {
        self.meshes.insert(mesh)
    }

    /// Unregisters a mesh. Entities still pointing at it are dropped on
    /// the next collection.
    pub fn remove_mesh(&mut self, key: MeshKey) {
        self.meshes.remove(key);
        self.needs_recollect = true;
    }

    /// The active mode's table, once a frame has synced it.
    pub fn threshold_table(&self) -> Option<&ThresholdTable> {
        self.mode.as_ref().and_then(|m| m.table())
    }

    pub fn collected_entities(&self) -> usize {
        self.mode.as_ref().map(|m| m.entities().len()).unwrap_or(0)
    }

    /// Runs one frame of the active mode. Never fails: problems are logged
    /// and reported through the outcome.
    pub fn run_frame(&mut self, camera: &ProfilerCamera, scene: &[SceneEntity]) -> FrameOutcome {
        self.frame_index += 1;
        let Self {
            device,
            config,
            mode,
            binder,
            meshes,
            tracker,
            ..
        } = self;

        if let Some(mode) = mode.as_mut() {
            mode.release(device, binder);
        }
        if !config.enabled {
            self.state = ProfilerState::Disabled;
            return FrameOutcome::Disabled(DisableReason::Off);
        }

        let display = config.display_type;
        let mode = mode.get_or_insert_with(|| create_mode(display));

        if let Err(e) = mode.check_enabled(device.capabilities()) {
            warn!("profiling disabled this frame: {}", e);
            self.state = ProfilerState::Disabled;
            let kernel = match e {
                ProfilerError::MissingDependency { kernel, .. } => kernel,
                _ => "unknown",
            };
            return FrameOutcome::Disabled(DisableReason::MissingKernel(kernel));
        }

        if self.needs_recollect || config.update_type == UpdateType::EveryFrame {
            let entities = collect_entities(scene, meshes);
            meshes.retain_referenced(device, &entities);
            debug!("collected {} of {} scene entities", entities.len(), scene.len());
            mode.collect_entities(entities);
            self.needs_recollect = false;
        } else {
            refresh_entities(mode.entities_mut(), scene, meshes);
        }
        if mode.entities().is_empty() {
            self.state = ProfilerState::Disabled;
            return FrameOutcome::Disabled(DisableReason::NoEntities);
        }

        if self.table_dirty || mode.table().is_none() {
            match ThresholdTable::for_mode(
                display,
                config.profiler_type,
                &config.thresholds,
                config.tile_width,
                config.tile_height,
            ) {
                Ok(mut table) => {
                    for (bucket, inactive) in self.inactive_buckets.iter().enumerate() {
                        if *inactive {
                            table.set_bucket_active(bucket, false);
                        }
                    }
                    mode.sync_thresholds(table);
                    self.table_dirty = false;
                }
                Err(e) => {
                    warn!("threshold table rejected: {}", e);
                    return FrameOutcome::Aborted(e);
                }
            }
        }

        self.state = ProfilerState::Enabled;
        let mut ctx = FrameContext {
            device: &mut *device,
            binder: &mut *binder,
            meshes: &mut *meshes,
            camera,
            config: &*config,
        };
        let result = mode
            .setup_frame_buffers(&mut ctx)
            .and_then(|_| mode.dispatch(&mut ctx));
        if let Err(e) = result {
            warn!("{} frame {} aborted: {}", display.name(), self.frame_index, e);
            mode.release(device, binder);
            return FrameOutcome::Aborted(e);
        }
        let dispatched = mode.core().draws.len();

        if self.report_requested && !tracker.is_busy() {
            if let Some(request) = mode.report_request(self.frame_index, config.profiler_type, config) {
                let mut waiting = Vec::with_capacity(request.sources.len());
                for (slot, source) in request.sources {
                    let id = match source {
                        ReadbackSource::Buffer(b) => device.request_readback(b),
                        ReadbackSource::Target(t) => device.request_target_readback(t),
                    };
                    match id {
                        Ok(id) => waiting.push((id, slot)),
                        Err(e) => {
                            warn!("readback request failed, report postponed: {}", e);
                            return FrameOutcome::Profiled { dispatched };
                        }
                    }
                }
                debug!("report for frame {} waits on {} readbacks", self.frame_index, waiting.len());
                tracker.begin(request.inputs, waiting, config.capture_screenshots);
                self.report_requested = false;
            }
        }

        FrameOutcome::Profiled { dispatched }
    }

    /// Switches mode. Reselecting the active mode is a no-op; use
    /// `force_reload` for that.
    pub fn set_display_type(&mut self, display: DisplayType) {
        if display != self.config.display_type {
            self.config.display_type = display;
            self.transition();
        }
    }

    /// Rebuilds the active mode from scratch, e.g. after shaders reloaded.
    pub fn force_reload(&mut self) {
        self.transition();
    }

    fn transition(&mut self) {
        let display = self.config.display_type;
        info!("switching profiler to {}", display.name());
        self.tracker.invalidate();
        if let Some(mut old) = self.mode.take() {
            old.release(&mut self.device, &mut self.binder);
        }
        self.binder.clear(&mut self.device);
        self.meshes.release_all(&mut self.device);
        self.mode = Some(create_mode(display));
        self.needs_recollect = true;
        self.table_dirty = true;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.config.enabled == enabled {
            return;
        }
        self.config.enabled = enabled;
        if enabled {
            self.needs_recollect = true;
            self.state = ProfilerState::Enabled;
        } else {
            self.tracker.invalidate();
            if let Some(mode) = self.mode.as_mut() {
                mode.release(&mut self.device, &mut self.binder);
            }
            self.state = ProfilerState::Disabled;
        }
    }

    pub fn set_profiler_type(&mut self, profiler_type: ProfilerType) {
        if self.config.profiler_type != profiler_type {
            self.config.profiler_type = profiler_type;
            self.table_dirty = true;
        }
    }

    pub fn set_update_type(&mut self, update_type: UpdateType) {
        self.config.update_type = update_type;
        self.needs_recollect = true;
    }

    pub fn set_tile_size(&mut self, width: u32, height: u32) {
        self.config.set_tile_size(width, height);
        self.table_dirty = true;
    }

    pub fn set_heat_map(&mut self, settings: HeatMapSettings) {
        self.config.set_heat_map(settings);
    }

    /// Restores the active mode's Detail list.
    pub fn use_default_thresholds(&mut self) {
        self.config.thresholds.reset(self.config.display_type);
        self.table_dirty = true;
    }

    pub fn set_thresholds(&mut self, display: DisplayType, values: Vec<u32>) -> Result<(), ProfilerError> {
        self.config.thresholds.set(display, values)?;
        if display == self.config.display_type {
            self.table_dirty = true;
        }
        Ok(())
    }

    /// Hides a bucket in the overlay without changing classification.
    pub fn set_bucket_active(&mut self, bucket: usize, active: bool) {
        if let Some(flag) = self.inactive_buckets.get_mut(bucket) {
            *flag = !active;
            self.table_dirty = true;
        }
    }

    /// Collects the scene again on the next frame.
    pub fn recollect(&mut self) {
        self.needs_recollect = true;
    }

    /// Asks for a report of the next dispatched frame.
    pub fn request_report(&mut self) {
        self.report_requested = true;
    }

    /// Phase one: drains finished readbacks. Returns true once the data of
    /// the pending report became ready.
    pub fn poll_readbacks(&mut self) -> bool {
        let done = self.device.poll_readbacks();
        if done.is_empty() {
            return false;
        }
        self.tracker.deliver(done)
    }

    /// Phase two: the host signals that the frame has been presented.
    pub fn on_frame_completed(&mut self, capture: &mut dyn FrameCapture) {
        self.tracker.on_frame_completed(capture);
    }

    pub fn report_status(&self) -> ReportStatus {
        self.tracker.status()
    }

    pub fn peek_report(&self) -> Option<&ProfilerReport> {
        self.tracker.peek_report()
    }

    pub fn take_report(&mut self) -> Option<ProfilerReport> {
        self.tracker.take_report()
    }

    /// Readback completions dropped because their report was abandoned.
    pub fn discarded_readbacks(&self) -> u64 {
        self.tracker.discarded()
    }

    /// Releases every GPU resource the profiler holds.
    pub fn shutdown(&mut self) {
        self.tracker.invalidate();
        if let Some(mode) = self.mode.as_mut() {
            mode.release(&mut self.device, &mut self.binder);
        }
        self.meshes.release_all(&mut self.device);
        self.state = ProfilerState::Disabled;
    }
}

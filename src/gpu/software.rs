//! CPU reference device.
//!
//! Runs every kernel and raster pass on the host with the same conventions
//! as the WGSL kernels: pixel centers at `+0.5`, top left origin, depth
//! range 0..1, shared triangle edges owned by exactly one triangle.

use super::{
    BinTarget, BufferId, Capabilities, CompletedReadback, CoverageGranularity, FrameView,
    ImageSource, Kernel, MeshHandle, ProfilerDevice, RasterDraw, ReadbackId, TargetId,
    COVERAGE_SLOT,
};
use crate::error::ProfilerError;
use crate::scene::MeshData;
use crate::threshold::classify_against;
use crate::tiles::{clip_to_pixel, clip_to_screen};
use crate::utils::ColorRangeSetting;
use glam::{Vec2, Vec4};
use log::warn;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub binning_dispatches: u64,
    pub binning_groups: u64,
    pub pixel_dispatches: u64,
    pub pixel_groups: u64,
    pub draws: u64,
}

struct IdTarget {
    width: u32,
    height: u32,
    ids: Vec<u32>,
    depth: Vec<f32>,
}

struct PendingReadback {
    id: ReadbackId,
    polls_left: u32,
    data: Vec<u32>,
}

pub struct SoftwareDevice {
    capabilities: Capabilities,
    next_id: u64,
    buffers: HashMap<BufferId, Vec<u32>>,
    targets: HashMap<TargetId, IdTarget>,
    meshes: HashMap<MeshHandle, MeshData>,
    random_write: HashMap<u32, BufferId>,
    pending: VecDeque<PendingReadback>,
    readback_latency: u32,
    hazards: Vec<ProfilerError>,
    stats: DeviceStats,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::all())
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            next_id: 1,
            buffers: HashMap::new(),
            targets: HashMap::new(),
            meshes: HashMap::new(),
            random_write: HashMap::new(),
            pending: VecDeque::new(),
            readback_latency: 0,
            hazards: Vec::new(),
            stats: DeviceStats::default(),
        }
    }

    pub fn set_capabilities(&mut self, capabilities: Capabilities) {
        self.capabilities = capabilities;
    }

    /// Extra polls a readback waits before it completes.
    pub fn set_readback_latency(&mut self, polls: u32) {
        self.readback_latency = polls;
    }

    pub fn buffer(&self, buffer: BufferId) -> Option<&[u32]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    pub fn target_ids(&self, target: TargetId) -> Option<&[u32]> {
        self.targets.get(&target).map(|t| t.ids.as_slice())
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn live_meshes(&self) -> usize {
        self.meshes.len()
    }

    pub fn pending_readbacks(&self) -> usize {
        self.pending.len()
    }

    /// Binding misuse observed so far; a well behaved caller leaves this empty.
    pub fn hazards(&self) -> &[ProfilerError] {
        &self.hazards
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn require(&self, kind: super::KernelKind) -> Result<(), ProfilerError> {
        if self.capabilities.supports(kind) {
            Ok(())
        } else {
            Err(ProfilerError::Device(format!("{} unavailable", kind.name())))
        }
    }

    fn buffer_mut(&mut self, buffer: BufferId) -> Result<&mut Vec<u32>, ProfilerError> {
        self.buffers
            .get_mut(&buffer)
            .ok_or(ProfilerError::UnknownResource("buffer"))
    }

    fn buffer_copy(&self, buffer: BufferId) -> Result<Vec<u32>, ProfilerError> {
        self.buffers
            .get(&buffer)
            .cloned()
            .ok_or(ProfilerError::UnknownResource("buffer"))
    }

    fn ids_copy(&self, target: TargetId) -> Result<Vec<u32>, ProfilerError> {
        self.targets
            .get(&target)
            .map(|t| t.ids.clone())
            .ok_or(ProfilerError::UnknownResource("target"))
    }

    fn bin_vertices(&mut self, view: &FrameView, draw: &RasterDraw, target: BinTarget) -> Result<(), ProfilerError> {
        let mesh = self
            .meshes
            .get(&draw.mesh)
            .ok_or(ProfilerError::UnknownResource("mesh"))?;
        let mvp = view.view_proj * draw.local_to_world;
        let screen = view.grid.screen;
        let pixels: Vec<(u32, u32)> = mesh
            .positions
            .iter()
            .take(draw.vertex_count as usize)
            .filter_map(|p| clip_to_pixel(mvp * Vec4::from((*p, 1.0)), screen))
            .collect();

        let grid = view.grid;
        match target {
            BinTarget::Tiles { counters } => {
                let out = self.buffer_mut(counters)?;
                for (px, py) in pixels {
                    if let Some(c) = out.get_mut(grid.tile_of_pixel(px, py) as usize) {
                        *c += 1;
                    }
                }
            }
            BinTarget::EntityTiles { counters } => {
                let base = draw.entity_index as usize * grid.tile_count() as usize;
                let out = self.buffer_mut(counters)?;
                for (px, py) in pixels {
                    if let Some(c) = out.get_mut(base + grid.tile_of_pixel(px, py) as usize) {
                        *c += 1;
                    }
                }
            }
            BinTarget::VisiblePixels { ids, counts } => {
                let ids = self.ids_copy(ids)?;
                let width = screen.width as usize;
                let out = self.buffer_mut(counts)?;
                for (px, py) in pixels {
                    let p = py as usize * width + px as usize;
                    if ids.get(p) == Some(&(draw.entity_index + 1)) {
                        if let Some(c) = out.get_mut(p) {
                            *c += 1;
                        }
                    }
                }
            }
        }
        self.stats.binning_dispatches += 1;
        self.stats.binning_groups += draw.binning_groups() as u64;
        Ok(())
    }

    fn count_coverage(
        &mut self,
        view: &FrameView,
        ids: TargetId,
        entity_count: u32,
        granularity: CoverageGranularity,
    ) -> Result<(), ProfilerError> {
        let counters = *self
            .random_write
            .get(&COVERAGE_SLOT)
            .ok_or(ProfilerError::UnknownResource("random write target"))?;
        let ids = self.ids_copy(ids)?;
        let grid = view.grid;
        let width = view.width();
        let out = self.buffer_mut(counters)?;
        for (p, &id) in ids.iter().enumerate() {
            if id == 0 || id > entity_count {
                continue;
            }
            let entity = (id - 1) as usize;
            let index = match granularity {
                CoverageGranularity::PerEntity => entity,
                CoverageGranularity::PerEntityTile => {
                    let (px, py) = (p as u32 % width, p as u32 / width);
                    entity * grid.tile_count() as usize + grid.tile_of_pixel(px, py) as usize
                }
            };
            if let Some(c) = out.get_mut(index) {
                *c += 1;
            }
        }
        self.note_pixel_pass(view);
        Ok(())
    }

    fn merge_heat_map(
        &mut self,
        view: &FrameView,
        counts: BufferId,
        density: BufferId,
        offsets: &[(i32, i32)],
    ) -> Result<(), ProfilerError> {
        let counts = self.buffer_copy(counts)?;
        let (w, h) = (view.width() as i32, view.height() as i32);
        let samples = offsets.len().max(1) as f32;
        let out = self.buffer_mut(density)?;
        for y in 0..h {
            for x in 0..w {
                let mut sum = 0u32;
                for (dx, dy) in offsets {
                    let (sx, sy) = (x + dx, y + dy);
                    if sx >= 0 && sy >= 0 && sx < w && sy < h {
                        sum += counts.get((sy * w + sx) as usize).copied().unwrap_or(0);
                    }
                }
                if let Some(d) = out.get_mut((y * w + x) as usize) {
                    *d = (sum as f32 / samples).to_bits();
                }
            }
        }
        self.note_pixel_pass(view);
        Ok(())
    }

    fn generate_image(
        &mut self,
        view: &FrameView,
        source: ImageSource,
        thresholds: BufferId,
        threshold_count: u32,
        output: BufferId,
    ) -> Result<(), ProfilerError> {
        let words = self.buffer_copy(thresholds)?;
        let settings: &[ColorRangeSetting] = bytemuck::try_cast_slice(words.as_slice())
            .map_err(|e| ProfilerError::Device(format!("threshold buffer: {e}")))?;
        let table: Vec<f32> = settings
            .iter()
            .take(threshold_count as usize)
            .map(|s| s.threshold)
            .collect();

        let grid = view.grid;
        let width = view.width();
        let values: Vec<f32> = match source {
            ImageSource::TileCounts(buf) => {
                let tiles = self.buffer_copy(buf)?;
                (0..view.pixel_count() as u32)
                    .map(|p| {
                        let tile = grid.tile_of_pixel(p % width, p / width);
                        tiles.get(tile as usize).copied().unwrap_or(0) as f32
                    })
                    .collect()
            }
            ImageSource::HeatDensity(buf) => self
                .buffer_copy(buf)?
                .into_iter()
                .map(f32::from_bits)
                .collect(),
            ImageSource::Overdraw(buf) => self
                .buffer_copy(buf)?
                .into_iter()
                .map(|c| c as f32)
                .collect(),
        };

        let out = self.buffer_mut(output)?;
        for (o, v) in out.iter_mut().zip(values) {
            *o = if v > 0.0 {
                classify_against(table.iter().copied(), v) as u32 + 1
            } else {
                0
            };
        }
        self.note_pixel_pass(view);
        Ok(())
    }

    fn note_pixel_pass(&mut self, view: &FrameView) {
        let (gx, gy) = view.pixel_groups();
        self.stats.pixel_dispatches += 1;
        self.stats.pixel_groups += gx as u64 * gy as u64;
    }
}

impl ProfilerDevice for SoftwareDevice {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_buffer(&mut self, _label: &'static str, len: usize) -> Result<BufferId, ProfilerError> {
        let id = BufferId(self.alloc_id());
        self.buffers.insert(id, vec![0; len]);
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, data: &[u32]) -> Result<(), ProfilerError> {
        let dst = self.buffer_mut(buffer)?;
        if data.len() > dst.len() {
            return Err(ProfilerError::Device(format!(
                "write of {} words into a {} word buffer",
                data.len(),
                dst.len()
            )));
        }
        dst[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn release_buffer(&mut self, buffer: BufferId) {
        if let Some((slot, _)) = self.random_write.iter().find(|(_, b)| **b == buffer) {
            warn!("releasing buffer {:?} while bound to slot {}", buffer, slot);
            self.hazards.push(ProfilerError::BindingHazard { slot: *slot });
        }
        self.buffers.remove(&buffer);
    }

    fn create_target(&mut self, _label: &'static str, width: u32, height: u32) -> Result<TargetId, ProfilerError> {
        let id = TargetId(self.alloc_id());
        let len = width as usize * height as usize;
        self.targets.insert(
            id,
            IdTarget {
                width,
                height,
                ids: vec![0; len],
                depth: vec![1.0; len],
            },
        );
        Ok(id)
    }

    fn release_target(&mut self, target: TargetId) {
        self.targets.remove(&target);
    }

    fn upload_mesh(&mut self, mesh: &MeshData) -> Result<MeshHandle, ProfilerError> {
        let id = MeshHandle(self.alloc_id());
        self.meshes.insert(id, mesh.clone());
        Ok(id)
    }

    fn release_mesh(&mut self, mesh: MeshHandle) {
        self.meshes.remove(&mesh);
    }

    fn bind_random_write(&mut self, slot: u32, buffer: BufferId) -> Result<(), ProfilerError> {
        if !self.buffers.contains_key(&buffer) {
            return Err(ProfilerError::UnknownResource("buffer"));
        }
        if self.random_write.contains_key(&slot) {
            let hazard = ProfilerError::BindingHazard { slot };
            self.hazards.push(ProfilerError::BindingHazard { slot });
            return Err(hazard);
        }
        self.random_write.insert(slot, buffer);
        Ok(())
    }

    fn clear_random_write_targets(&mut self) {
        self.random_write.clear();
    }

    fn render_ids(&mut self, view: &FrameView, target: TargetId, draws: &[RasterDraw]) -> Result<(), ProfilerError> {
        self.require(super::KernelKind::IdRaster)?;
        let mut t = self
            .targets
            .remove(&target)
            .ok_or(ProfilerError::UnknownResource("target"))?;
        t.ids.fill(0);
        t.depth.fill(1.0);
        let width = t.width as usize;
        for draw in draws {
            let Some(mesh) = self.meshes.get(&draw.mesh) else {
                continue;
            };
            rasterize(view, mesh, draw, t.width, t.height, |x, y, z| {
                let p = y as usize * width + x as usize;
                if z < t.depth[p] {
                    t.depth[p] = z;
                    t.ids[p] = draw.entity_index + 1;
                }
            });
            self.stats.draws += 1;
        }
        self.targets.insert(target, t);
        Ok(())
    }

    fn render_overdraw(&mut self, view: &FrameView, counters: BufferId, draws: &[RasterDraw]) -> Result<(), ProfilerError> {
        self.require(super::KernelKind::OverdrawRaster)?;
        let mut out = std::mem::take(self.buffer_mut(counters)?);
        let (w, h) = (view.width(), view.height());
        for draw in draws {
            let Some(mesh) = self.meshes.get(&draw.mesh) else {
                continue;
            };
            rasterize(view, mesh, draw, w, h, |x, y, _| {
                if let Some(c) = out.get_mut(y as usize * w as usize + x as usize) {
                    *c += 1;
                }
            });
            self.stats.draws += 1;
        }
        *self.buffer_mut(counters)? = out;
        Ok(())
    }

    fn dispatch(&mut self, kernel: &Kernel<'_>) -> Result<(), ProfilerError> {
        self.require(kernel.kind())?;
        match *kernel {
            Kernel::BinVertices { view, draw, target } => self.bin_vertices(view, draw, target),
            Kernel::CountCoverage {
                view,
                ids,
                entity_count,
                granularity,
            } => self.count_coverage(view, ids, entity_count, granularity),
            Kernel::MergeHeatMap {
                view,
                counts,
                density,
                heat,
            } => self.merge_heat_map(view, counts, density, &heat.offsets()),
            Kernel::GenerateImage {
                view,
                source,
                thresholds,
                threshold_count,
                output,
            } => self.generate_image(view, source, thresholds, threshold_count, output),
        }
    }

    fn request_readback(&mut self, buffer: BufferId) -> Result<ReadbackId, ProfilerError> {
        let data = self.buffer_copy(buffer)?;
        Ok(self.enqueue_readback(data))
    }

    fn request_target_readback(&mut self, target: TargetId) -> Result<ReadbackId, ProfilerError> {
        let data = self.ids_copy(target)?;
        Ok(self.enqueue_readback(data))
    }

    fn poll_readbacks(&mut self) -> Vec<CompletedReadback> {
        let mut done = Vec::new();
        let mut waiting = VecDeque::with_capacity(self.pending.len());
        for mut p in self.pending.drain(..) {
            if p.polls_left == 0 {
                done.push(CompletedReadback {
                    id: p.id,
                    data: Ok(p.data),
                });
            } else {
                p.polls_left -= 1;
                waiting.push_back(p);
            }
        }
        self.pending = waiting;
        done
    }
}

impl SoftwareDevice {
    fn enqueue_readback(&mut self, data: Vec<u32>) -> ReadbackId {
        let id = ReadbackId(self.alloc_id());
        self.pending.push_back(PendingReadback {
            id,
            polls_left: self.readback_latency,
            data,
        });
        id
    }
}

/// Edge function; positive when `p` is on the inner side of `a -> b` for a
/// triangle wound to positive area.
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (p.x - a.x) * (b.y - a.y) - (p.y - a.y) * (b.x - a.x)
}

/// Pixels exactly on an edge belong to the triangle whose edge direction
/// passes this test, so each shared edge is owned once.
fn owns_edge(a: Vec2, b: Vec2) -> bool {
    let d = b - a;
    d.y > 0.0 || (d.y == 0.0 && d.x > 0.0)
}

fn inside(w: f32, a: Vec2, b: Vec2) -> bool {
    w > 0.0 || (w == 0.0 && owns_edge(a, b))
}

/// Calls `emit(x, y, depth)` for every covered pixel center of every
/// triangle. Triangles with a vertex behind the camera are skipped.
fn rasterize(
    view: &FrameView,
    mesh: &MeshData,
    draw: &RasterDraw,
    width: u32,
    height: u32,
    mut emit: impl FnMut(u32, u32, f32),
) {
    let mvp = view.view_proj * draw.local_to_world;
    let screen = view.grid.screen;
    let clip: Vec<Vec4> = mesh
        .positions
        .iter()
        .map(|p| mvp * Vec4::from((*p, 1.0)))
        .collect();

    let tri_count = mesh.triangle_count();
    for t in 0..tri_count {
        let idx = match &mesh.indices {
            Some(indices) => [indices[t * 3], indices[t * 3 + 1], indices[t * 3 + 2]],
            None => [(t * 3) as u32, (t * 3 + 1) as u32, (t * 3 + 2) as u32],
        };
        let Some(verts) = idx
            .iter()
            .map(|&i| clip.get(i as usize).copied())
            .collect::<Option<Vec<Vec4>>>()
        else {
            continue;
        };
        if verts.iter().any(|v| v.w <= 1e-6) {
            continue;
        }
        let mut p: Vec<Vec2> = verts
            .iter()
            .map(|v| {
                let (x, y) = clip_to_screen(*v, screen);
                Vec2::new(x, y)
            })
            .collect();
        let mut z: Vec<f32> = verts.iter().map(|v| v.z / v.w).collect();
        let mut area = edge(p[0], p[1], p[2]);
        if area == 0.0 {
            continue;
        }
        if area < 0.0 {
            p.swap(1, 2);
            z.swap(1, 2);
            area = -area;
        }

        let min = p[0].min(p[1]).min(p[2]);
        let max = p[0].max(p[1]).max(p[2]);
        let x0 = min.x.floor().max(0.0) as u32;
        let y0 = min.y.floor().max(0.0) as u32;
        let x1 = (max.x.ceil().max(0.0) as u32).min(width);
        let y1 = (max.y.ceil().max(0.0) as u32).min(height);

        for y in y0..y1 {
            for x in x0..x1 {
                let s = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(p[1], p[2], s);
                let w1 = edge(p[2], p[0], s);
                let w2 = edge(p[0], p[1], s);
                if !(inside(w0, p[1], p[2]) && inside(w1, p[2], p[0]) && inside(w2, p[0], p[1])) {
                    continue;
                }
                let depth = (w0 * z[0] + w1 * z[1] + w2 * z[2]) / area;
                if (0.0..=1.0).contains(&depth) {
                    emit(x, y, depth);
                }
            }
        }
    }
}

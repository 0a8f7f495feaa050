//! Turns readback snapshots into density records.
//!
//! Builders are pure: the same inputs and snapshot always produce the same
//! report, so a report can be rebuilt without dispatching a new frame.

use crate::config::{DisplayType, HeatMapSettings, ProfilerType};
use crate::gpu::{BufferId, TargetId};
use crate::record::{
    flatten_batches, sort_batches, BatchRecord, Density, DensityRecord, Subject,
};
use crate::threshold::{ThresholdEntry, ThresholdTable};
use crate::tiles::TileGrid;
use image::RgbaImage;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySummary {
    pub index: u32,
    pub mesh_name: String,
    pub hierarchy_path: String,
    pub vertex_count: u32,
    /// Culled in, enabled and resident, so it was part of the dispatch.
    pub drawn: bool,
}

/// Metadata captured when the readbacks were requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportInputs {
    pub display_type: DisplayType,
    pub profiler_type: ProfilerType,
    pub frame_index: u64,
    pub grid: TileGrid,
    pub table: ThresholdTable,
    pub entities: Vec<EntitySummary>,
    pub heat_map: HeatMapSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadbackSlot {
    VertexCounts,
    PixelCounts,
    ProfilerImage,
    EntityIds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackSource {
    Buffer(BufferId),
    Target(TargetId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub inputs: ReportInputs,
    pub sources: Vec<(ReadbackSlot, ReadbackSource)>,
}

/// Host copies of the buffers a report depends on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadbackSnapshot {
    pub vertex_counts: Option<Vec<u32>>,
    pub pixel_counts: Option<Vec<u32>>,
    pub profiler_image: Option<Vec<u32>>,
    pub entity_ids: Option<Vec<u32>>,
}

impl ReadbackSnapshot {
    pub fn set(&mut self, slot: ReadbackSlot, data: Vec<u32>) {
        *self.slot_mut(slot) = Some(data);
    }

    pub fn get(&self, slot: ReadbackSlot) -> Option<&[u32]> {
        match slot {
            ReadbackSlot::VertexCounts => self.vertex_counts.as_deref(),
            ReadbackSlot::PixelCounts => self.pixel_counts.as_deref(),
            ReadbackSlot::ProfilerImage => self.profiler_image.as_deref(),
            ReadbackSlot::EntityIds => self.entity_ids.as_deref(),
        }
    }

    fn slot_mut(&mut self, slot: ReadbackSlot) -> &mut Option<Vec<u32>> {
        match slot {
            ReadbackSlot::VertexCounts => &mut self.vertex_counts,
            ReadbackSlot::PixelCounts => &mut self.pixel_counts,
            ReadbackSlot::ProfilerImage => &mut self.profiler_image,
            ReadbackSlot::EntityIds => &mut self.entity_ids,
        }
    }
}

/// Per pixel classification, `0` = no data, else `bucket + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketImage {
    pub width: u32,
    pub height: u32,
    pub buckets: Vec<u32>,
}

impl BucketImage {
    pub fn bucket_at(&self, x: u32, y: u32) -> Option<usize> {
        let v = *self.buckets.get((y * self.width + x) as usize)?;
        (v > 0).then(|| v as usize - 1)
    }

    pub fn histogram(&self, buckets: usize) -> Vec<u32> {
        let mut out = vec![0; buckets];
        for &v in &self.buckets {
            if let Some(slot) = (v as usize).checked_sub(1).and_then(|b| out.get_mut(b)) {
                *slot += 1;
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfilerReport {
    pub display_type: DisplayType,
    pub profiler_type: ProfilerType,
    pub frame_index: u64,
    pub grid: TileGrid,
    pub thresholds: Vec<ThresholdEntry>,
    pub threshold_scale: f32,
    pub records: Vec<DensityRecord>,
    /// Pixels per bucket in the profiler image.
    pub histogram: Vec<u32>,
    #[serde(skip)]
    pub image: Option<BucketImage>,
    #[serde(skip)]
    pub screenshot: Option<RgbaImage>,
    #[serde(skip)]
    pub screenshot_with_overlay: Option<RgbaImage>,
}

impl ProfilerReport {
    pub fn has_screenshots(&self) -> bool {
        self.screenshot.is_some() && self.screenshot_with_overlay.is_some()
    }
}

/// Builds the full report for a mode. Missing snapshot slots yield empty
/// sections rather than errors.
pub fn build_report(inputs: &ReportInputs, snapshot: &ReadbackSnapshot) -> ProfilerReport {
    let records = build_records(inputs, snapshot);
    let image = bucket_image(inputs, snapshot, &records);
    let histogram = image
        .as_ref()
        .map(|img| img.histogram(inputs.table.len()))
        .unwrap_or_else(|| vec![0; inputs.table.len()]);
    ProfilerReport {
        display_type: inputs.display_type,
        profiler_type: inputs.profiler_type,
        frame_index: inputs.frame_index,
        grid: inputs.grid,
        thresholds: inputs.table.entries().to_vec(),
        threshold_scale: inputs.table.scale(),
        records,
        histogram,
        image,
        screenshot: None,
        screenshot_with_overlay: None,
    }
}

pub fn build_records(inputs: &ReportInputs, snapshot: &ReadbackSnapshot) -> Vec<DensityRecord> {
    match inputs.display_type {
        DisplayType::OnlyTile => snapshot
            .get(ReadbackSlot::VertexCounts)
            .map(|v| only_tile_records(inputs, v))
            .unwrap_or_default(),
        DisplayType::OnlyMesh => snapshot
            .get(ReadbackSlot::PixelCounts)
            .map(|p| only_mesh_records(inputs, p))
            .unwrap_or_default(),
        DisplayType::TileBasedMesh => match (
            snapshot.get(ReadbackSlot::VertexCounts),
            snapshot.get(ReadbackSlot::PixelCounts),
        ) {
            (Some(v), Some(p)) => tile_based_mesh_records(inputs, v, p),
            _ => Vec::new(),
        },
        DisplayType::MeshHeatMap | DisplayType::Overdraw => Vec::new(),
    }
}

/// One record per tile holding vertices. Classification compares the raw
/// count against the area scaled table, which matches classifying the per
/// 10k pixel density against the raw table.
pub fn only_tile_records(inputs: &ReportInputs, vertex_counts: &[u32]) -> Vec<DensityRecord> {
    let area = inputs.grid.tile_area() as f32;
    vertex_counts
        .iter()
        .take(inputs.grid.tile_count() as usize)
        .enumerate()
        .filter(|(_, &vc)| vc > 0)
        .map(|(i, &vc)| {
            let per_10k = vc as f32 / area * 10000.0;
            let (bucket, color) = inputs.table.classify_scaled(vc as f32);
            DensityRecord::tile(i as u32, vc, per_10k, bucket, color)
        })
        .collect()
}

/// One record per drawn entity, in entity order.
pub fn only_mesh_records(inputs: &ReportInputs, pixel_counts: &[u32]) -> Vec<DensityRecord> {
    let mut out = Vec::new();
    for entity in &inputs.entities {
        if !entity.drawn || entity.vertex_count == 0 {
            continue;
        }
        let pixel_count = pixel_counts.get(entity.index as usize).copied().unwrap_or(0);
        let density = Density::from_counts(entity.vertex_count, pixel_count);
        let (bucket, color) = inputs.table.classify_scaled(density.sort_key());
        out.push(DensityRecord {
            subject: Subject::Mesh {
                entity: entity.index,
                name: entity.mesh_name.clone(),
            },
            vertex_count: entity.vertex_count,
            mesh_vertex_count: None,
            pixel_count,
            density: Some(density),
            tile_density: None,
            bucket,
            color,
            hierarchy_path: Some(entity.hierarchy_path.clone()),
        });
    }
    out
}

/// Tile grouped hierarchy: densest tile first, densest mesh first within it.
pub fn tile_based_mesh_records(
    inputs: &ReportInputs,
    vertex_counts: &[u32],
    pixel_counts: &[u32],
) -> Vec<DensityRecord> {
    let tile_count = inputs.grid.tile_count() as usize;
    let mut batches = Vec::new();
    for tile in 0..tile_count {
        let mut children = Vec::new();
        for entity in &inputs.entities {
            let i = entity.index as usize * tile_count + tile;
            let vc = vertex_counts.get(i).copied().unwrap_or(0);
            let pc = pixel_counts.get(i).copied().unwrap_or(0);
            if vc == 0 || pc == 0 {
                continue;
            }
            let density = Density::from_counts(vc, pc);
            let (bucket, color) = inputs.table.classify_scaled(density.sort_key());
            children.push(DensityRecord {
                subject: Subject::MeshInTile {
                    tile: tile as u32,
                    entity: entity.index,
                    name: entity.mesh_name.clone(),
                },
                vertex_count: vc,
                mesh_vertex_count: Some(entity.vertex_count),
                pixel_count: pc,
                density: Some(density),
                tile_density: None,
                bucket,
                color,
                hierarchy_path: Some(entity.hierarchy_path.clone()),
            });
        }
        batches.extend(BatchRecord::new(tile as u32, children));
    }
    sort_batches(&mut batches);
    flatten_batches(batches)
}

fn bucket_image(
    inputs: &ReportInputs,
    snapshot: &ReadbackSnapshot,
    records: &[DensityRecord],
) -> Option<BucketImage> {
    let (width, height) = (inputs.grid.screen.width, inputs.grid.screen.height);
    let pixels = width as usize * height as usize;
    let buckets = if let Some(image) = snapshot.get(ReadbackSlot::ProfilerImage) {
        image.iter().copied().take(pixels).collect()
    } else {
        let ids = snapshot.get(ReadbackSlot::EntityIds)?;
        let lookup = record_buckets(inputs, records);
        ids.iter()
            .take(pixels)
            .enumerate()
            .map(|(p, &id)| {
                if id == 0 {
                    return 0;
                }
                let key = match inputs.display_type {
                    DisplayType::TileBasedMesh => {
                        let (x, y) = (p as u32 % width, p as u32 / width);
                        (id - 1, Some(inputs.grid.tile_of_pixel(x, y)))
                    }
                    _ => (id - 1, None),
                };
                lookup
                    .get(&key)
                    .map(|b| *b as u32 + 1)
                    .unwrap_or(0)
            })
            .collect()
    };
    Some(BucketImage {
        width,
        height,
        buckets,
    })
}

fn record_buckets(
    inputs: &ReportInputs,
    records: &[DensityRecord],
) -> std::collections::HashMap<(u32, Option<u32>), usize> {
    records
        .iter()
        .filter_map(|r| match (&r.subject, inputs.display_type) {
            (Subject::Mesh { entity, .. }, _) => Some(((*entity, None), r.bucket)),
            (Subject::MeshInTile { tile, entity, .. }, DisplayType::TileBasedMesh) => {
                Some(((*entity, Some(*tile)), r.bucket))
            }
            _ => None,
        })
        .collect()
}

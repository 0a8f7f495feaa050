//! Density records and the report ordering rules.

use crate::utils::Color;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Vertex to pixel ratio. `NoCoverage` marks a subject that occupies no
/// screen pixels and ranks above every finite value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Density {
    Finite(f32),
    NoCoverage,
}

impl Density {
    pub fn from_counts(vertex_count: u32, pixel_count: u32) -> Self {
        if pixel_count > 0 {
            Density::Finite(vertex_count as f32 / pixel_count as f32)
        } else {
            Density::NoCoverage
        }
    }

    pub fn sort_key(self) -> f32 {
        match self {
            Density::Finite(v) => v,
            Density::NoCoverage => f32::INFINITY,
        }
    }

    pub fn value(self) -> Option<f32> {
        match self {
            Density::Finite(v) => Some(v),
            Density::NoCoverage => None,
        }
    }

    pub fn max(self, other: Density) -> Density {
        if other.sort_key() > self.sort_key() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Density {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Density::Finite(v) => write!(f, "{v:.2}"),
            Density::NoCoverage => f.write_str("no pixel occupancy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Subject {
    Tile { index: u32 },
    Mesh { entity: u32, name: String },
    MeshInTile { tile: u32, entity: u32, name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityRecord {
    pub subject: Subject,
    pub vertex_count: u32,
    /// Whole mesh vertex count, for records that cover part of a mesh.
    pub mesh_vertex_count: Option<u32>,
    pub pixel_count: u32,
    /// Primary signal, absent on tile records.
    pub density: Option<Density>,
    /// Secondary signal: vertices per 10k pixels for tiles, max child density for batch roots.
    pub tile_density: Option<f32>,
    pub bucket: usize,
    pub color: Color,
    pub hierarchy_path: Option<String>,
}

impl DensityRecord {
    pub fn tile(index: u32, vertex_count: u32, tile_density: f32, bucket: usize, color: Color) -> Self {
        Self {
            subject: Subject::Tile { index },
            vertex_count,
            mesh_vertex_count: None,
            pixel_count: 0,
            density: None,
            tile_density: Some(tile_density),
            bucket,
            color,
            hierarchy_path: None,
        }
    }

    /// Index used by the last comparator fallback.
    pub fn order_index(&self) -> u32 {
        match &self.subject {
            Subject::Tile { index } => *index,
            Subject::Mesh { entity, .. } | Subject::MeshInTile { entity, .. } => *entity,
        }
    }

    pub fn tile_index(&self) -> Option<u32> {
        match &self.subject {
            Subject::Tile { index } => Some(*index),
            Subject::MeshInTile { tile, .. } => Some(*tile),
            Subject::Mesh { .. } => None,
        }
    }

    pub fn mesh_name(&self) -> Option<&str> {
        match &self.subject {
            Subject::Mesh { name, .. } | Subject::MeshInTile { name, .. } => Some(name),
            Subject::Tile { .. } => None,
        }
    }

    /// `"{used}({share:.2}%)"`, share of the mesh's vertices counted here.
    pub fn vertex_usage(&self) -> Option<String> {
        let total = self.mesh_vertex_count?;
        let pct = if total > 0 {
            self.vertex_count as f32 / total as f32 * 100.0
        } else {
            0.0
        };
        Some(format!("{}({:.2}%)", self.vertex_count, pct))
    }

    fn primary(&self) -> f32 {
        self.density.map(Density::sort_key).unwrap_or(0.0)
    }

    fn secondary(&self) -> f32 {
        self.tile_density.unwrap_or(0.0)
    }
}

/// Report ordering: higher primary density when both have one, else higher
/// secondary density when both have one, else index ascending. A record
/// with only one side valid is ordered by index, never by magnitude.
pub fn compare_records(a: &DensityRecord, b: &DensityRecord) -> Ordering {
    let (pa, pb) = (a.primary(), b.primary());
    if pa > 0.0 && pb > 0.0 && pa != pb {
        return pb.total_cmp(&pa);
    }
    let (sa, sb) = (a.secondary(), b.secondary());
    if sa > 0.0 && sb > 0.0 && sa != sb {
        return sb.total_cmp(&sa);
    }
    a.order_index().cmp(&b.order_index())
}

/// Stable merge sort under `compare_records`.
///
/// The comparator is not a total order once valid and invalid densities are
/// mixed, so this avoids `slice::sort_by`, which may panic on such input.
pub fn sort_records(records: Vec<DensityRecord>) -> Vec<DensityRecord> {
    merge_sort_by(records, &compare_records)
}

fn merge_sort_by<T>(mut items: Vec<T>, cmp: &impl Fn(&T, &T) -> Ordering) -> Vec<T> {
    if items.len() <= 1 {
        return items;
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort_by(items, cmp);
    let right = merge_sort_by(right, cmp);

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut l = left.into_iter().peekable();
    let mut r = right.into_iter().peekable();
    loop {
        let take_right = match (l.peek(), r.peek()) {
            (Some(a), Some(b)) => cmp(b, a) == Ordering::Less,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { r.next() } else { l.next() };
        out.extend(next);
    }
    out
}

/// One tile of the TileBasedMesh hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub root: DensityRecord,
    pub children: Vec<DensityRecord>,
    pub max_density: Density,
}

impl BatchRecord {
    /// Sorts the children and derives the root; `None` for an empty tile.
    pub fn new(tile: u32, children: Vec<DensityRecord>) -> Option<Self> {
        if children.is_empty() {
            return None;
        }
        let mut max_density = Density::Finite(0.0);
        let mut max_bucket = 0;
        for child in &children {
            if child.pixel_count > 0 {
                if let Some(d) = child.density {
                    max_density = max_density.max(d);
                }
            }
            max_bucket = max_bucket.max(child.bucket);
        }
        let root = DensityRecord::tile(tile, 0, max_density.sort_key(), max_bucket, Color::WHITE);
        Some(Self {
            root,
            children: sort_records(children),
            max_density,
        })
    }

    pub fn tile(&self) -> u32 {
        self.root.order_index()
    }
}

/// Densest tile first; equal maxima keep their tile order.
pub fn sort_batches(batches: &mut [BatchRecord]) {
    batches.sort_by(|a, b| b.max_density.sort_key().total_cmp(&a.max_density.sort_key()));
}

/// Root then its children, batch by batch.
pub fn flatten_batches(batches: Vec<BatchRecord>) -> Vec<DensityRecord> {
    let mut out = Vec::with_capacity(batches.iter().map(|b| b.children.len() + 1).sum());
    for batch in batches {
        out.push(batch.root);
        out.extend(batch.children);
    }
    out
}

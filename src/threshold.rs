//! Threshold tables and the density classifier.
//!
//! A table holds 2..=8 ascending thresholds in the display mode's raw unit
//! together with one color per bucket. The GPU copy is pre-multiplied by the
//! mode's unit scale so kernels can compare raw counts directly.

use crate::config::{DisplayType, ProfilerType, ThresholdSettings};
use crate::error::ProfilerError;
use crate::utils::{Color, ColorRangeSetting};
use serde::{Deserialize, Serialize};

pub const MIN_THRESHOLDS: usize = 2;
pub const MAX_THRESHOLDS: usize = 8;

pub const DEFAULT_DENSITY_SETTING: [u32; 8] = [1000, 2000, 3000, 4000, 5000, 8000, 10000, 12000];
pub const DEFAULT_HEAT_MAP_SETTING: [u32; 8] = [500, 1000, 1500, 2000, 2500, 3000, 3500, 4000];
pub const DEFAULT_OVERDRAW_SETTING: [u32; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

pub const SIMPLE_TILE_SETTING: [u32; 3] = [0, 5000, 10000];
pub const SIMPLE_MESH_SETTING: [u32; 3] = [0, 5000, 10000];
pub const SIMPLE_TILE_BASED_MESH_SETTING: [u32; 3] = [1, 5000, 10000];
pub const SIMPLE_HEAT_MAP_SETTING: [u32; 3] = [0, 2000, 4000];
pub const SIMPLE_OVERDRAW_SETTING: [u32; 3] = [0, 2, 5];

pub const SIMPLE_COLORS: [Color; 3] = [Color::GREEN, Color::YELLOW, Color::RED];
pub const DETAIL_COLORS: [Color; 8] = [
    Color::rgb(0.5, 1.0, 0.5),
    Color::rgb(0.0, 1.0, 0.0),
    Color::rgb(0.0, 1.0, 1.0),
    Color::rgb(1.0, 1.0, 0.0),
    Color::rgb(0.0, 0.5, 1.0),
    Color::rgb(0.0, 0.0, 1.0),
    Color::rgb(1.0, 0.0, 1.0),
    Color::rgb(1.0, 0.0, 0.0),
];

pub fn default_detail(display: DisplayType) -> &'static [u32] {
    match display {
        DisplayType::OnlyTile | DisplayType::OnlyMesh | DisplayType::TileBasedMesh => {
            &DEFAULT_DENSITY_SETTING
        }
        DisplayType::MeshHeatMap => &DEFAULT_HEAT_MAP_SETTING,
        DisplayType::Overdraw => &DEFAULT_OVERDRAW_SETTING,
    }
}

pub fn simple_setting(display: DisplayType) -> &'static [u32] {
    match display {
        DisplayType::OnlyTile => &SIMPLE_TILE_SETTING,
        DisplayType::OnlyMesh => &SIMPLE_MESH_SETTING,
        DisplayType::TileBasedMesh => &SIMPLE_TILE_BASED_MESH_SETTING,
        DisplayType::MeshHeatMap => &SIMPLE_HEAT_MAP_SETTING,
        DisplayType::Overdraw => &SIMPLE_OVERDRAW_SETTING,
    }
}

/// Color of bucket `index` for a profile level; black when out of range.
pub fn bucket_color(profiler_type: ProfilerType, index: usize) -> Color {
    let palette: &[Color] = match profiler_type {
        ProfilerType::Simple => &SIMPLE_COLORS,
        ProfilerType::Detail => &DETAIL_COLORS,
    };
    palette.get(index).copied().unwrap_or(Color::BLACK)
}

/// Multiplier turning a raw threshold into the unit the kernels compare against.
pub fn unit_scale(display: DisplayType, tile_width: u32, tile_height: u32) -> f32 {
    match display {
        DisplayType::OnlyTile => (tile_width * tile_height) as f32 * 0.0001,
        DisplayType::OnlyMesh | DisplayType::TileBasedMesh => 0.0001,
        DisplayType::MeshHeatMap => 0.001,
        DisplayType::Overdraw => 1.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEntry {
    pub threshold: f32,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    entries: Vec<ThresholdEntry>,
    scale: f32,
}

impl ThresholdTable {
    pub fn new(entries: Vec<ThresholdEntry>, scale: f32) -> Result<Self, ProfilerError> {
        if !(MIN_THRESHOLDS..=MAX_THRESHOLDS).contains(&entries.len()) {
            return Err(ProfilerError::InvalidThresholds(format!(
                "table needs {}..={} entries, got {}",
                MIN_THRESHOLDS,
                MAX_THRESHOLDS,
                entries.len()
            )));
        }
        if entries.windows(2).any(|w| w[0].threshold > w[1].threshold) {
            return Err(ProfilerError::InvalidThresholds(
                "thresholds must be non-decreasing".into(),
            ));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ProfilerError::InvalidThresholds(format!(
                "scale must be positive, got {scale}"
            )));
        }
        Ok(Self { entries, scale })
    }

    /// Builds the active table for a mode from the preset or user list.
    pub fn for_mode(
        display: DisplayType,
        profiler_type: ProfilerType,
        settings: &ThresholdSettings,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self, ProfilerError> {
        let raw = match profiler_type {
            ProfilerType::Simple => simple_setting(display),
            ProfilerType::Detail => settings.get(display),
        };
        let entries = raw
            .iter()
            .enumerate()
            .map(|(i, &t)| ThresholdEntry {
                threshold: t as f32,
                color: bucket_color(profiler_type, i),
            })
            .collect();
        Self::new(entries, unit_scale(display, tile_width, tile_height))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn entries(&self) -> &[ThresholdEntry] {
        &self.entries
    }

    pub fn threshold(&self, bucket: usize) -> Option<f32> {
        self.entries.get(bucket).map(|e| e.threshold)
    }

    pub fn color(&self, bucket: usize) -> Color {
        self.entries
            .get(bucket)
            .map(|e| e.color)
            .unwrap_or(Color::BLACK)
    }

    /// Hides or shows a bucket in the overlay by toggling its alpha.
    pub fn set_bucket_active(&mut self, bucket: usize, active: bool) {
        if let Some(e) = self.entries.get_mut(bucket) {
            e.color.a = if active { 1.0 } else { 0.0 };
        }
    }

    /// Classifies a value in raw units.
    pub fn classify(&self, value: f32) -> (usize, Color) {
        let bucket = classify_against(self.entries.iter().map(|e| e.threshold), value);
        (bucket, self.color(bucket))
    }

    /// Classifies a value already expressed in the kernels' scaled unit.
    pub fn classify_scaled(&self, value: f32) -> (usize, Color) {
        let bucket =
            classify_against(self.entries.iter().map(|e| e.threshold * self.scale), value);
        (bucket, self.color(bucket))
    }

    /// Flat GPU form: thresholds pre-multiplied by the unit scale.
    pub fn gpu_settings(&self) -> Vec<ColorRangeSetting> {
        self.entries
            .iter()
            .map(|e| ColorRangeSetting {
                color: e.color.to_array(),
                threshold: e.threshold * self.scale,
                _pad: [0.0; 3],
            })
            .collect()
    }
}

/// Last index whose threshold is strictly below `value`, else 0.
pub fn classify_against(thresholds: impl IntoIterator<Item = f32>, value: f32) -> usize {
    let mut bucket = 0;
    for (i, t) in thresholds.into_iter().enumerate() {
        if t < value {
            bucket = i;
        } else {
            break;
        }
    }
    bucket
}

use crate::error::ProfilerError;
use crate::threshold::{self, MAX_THRESHOLDS, MIN_THRESHOLDS};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MIN_TILE_SIZE: u32 = 32;
pub const MAX_TILE_SIZE: u32 = 128;
pub const DEFAULT_TILE_SIZE: u32 = 100;

/// The five measurement strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayType {
    OnlyTile,
    OnlyMesh,
    TileBasedMesh,
    MeshHeatMap,
    Overdraw,
}

impl DisplayType {
    pub const ALL: [DisplayType; 5] = [
        DisplayType::OnlyTile,
        DisplayType::OnlyMesh,
        DisplayType::TileBasedMesh,
        DisplayType::MeshHeatMap,
        DisplayType::Overdraw,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DisplayType::OnlyTile => "OnlyTile",
            DisplayType::OnlyMesh => "OnlyMesh",
            DisplayType::TileBasedMesh => "TileBasedMesh",
            DisplayType::MeshHeatMap => "MeshHeatMap",
            DisplayType::Overdraw => "Overdraw",
        }
    }

    /// Modes whose overlay is drawn per tile.
    pub fn uses_tiles(self) -> bool {
        matches!(self, DisplayType::OnlyTile | DisplayType::TileBasedMesh)
    }
}

/// Simple = 3 buckets with fixed thresholds, Detail = user editable list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfilerType {
    Simple,
    Detail,
}

/// How often the entity list is recollected from the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateType {
    Once,
    EveryFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatMapSettings {
    pub range: u32,
    pub step: u32,
    pub ramp_min: f32,
    pub ramp_max: f32,
}

impl Default for HeatMapSettings {
    fn default() -> Self {
        Self {
            range: 2,
            step: 1,
            ramp_min: 0.0,
            ramp_max: 1.0,
        }
    }
}

impl HeatMapSettings {
    /// Sample count of the checkerboard neighbourhood.
    pub fn offset_count(&self) -> u32 {
        let r = self.range;
        r * r + (r + 1) * (r + 1)
    }

    /// Neighbourhood offsets `(i*step, j*step)` with `i + j` even.
    pub fn offsets(&self) -> Vec<(i32, i32)> {
        let r = self.range as i32;
        let s = self.step as i32;
        let mut out = Vec::with_capacity(self.offset_count() as usize);
        for j in -r..=r {
            for i in -r..=r {
                if (i + j).rem_euclid(2) == 0 {
                    out.push((i * s, j * s));
                }
            }
        }
        out
    }

    fn clamped(self) -> Self {
        let ramp_min = self.ramp_min.clamp(0.0, 0.99);
        Self {
            range: self.range.clamp(1, 8),
            step: self.step.clamp(1, 5),
            ramp_min,
            ramp_max: self.ramp_max.clamp(0.01, 1.0).max(ramp_min),
        }
    }
}

/// User editable Detail threshold lists, raw units per mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSettings {
    pub only_tile: Vec<u32>,
    pub only_mesh: Vec<u32>,
    pub tile_based_mesh: Vec<u32>,
    pub mesh_heat_map: Vec<u32>,
    pub overdraw: Vec<u32>,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            only_tile: threshold::DEFAULT_DENSITY_SETTING.to_vec(),
            only_mesh: threshold::DEFAULT_DENSITY_SETTING.to_vec(),
            tile_based_mesh: threshold::DEFAULT_DENSITY_SETTING.to_vec(),
            mesh_heat_map: threshold::DEFAULT_HEAT_MAP_SETTING.to_vec(),
            overdraw: threshold::DEFAULT_OVERDRAW_SETTING.to_vec(),
        }
    }
}

impl ThresholdSettings {
    pub fn get(&self, display: DisplayType) -> &[u32] {
        match display {
            DisplayType::OnlyTile => &self.only_tile,
            DisplayType::OnlyMesh => &self.only_mesh,
            DisplayType::TileBasedMesh => &self.tile_based_mesh,
            DisplayType::MeshHeatMap => &self.mesh_heat_map,
            DisplayType::Overdraw => &self.overdraw,
        }
    }

    pub fn set(&mut self, display: DisplayType, values: Vec<u32>) -> Result<(), ProfilerError> {
        validate_list(display, &values)?;
        *self.slot(display) = values;
        Ok(())
    }

    pub fn reset(&mut self, display: DisplayType) {
        *self.slot(display) = threshold::default_detail(display).to_vec();
    }

    fn slot(&mut self, display: DisplayType) -> &mut Vec<u32> {
        match display {
            DisplayType::OnlyTile => &mut self.only_tile,
            DisplayType::OnlyMesh => &mut self.only_mesh,
            DisplayType::TileBasedMesh => &mut self.tile_based_mesh,
            DisplayType::MeshHeatMap => &mut self.mesh_heat_map,
            DisplayType::Overdraw => &mut self.overdraw,
        }
    }
}

fn validate_list(display: DisplayType, values: &[u32]) -> Result<(), ProfilerError> {
    if !(MIN_THRESHOLDS..=MAX_THRESHOLDS).contains(&values.len()) {
        return Err(ProfilerError::InvalidThresholds(format!(
            "{} needs {}..={} entries, got {}",
            display.name(),
            MIN_THRESHOLDS,
            MAX_THRESHOLDS,
            values.len()
        )));
    }
    if values.windows(2).any(|w| w[0] > w[1]) {
        return Err(ProfilerError::InvalidThresholds(format!(
            "{} thresholds must be non-decreasing",
            display.name()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub enabled: bool,
    pub display_type: DisplayType,
    pub profiler_type: ProfilerType,
    pub update_type: UpdateType,
    pub tile_width: u32,
    pub tile_height: u32,
    pub heat_map: HeatMapSettings,
    pub thresholds: ThresholdSettings,
    pub max_entity_tile_entries: usize,
    pub capture_screenshots: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            display_type: DisplayType::OnlyTile,
            profiler_type: ProfilerType::Simple,
            update_type: UpdateType::EveryFrame,
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            heat_map: HeatMapSettings::default(),
            thresholds: ThresholdSettings::default(),
            max_entity_tile_entries: 4 * 1024 * 1024,
            capture_screenshots: true,
        }
    }
}

impl ProfilerConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ProfilerError> {
        let config: ProfilerConfig = serde_json::from_str(text)?;
        config.validated()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ProfilerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Clamps the range constrained fields and rejects malformed thresholds.
    pub fn validated(mut self) -> Result<Self, ProfilerError> {
        self.tile_width = clamp_tile(self.tile_width);
        self.tile_height = clamp_tile(self.tile_height);
        self.heat_map = self.heat_map.clamped();
        if self.max_entity_tile_entries == 0 {
            return Err(ProfilerError::InvalidConfig(
                "max_entity_tile_entries must be positive".into(),
            ));
        }
        for display in DisplayType::ALL {
            validate_list(display, self.thresholds.get(display))?;
        }
        Ok(self)
    }

    pub fn set_tile_size(&mut self, width: u32, height: u32) {
        self.tile_width = clamp_tile(width);
        self.tile_height = clamp_tile(height);
    }

    pub fn set_heat_map(&mut self, settings: HeatMapSettings) {
        self.heat_map = settings.clamped();
    }
}

pub fn clamp_tile(v: u32) -> u32 {
    v.clamp(MIN_TILE_SIZE, MAX_TILE_SIZE)
}

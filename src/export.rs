//! Tabular export of profiler reports.

use crate::config::DisplayType;
use crate::error::ProfilerError;
use crate::overlay::bucket_image_to_rgba;
use crate::record::{sort_records, DensityRecord};
use crate::report::ProfilerReport;
use crate::threshold::ThresholdTable;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTable {
    pub title: String,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

pub fn columns_for(display: DisplayType) -> Vec<&'static str> {
    match display {
        DisplayType::OnlyTile => vec!["TileIndex", "VertexCount", "Density(per 10k px)", "Level"],
        DisplayType::OnlyMesh => vec!["Mesh", "Path", "VertexCount", "PixelCount", "Density", "Level"],
        DisplayType::TileBasedMesh => vec![
            "TileIndex",
            "Mesh",
            "Path",
            "VertexUsage",
            "PixelCount",
            "Density",
            "Level",
        ],
        DisplayType::MeshHeatMap | DisplayType::Overdraw => vec!["Level", "Threshold", "Pixels"],
    }
}

impl ReportTable {
    /// Rows in report order.
    pub fn from_report(report: &ProfilerReport) -> Self {
        Self::build(report, report.records.clone(), "")
    }

    /// Rows in comparator order; identical to `from_report` for the
    /// already sorted TileBasedMesh hierarchy.
    pub fn sorted_from_report(report: &ProfilerReport) -> Self {
        let records = match report.display_type {
            DisplayType::TileBasedMesh => report.records.clone(),
            _ => sort_records(report.records.clone()),
        };
        Self::build(report, records, " (sorted)")
    }

    fn build(report: &ProfilerReport, records: Vec<DensityRecord>, suffix: &str) -> Self {
        let display = report.display_type;
        let rows = match display {
            DisplayType::MeshHeatMap | DisplayType::Overdraw => report
                .thresholds
                .iter()
                .enumerate()
                .map(|(i, entry)| {
                    vec![
                        i.to_string(),
                        format!("{}", entry.threshold),
                        report.histogram.get(i).copied().unwrap_or(0).to_string(),
                    ]
                })
                .collect(),
            _ => records.iter().map(|r| record_row(display, r)).collect(),
        };
        Self {
            title: format!("{} frame {}{}", display.name(), report.frame_index, suffix),
            columns: columns_for(display),
            rows,
        }
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push_str(&csv_line(self.columns.iter().copied()));
        for row in &self.rows {
            out.push_str(&csv_line(row.iter().map(String::as_str)));
        }
        out
    }
}

fn record_row(display: DisplayType, r: &DensityRecord) -> Vec<String> {
    let level = r.bucket.to_string();
    let density = r
        .density
        .map(|d| d.to_string())
        .unwrap_or_else(|| format!("{:.2}", r.tile_density.unwrap_or(0.0)));
    let path = r.hierarchy_path.clone().unwrap_or_default();
    let mesh = r.mesh_name().unwrap_or_default().to_string();
    let tile = r.tile_index().map(|t| t.to_string()).unwrap_or_default();
    match display {
        DisplayType::OnlyTile => vec![tile, r.vertex_count.to_string(), density, level],
        DisplayType::OnlyMesh => vec![
            mesh,
            path,
            r.vertex_count.to_string(),
            r.pixel_count.to_string(),
            density,
            level,
        ],
        _ => vec![
            tile,
            mesh,
            path,
            r.vertex_usage().unwrap_or_default(),
            if r.pixel_count > 0 {
                r.pixel_count.to_string()
            } else {
                String::new()
            },
            density,
            level,
        ],
    }
}

fn csv_line<'a>(cells: impl Iterator<Item = &'a str>) -> String {
    let mut line = cells
        .map(|c| {
            if c.contains([',', '"', '\n']) {
                format!("\"{}\"", c.replace('"', "\"\""))
            } else {
                c.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Base file name, e.g. `Profiler_OnlyTile_120`.
pub fn report_stem(report: &ProfilerReport) -> String {
    format!("Profiler_{}_{}", report.display_type.name(), report.frame_index)
}

pub fn write_csv(report: &ProfilerReport, dir: &Path) -> Result<PathBuf, ProfilerError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.csv", report_stem(report)));
    let mut file = BufWriter::new(fs::File::create(&path)?);
    file.write_all(ReportTable::from_report(report).to_csv().as_bytes())?;
    if report.display_type == DisplayType::OnlyTile || report.display_type == DisplayType::OnlyMesh {
        file.write_all(b"\n")?;
        file.write_all(ReportTable::sorted_from_report(report).to_csv().as_bytes())?;
    }
    file.flush()?;
    Ok(path)
}

pub fn write_json(report: &ProfilerReport, dir: &Path) -> Result<PathBuf, ProfilerError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", report_stem(report)));
    let mut file = BufWriter::new(fs::File::create(&path)?);
    serde_json::to_writer_pretty(&mut file, report)?;
    file.flush()?;
    Ok(path)
}

/// Writes the profiler image and any captured frames as PNG files.
pub fn save_images(report: &ProfilerReport, dir: &Path) -> Result<Vec<PathBuf>, ProfilerError> {
    fs::create_dir_all(dir)?;
    let stem = report_stem(report);
    let mut written = Vec::new();
    if let Some(image) = &report.image {
        let table = ThresholdTable::new(report.thresholds.clone(), report.threshold_scale)?;
        let path = dir.join(format!("{stem}_profiler.png"));
        bucket_image_to_rgba(image, &table).save(&path)?;
        written.push(path);
    }
    for (suffix, img) in [
        ("screenshot", &report.screenshot),
        ("screenshot_with_overlay", &report.screenshot_with_overlay),
    ] {
        if let Some(img) = img {
            let path = dir.join(format!("{stem}_{suffix}.png"));
            img.save(&path)?;
            written.push(path);
        }
    }
    Ok(written)
}

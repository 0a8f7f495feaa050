use image::{Rgba, RgbaImage};
use std::path::PathBuf;
use vertex_profiler::config::{HeatMapSettings, ThresholdSettings};
use vertex_profiler::export::{
    columns_for, report_stem, save_images, write_csv, write_json, ReportTable,
};
use vertex_profiler::overlay::{bucket_image_to_rgba, compose_overlay, draw_grid, ramp_value};
use vertex_profiler::report::{
    build_report, BucketImage, EntitySummary, ReadbackSnapshot, ReportInputs,
};
use vertex_profiler::threshold::ThresholdTable;
use vertex_profiler::tiles::TileGrid;
use vertex_profiler::utils::PixelSize;
use vertex_profiler::{DisplayType, ProfilerType};

fn inputs(display_type: DisplayType, entities: Vec<EntitySummary>) -> ReportInputs {
    ReportInputs {
        display_type,
        profiler_type: ProfilerType::Detail,
        frame_index: 42,
        grid: TileGrid::new(PixelSize::new(4, 2), 2, 2),
        table: ThresholdTable::for_mode(
            display_type,
            ProfilerType::Detail,
            &ThresholdSettings::default(),
            2,
            2,
        )
        .unwrap(),
        entities,
        heat_map: HeatMapSettings::default(),
    }
}

fn entity(index: u32, name: &str, vertex_count: u32) -> EntitySummary {
    EntitySummary {
        index,
        mesh_name: name.into(),
        hierarchy_path: format!("root/{name}"),
        vertex_count,
        drawn: true,
    }
}

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("vertex_profiler_{}", uuid::Uuid::new_v4()))
}

fn mesh_report() -> vertex_profiler::ProfilerReport {
    let inputs = inputs(
        DisplayType::OnlyMesh,
        vec![entity(0, "rock", 30), entity(1, "tree, oak", 5)],
    );
    let snapshot = ReadbackSnapshot {
        pixel_counts: Some(vec![6, 0]),
        entity_ids: Some(vec![1, 1, 1, 0, 1, 1, 1, 0]),
        ..ReadbackSnapshot::default()
    };
    build_report(&inputs, &snapshot)
}

#[test]
fn mesh_table_lists_every_drawn_entity() {
    let report = mesh_report();
    let table = ReportTable::from_report(&report);
    assert_eq!(table.columns, columns_for(DisplayType::OnlyMesh));
    assert_eq!(table.title, "OnlyMesh frame 42");
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[0][0], "rock");
    assert_eq!(table.rows[0][1], "root/rock");
    assert_eq!(table.rows[0][3], "6");
    assert_eq!(table.rows[0][4], "5.00");
    assert_eq!(table.rows[1][4], "no pixel occupancy");

    let sorted = ReportTable::sorted_from_report(&report);
    assert_eq!(sorted.rows[0][0], "tree, oak");

    let csv = table.to_csv();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("Mesh,Path,VertexCount,PixelCount,Density,Level"));
    assert_eq!(lines.next(), Some("rock,root/rock,30,6,5.00,7"));
    assert!(lines.next().unwrap().starts_with("\"tree, oak\""));
}

#[test]
fn rebuilding_from_the_same_snapshot_is_identical() {
    let first = serde_json::to_string(&mesh_report()).unwrap();
    let second = serde_json::to_string(&mesh_report()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn mesh_image_comes_from_the_id_buffer() {
    let report = mesh_report();
    let image = report.image.as_ref().unwrap();
    // 5 vertices per pixel is above every detail threshold
    assert_eq!(image.bucket_at(0, 0), Some(7));
    assert_eq!(image.bucket_at(3, 0), None);
    assert_eq!(report.histogram[7], 6);
}

#[test]
fn tile_report_rows_and_missing_slots() {
    let inputs = inputs(DisplayType::OnlyTile, vec![]);
    let snapshot = ReadbackSnapshot {
        vertex_counts: Some(vec![0, 1]),
        ..ReadbackSnapshot::default()
    };
    let report = build_report(&inputs, &snapshot);
    assert_eq!(report.records.len(), 1);
    let table = ReportTable::from_report(&report);
    assert_eq!(table.rows[0], vec!["1", "1", "2500.00", "1"]);
    assert!(report.image.is_none());
    assert_eq!(report.histogram, vec![0; 8]);

    let empty = build_report(&inputs, &ReadbackSnapshot::default());
    assert!(empty.records.is_empty());
}

#[test]
fn histogram_modes_export_bucket_totals() {
    let inputs = inputs(DisplayType::Overdraw, vec![]);
    let snapshot = ReadbackSnapshot {
        profiler_image: Some(vec![0, 1, 1, 2, 0, 0, 8, 8]),
        ..ReadbackSnapshot::default()
    };
    let report = build_report(&inputs, &snapshot);
    let table = ReportTable::from_report(&report);
    assert_eq!(table.columns, vec!["Level", "Threshold", "Pixels"]);
    assert_eq!(table.rows.len(), 8);
    assert_eq!(table.rows[0], vec!["0", "1", "2"]);
    assert_eq!(table.rows[7], vec!["7", "8", "2"]);
}

#[test]
fn files_are_written_with_the_report_stem() {
    let mut report = mesh_report();
    report.screenshot = Some(RgbaImage::new(4, 2));
    let dir = scratch_dir();
    assert_eq!(report_stem(&report), "Profiler_OnlyMesh_42");

    let csv = write_csv(&report, &dir).unwrap();
    let text = std::fs::read_to_string(&csv).unwrap();
    // report order then comparator order
    assert_eq!(text.matches("Mesh,Path").count(), 2);

    let json = write_json(&report, &dir).unwrap();
    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
    assert_eq!(value["frame_index"], 42);
    assert_eq!(value["records"].as_array().unwrap().len(), 2);

    let images = save_images(&report, &dir).unwrap();
    assert_eq!(images.len(), 2);
    assert!(images.iter().all(|p| p.exists()));
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn overlay_blends_classified_pixels() {
    let report = mesh_report();
    let table = ThresholdTable::new(report.thresholds.clone(), report.threshold_scale).unwrap();
    let image = report.image.as_ref().unwrap();

    let rgba = bucket_image_to_rgba(image, &table);
    assert_eq!(rgba.get_pixel(0, 0).0, table.color(7).to_rgba8());
    assert_eq!(rgba.get_pixel(3, 0).0, [0, 0, 0, 0]);

    let frame = RgbaImage::from_pixel(4, 2, Rgba([0, 0, 0, 255]));
    let out = compose_overlay(&frame, Some(image), &table, None, None);
    // bucket 7 is red, blended at half strength
    assert_eq!(out.get_pixel(0, 0).0, [128, 0, 0, 255]);
    assert_eq!(out.get_pixel(3, 0).0, [0, 0, 0, 255]);
}

#[test]
fn grid_and_ramp() {
    let mut img = RgbaImage::new(8, 8);
    draw_grid(&mut img, &TileGrid::new(PixelSize::new(8, 8), 4, 4));
    assert_eq!(img.get_pixel(4, 6).0, [255; 4]);
    assert_eq!(img.get_pixel(6, 4).0, [255; 4]);
    assert_eq!(img.get_pixel(6, 6).0, [0; 4]);

    assert!((ramp_value(0, 3, 0.2, 1.0) - 0.2).abs() < 1e-6);
    assert!((ramp_value(1, 3, 0.2, 1.0) - 0.6).abs() < 1e-6);
    assert!((ramp_value(2, 3, 0.2, 1.0) - 1.0).abs() < 1e-6);
    assert_eq!(ramp_value(0, 1, 0.3, 1.0), 0.3);

    let image = BucketImage {
        width: 2,
        height: 1,
        buckets: vec![1, 3],
    };
    assert_eq!(image.histogram(2), vec![1, 0]);
}

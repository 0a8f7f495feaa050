use vertex_profiler::record::{
    compare_records, flatten_batches, sort_batches, sort_records, BatchRecord, Subject,
};
use vertex_profiler::utils::Color;
use vertex_profiler::{Density, DensityRecord};
use std::cmp::Ordering;

fn mesh(entity: u32, density: Density) -> DensityRecord {
    DensityRecord {
        subject: Subject::Mesh {
            entity,
            name: format!("mesh{entity}"),
        },
        vertex_count: 10,
        mesh_vertex_count: None,
        pixel_count: if density == Density::NoCoverage { 0 } else { 10 },
        density: Some(density),
        tile_density: None,
        bucket: 0,
        color: Color::WHITE,
        hierarchy_path: None,
    }
}

fn tile(index: u32, per_10k: f32) -> DensityRecord {
    DensityRecord::tile(index, 1, per_10k, 0, Color::WHITE)
}

fn entities(records: &[DensityRecord]) -> Vec<u32> {
    records.iter().map(DensityRecord::order_index).collect()
}

#[test]
fn higher_density_sorts_first() {
    let records = vec![
        mesh(0, Density::Finite(0.5)),
        mesh(1, Density::Finite(2.0)),
        mesh(2, Density::NoCoverage),
        mesh(3, Density::Finite(1.0)),
    ];
    assert_eq!(entities(&sort_records(records)), vec![2, 1, 3, 0]);
}

#[test]
fn ties_fall_back_to_index() {
    let records = vec![
        mesh(4, Density::Finite(1.0)),
        mesh(1, Density::Finite(1.0)),
        mesh(3, Density::Finite(1.0)),
    ];
    assert_eq!(entities(&sort_records(records)), vec![1, 3, 4]);
}

#[test]
fn tiles_order_by_secondary_density() {
    let records = vec![tile(0, 10.0), tile(1, 300.0), tile(2, 10.0), tile(3, 50.0)];
    assert_eq!(entities(&sort_records(records)), vec![1, 3, 0, 2]);
}

#[test]
fn mixed_validity_orders_by_index_only() {
    // one side lacks a positive density, so magnitude is ignored
    let empty = mesh(0, Density::Finite(0.0));
    let dense = mesh(1, Density::Finite(5.0));
    assert_eq!(compare_records(&empty, &dense), Ordering::Less);
    assert_eq!(compare_records(&dense, &empty), Ordering::Greater);
    assert_eq!(entities(&sort_records(vec![dense, empty])), vec![0, 1]);
}

#[test]
fn no_coverage_displays_as_text() {
    assert_eq!(Density::NoCoverage.to_string(), "no pixel occupancy");
    assert_eq!(Density::Finite(0.5).to_string(), "0.50");
    assert_eq!(Density::from_counts(4, 0), Density::NoCoverage);
    assert_eq!(Density::from_counts(4, 8), Density::Finite(0.5));
    assert_eq!(Density::Finite(3.0).max(Density::NoCoverage), Density::NoCoverage);
}

fn batch(tile_index: u32, max: Density) -> BatchRecord {
    BatchRecord {
        root: tile(tile_index, max.sort_key()),
        children: vec![],
        max_density: max,
    }
}

#[test]
fn batches_sort_by_max_density_descending() {
    let mut batches = vec![
        batch(0, Density::Finite(5.0)),
        batch(1, Density::Finite(12.0)),
        batch(2, Density::NoCoverage),
        batch(3, Density::Finite(12.0)),
    ];
    sort_batches(&mut batches);
    let tiles: Vec<u32> = batches.iter().map(BatchRecord::tile).collect();
    assert_eq!(tiles, vec![2, 1, 3, 0]);
}

#[test]
fn batch_root_summarises_children() {
    let mut a = mesh(0, Density::Finite(0.2));
    a.bucket = 1;
    let mut b = mesh(1, Density::Finite(0.7));
    b.bucket = 3;
    let batch = BatchRecord::new(7, vec![a, b]).unwrap();
    assert_eq!(batch.tile(), 7);
    assert_eq!(batch.max_density, Density::Finite(0.7));
    assert_eq!(batch.root.bucket, 3);
    assert_eq!(entities(&batch.children), vec![1, 0]);
    assert!(BatchRecord::new(8, vec![]).is_none());

    let flat = flatten_batches(vec![batch]);
    assert_eq!(flat.len(), 3);
    assert_eq!(flat[0].subject, Subject::Tile { index: 7 });
}

#[test]
fn vertex_usage_formats_share() {
    let mut r = mesh(0, Density::Finite(1.0));
    assert_eq!(r.vertex_usage(), None);
    r.vertex_count = 1;
    r.mesh_vertex_count = Some(3);
    assert_eq!(r.vertex_usage().unwrap(), "1(33.33%)");
}

use vertex_profiler::config::{DisplayType, ProfilerType, ThresholdSettings};
use vertex_profiler::threshold::{
    classify_against, unit_scale, ThresholdEntry, ThresholdTable, DEFAULT_DENSITY_SETTING,
    DETAIL_COLORS, SIMPLE_COLORS,
};
use vertex_profiler::utils::Color;

fn detail_table(display: DisplayType) -> ThresholdTable {
    ThresholdTable::for_mode(display, ProfilerType::Detail, &ThresholdSettings::default(), 100, 100)
        .unwrap()
}

#[test]
fn classify_picks_last_threshold_below_value() {
    let t = [1000.0, 2000.0, 3000.0];
    assert_eq!(classify_against(t, 500.0), 0);
    assert_eq!(classify_against(t, 1000.0), 0);
    assert_eq!(classify_against(t, 1000.5), 0);
    assert_eq!(classify_against(t, 2000.5), 1);
    assert_eq!(classify_against(t, 3000.0), 1);
    assert_eq!(classify_against(t, 1e9), 2);
}

#[test]
fn classify_is_monotonic() {
    let table = detail_table(DisplayType::OnlyMesh);
    let mut last = 0;
    for i in 0..20000 {
        let (bucket, _) = table.classify(i as f32);
        assert!(bucket >= last, "bucket dropped at {i}");
        last = bucket;
    }
    assert_eq!(last, DEFAULT_DENSITY_SETTING.len() - 1);
}

#[test]
fn detail_density_example_lands_in_second_bucket() {
    let table = detail_table(DisplayType::OnlyMesh);
    // 2500 vertices per 10k pixels
    assert_eq!(table.classify(2500.0).0, 1);
    assert_eq!(table.classify_scaled(2500.0 / 10000.0).0, 1);
    assert_eq!(table.color(1), DETAIL_COLORS[1]);
}

#[test]
fn rescaling_preserves_order() {
    let entries = [1000.0, 2000.0, 3000.0]
        .iter()
        .map(|&threshold| ThresholdEntry {
            threshold,
            color: Color::WHITE,
        })
        .collect::<Vec<_>>();
    let raw = ThresholdTable::new(entries.clone(), 1.0).unwrap();
    let per_tile = ThresholdTable::new(entries, 64.0 * 64.0 / 10000.0).unwrap();
    let values = [100.0f32, 1500.0, 2500.0, 9000.0];
    let a: Vec<usize> = values.iter().map(|v| raw.classify(*v).0).collect();
    let b: Vec<usize> = values
        .iter()
        .map(|v| per_tile.classify_scaled(v * per_tile.scale()).0)
        .collect();
    assert_eq!(a, b);
    assert!(a.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn unit_scales_per_mode() {
    assert!((unit_scale(DisplayType::OnlyTile, 100, 100) - 1.0).abs() < 1e-6);
    assert!((unit_scale(DisplayType::OnlyTile, 64, 32) - 0.2048).abs() < 1e-6);
    assert!((unit_scale(DisplayType::OnlyMesh, 100, 100) - 0.0001).abs() < 1e-9);
    assert!((unit_scale(DisplayType::MeshHeatMap, 100, 100) - 0.001).abs() < 1e-9);
    assert!((unit_scale(DisplayType::Overdraw, 100, 100) - 1.0).abs() < 1e-9);
}

#[test]
fn simple_tables_have_three_buckets() {
    for display in DisplayType::ALL {
        let table =
            ThresholdTable::for_mode(display, ProfilerType::Simple, &ThresholdSettings::default(), 100, 100)
                .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.color(2), SIMPLE_COLORS[2]);
        assert_eq!(table.color(7), Color::BLACK);
    }
}

#[test]
fn gpu_settings_are_premultiplied() {
    let table = detail_table(DisplayType::OnlyMesh);
    let gpu = table.gpu_settings();
    assert_eq!(gpu.len(), 8);
    assert!((gpu[0].threshold - 0.1).abs() < 1e-6);
    assert!((gpu[7].threshold - 1.2).abs() < 1e-6);
}

#[test]
fn rejects_bad_tables() {
    let e = |t: f32| ThresholdEntry {
        threshold: t,
        color: Color::WHITE,
    };
    assert!(ThresholdTable::new(vec![e(1.0)], 1.0).is_err());
    assert!(ThresholdTable::new(vec![e(2.0), e(1.0)], 1.0).is_err());
    assert!(ThresholdTable::new(vec![e(1.0); 9], 1.0).is_err());
    assert!(ThresholdTable::new(vec![e(1.0), e(2.0)], 0.0).is_err());
}

#[test]
fn inactive_bucket_only_hides_color() {
    let mut table = detail_table(DisplayType::Overdraw);
    let before = table.classify(3.5);
    table.set_bucket_active(before.0, false);
    let after = table.classify(3.5);
    assert_eq!(before.0, after.0);
    assert_eq!(after.1.a, 0.0);
}

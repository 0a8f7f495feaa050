mod common;

use common::{cluster, pixel_camera, quad, Z};
use glam::{Mat4, Vec3};
use image::RgbaImage;
use vertex_profiler::gpu::{
    BufferId, Capabilities, CompletedReadback, FrameView, Kernel, KernelKind, MeshHandle,
    RasterDraw, ReadbackId, TargetId,
};
use vertex_profiler::record::{sort_records, Subject};
use vertex_profiler::{
    Density, DisableReason, DisplayType, FrameCapture, FrameOutcome, MeshData, NoCapture,
    ProfilerConfig, ProfilerDevice, ProfilerError, ProfilerReport, SceneEntity, SoftwareDevice,
    UpdateType,
    VertexProfiler,
};

fn config(display_type: DisplayType) -> ProfilerConfig {
    ProfilerConfig {
        display_type,
        capture_screenshots: false,
        ..ProfilerConfig::default()
    }
}

fn profiler(display_type: DisplayType) -> VertexProfiler<SoftwareDevice> {
    VertexProfiler::new(SoftwareDevice::new(), config(display_type)).unwrap()
}

fn add<D: ProfilerDevice>(profiler: &mut VertexProfiler<D>, scene: &mut Vec<SceneEntity>, mesh: MeshData) {
    let name = mesh.name.clone();
    let key = profiler.register_mesh(mesh);
    scene.push(SceneEntity::new(name, Some(key), Mat4::IDENTITY));
}

/// Requests a report, runs one frame and drains it with no readback latency.
fn profile_once<D: ProfilerDevice>(
    profiler: &mut VertexProfiler<D>,
    size: (u32, u32),
    scene: &[SceneEntity],
) -> ProfilerReport {
    profiler.request_report();
    let outcome = profiler.run_frame(&pixel_camera(size.0, size.1), scene);
    assert!(outcome.is_profiled(), "frame not profiled: {outcome:?}");
    assert!(profiler.poll_readbacks());
    profiler.on_frame_completed(&mut NoCapture);
    profiler.take_report().unwrap()
}

struct SolidCapture(u32, u32);

impl FrameCapture for SolidCapture {
    fn capture_color(&mut self) -> Option<RgbaImage> {
        Some(RgbaImage::from_pixel(self.0, self.1, image::Rgba([10, 20, 30, 255])))
    }
}

/// Software device that refuses to upload one named mesh.
struct FailingUploads {
    inner: SoftwareDevice,
    refused: &'static str,
}

impl FailingUploads {
    fn profiler(display_type: DisplayType, refused: &'static str) -> VertexProfiler<Self> {
        let device = Self {
            inner: SoftwareDevice::new(),
            refused,
        };
        VertexProfiler::new(device, config(display_type)).unwrap()
    }
}

impl ProfilerDevice for FailingUploads {
    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }
    fn create_buffer(&mut self, label: &'static str, len: usize) -> Result<BufferId, ProfilerError> {
        self.inner.create_buffer(label, len)
    }
    fn write_buffer(&mut self, buffer: BufferId, data: &[u32]) -> Result<(), ProfilerError> {
        self.inner.write_buffer(buffer, data)
    }
    fn release_buffer(&mut self, buffer: BufferId) {
        self.inner.release_buffer(buffer)
    }
    fn create_target(&mut self, label: &'static str, width: u32, height: u32) -> Result<TargetId, ProfilerError> {
        self.inner.create_target(label, width, height)
    }
    fn release_target(&mut self, target: TargetId) {
        self.inner.release_target(target)
    }
    fn upload_mesh(&mut self, mesh: &MeshData) -> Result<MeshHandle, ProfilerError> {
        if mesh.name == self.refused {
            return Err(ProfilerError::Device(format!("cannot upload {}", mesh.name)));
        }
        self.inner.upload_mesh(mesh)
    }
    fn release_mesh(&mut self, mesh: MeshHandle) {
        self.inner.release_mesh(mesh)
    }
    fn bind_random_write(&mut self, slot: u32, buffer: BufferId) -> Result<(), ProfilerError> {
        self.inner.bind_random_write(slot, buffer)
    }
    fn clear_random_write_targets(&mut self) {
        self.inner.clear_random_write_targets()
    }
    fn render_ids(&mut self, view: &FrameView, target: TargetId, draws: &[RasterDraw]) -> Result<(), ProfilerError> {
        self.inner.render_ids(view, target, draws)
    }
    fn render_overdraw(&mut self, view: &FrameView, counters: BufferId, draws: &[RasterDraw]) -> Result<(), ProfilerError> {
        self.inner.render_overdraw(view, counters, draws)
    }
    fn dispatch(&mut self, kernel: &Kernel<'_>) -> Result<(), ProfilerError> {
        self.inner.dispatch(kernel)
    }
    fn request_readback(&mut self, buffer: BufferId) -> Result<ReadbackId, ProfilerError> {
        self.inner.request_readback(buffer)
    }
    fn request_target_readback(&mut self, target: TargetId) -> Result<ReadbackId, ProfilerError> {
        self.inner.request_target_readback(target)
    }
    fn poll_readbacks(&mut self) -> Vec<CompletedReadback> {
        self.inner.poll_readbacks()
    }
}

#[test]
fn only_tile_counts_visible_vertices() {
    let mut p = profiler(DisplayType::OnlyTile);
    let mut scene = Vec::new();
    add(&mut p, &mut scene, cluster("small", 100, 0.0, 0.0));
    add(&mut p, &mut scene, cluster("large", 200, 20.0, 20.0));
    add(&mut p, &mut scene, cluster("offscreen", 50, -500.0, 0.0));

    p.request_report();
    let outcome = p.run_frame(&pixel_camera(200, 200), &scene);
    assert!(matches!(outcome, FrameOutcome::Profiled { dispatched: 2 }));
    assert!(p.poll_readbacks());
    let report = p.take_report().unwrap();

    assert_eq!(report.grid.tile_count(), 4);
    assert_eq!(report.records.len(), 1);
    let tile = &report.records[0];
    assert_eq!(tile.subject, Subject::Tile { index: 0 });
    assert_eq!(tile.vertex_count, 300);
    assert!((tile.tile_density.unwrap() - 300.0).abs() < 1e-3);
    assert_eq!(tile.bucket, 0);

    // one 100x100 tile lit in the lowest bucket
    assert_eq!(report.histogram, vec![10000, 0, 0]);
    let image = report.image.unwrap();
    assert_eq!(image.bucket_at(5, 5), Some(0));
    assert_eq!(image.bucket_at(150, 150), None);
}

#[test]
fn only_mesh_measures_density_and_flags_empty_coverage() {
    let mut p = profiler(DisplayType::OnlyMesh);
    let mut scene = Vec::new();
    add(&mut p, &mut scene, quad("quad", 0.0, 0.0, 50.0, 40.0, Z));
    add(
        &mut p,
        &mut scene,
        MeshData::new(
            "sliver",
            vec![
                Vec3::new(60.0, 60.0, Z),
                Vec3::new(70.0, 60.0, Z),
                Vec3::new(80.0, 60.0, Z),
            ],
            Some(vec![0, 1, 2]),
        ),
    );

    let report = profile_once(&mut p, (200, 200), &scene);
    assert_eq!(report.records.len(), 2);

    let quad = &report.records[0];
    assert_eq!(quad.pixel_count, 2000);
    assert_eq!(quad.vertex_count, 4);
    assert!((quad.density.unwrap().value().unwrap() - 0.002).abs() < 1e-6);
    assert_eq!(quad.bucket, 0);

    let sliver = &report.records[1];
    assert_eq!(sliver.pixel_count, 0);
    assert_eq!(sliver.density, Some(Density::NoCoverage));
    assert_eq!(sliver.bucket, 2);

    let sorted = sort_records(report.records.clone());
    assert_eq!(sorted[0].mesh_name(), Some("sliver"));
    assert_eq!(sorted[1].mesh_name(), Some("quad"));

    // image is derived from the id image: quad pixels only
    assert_eq!(report.histogram.iter().sum::<u32>(), 2000);
}

#[test]
fn tile_based_mesh_groups_by_densest_tile() {
    let mut p = profiler(DisplayType::TileBasedMesh);
    let mut scene = Vec::new();
    add(&mut p, &mut scene, quad("wide", 50.0, 1.0, 150.0, 41.0, Z));
    add(&mut p, &mut scene, quad("small", 120.0, 60.0, 140.0, 70.0, Z));

    let report = profile_once(&mut p, (200, 200), &scene);
    let order: Vec<(Option<u32>, Option<&str>)> = report
        .records
        .iter()
        .map(|r| (r.tile_index(), r.mesh_name()))
        .collect();
    assert_eq!(
        order,
        vec![
            (Some(1), None),
            (Some(1), Some("small")),
            (Some(1), Some("wide")),
            (Some(0), None),
            (Some(0), Some("wide")),
        ]
    );

    let root = &report.records[0];
    assert!((root.tile_density.unwrap() - 0.02).abs() < 1e-6);
    let small = &report.records[1];
    assert_eq!(small.pixel_count, 200);
    assert_eq!(small.vertex_usage().unwrap(), "4(100.00%)");
    let wide = &report.records[2];
    assert_eq!(wide.pixel_count, 2000);
    assert_eq!(wide.vertex_usage().unwrap(), "2(50.00%)");
}

#[test]
fn tile_based_mesh_respects_entry_cap() {
    let mut cfg = config(DisplayType::TileBasedMesh);
    cfg.max_entity_tile_entries = 1;
    let mut p = VertexProfiler::new(SoftwareDevice::new(), cfg).unwrap();
    let mut scene = Vec::new();
    add(&mut p, &mut scene, quad("a", 0.0, 0.0, 10.0, 10.0, Z));
    add(&mut p, &mut scene, quad("b", 20.0, 0.0, 30.0, 10.0, Z));

    let outcome = p.run_frame(&pixel_camera(200, 200), &scene);
    assert!(matches!(
        outcome,
        FrameOutcome::Aborted(ProfilerError::ResourceLimit { requested: 8, cap: 1 })
    ));
    assert_eq!(p.device().live_buffers(), 0);
    assert_eq!(p.device().live_targets(), 0);
}

#[test]
fn heat_map_smooths_visible_vertices() {
    let mut p = profiler(DisplayType::MeshHeatMap);
    let mut positions = vec![
        Vec3::new(0.25, 0.25, Z),
        Vec3::new(39.75, 0.25, Z),
        Vec3::new(39.75, 29.75, Z),
        Vec3::new(0.25, 29.75, Z),
    ];
    positions.extend(std::iter::repeat(Vec3::new(20.5, 10.5, Z)).take(100));
    let mut scene = Vec::new();
    add(&mut p, &mut scene, MeshData::new("hot", positions, Some(vec![0, 1, 2, 0, 2, 3])));

    let report = small_frame_report(&mut p, &scene);
    assert!(report.records.is_empty());
    // 100 / 13 lands in the top bucket for every pixel sampling (20, 10);
    // the corner vertices light their clipped neighbourhoods at 1 / 13.
    assert_eq!(report.histogram, vec![5 + 8 + 13 + 8, 0, 13]);
}

/// 64 pixel frames keep every projected coordinate exact.
fn small_frame_report(p: &mut VertexProfiler<SoftwareDevice>, scene: &[SceneEntity]) -> ProfilerReport {
    profile_once(p, (64, 64), scene)
}

#[test]
fn overdraw_counts_every_fragment() {
    let mut p = profiler(DisplayType::Overdraw);
    let mut scene = Vec::new();
    for i in 0..3 {
        add(&mut p, &mut scene, quad(&format!("layer{i}"), 0.0, 0.0, 20.0, 20.0, Z - i as f32));
    }
    add(&mut p, &mut scene, quad("single", 30.0, 0.0, 40.0, 10.0, Z));

    let report = small_frame_report(&mut p, &scene);
    assert_eq!(report.histogram, vec![100, 400, 0]);
    let image = report.image.unwrap();
    assert_eq!(image.bucket_at(10, 10), Some(1));
    assert_eq!(image.bucket_at(35, 5), Some(0));
    assert_eq!(image.bucket_at(60, 60), None);
}

#[test]
fn missing_kernel_disables_mode() {
    let device = SoftwareDevice::with_capabilities(Capabilities::all().without(KernelKind::IdRaster));
    let mut p = VertexProfiler::new(device, config(DisplayType::OnlyMesh)).unwrap();
    let mut scene = Vec::new();
    add(&mut p, &mut scene, quad("q", 0.0, 0.0, 10.0, 10.0, Z));
    let camera = pixel_camera(64, 64);

    let outcome = p.run_frame(&camera, &scene);
    assert!(matches!(
        outcome,
        FrameOutcome::Disabled(DisableReason::MissingKernel("entity id raster pass"))
    ));
    assert_eq!(p.device().live_buffers(), 0);

    // tile binning needs no raster pass
    p.set_display_type(DisplayType::OnlyTile);
    assert!(p.run_frame(&camera, &scene).is_profiled());
}

#[test]
fn disabled_and_empty_frames_do_nothing() {
    let mut p = profiler(DisplayType::OnlyTile);
    let camera = pixel_camera(64, 64);
    assert!(matches!(
        p.run_frame(&camera, &[]),
        FrameOutcome::Disabled(DisableReason::NoEntities)
    ));

    let mut scene = Vec::new();
    add(&mut p, &mut scene, cluster("c", 10, 0.0, 0.0));
    p.set_enabled(false);
    assert!(matches!(
        p.run_frame(&camera, &scene),
        FrameOutcome::Disabled(DisableReason::Off)
    ));
    assert_eq!(p.device().live_buffers(), 0);

    p.set_enabled(true);
    assert!(p.run_frame(&camera, &scene).is_profiled());
}

#[test]
fn switching_modes_discards_in_flight_readbacks() {
    let mut p = profiler(DisplayType::OnlyMesh);
    p.device_mut().set_readback_latency(2);
    let mut scene = Vec::new();
    add(&mut p, &mut scene, quad("q", 0.0, 0.0, 10.0, 10.0, Z));

    p.request_report();
    assert!(p.run_frame(&pixel_camera(64, 64), &scene).is_profiled());
    assert!(p.report_status().pending);
    p.set_display_type(DisplayType::Overdraw);
    assert!(!p.report_status().pending);

    for _ in 0..3 {
        assert!(!p.poll_readbacks());
    }
    assert_eq!(p.discarded_readbacks(), 2);
    assert_eq!(p.device().pending_readbacks(), 0);
    assert!(p.take_report().is_none());
}

#[test]
fn report_completes_in_two_phases() {
    let mut cfg = config(DisplayType::OnlyMesh);
    cfg.capture_screenshots = true;
    let mut p = VertexProfiler::new(SoftwareDevice::new(), cfg).unwrap();
    p.device_mut().set_readback_latency(1);
    let mut scene = Vec::new();
    add(&mut p, &mut scene, quad("q", 0.0, 0.0, 10.0, 10.0, Z));

    p.request_report();
    assert!(p.run_frame(&pixel_camera(64, 64), &scene).is_profiled());
    assert!(!p.poll_readbacks());
    assert!(!p.report_status().data_ready);

    assert!(p.poll_readbacks());
    let status = p.report_status();
    assert!(status.data_ready && !status.capture_ready);
    assert!(p.peek_report().is_some());
    assert!(p.take_report().is_none());

    p.on_frame_completed(&mut SolidCapture(64, 64));
    assert!(p.report_status().capture_ready);
    let report = p.take_report().unwrap();
    assert!(report.has_screenshots());
    let overlay = report.screenshot_with_overlay.unwrap();
    // covered pixels are tinted, the rest is the captured frame
    assert_ne!(overlay.get_pixel(5, 5).0, [10, 20, 30, 255]);
    assert_eq!(overlay.get_pixel(40, 40).0, [10, 20, 30, 255]);
}

#[test]
fn report_request_waits_for_a_dispatched_frame() {
    let mut p = profiler(DisplayType::OnlyMesh);
    let camera = pixel_camera(64, 64);
    p.request_report();
    assert!(!p.run_frame(&camera, &[]).is_profiled());
    assert!(!p.report_status().pending);

    let mut scene = Vec::new();
    add(&mut p, &mut scene, quad("q", 0.0, 0.0, 10.0, 10.0, Z));
    assert!(p.run_frame(&camera, &scene).is_profiled());
    assert!(p.poll_readbacks());
    assert_eq!(p.take_report().unwrap().records[0].pixel_count, 100);
}

#[test]
fn update_once_keeps_entity_set_until_recollect() {
    let mut p = profiler(DisplayType::OnlyTile);
    p.set_update_type(UpdateType::Once);
    let camera = pixel_camera(64, 64);
    let mut scene = Vec::new();
    add(&mut p, &mut scene, cluster("first", 10, 0.0, 0.0));

    assert!(p.run_frame(&camera, &scene).is_profiled());
    assert_eq!(p.collected_entities(), 1);

    add(&mut p, &mut scene, cluster("second", 10, 40.0, 40.0));
    assert!(p.run_frame(&camera, &scene).is_profiled());
    assert_eq!(p.collected_entities(), 1);

    p.recollect();
    assert!(p.run_frame(&camera, &scene).is_profiled());
    assert_eq!(p.collected_entities(), 2);
}

#[test]
fn transition_releases_everything() {
    let mut p = profiler(DisplayType::OnlyMesh);
    let mut scene = Vec::new();
    add(&mut p, &mut scene, quad("q", 0.0, 0.0, 10.0, 10.0, Z));
    assert!(p.run_frame(&pixel_camera(64, 64), &scene).is_profiled());
    assert!(p.device().live_buffers() > 0);
    assert_eq!(p.device().live_targets(), 1);
    assert_eq!(p.device().live_meshes(), 1);

    p.set_display_type(DisplayType::Overdraw);
    assert_eq!(p.device().live_buffers(), 0);
    assert_eq!(p.device().live_targets(), 0);
    assert_eq!(p.device().live_meshes(), 0);
    assert_eq!(p.collected_entities(), 0);
}

#[test]
fn coverage_modes_share_the_write_slot_safely() {
    let mut p = profiler(DisplayType::OnlyMesh);
    let camera = pixel_camera(64, 64);
    let mut scene = Vec::new();
    add(&mut p, &mut scene, quad("q", 0.0, 0.0, 10.0, 10.0, Z));

    for display in [
        DisplayType::OnlyMesh,
        DisplayType::TileBasedMesh,
        DisplayType::OnlyMesh,
        DisplayType::TileBasedMesh,
    ] {
        p.set_display_type(display);
        assert!(p.run_frame(&camera, &scene).is_profiled());
        assert!(p.run_frame(&camera, &scene).is_profiled());
    }
    assert!(p.device().hazards().is_empty());
    p.shutdown();
    assert_eq!(p.device().live_buffers(), 0);
    assert!(p.device().hazards().is_empty());
}

#[test]
fn thresholds_and_bucket_visibility() {
    let mut p = profiler(DisplayType::Overdraw);
    assert!(p
        .set_thresholds(DisplayType::Overdraw, vec![5, 1])
        .is_err());
    p.set_profiler_type(vertex_profiler::ProfilerType::Detail);
    p.set_thresholds(DisplayType::Overdraw, vec![0, 1]).unwrap();
    p.set_bucket_active(1, false);

    let mut scene = Vec::new();
    for i in 0..2 {
        add(&mut p, &mut scene, quad(&format!("l{i}"), 0.0, 0.0, 10.0, 10.0, Z));
    }
    let report = small_frame_report(&mut p, &scene);
    assert_eq!(report.histogram, vec![0, 100]);
    let table = p.threshold_table().unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.color(1).a, 0.0);

    p.use_default_thresholds();
    let report = small_frame_report(&mut p, &scene);
    assert_eq!(report.thresholds.len(), 8);
    // two layers: last threshold below 2 is 1
    assert_eq!(report.histogram[0], 100);
}

#[test]
fn removed_mesh_drops_its_entities() {
    let mut p = profiler(DisplayType::OnlyTile);
    let camera = pixel_camera(64, 64);
    let mut scene = Vec::new();
    add(&mut p, &mut scene, cluster("a", 10, 0.0, 0.0));
    add(&mut p, &mut scene, cluster("b", 10, 40.0, 40.0));
    assert!(p.run_frame(&camera, &scene).is_profiled());
    assert_eq!(p.collected_entities(), 2);

    let key = scene[0].mesh.unwrap();
    p.remove_mesh(key);
    assert!(p.run_frame(&camera, &scene).is_profiled());
    assert_eq!(p.collected_entities(), 1);
    assert_eq!(p.meshes().resident_count(), 1);
}

#[test]
fn unresident_mesh_is_left_out_of_mesh_report() {
    let mut p = FailingUploads::profiler(DisplayType::OnlyMesh, "broken");
    let mut scene = Vec::new();
    add(&mut p, &mut scene, quad("ok", 0.0, 0.0, 50.0, 40.0, Z));
    add(&mut p, &mut scene, quad("broken", 100.0, 100.0, 150.0, 140.0, Z));

    p.request_report();
    let outcome = p.run_frame(&pixel_camera(200, 200), &scene);
    assert!(matches!(outcome, FrameOutcome::Profiled { dispatched: 1 }));
    assert!(p.poll_readbacks());
    p.on_frame_completed(&mut NoCapture);
    let report = p.take_report().unwrap();

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].mesh_name(), Some("ok"));
    assert_eq!(report.records[0].pixel_count, 2000);
    assert!(report.records.iter().all(|r| r.density != Some(Density::NoCoverage)));
    assert_eq!(report.histogram.iter().sum::<u32>(), 2000);
}

#[test]
fn unresident_mesh_is_left_out_of_tile_batches() {
    let mut p = FailingUploads::profiler(DisplayType::TileBasedMesh, "broken");
    let mut scene = Vec::new();
    add(&mut p, &mut scene, quad("wide", 50.0, 1.0, 150.0, 41.0, Z));
    add(&mut p, &mut scene, quad("broken", 120.0, 60.0, 140.0, 70.0, Z));

    let report = profile_once(&mut p, (200, 200), &scene);
    // two tile roots, each with the wide quad as its only child
    assert_eq!(report.records.len(), 4);
    let meshes: Vec<&str> = report.records.iter().filter_map(|r| r.mesh_name()).collect();
    assert_eq!(meshes, vec!["wide", "wide"]);
    assert!(report.records.iter().all(|r| r.pixel_count > 0 || r.mesh_name().is_none()));
}

#[test]
fn unresident_mesh_adds_no_tile_vertices() {
    let mut p = FailingUploads::profiler(DisplayType::OnlyTile, "broken");
    let mut scene = Vec::new();
    add(&mut p, &mut scene, cluster("ok", 100, 0.0, 0.0));
    add(&mut p, &mut scene, cluster("broken", 200, 120.0, 120.0));

    let report = profile_once(&mut p, (200, 200), &scene);
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].subject, Subject::Tile { index: 0 });
    assert_eq!(report.records[0].vertex_count, 100);
    assert_eq!(report.histogram, vec![10000, 0, 0]);
}

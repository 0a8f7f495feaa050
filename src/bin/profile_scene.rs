use anyhow::{bail, Context};
use glam::{Mat4, Vec3};
use image::{Rgba, RgbaImage};
use log::info;
use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use vertex_profiler::config::ProfilerType;
use vertex_profiler::export::{save_images, write_csv, write_json};
use vertex_profiler::utils::PixelSize;
use vertex_profiler::{
    DisplayType, FrameCapture, FrameOutcome, MeshData, ProfilerCamera, ProfilerConfig,
    ProfilerDevice, SceneEntity, SoftwareDevice, VertexProfiler,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;
const MAX_FRAMES: u32 = 8;

struct Args {
    gpu: bool,
    detail: bool,
    out_dir: PathBuf,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        gpu: false,
        detail: false,
        out_dir: PathBuf::from("profiler_reports"),
        config: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--gpu" => args.gpu = true,
            "--detail" => args.detail = true,
            "--out" => args.out_dir = it.next().context("--out needs a directory")?.into(),
            "--config" => args.config = Some(it.next().context("--config needs a file")?.into()),
            other => bail!("unknown argument {other}; usage: profile_scene [--gpu] [--detail] [--out DIR] [--config FILE]"),
        }
    }
    Ok(args)
}

/// Flat shaded stand-in for the host's color buffer.
struct GradientCapture;

impl FrameCapture for GradientCapture {
    fn capture_color(&mut self) -> Option<RgbaImage> {
        Some(RgbaImage::from_fn(WIDTH, HEIGHT, |x, y| {
            let r = (x * 255 / WIDTH) as u8;
            let g = (y * 255 / HEIGHT) as u8;
            Rgba([r / 3, g / 3, 64, 255])
        }))
    }
}

fn grid_mesh(name: &str, cells: u32) -> MeshData {
    let mut positions = Vec::new();
    let mut indices = Vec::new();
    for j in 0..=cells {
        for i in 0..=cells {
            positions.push(Vec3::new(
                i as f32 / cells as f32 - 0.5,
                j as f32 / cells as f32 - 0.5,
                0.0,
            ));
        }
    }
    let row = cells + 1;
    for j in 0..cells {
        for i in 0..cells {
            let a = j * row + i;
            indices.extend_from_slice(&[a, a + 1, a + row, a + 1, a + row + 1, a + row]);
        }
    }
    MeshData::new(name, positions, Some(indices))
}

fn sphere_mesh(name: &str, rings: u32, segments: u32) -> MeshData {
    let mut positions = Vec::new();
    let mut indices = Vec::new();
    for r in 0..=rings {
        let phi = PI * r as f32 / rings as f32;
        for s in 0..=segments {
            let theta = 2.0 * PI * s as f32 / segments as f32;
            positions.push(Vec3::new(
                phi.sin() * theta.cos(),
                phi.cos(),
                phi.sin() * theta.sin(),
            ) * 0.5);
        }
    }
    let row = segments + 1;
    for r in 0..rings {
        for s in 0..segments {
            let a = r * row + s;
            indices.extend_from_slice(&[a, a + row, a + 1, a + 1, a + row, a + row + 1]);
        }
    }
    MeshData::new(name, positions, Some(indices))
}

fn build_scene<D: ProfilerDevice>(profiler: &mut VertexProfiler<D>) -> Vec<SceneEntity> {
    let floor = profiler.register_mesh(grid_mesh("floor", 16));
    let dense = profiler.register_mesh(sphere_mesh("dense_sphere", 96, 96));
    let light = profiler.register_mesh(sphere_mesh("light_sphere", 8, 12));

    let mut scene = vec![SceneEntity::new(
        "floor",
        Some(floor),
        Mat4::from_scale(Vec3::splat(8.0)) * Mat4::from_rotation_x(-PI / 2.0),
    )];
    for (i, x) in [-2.0f32, 0.0, 2.0].into_iter().enumerate() {
        let mut e = SceneEntity::new(
            format!("sphere_{i}"),
            Some(if i == 1 { dense } else { light }),
            Mat4::from_translation(Vec3::new(x, 0.5, 0.0)),
        );
        e.hierarchy_path = format!("world/props/sphere_{i}");
        scene.push(e);
    }
    let mut behind = SceneEntity::new("behind_camera", Some(dense), Mat4::from_translation(Vec3::new(0.0, 0.5, 20.0)));
    behind.hierarchy_path = "world/props/behind_camera".into();
    scene.push(behind);
    scene
}

fn profile_all<D: ProfilerDevice>(device: D, config: ProfilerConfig, out_dir: &Path) -> anyhow::Result<()> {
    let mut profiler = VertexProfiler::new(device, config)?;
    let scene = build_scene(&mut profiler);
    let camera = ProfilerCamera::perspective(
        Vec3::new(0.0, 3.0, 7.0),
        Vec3::new(0.0, 0.5, 0.0),
        PI / 4.0,
        0.1,
        50.0,
        PixelSize::new(WIDTH, HEIGHT),
    );
    let mut capture = GradientCapture;

    for display in DisplayType::ALL {
        profiler.set_display_type(display);
        profiler.request_report();
        let mut report = None;
        for _ in 0..MAX_FRAMES {
            match profiler.run_frame(&camera, &scene) {
                FrameOutcome::Profiled { dispatched } => {
                    info!("{}: {} entities dispatched", display.name(), dispatched)
                }
                other => info!("{}: {:?}", display.name(), other),
            }
            profiler.poll_readbacks();
            profiler.on_frame_completed(&mut capture);
            report = profiler.take_report();
            if report.is_some() {
                break;
            }
        }
        let Some(report) = report else {
            info!("{}: no report after {} frames", display.name(), MAX_FRAMES);
            continue;
        };
        let csv = write_csv(&report, out_dir)?;
        let json = write_json(&report, out_dir)?;
        let images = save_images(&report, out_dir)?;
        info!(
            "{}: {} records, wrote {} and {} plus {} images",
            display.name(),
            report.records.len(),
            csv.display(),
            json.display(),
            images.len()
        );
    }
    profiler.shutdown();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args()?;
    let mut config = match &args.config {
        Some(path) => ProfilerConfig::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProfilerConfig::default(),
    };
    if args.detail {
        config.profiler_type = ProfilerType::Detail;
    }

    if args.gpu {
        #[cfg(feature = "backend-wgpu")]
        {
            let device = vertex_profiler::WgpuDevice::headless().context("no wgpu adapter available")?;
            return profile_all(device, config, &args.out_dir);
        }
        #[cfg(not(feature = "backend-wgpu"))]
        bail!("built without the backend-wgpu feature");
    }
    profile_all(SoftwareDevice::new(), config, &args.out_dir)
}

//! wgpu backend: WGSL compute kernels plus two replacement raster passes.

use super::{
    kernel_params, BinTarget, BufferId, Capabilities, CompletedReadback, CoverageGranularity,
    FrameView, ImageSource, Kernel, KernelKind, MeshHandle, ProfilerDevice, RasterDraw, ReadbackId,
    TargetId, COVERAGE_SLOT,
};
use crate::error::ProfilerError;
use crate::scene::MeshData;
use crate::utils::KernelParams;
use log::{debug, warn};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use wgpu::util::DeviceExt;

const ID_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const MAX_GROUPS_X: u32 = 65535;

type MapResult = Result<(), wgpu::BufferAsyncError>;

struct GpuBuffer {
    buffer: wgpu::Buffer,
    len: usize,
}

struct GpuTarget {
    ids: wgpu::Texture,
    depth: wgpu::Texture,
    /// Row padded copy of `ids`, readable by the compute kernels.
    ids_copy: wgpu::Buffer,
    width: u32,
    height: u32,
    row_words: u32,
}

struct GpuMesh {
    positions: wgpu::Buffer,
    indices: Option<(wgpu::Buffer, u32)>,
    vertex_count: u32,
}

struct InFlight {
    id: ReadbackId,
    staging: wgpu::Buffer,
    done: Receiver<MapResult>,
    /// `(row_words, width, height)` for id images.
    rows: Option<(u32, u32, u32)>,
}

#[derive(Default)]
struct Pipelines {
    bin_tiles: Option<wgpu::ComputePipeline>,
    bin_entity_tiles: Option<wgpu::ComputePipeline>,
    bin_visible_pixels: Option<wgpu::ComputePipeline>,
    count_coverage: Option<wgpu::ComputePipeline>,
    merge_heat_map: Option<wgpu::ComputePipeline>,
    generate_tile_image: Option<wgpu::ComputePipeline>,
    generate_heat_image: Option<wgpu::ComputePipeline>,
    generate_overdraw_image: Option<wgpu::ComputePipeline>,
    id_raster: Option<wgpu::RenderPipeline>,
    overdraw_raster: Option<wgpu::RenderPipeline>,
}

impl Pipelines {
    fn capabilities(&self, post_effect: bool) -> Capabilities {
        let mut caps = Capabilities::none();
        if self.bin_tiles.is_some() && self.bin_entity_tiles.is_some() && self.bin_visible_pixels.is_some() {
            caps = caps.with(KernelKind::VertexBinning);
        }
        if self.count_coverage.is_some() {
            caps = caps.with(KernelKind::CoverageCount);
        }
        if self.merge_heat_map.is_some() {
            caps = caps.with(KernelKind::HeatMapMerge);
        }
        if self.generate_tile_image.is_some()
            && self.generate_heat_image.is_some()
            && self.generate_overdraw_image.is_some()
        {
            caps = caps.with(KernelKind::ProfilerImage);
        }
        if self.id_raster.is_some() {
            caps = caps.with(KernelKind::IdRaster);
        }
        if self.overdraw_raster.is_some() {
            caps = caps.with(KernelKind::OverdrawRaster);
        }
        if post_effect {
            caps = caps.with(KernelKind::PostEffect);
        }
        caps
    }
}

pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipelines: Pipelines,
    capabilities: Capabilities,
    next_id: u64,
    buffers: HashMap<BufferId, GpuBuffer>,
    targets: HashMap<TargetId, GpuTarget>,
    meshes: HashMap<MeshHandle, GpuMesh>,
    random_write: HashMap<u32, BufferId>,
    in_flight: Vec<InFlight>,
}

impl WgpuDevice {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let shader = scoped(&device, "profiler shader", || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("profiler-shader"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!(
                    "../../shaders/profiler.wgsl"
                ))),
            })
        });

        let pipelines = match &shader {
            Some(module) => Pipelines {
                bin_tiles: compute_pipeline(&device, module, "bin_tiles"),
                bin_entity_tiles: compute_pipeline(&device, module, "bin_entity_tiles"),
                bin_visible_pixels: compute_pipeline(&device, module, "bin_visible_pixels"),
                count_coverage: compute_pipeline(&device, module, "count_coverage"),
                merge_heat_map: compute_pipeline(&device, module, "merge_heat_map"),
                generate_tile_image: compute_pipeline(&device, module, "generate_tile_image"),
                generate_heat_image: compute_pipeline(&device, module, "generate_heat_image"),
                generate_overdraw_image: compute_pipeline(&device, module, "generate_overdraw_image"),
                id_raster: raster_pipeline(&device, module, "fs_ids", true),
                overdraw_raster: raster_pipeline(&device, module, "fs_overdraw", false),
            },
            None => Pipelines::default(),
        };
        let capabilities = pipelines.capabilities(shader.is_some());
        debug!("wgpu profiler capabilities: {:?}", capabilities);

        Self {
            device,
            queue,
            pipelines,
            capabilities,
            next_id: 1,
            buffers: HashMap::new(),
            targets: HashMap::new(),
            meshes: HashMap::new(),
            random_write: HashMap::new(),
            in_flight: Vec::new(),
        }
    }

    /// Creates a device on the first available adapter, `None` without one.
    pub fn headless() -> Option<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))?;
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("vertex-profiler"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| warn!("no wgpu device: {}", e))
        .ok()?;
        Some(Self::new(Arc::new(device), Arc::new(queue)))
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer(&self, id: BufferId) -> Result<&wgpu::Buffer, ProfilerError> {
        self.buffers
            .get(&id)
            .map(|b| &b.buffer)
            .ok_or(ProfilerError::UnknownResource("buffer"))
    }

    fn target(&self, id: TargetId) -> Result<&GpuTarget, ProfilerError> {
        self.targets
            .get(&id)
            .ok_or(ProfilerError::UnknownResource("target"))
    }

    fn mesh(&self, id: MeshHandle) -> Result<&GpuMesh, ProfilerError> {
        self.meshes
            .get(&id)
            .ok_or(ProfilerError::UnknownResource("mesh"))
    }

    fn params_buffer(&self, params: &KernelParams) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("kernel-params"),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }

    fn bind_group(
        &self,
        layout: &wgpu::BindGroupLayout,
        params: &wgpu::Buffer,
        bindings: &[(u32, &wgpu::Buffer)],
    ) -> wgpu::BindGroup {
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: params.as_entire_binding(),
        }];
        entries.extend(bindings.iter().map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: *binding,
            resource: buffer.as_entire_binding(),
        }));
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("profiler-bind-group"),
            layout,
            entries: &entries,
        })
    }

    fn run_compute(
        &self,
        pipeline: &Option<wgpu::ComputePipeline>,
        name: &'static str,
        params: KernelParams,
        bindings: &[(u32, &wgpu::Buffer)],
        groups: (u32, u32),
    ) -> Result<(), ProfilerError> {
        let pipeline = pipeline
            .as_ref()
            .ok_or_else(|| ProfilerError::Device(format!("{name} pipeline unavailable")))?;
        let uniform = self.params_buffer(&params);
        let bind_group = self.bind_group(&pipeline.get_bind_group_layout(0), &uniform, bindings);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(name) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(name),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups.0, groups.1, 1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn bin_vertices(&self, view: &FrameView, draw: &RasterDraw, target: BinTarget) -> Result<(), ProfilerError> {
        let mesh = self.mesh(draw.mesh)?;
        let mut params = kernel_params(view, Some(draw));
        params.draw[0] = draw.vertex_count.min(mesh.vertex_count);
        let groups = draw.binning_groups().max(1);
        let groups = (groups.min(MAX_GROUPS_X), groups.div_ceil(MAX_GROUPS_X));
        match target {
            BinTarget::Tiles { counters } => self.run_compute(
                &self.pipelines.bin_tiles,
                "bin_tiles",
                params,
                &[(1, &mesh.positions), (2, self.buffer(counters)?)],
                groups,
            ),
            BinTarget::EntityTiles { counters } => self.run_compute(
                &self.pipelines.bin_entity_tiles,
                "bin_entity_tiles",
                params,
                &[(1, &mesh.positions), (2, self.buffer(counters)?)],
                groups,
            ),
            BinTarget::VisiblePixels { ids, counts } => {
                let ids = self.target(ids)?;
                params.screen[2] = ids.row_words;
                self.run_compute(
                    &self.pipelines.bin_visible_pixels,
                    "bin_visible_pixels",
                    params,
                    &[
                        (1, &mesh.positions),
                        (2, self.buffer(counts)?),
                        (3, &ids.ids_copy),
                    ],
                    groups,
                )
            }
        }
    }

    fn draw_meshes(
        &self,
        pipeline: &wgpu::RenderPipeline,
        pass_label: &'static str,
        view: &FrameView,
        color: &wgpu::Texture,
        depth: Option<&wgpu::Texture>,
        counters: Option<&wgpu::Buffer>,
        draws: &[RasterDraw],
    ) -> wgpu::CommandEncoder {
        let layout = pipeline.get_bind_group_layout(0);
        let prepared: Vec<(wgpu::BindGroup, &GpuMesh)> = draws
            .iter()
            .filter_map(|draw| {
                let Ok(mesh) = self.mesh(draw.mesh) else {
                    debug!("draw for entity {} has no uploaded mesh", draw.entity_index);
                    return None;
                };
                let uniform = self.params_buffer(&kernel_params(view, Some(draw)));
                let extra: Vec<(u32, &wgpu::Buffer)> = counters.map(|c| (2, c)).into_iter().collect();
                Some((self.bind_group(&layout, &uniform, &extra), mesh))
            })
            .collect();

        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.map(|d| d.create_view(&wgpu::TextureViewDescriptor::default()));
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(pass_label) });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(pass_label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth_view.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            for (bind_group, mesh) in &prepared {
                pass.set_bind_group(0, bind_group, &[]);
                pass.set_vertex_buffer(0, mesh.positions.slice(..));
                match &mesh.indices {
                    Some((indices, count)) => {
                        pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..*count, 0, 0..1);
                    }
                    None => pass.draw(0..mesh.vertex_count, 0..1),
                }
            }
        }
        encoder
    }

    fn track_readback(&mut self, staging: wgpu::Buffer, done: Receiver<MapResult>, rows: Option<(u32, u32, u32)>) -> ReadbackId {
        let id = ReadbackId(self.alloc_id());
        self.in_flight.push(InFlight {
            id,
            staging,
            done,
            rows,
        });
        id
    }
}

impl ProfilerDevice for WgpuDevice {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_buffer(&mut self, label: &'static str, len: usize) -> Result<BufferId, ProfilerError> {
        let size = (len.max(1) * 4) as u64;
        if size > self.device.limits().max_storage_buffer_binding_size as u64 {
            return Err(ProfilerError::ResourceLimit {
                requested: len,
                cap: self.device.limits().max_storage_buffer_binding_size as usize / 4,
            });
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = BufferId(self.alloc_id());
        self.buffers.insert(id, GpuBuffer { buffer, len });
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, data: &[u32]) -> Result<(), ProfilerError> {
        let dst = self
            .buffers
            .get(&buffer)
            .ok_or(ProfilerError::UnknownResource("buffer"))?;
        if data.len() > dst.len {
            return Err(ProfilerError::Device(format!(
                "write of {} words into a {} word buffer",
                data.len(),
                dst.len
            )));
        }
        self.queue.write_buffer(&dst.buffer, 0, bytemuck::cast_slice(data));
        Ok(())
    }

    fn release_buffer(&mut self, buffer: BufferId) {
        if let Some((slot, _)) = self.random_write.iter().find(|(_, b)| **b == buffer) {
            warn!("releasing buffer {:?} while bound to slot {}", buffer, slot);
        }
        self.random_write.retain(|_, b| *b != buffer);
        self.buffers.remove(&buffer);
    }

    fn create_target(&mut self, label: &'static str, width: u32, height: u32) -> Result<TargetId, ProfilerError> {
        let size = wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        };
        let texture = |format, usage| {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };
        let ids = texture(
            ID_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let depth = texture(DEPTH_FORMAT, wgpu::TextureUsages::RENDER_ATTACHMENT);
        let row_bytes = padded_row_bytes(size.width);
        let ids_copy = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: row_bytes as u64 * size.height as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = TargetId(self.alloc_id());
        self.targets.insert(
            id,
            GpuTarget {
                ids,
                depth,
                ids_copy,
                width: size.width,
                height: size.height,
                row_words: row_bytes / 4,
            },
        );
        Ok(id)
    }

    fn release_target(&mut self, target: TargetId) {
        self.targets.remove(&target);
    }

    fn upload_mesh(&mut self, mesh: &MeshData) -> Result<MeshHandle, ProfilerError> {
        if mesh.positions.is_empty() {
            return Err(ProfilerError::Device(format!("mesh {} has no vertices", mesh.name)));
        }
        let positions: Vec<[f32; 4]> = mesh
            .positions
            .iter()
            .map(|p| [p.x, p.y, p.z, 1.0])
            .collect();
        let positions = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(mesh.name.as_str()),
            contents: bytemuck::cast_slice(positions.as_slice()),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE,
        });
        let indices = mesh.indices.as_ref().filter(|i| !i.is_empty()).map(|indices| {
            let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(mesh.name.as_str()),
                contents: bytemuck::cast_slice(indices.as_slice()),
                usage: wgpu::BufferUsages::INDEX,
            });
            (buffer, (indices.len() - indices.len() % 3) as u32)
        });
        let id = MeshHandle(self.alloc_id());
        self.meshes.insert(
            id,
            GpuMesh {
                positions,
                indices,
                vertex_count: mesh.vertex_count(),
            },
        );
        Ok(id)
    }

    fn release_mesh(&mut self, mesh: MeshHandle) {
        self.meshes.remove(&mesh);
    }

    fn bind_random_write(&mut self, slot: u32, buffer: BufferId) -> Result<(), ProfilerError> {
        if !self.buffers.contains_key(&buffer) {
            return Err(ProfilerError::UnknownResource("buffer"));
        }
        if self.random_write.contains_key(&slot) {
            return Err(ProfilerError::BindingHazard { slot });
        }
        self.random_write.insert(slot, buffer);
        Ok(())
    }

    fn clear_random_write_targets(&mut self) {
        self.random_write.clear();
    }

    fn render_ids(&mut self, view: &FrameView, target: TargetId, draws: &[RasterDraw]) -> Result<(), ProfilerError> {
        let pipeline = self
            .pipelines
            .id_raster
            .as_ref()
            .ok_or_else(|| ProfilerError::Device("id raster pipeline unavailable".into()))?;
        let t = self.target(target)?;
        let mut encoder = self.draw_meshes(pipeline, "id-raster", view, &t.ids, Some(&t.depth), None, draws);
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &t.ids,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &t.ids_copy,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(t.row_words * 4),
                    rows_per_image: Some(t.height),
                },
            },
            wgpu::Extent3d {
                width: t.width,
                height: t.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn render_overdraw(&mut self, view: &FrameView, counters: BufferId, draws: &[RasterDraw]) -> Result<(), ProfilerError> {
        let pipeline = self
            .pipelines
            .overdraw_raster
            .as_ref()
            .ok_or_else(|| ProfilerError::Device("overdraw pipeline unavailable".into()))?;
        let scratch = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("overdraw-scratch"),
            size: wgpu::Extent3d {
                width: view.width().max(1),
                height: view.height().max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: ID_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let counters = self.buffer(counters)?;
        let encoder = self.draw_meshes(pipeline, "overdraw-raster", view, &scratch, None, Some(counters), draws);
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn dispatch(&mut self, kernel: &Kernel<'_>) -> Result<(), ProfilerError> {
        if !self.capabilities.supports(kernel.kind()) {
            return Err(ProfilerError::Device(format!("{} unavailable", kernel.kind().name())));
        }
        match *kernel {
            Kernel::BinVertices { view, draw, target } => self.bin_vertices(view, draw, target),
            Kernel::CountCoverage {
                view,
                ids,
                entity_count,
                granularity,
            } => {
                let counters = *self
                    .random_write
                    .get(&COVERAGE_SLOT)
                    .ok_or(ProfilerError::UnknownResource("random write target"))?;
                let ids = self.target(ids)?;
                let mut params = kernel_params(view, None);
                params.screen[2] = ids.row_words;
                params.draw[0] = entity_count;
                params.heat[2] = match granularity {
                    CoverageGranularity::PerEntity => 0,
                    CoverageGranularity::PerEntityTile => 1,
                };
                self.run_compute(
                    &self.pipelines.count_coverage,
                    "count_coverage",
                    params,
                    &[(2, self.buffer(counters)?), (3, &ids.ids_copy)],
                    view.pixel_groups(),
                )
            }
            Kernel::MergeHeatMap {
                view,
                counts,
                density,
                heat,
            } => {
                let mut params = kernel_params(view, None);
                params.screen[3] = heat.offset_count();
                params.heat[0] = heat.range as i32;
                params.heat[1] = heat.step as i32;
                self.run_compute(
                    &self.pipelines.merge_heat_map,
                    "merge_heat_map",
                    params,
                    &[(2, self.buffer(counts)?), (6, self.buffer(density)?)],
                    view.pixel_groups(),
                )
            }
            Kernel::GenerateImage {
                view,
                source,
                thresholds,
                threshold_count,
                output,
            } => {
                let mut params = kernel_params(view, None);
                params.draw[3] = threshold_count;
                let thresholds = self.buffer(thresholds)?;
                let output = self.buffer(output)?;
                let (pipeline, name, binding, src) = match source {
                    ImageSource::TileCounts(b) => (&self.pipelines.generate_tile_image, "generate_tile_image", 2, b),
                    ImageSource::HeatDensity(b) => (&self.pipelines.generate_heat_image, "generate_heat_image", 6, b),
                    ImageSource::Overdraw(b) => (&self.pipelines.generate_overdraw_image, "generate_overdraw_image", 2, b),
                };
                self.run_compute(
                    pipeline,
                    name,
                    params,
                    &[(binding, self.buffer(src)?), (4, thresholds), (5, output)],
                    view.pixel_groups(),
                )
            }
        }
    }

    fn request_readback(&mut self, buffer: BufferId) -> Result<ReadbackId, ProfilerError> {
        let source = self.buffer(buffer)?;
        let (staging, done) = start_readback(&self.device, &self.queue, source);
        Ok(self.track_readback(staging, done, None))
    }

    fn request_target_readback(&mut self, target: TargetId) -> Result<ReadbackId, ProfilerError> {
        let t = self.target(target)?;
        let rows = (t.row_words, t.width, t.height);
        let (staging, done) = start_readback(&self.device, &self.queue, &t.ids_copy);
        Ok(self.track_readback(staging, done, Some(rows)))
    }

    fn poll_readbacks(&mut self) -> Vec<CompletedReadback> {
        self.device.poll(wgpu::Maintain::Poll);
        let mut done = Vec::new();
        let mut waiting = Vec::with_capacity(self.in_flight.len());
        for flight in self.in_flight.drain(..) {
            let data = match flight.done.try_recv() {
                Err(TryRecvError::Empty) => {
                    waiting.push(flight);
                    continue;
                }
                Err(TryRecvError::Disconnected) => {
                    Err(ProfilerError::Device("readback callback dropped".into()))
                }
                Ok(Err(e)) => Err(ProfilerError::Device(format!("map failed: {e}"))),
                Ok(Ok(())) => {
                    let words = {
                        let mapped = flight.staging.slice(..).get_mapped_range();
                        let words: Vec<u32> = mapped
                            .chunks_exact(4)
                            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                            .collect();
                        words
                    };
                    flight.staging.unmap();
                    Ok(match flight.rows {
                        Some((row_words, width, height)) => unpad_rows(&words, row_words, width, height),
                        None => words,
                    })
                }
            };
            done.push(CompletedReadback { id: flight.id, data });
        }
        self.in_flight = waiting;
        done
    }
}

/// Copies `source` into a mappable staging buffer and starts mapping it.
fn start_readback(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
) -> (wgpu::Buffer, Receiver<MapResult>) {
    let size = source.size();
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("profiler-readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("profiler-readback"),
    });
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let (tx, rx) = mpsc::channel();
    staging.slice(..).map_async(wgpu::MapMode::Read, move |r| {
        tx.send(r).ok();
    });
    (staging, rx)
}

fn padded_row_bytes(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

fn unpad_rows(words: &[u32], row_words: u32, width: u32, height: u32) -> Vec<u32> {
    let mut out = Vec::with_capacity(width as usize * height as usize);
    for row in words.chunks(row_words as usize).take(height as usize) {
        out.extend_from_slice(&row[..(width as usize).min(row.len())]);
    }
    out
}

/// Runs `f` inside a validation error scope; `None` if it raised an error.
fn scoped<T>(device: &wgpu::Device, what: &str, f: impl FnOnce() -> T) -> Option<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    match pollster::block_on(device.pop_error_scope()) {
        None => Some(value),
        Some(e) => {
            warn!("{} unavailable: {}", what, e);
            None
        }
    }
}

fn compute_pipeline(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    entry: &'static str,
) -> Option<wgpu::ComputePipeline> {
    scoped(device, entry, || {
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry),
            layout: None,
            module,
            entry_point: Some(entry),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        })
    })
}

fn raster_pipeline(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    fragment: &'static str,
    depth_test: bool,
) -> Option<wgpu::RenderPipeline> {
    scoped(device, fragment, || {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(fragment),
            layout: None,
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs_raster"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x4],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some(fragment),
                targets: &[Some(wgpu::ColorTargetState {
                    format: ID_FORMAT,
                    blend: None,
                    write_mask: if depth_test {
                        wgpu::ColorWrites::ALL
                    } else {
                        wgpu::ColorWrites::empty()
                    },
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: depth_test.then(|| wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    })
}

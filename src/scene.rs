use crate::error::ProfilerError;
use crate::gpu::{MeshHandle, ProfilerDevice};
use crate::utils::{fnv1a64, Aabb};
use glam::{Mat4, Vec3};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Arena index of a registered mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshKey(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub name: String,
    pub positions: Vec<Vec3>,
    /// Triangle list indices; `None` means consecutive triples of positions.
    pub indices: Option<Vec<u32>>,
}

impl MeshData {
    pub fn new(name: impl Into<String>, positions: Vec<Vec3>, indices: Option<Vec<u32>>) -> Self {
        Self {
            name: name.into(),
            positions,
            indices,
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn triangle_count(&self) -> usize {
        match &self.indices {
            Some(idx) => idx.len() / 3,
            None => self.positions.len() / 3,
        }
    }

    pub fn local_bounds(&self) -> Option<Aabb> {
        Aabb::from_points(&self.positions)
    }

    /// Stable key over the geometry, independent of where the mesh lives.
    pub fn content_hash(&self) -> u64 {
        let mut bytes: Vec<u8> = bytemuck::cast_slice(self.positions.as_slice()).to_vec();
        if let Some(idx) = &self.indices {
            bytes.extend_from_slice(bytemuck::cast_slice(idx.as_slice()));
        }
        fnv1a64(&bytes)
    }
}

/// A renderer in the host scene, as handed over each frame.
#[derive(Debug, Clone)]
pub struct SceneEntity {
    pub id: Uuid,
    pub name: String,
    pub hierarchy_path: String,
    pub local_to_world: Mat4,
    /// World space bounds; derived from the mesh when absent.
    pub bounds: Option<Aabb>,
    pub mesh: Option<MeshKey>,
    pub enabled: bool,
}

impl SceneEntity {
    pub fn new(name: impl Into<String>, mesh: Option<MeshKey>, local_to_world: Mat4) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            hierarchy_path: name.clone(),
            name,
            local_to_world,
            bounds: None,
            mesh,
            enabled: true,
        }
    }
}

/// An entity accepted by collection, indexed `0..N` for this pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfiledEntity {
    pub index: u32,
    pub id: Uuid,
    pub mesh_name: String,
    pub hierarchy_path: String,
    pub local_to_world: Mat4,
    pub bounds: Aabb,
    pub mesh: MeshKey,
    pub vertex_count: u32,
    pub enabled: bool,
}

struct MeshSlot {
    data: Arc<MeshData>,
    hash: u64,
    local_bounds: Option<Aabb>,
}

/// Registered meshes plus their device uploads.
///
/// Uploads are shared by content hash and dropped when a recollection no
/// longer references them or when the active mode changes.
#[derive(Default)]
pub struct MeshCache {
    slots: Vec<Option<MeshSlot>>,
    resident: HashMap<u64, MeshHandle>,
}

impl MeshCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mesh: MeshData) -> MeshKey {
        let slot = MeshSlot {
            hash: mesh.content_hash(),
            local_bounds: mesh.local_bounds(),
            data: Arc::new(mesh),
        };
        if let Some(free) = self.slots.iter().position(Option::is_none) {
            self.slots[free] = Some(slot);
            MeshKey(free as u32)
        } else {
            self.slots.push(Some(slot));
            MeshKey(self.slots.len() as u32 - 1)
        }
    }

    pub fn remove(&mut self, key: MeshKey) -> Option<Arc<MeshData>> {
        self.slots
            .get_mut(key.0 as usize)
            .and_then(Option::take)
            .map(|slot| slot.data)
    }

    pub fn get(&self, key: MeshKey) -> Option<&Arc<MeshData>> {
        self.slot(key).map(|s| &s.data)
    }

    pub fn content_hash(&self, key: MeshKey) -> Option<u64> {
        self.slot(key).map(|s| s.hash)
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    fn slot(&self, key: MeshKey) -> Option<&MeshSlot> {
        self.slots.get(key.0 as usize).and_then(Option::as_ref)
    }

    /// Device handle for a mesh, uploading it on first use.
    pub fn resident_handle(
        &mut self,
        device: &mut dyn ProfilerDevice,
        key: MeshKey,
    ) -> Result<Option<MeshHandle>, ProfilerError> {
        let Some(slot) = self.slots.get(key.0 as usize).and_then(Option::as_ref) else {
            return Ok(None);
        };
        if let Some(handle) = self.resident.get(&slot.hash) {
            return Ok(Some(*handle));
        }
        let handle = device.upload_mesh(&slot.data)?;
        self.resident.insert(slot.hash, handle);
        Ok(Some(handle))
    }

    /// Releases uploads whose content is not referenced by `entities`.
    pub fn retain_referenced(&mut self, device: &mut dyn ProfilerDevice, entities: &[ProfiledEntity]) {
        let live: HashSet<u64> = entities
            .iter()
            .filter_map(|e| self.content_hash(e.mesh))
            .collect();
        self.resident.retain(|hash, handle| {
            let keep = live.contains(hash);
            if !keep {
                device.release_mesh(*handle);
            }
            keep
        });
    }

    pub fn release_all(&mut self, device: &mut dyn ProfilerDevice) {
        for (_, handle) in self.resident.drain() {
            device.release_mesh(handle);
        }
    }
}

/// Builds the entity list for a collection pass. Entries without a
/// registered mesh are dropped and do not consume an index.
pub fn collect_entities(scene: &[SceneEntity], meshes: &MeshCache) -> Vec<ProfiledEntity> {
    let mut out = Vec::with_capacity(scene.len());
    for entity in scene {
        let Some(key) = entity.mesh else {
            debug!("skipping {}: no mesh", entity.hierarchy_path);
            continue;
        };
        let Some(slot) = meshes.slot(key) else {
            debug!("skipping {}: mesh {:?} not registered", entity.hierarchy_path, key);
            continue;
        };
        out.push(ProfiledEntity {
            index: out.len() as u32,
            id: entity.id,
            mesh_name: slot.data.name.clone(),
            hierarchy_path: entity.hierarchy_path.clone(),
            local_to_world: entity.local_to_world,
            bounds: world_bounds(entity, slot),
            mesh: key,
            vertex_count: slot.data.vertex_count(),
            enabled: entity.enabled,
        });
    }
    out
}

/// Refreshes transforms, bounds and enabled flags of a kept entity list.
/// Entities that left the scene stay indexed but are disabled.
pub fn refresh_entities(entities: &mut [ProfiledEntity], scene: &[SceneEntity], meshes: &MeshCache) {
    let by_id: HashMap<Uuid, &SceneEntity> = scene.iter().map(|e| (e.id, e)).collect();
    for entity in entities.iter_mut() {
        match (by_id.get(&entity.id), meshes.slot(entity.mesh)) {
            (Some(src), Some(slot)) => {
                entity.local_to_world = src.local_to_world;
                entity.bounds = world_bounds(src, slot);
                entity.enabled = src.enabled;
            }
            _ => entity.enabled = false,
        }
    }
}

fn world_bounds(entity: &SceneEntity, slot: &MeshSlot) -> Aabb {
    entity.bounds.unwrap_or_else(|| {
        slot.local_bounds
            .map(|b| b.transformed(&entity.local_to_world))
            .unwrap_or_else(|| Aabb::new(entity.local_to_world.w_axis.truncate(), Vec3::ZERO))
    })
}

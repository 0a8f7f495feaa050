use glam::{Mat4, Vec3};
use vertex_profiler::scene::{collect_entities, refresh_entities, MeshCache};
use vertex_profiler::utils::Aabb;
use vertex_profiler::{MeshData, MeshKey, SceneEntity, SoftwareDevice};

fn triangle(name: &str, x: f32) -> MeshData {
    MeshData::new(
        name,
        vec![
            Vec3::new(x, 0.0, 0.0),
            Vec3::new(x + 1.0, 0.0, 0.0),
            Vec3::new(x, 1.0, 0.0),
        ],
        None,
    )
}

#[test]
fn identical_geometry_shares_one_upload() {
    let mut device = SoftwareDevice::new();
    let mut cache = MeshCache::new();
    let a = cache.insert(triangle("a", 0.0));
    let b = cache.insert(triangle("b", 0.0));
    let c = cache.insert(triangle("c", 5.0));
    assert_ne!(a, b);
    assert_eq!(cache.content_hash(a), cache.content_hash(b));

    let ha = cache.resident_handle(&mut device, a).unwrap().unwrap();
    let hb = cache.resident_handle(&mut device, b).unwrap().unwrap();
    let hc = cache.resident_handle(&mut device, c).unwrap().unwrap();
    assert_eq!(ha, hb);
    assert_ne!(ha, hc);
    assert_eq!(device.live_meshes(), 2);
    assert!(cache.resident_handle(&mut device, MeshKey(42)).unwrap().is_none());

    let scene = vec![SceneEntity::new("only_c", Some(c), Mat4::IDENTITY)];
    let entities = collect_entities(&scene, &cache);
    cache.retain_referenced(&mut device, &entities);
    assert_eq!(cache.resident_count(), 1);
    assert_eq!(device.live_meshes(), 1);

    cache.release_all(&mut device);
    assert_eq!(device.live_meshes(), 0);
}

#[test]
fn removed_slots_are_reused() {
    let mut cache = MeshCache::new();
    let a = cache.insert(triangle("a", 0.0));
    let _b = cache.insert(triangle("b", 1.0));
    assert!(cache.remove(a).is_some());
    assert!(cache.get(a).is_none());
    assert_eq!(cache.insert(triangle("c", 2.0)), a);
}

#[test]
fn collection_skips_entities_without_mesh() {
    let mut cache = MeshCache::new();
    let key = cache.insert(triangle("tri", 0.0));
    let mut hidden = SceneEntity::new("hidden", Some(key), Mat4::IDENTITY);
    hidden.enabled = false;
    let scene = vec![
        SceneEntity::new("empty", None, Mat4::IDENTITY),
        SceneEntity::new("first", Some(key), Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0))),
        SceneEntity::new("dangling", Some(MeshKey(9)), Mat4::IDENTITY),
        hidden,
    ];

    let entities = collect_entities(&scene, &cache);
    assert_eq!(entities.len(), 2);
    assert_eq!(entities[0].index, 0);
    assert_eq!(entities[0].hierarchy_path, "first");
    assert_eq!(entities[0].mesh_name, "tri");
    assert_eq!(entities[0].vertex_count, 3);
    assert!((entities[0].bounds.center - Vec3::new(10.5, 0.5, 0.0)).length() < 1e-5);
    assert_eq!(entities[1].index, 1);
    assert!(!entities[1].enabled);
}

#[test]
fn explicit_bounds_win_over_mesh_bounds() {
    let mut cache = MeshCache::new();
    let key = cache.insert(triangle("tri", 0.0));
    let mut entity = SceneEntity::new("e", Some(key), Mat4::IDENTITY);
    let bounds = Aabb::new(Vec3::splat(100.0), Vec3::ONE);
    entity.bounds = Some(bounds);
    let entities = collect_entities(&[entity], &cache);
    assert_eq!(entities[0].bounds, bounds);
}

#[test]
fn refresh_updates_kept_entities() {
    let mut cache = MeshCache::new();
    let key = cache.insert(triangle("tri", 0.0));
    let mut scene = vec![
        SceneEntity::new("moving", Some(key), Mat4::IDENTITY),
        SceneEntity::new("leaving", Some(key), Mat4::IDENTITY),
    ];
    let mut entities = collect_entities(&scene, &cache);

    scene[0].local_to_world = Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0));
    scene.pop();
    refresh_entities(&mut entities, &scene, &cache);

    assert!((entities[0].local_to_world.w_axis.y - 3.0).abs() < 1e-6);
    assert!((entities[0].bounds.center.y - 3.5).abs() < 1e-5);
    assert!(entities[0].enabled);
    assert!(!entities[1].enabled);
    assert_eq!(entities.len(), 2);
}

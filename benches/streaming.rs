use criterion::{criterion_group, criterion_main, Criterion, black_box};

use threemx::core::camera::Camera;
use threemx::format::codec::{encode_raw_mesh, CodecRegistry, RawMesh};
use threemx::format::header::{NodeInfo, ResourceInfo, ResourceKind};
use threemx::format::writer::TileWriter;
use threemx::format::decoder::decode_tile;
use threemx::math::{Aabb, Frustum};
use threemx::streaming::lod::CameraState;
use threemx::tasks::CancelToken;

use glam::Vec3;

/// Synthetic tile with `meshes` geometry resources of `verts` vertices each.
fn build_tile(meshes: usize, verts: usize) -> Vec<u8> {
    let mut writer = TileWriter::new(1);
    let mut resources = Vec::new();
    for i in 0..meshes {
        resources.push(format!("geo{}", i));
    }
    writer.push_node(NodeInfo {
        id: "N0".to_string(),
        bb_min: [-100.0, -100.0, -100.0],
        bb_max: [100.0, 100.0, 100.0],
        max_screen_diameter: 200.0,
        children: Vec::new(),
        resources: resources.clone(),
    });

    let mut positions = Vec::with_capacity(verts * 3);
    let mut uvs = Vec::with_capacity(verts * 2);
    let mut indices = Vec::with_capacity(verts * 3);
    for i in 0..verts {
        let t = i as f32 * 0.37;
        positions.extend_from_slice(&[t.sin() * 80.0, t.cos() * 80.0, t * 0.01]);
        uvs.extend_from_slice(&[t.fract(), (t * 0.5).fract()]);
    }
    for i in 0..verts {
        let a = i as u32;
        indices.extend_from_slice(&[a, (a + 1) % verts as u32, (a + 2) % verts as u32]);
    }
    let payload = encode_raw_mesh(&RawMesh {
        positions,
        normals: None,
        uvs,
        indices,
    });

    for id in &resources {
        writer.push_resource(
            ResourceInfo {
                id: id.clone(),
                kind: ResourceKind::GeometryBuffer,
                format: "raw".to_string(),
                size: 0,
                file: None,
                bb_min: Some([-100.0, -100.0, -100.0]),
                bb_max: Some([100.0, 100.0, 100.0]),
                texture: None,
            },
            payload.clone(),
        );
    }
    writer.finish()
}

fn bench_decode_small_tile(c: &mut Criterion) {
    let bytes = build_tile(4, 1_000);
    let codecs = CodecRegistry::with_builtin();
    let cancel = CancelToken::new();

    c.bench_function("decode_tile_4x1k", |b| {
        b.iter(|| {
            decode_tile("bench.3mxb", black_box(&bytes), &codecs, &cancel)
                .unwrap()
                .unwrap()
        });
    });
}

fn bench_decode_large_tile(c: &mut Criterion) {
    let bytes = build_tile(8, 20_000);
    let codecs = CodecRegistry::with_builtin();
    let cancel = CancelToken::new();

    c.bench_function("decode_tile_8x20k", |b| {
        b.iter(|| {
            decode_tile("bench.3mxb", black_box(&bytes), &codecs, &cancel)
                .unwrap()
                .unwrap()
        });
    });
}

fn bench_frustum_culling(c: &mut Criterion) {
    let camera = Camera::new(Vec3::new(0.0, 50.0, 200.0), 60.0, 1920.0, 1080.0);
    let frustum = Frustum::from_view_projection(&camera.view_projection());

    // 1k boxes scattered around the camera, roughly half in view
    let boxes: Vec<Aabb> = (0..1000)
        .map(|i| {
            let t = i as f32 * 0.61;
            let center = Vec3::new(t.sin() * 400.0, (t * 0.3).cos() * 100.0, t.cos() * 400.0);
            Aabb::new(center - Vec3::splat(10.0), center + Vec3::splat(10.0))
        })
        .collect();

    c.bench_function("frustum_cull_1k_boxes", |b| {
        b.iter(|| {
            boxes
                .iter()
                .filter(|aabb| frustum.intersects_aabb(black_box(aabb)))
                .count()
        });
    });
}

fn bench_lod_selection(c: &mut Criterion) {
    let camera = Camera::new(Vec3::new(0.0, 50.0, 200.0), 60.0, 1920.0, 1080.0);
    let mut state = CameraState::new();
    state.update(&camera, 1.0);

    let spheres: Vec<(Vec3, f32)> = (0..1000)
        .map(|i| {
            let t = i as f32 * 0.61;
            (
                Vec3::new(t.sin() * 400.0, (t * 0.3).cos() * 100.0, t.cos() * 400.0),
                10.0 + (t * 0.2).fract() * 40.0,
            )
        })
        .collect();

    c.bench_function("projected_diameter_1k_spheres", |b| {
        b.iter(|| {
            spheres
                .iter()
                .filter(|(center, radius)| {
                    state.projected_diameter(black_box(*center), *radius, 1.0) > 100.0
                })
                .count()
        });
    });
}

criterion_group!(
    benches,
    bench_decode_small_tile,
    bench_decode_large_tile,
    bench_frustum_culling,
    bench_lod_selection
);
criterion_main!(benches);

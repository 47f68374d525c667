//! Procedural geometry and the demo scenes the CLI renders.

use std::f32::consts::{FRAC_PI_2, PI};

use glam::{Mat4, Quat, Vec3};

use crate::environment::EnvironmentMap;
use crate::error::Result;
use crate::scene::{BaseColor, Geometry, Material, MaterialKind, MeshPart, Scene, Texture};
use crate::settings::Camera;

/// Rectangle in the xy plane, centered on the origin and facing +z
pub fn quad(width: f32, height: f32) -> Result<Geometry> {
    let (w, h) = (width * 0.5, height * 0.5);
    Geometry::new(
        vec![[-w, -h, 0.0], [w, -h, 0.0], [w, h, 0.0], [-w, h, 0.0]],
        vec![[0.0, 0.0, 1.0]; 4],
        Some(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
        Some(vec![0, 1, 2, 0, 2, 3]),
    )
}

/// Axis-aligned box centered on the origin with flat per-face normals
pub fn cuboid(size: Vec3) -> Result<Geometry> {
    let half = size * 0.5;
    let mut positions = Vec::with_capacity(24);
    let mut normals = Vec::with_capacity(24);
    let mut uvs = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for n in [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z] {
        let u = if n.y.abs() > 0.5 { Vec3::X } else { Vec3::Y };
        let v = n.cross(u);
        let (c, u, v) = (n * half, u * half, v * half);
        let base = positions.len() as u32;
        for (corner, uv) in [(-u - v, [0.0, 0.0]), (u - v, [1.0, 0.0]), (u + v, [1.0, 1.0]), (v - u, [0.0, 1.0])] {
            positions.push((c + corner).to_array());
            normals.push(n.to_array());
            uvs.push(uv);
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    Geometry::new(positions, normals, Some(uvs), Some(indices))
}

/// Latitude-longitude sphere with smooth normals
pub fn uv_sphere(radius: f32, segments: u32, rings: u32) -> Result<Geometry> {
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    for r in 0..=rings {
        let theta = PI * r as f32 / rings as f32;
        for s in 0..=segments {
            let phi = 2.0 * PI * s as f32 / segments as f32;
            let n = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
            positions.push((n * radius).to_array());
            normals.push(n.to_array());
            uvs.push([s as f32 / segments as f32, r as f32 / rings as f32]);
        }
    }

    let row = segments + 1;
    let mut indices = Vec::new();
    for r in 0..rings {
        for s in 0..segments {
            let a = r * row + s;
            let b = a + row;
            // Skip the triangles that collapse onto a pole
            if r + 1 < rings {
                indices.extend_from_slice(&[a, b + 1, b]);
            }
            if r > 0 {
                indices.extend_from_slice(&[a, a + 1, b + 1]);
            }
        }
    }
    Geometry::new(positions, normals, Some(uvs), Some(indices))
}

/// Checkerboard texture with `cells` squares per side
pub fn checker_texture(size: u32, cells: u32, a: [f32; 3], b: [f32; 3]) -> Result<Texture> {
    let cell = (size / cells.max(1)).max(1);
    let texels = (0..size * size)
        .map(|i| {
            let (x, y) = (i % size, i / size);
            let c = if (x / cell + y / cell) % 2 == 0 { a } else { b };
            [c[0], c[1], c[2], 1.0]
        })
        .collect();
    Texture::new(size, size, texels)
}

/// Horizon-to-zenith gradient standing in for a loaded environment map
pub fn sky_environment(width: u32, height: u32) -> Result<EnvironmentMap> {
    let zenith = Vec3::new(0.35, 0.55, 1.0);
    let horizon = Vec3::new(1.0, 0.95, 0.85);
    let ground = Vec3::splat(0.15);
    let texels = (0..width * height)
        .map(|i| {
            let v = (i / width) as f32 / height as f32;
            let c = if v < 0.5 {
                horizon.lerp(zenith, 1.0 - v * 2.0)
            } else {
                ground
            };
            [c.x, c.y, c.z, 1.0]
        })
        .collect();
    EnvironmentMap::from_rgba32f(width, height, texels)
}

pub struct DemoScene {
    pub scene: Scene,
    pub camera: Camera,
    pub environment: Option<EnvironmentMap>,
}

/// Closed box with colored side walls, a ceiling light and two blocks
pub fn cornell_box() -> Result<DemoScene> {
    let mut scene = Scene::new();
    let wall = scene.add_geometry(quad(2.0, 2.0)?);
    let lamp = scene.add_geometry(quad(0.5, 0.5)?);
    let block = scene.add_geometry(cuboid(Vec3::ONE)?);

    let white = scene.add_material(Material::lambert([0.73, 0.73, 0.73]))?;
    let red = scene.add_material(Material::lambert([0.65, 0.05, 0.05]))?;
    let green = scene.add_material(Material::lambert([0.12, 0.45, 0.15]))?;
    let light = scene.add_material(Material::emissive([17.0, 12.0, 4.0]))?;

    let part = |geometry, material| vec![MeshPart { geometry, material }];
    let walls = [
        ("floor", Mat4::from_rotation_x(-FRAC_PI_2), white),
        ("ceiling", Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0)) * Mat4::from_rotation_x(FRAC_PI_2), white),
        ("back", Mat4::from_translation(Vec3::new(0.0, 1.0, -1.0)), white),
        ("left", Mat4::from_translation(Vec3::new(-1.0, 1.0, 0.0)) * Mat4::from_rotation_y(FRAC_PI_2), red),
        ("right", Mat4::from_translation(Vec3::new(1.0, 1.0, 0.0)) * Mat4::from_rotation_y(-FRAC_PI_2), green),
    ];
    for (name, transform, material) in walls {
        scene.add_instance(name, part(wall, material), transform, false)?;
    }
    scene.add_instance(
        "light",
        part(lamp, light),
        Mat4::from_translation(Vec3::new(0.0, 1.99, 0.0)) * Mat4::from_rotation_x(FRAC_PI_2),
        false,
    )?;
    scene.add_instance(
        "block",
        part(block, white),
        Mat4::from_scale_rotation_translation(
            Vec3::new(0.6, 1.2, 0.6),
            Quat::from_rotation_y(0.3),
            Vec3::new(-0.35, 0.6, -0.3),
        ),
        false,
    )?;
    scene.add_instance(
        "block",
        part(block, white),
        Mat4::from_scale_rotation_translation(Vec3::splat(0.6), Quat::from_rotation_y(-0.3), Vec3::new(0.4, 0.3, 0.3)),
        false,
    )?;

    let mut camera = Camera::look_at(Vec3::new(0.0, 1.0, 3.4), Vec3::new(0.0, 1.0, 0.0));
    camera.fov_y_degrees = 40.0;
    Ok(DemoScene {
        scene,
        camera,
        environment: None,
    })
}

/// One sphere per material class on a checkered floor under a sky
pub fn material_showcase() -> Result<DemoScene> {
    let mut scene = Scene::new();
    let floor = scene.add_geometry(quad(12.0, 12.0)?);
    let sphere = scene.add_geometry(uv_sphere(0.5, 48, 24)?);

    let checker = scene.add_texture(checker_texture(64, 8, [0.8; 3], [0.2; 3])?);
    let floor_material = scene.add_material(Material {
        kind: MaterialKind::Lambert,
        base_color: BaseColor::Texture(checker),
        ..Material::default()
    })?;
    scene.add_instance(
        "floor",
        vec![MeshPart {
            geometry: floor,
            material: floor_material,
        }],
        Mat4::from_rotation_x(-FRAC_PI_2),
        false,
    )?;

    let materials = [
        Material::lambert([0.8, 0.2, 0.2]),
        Material {
            kind: MaterialKind::Ggx,
            base_color: BaseColor::Constant([0.95, 0.64, 0.54]),
            roughness: 0.3,
            ..Material::default()
        },
        Material {
            kind: MaterialKind::Plastic,
            base_color: BaseColor::Constant([0.1, 0.3, 0.8]),
            roughness: 0.2,
            ..Material::default()
        },
        Material {
            kind: MaterialKind::Blend,
            base_color: BaseColor::Constant([0.2, 0.7, 0.3]),
            roughness: 0.4,
            specular: 0.3,
            ..Material::default()
        },
        Material {
            base_color: BaseColor::Constant([0.9, 0.8, 0.3]),
            metallic: 0.2,
            sheen: 0.5,
            clearcoat: 1.0,
            clearcoat_gloss: 0.9,
            ..Material::default()
        },
    ];
    for (i, material) in materials.into_iter().enumerate() {
        let material = scene.add_material(material)?;
        let x = (i as f32 - 2.0) * 1.2;
        scene.add_instance(
            "sphere",
            vec![MeshPart {
                geometry: sphere,
                material,
            }],
            Mat4::from_translation(Vec3::new(x, 0.5, 0.0)),
            false,
        )?;
    }

    let camera = Camera::look_at(Vec3::new(0.0, 1.6, 5.0), Vec3::new(0.0, 0.4, 0.0));
    Ok(DemoScene {
        scene,
        camera,
        environment: Some(sky_environment(256, 128)?),
    })
}

/// Diffuse plane under a uniform white sky; converges to its albedo
pub fn furnace(albedo: f32) -> Result<DemoScene> {
    let mut scene = Scene::new();
    let plane = scene.add_geometry(quad(4.0, 4.0)?);
    let material = scene.add_material(Material::lambert([albedo; 3]))?;
    scene.add_instance(
        "plane",
        vec![MeshPart {
            geometry: plane,
            material,
        }],
        Mat4::IDENTITY,
        false,
    )?;

    // Off the quad diagonal so no primary ray grazes the shared edge
    let mut camera = Camera::look_at(Vec3::new(0.05, 0.03, 2.0), Vec3::new(0.05, 0.03, 0.0));
    camera.fov_y_degrees = 20.0;
    Ok(DemoScene {
        scene,
        camera,
        environment: Some(EnvironmentMap::constant(32, 16, [1.0; 3])?),
    })
}

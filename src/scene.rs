//! Scene arena: geometries, materials and textures addressed by handle,
//! plus an ordered list of instances referencing them.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::Mat4;
use log::debug;
use serde::{Deserialize, Serialize};
use vivid_shared::{Aabb, MaterialParams, TextureInfo, TracerConfig};

use crate::error::{RenderError, Result};

macro_rules! handle {
    ($name:ident, $kind:literal) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            fn unknown(self) -> RenderError {
                RenderError::UnknownHandle {
                    kind: $kind,
                    index: self.0,
                }
            }
        }
    };
}

handle!(GeometryId, "geometry");
handle!(MaterialId, "material");
handle!(TextureId, "texture");
handle!(InstanceId, "instance");

/// Immutable triangle geometry in object space
#[derive(Clone, Debug)]
pub struct Geometry {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    uvs: Vec<[f32; 2]>,
    indices: Option<Vec<u32>>,
    bounds: Aabb,
}

impl Geometry {
    /// Validates attributes and computes the bounding box.
    ///
    /// Missing UVs default to zero. Without indices, consecutive vertex
    /// triples form triangles.
    pub fn new(
        positions: Vec<[f32; 3]>,
        normals: Vec<[f32; 3]>,
        uvs: Option<Vec<[f32; 2]>>,
        indices: Option<Vec<u32>>,
    ) -> Result<Self> {
        if positions.is_empty() {
            return Err(RenderError::geometry("no vertices"));
        }
        if normals.len() != positions.len() {
            return Err(RenderError::geometry(format!(
                "{} normals for {} positions",
                normals.len(),
                positions.len()
            )));
        }
        let uvs = uvs.unwrap_or_else(|| vec![[0.0; 2]; positions.len()]);
        if uvs.len() != positions.len() {
            return Err(RenderError::geometry(format!(
                "{} uvs for {} positions",
                uvs.len(),
                positions.len()
            )));
        }

        match &indices {
            Some(indices) => {
                if indices.is_empty() || indices.len() % 3 != 0 {
                    return Err(RenderError::geometry(format!(
                        "index count {} is not a positive multiple of 3",
                        indices.len()
                    )));
                }
                if let Some(bad) = indices.iter().find(|&&i| i as usize >= positions.len()) {
                    return Err(RenderError::geometry(format!(
                        "index {bad} out of range for {} vertices",
                        positions.len()
                    )));
                }
            }
            None => {
                if positions.len() % 3 != 0 {
                    return Err(RenderError::geometry(format!(
                        "{} unindexed vertices do not form whole triangles",
                        positions.len()
                    )));
                }
            }
        }

        let bounds = positions
            .iter()
            .fold(Aabb::empty(), |aabb, p| aabb.grow(*p));

        Self {
            positions,
            normals,
            uvs,
            indices,
            bounds: Aabb::empty(),
        }
        .with_bounds(bounds)
    }

    /// Replaces the bounding box with an importer-supplied one
    pub fn with_bounds(mut self, bounds: Aabb) -> Result<Self> {
        if !bounds.is_valid() {
            return Err(RenderError::geometry(format!(
                "degenerate bounding box {:?}..{:?}",
                bounds.min, bounds.max
            )));
        }
        self.bounds = bounds;
        Ok(self)
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn normals(&self) -> &[[f32; 3]] {
        &self.normals
    }

    pub fn uvs(&self) -> &[[f32; 2]] {
        &self.uvs
    }

    pub fn indices(&self) -> Option<&[u32]> {
        self.indices.as_deref()
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len() / 3,
            None => self.positions.len() / 3,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialKind {
    Lambert,
    Ggx,
    Plastic,
    Blend,
    Disney,
}

impl MaterialKind {
    fn code(self) -> u32 {
        match self {
            MaterialKind::Lambert => MaterialParams::LAMBERT,
            MaterialKind::Ggx => MaterialParams::GGX,
            MaterialKind::Plastic => MaterialParams::PLASTIC,
            MaterialKind::Blend => MaterialParams::BLEND,
            MaterialKind::Disney => MaterialParams::DISNEY,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BaseColor {
    Constant([f32; 3]),
    /// Modulated by the constant white base color
    Texture(TextureId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub emittance: [f32; 3],
    pub kind: MaterialKind,
    pub base_color: BaseColor,
    pub roughness: f32,
    pub specular: f32,
    pub metallic: f32,
    pub subsurface: f32,
    pub specular_tint: f32,
    pub sheen: f32,
    pub sheen_tint: f32,
    pub clearcoat: f32,
    pub clearcoat_gloss: f32,
    pub diffuse_fresnel: bool,
    pub specular_fresnel: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            emittance: [0.0; 3],
            kind: MaterialKind::Disney,
            base_color: BaseColor::Constant([1.0; 3]),
            roughness: 0.5,
            specular: 0.5,
            metallic: 0.0,
            subsurface: 0.0,
            specular_tint: 0.0,
            sheen: 0.0,
            sheen_tint: 0.5,
            clearcoat: 0.0,
            clearcoat_gloss: 1.0,
            diffuse_fresnel: true,
            specular_fresnel: true,
        }
    }
}

impl Material {
    pub fn lambert(color: [f32; 3]) -> Self {
        Self {
            kind: MaterialKind::Lambert,
            base_color: BaseColor::Constant(color),
            ..Default::default()
        }
    }

    pub fn emissive(radiance: [f32; 3]) -> Self {
        Self {
            emittance: radiance,
            ..Self::lambert([0.0; 3])
        }
    }

    /// Flattened device record
    pub fn to_params(&self) -> MaterialParams {
        let mut kind = self.kind.code();
        if self.diffuse_fresnel {
            kind |= MaterialParams::FRESNEL_DIFFUSE;
        }
        if self.specular_fresnel {
            kind |= MaterialParams::FRESNEL_SPECULAR;
        }
        let (base_color, base_color_texture) = match self.base_color {
            BaseColor::Constant(color) => (color, TracerConfig::NO_TEXTURE),
            BaseColor::Texture(texture) => ([1.0; 3], texture.0),
        };

        MaterialParams {
            emittance: self.emittance,
            kind,
            base_color,
            base_color_texture,
            roughness: self.roughness,
            specular: self.specular,
            metallic: self.metallic,
            subsurface: self.subsurface,
            specular_tint: self.specular_tint,
            sheen: self.sheen,
            sheen_tint: self.sheen_tint,
            clearcoat: self.clearcoat,
            clearcoat_gloss: self.clearcoat_gloss,
            _padding: [0.0; 3],
        }
    }
}

/// Linear RGBA32F texture
#[derive(Clone, Debug)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<[f32; 4]>,
}

impl Texture {
    pub fn new(width: u32, height: u32, texels: Vec<[f32; 4]>) -> Result<Self> {
        if width == 0 || height == 0 || texels.len() != (width * height) as usize {
            return Err(RenderError::invalid_image(format!(
                "texture of {width}x{height} with {} texels",
                texels.len()
            )));
        }
        Ok(Self { width, height, texels })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MeshPart {
    pub geometry: GeometryId,
    pub material: MaterialId,
}

#[derive(Clone, Debug)]
pub struct Instance {
    pub name: String,
    pub parts: Vec<MeshPart>,
    pub transform: Mat4,
    /// Visibility mask tested against the ray cull mask
    pub mask: u8,
}

static NEXT_SCENE_ID: AtomicU64 = AtomicU64::new(0);

pub struct Scene {
    id: u64,
    geometries: Vec<Geometry>,
    materials: Vec<Material>,
    textures: Vec<Texture>,
    instances: Vec<(InstanceId, Instance)>,
    next_instance: u32,
    revision: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            id: NEXT_SCENE_ID.fetch_add(1, Ordering::Relaxed),
            geometries: Vec::new(),
            materials: Vec::new(),
            textures: Vec::new(),
            instances: Vec::new(),
            next_instance: 0,
            revision: 0,
        }
    }

    /// Unique per scene in this process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Increases on every mutation; renderers rebuild when `(id, revision)` changes
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn add_geometry(&mut self, geometry: Geometry) -> GeometryId {
        self.geometries.push(geometry);
        self.touch();
        GeometryId(self.geometries.len() as u32 - 1)
    }

    /// Fails when the base color names a texture that was never added
    pub fn add_material(&mut self, material: Material) -> Result<MaterialId> {
        self.check_texture(&material)?;
        self.materials.push(material);
        self.touch();
        Ok(MaterialId(self.materials.len() as u32 - 1))
    }

    fn check_texture(&self, material: &Material) -> Result<()> {
        if let BaseColor::Texture(texture) = material.base_color {
            self.texture(texture)?;
        }
        Ok(())
    }

    /// Re-checks texture references, which `material_mut` can change after insertion
    pub fn validate_materials(&self) -> Result<()> {
        self.materials.iter().try_for_each(|material| self.check_texture(material))
    }

    pub fn add_texture(&mut self, texture: Texture) -> TextureId {
        self.textures.push(texture);
        self.touch();
        TextureId(self.textures.len() as u32 - 1)
    }

    pub fn geometry(&self, id: GeometryId) -> Result<&Geometry> {
        self.geometries.get(id.index()).ok_or_else(|| id.unknown())
    }

    pub fn material(&self, id: MaterialId) -> Result<&Material> {
        self.materials.get(id.index()).ok_or_else(|| id.unknown())
    }

    /// Edits are visible to every part sharing the material
    pub fn material_mut(&mut self, id: MaterialId) -> Result<&mut Material> {
        if id.index() >= self.materials.len() {
            return Err(id.unknown());
        }
        self.touch();
        Ok(&mut self.materials[id.index()])
    }

    pub fn texture(&self, id: TextureId) -> Result<&Texture> {
        self.textures.get(id.index()).ok_or_else(|| id.unknown())
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn instances(&self) -> impl Iterator<Item = (InstanceId, &Instance)> {
        self.instances.iter().map(|(id, instance)| (*id, instance))
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn instance(&self, id: InstanceId) -> Result<&Instance> {
        self.instances
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, instance)| instance)
            .ok_or_else(|| id.unknown())
    }

    fn instance_slot(&mut self, id: InstanceId) -> Result<&mut Instance> {
        self.instances
            .iter_mut()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, instance)| instance)
            .ok_or_else(|| id.unknown())
    }

    fn unique_name(&self, name: &str) -> String {
        let taken = |candidate: &str| self.instances.iter().any(|(_, i)| i.name == candidate);
        if !taken(name) {
            return name.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{name}@{n}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Appends an instance. With `clone_materials`, every distinct material the
    /// parts reference is copied once into a new slot owned by this instance.
    pub fn add_instance(
        &mut self,
        name: &str,
        parts: Vec<MeshPart>,
        transform: Mat4,
        clone_materials: bool,
    ) -> Result<InstanceId> {
        if parts.is_empty() {
            return Err(RenderError::geometry(format!("instance {name} has no parts")));
        }
        for part in &parts {
            self.geometry(part.geometry)?;
            self.material(part.material)?;
        }

        let mut parts = parts;
        if clone_materials {
            let mut cloned: Vec<(MaterialId, MaterialId)> = Vec::new();
            for part in parts.iter_mut() {
                let copy = match cloned.iter().find(|(original, _)| *original == part.material) {
                    Some((_, copy)) => *copy,
                    None => {
                        let material = self.materials[part.material.index()].clone();
                        let copy = self.add_material(material)?;
                        cloned.push((part.material, copy));
                        copy
                    }
                };
                part.material = copy;
            }
        }

        let id = InstanceId(self.next_instance);
        self.next_instance += 1;
        let name = self.unique_name(name);
        debug!("Adding instance {name} with {} parts", parts.len());
        self.instances.push((
            id,
            Instance {
                name,
                parts,
                transform,
                mask: 0xFF,
            },
        ));
        self.touch();
        Ok(id)
    }

    pub fn set_transform(&mut self, id: InstanceId, transform: Mat4) -> Result<()> {
        self.instance_slot(id)?.transform = transform;
        self.touch();
        Ok(())
    }

    pub fn set_mask(&mut self, id: InstanceId, mask: u8) -> Result<()> {
        self.instance_slot(id)?.mask = mask;
        self.touch();
        Ok(())
    }

    pub fn remove_instance(&mut self, id: InstanceId) -> Result<Instance> {
        let position = self
            .instances
            .iter()
            .position(|(candidate, _)| *candidate == id)
            .ok_or_else(|| id.unknown())?;
        self.touch();
        Ok(self.instances.remove(position).1)
    }

    /// Gives one part a private copy of its material
    pub fn clone_part_material(&mut self, id: InstanceId, part: usize) -> Result<MaterialId> {
        let original = self.part(id, part)?.material;
        let material = self.material(original)?.clone();
        let copy = self.add_material(material)?;
        self.instance_slot(id)?.parts[part].material = copy;
        Ok(copy)
    }

    pub fn set_part_material(&mut self, id: InstanceId, part: usize, material: MaterialId) -> Result<()> {
        self.material(material)?;
        self.part(id, part)?;
        self.instance_slot(id)?.parts[part].material = material;
        self.touch();
        Ok(())
    }

    fn part(&self, id: InstanceId, part: usize) -> Result<MeshPart> {
        let instance = self.instance(id)?;
        instance.parts.get(part).copied().ok_or(RenderError::UnknownHandle {
            kind: "mesh part",
            index: part as u32,
        })
    }

    /// Device material table; material handles index it directly
    pub fn material_params(&self) -> Vec<MaterialParams> {
        self.materials.iter().map(Material::to_params).collect()
    }

    /// Texture descriptors and the concatenated texel buffer
    pub fn texture_table(&self) -> (Vec<TextureInfo>, Vec<[f32; 4]>) {
        let mut infos = Vec::with_capacity(self.textures.len());
        let mut texels = Vec::new();
        for texture in &self.textures {
            infos.push(TextureInfo {
                width: texture.width,
                height: texture.height,
                offset: texels.len() as u32,
                _padding: 0,
            });
            texels.extend_from_slice(&texture.texels);
        }
        (infos, texels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Geometry {
        Geometry::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0.0, 0.0, 1.0]; 3],
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn geometry_validation() {
        let p = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let n = vec![[0.0, 0.0, 1.0]; 3];
        assert!(Geometry::new(p.clone(), vec![], None, None).is_err());
        assert!(Geometry::new(p.clone(), n.clone(), Some(vec![[0.0; 2]; 2]), None).is_err());
        assert!(Geometry::new(p.clone(), n.clone(), None, Some(vec![0, 1])).is_err());
        assert!(Geometry::new(p.clone(), n.clone(), None, Some(vec![0, 1, 3])).is_err());
        assert!(Geometry::new(vec![], vec![], None, None).is_err());
        assert!(Geometry::new(vec![[f32::NAN, 0.0, 0.0]; 3], n.clone(), None, None).is_err());

        // Planar geometry has a zero extent on one axis
        let g = Geometry::new(p, n, None, Some(vec![0, 1, 2])).unwrap();
        assert_eq!(g.bounds().min, [0.0, 0.0, 0.0]);
        assert_eq!(g.bounds().max, [1.0, 1.0, 0.0]);
        assert_eq!(g.triangle_count(), 1);
    }

    #[test]
    fn inverted_importer_bounds_are_rejected() {
        let inverted = Aabb::new([1.0, 0.0, 0.0], [0.0, 1.0, 1.0]);
        assert!(matches!(
            triangle().with_bounds(inverted),
            Err(RenderError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn duplicate_names_get_suffixes() {
        let mut scene = Scene::new();
        let g = scene.add_geometry(triangle());
        let m = scene.add_material(Material::default()).unwrap();
        let part = vec![MeshPart { geometry: g, material: m }];
        let a = scene.add_instance("box", part.clone(), Mat4::IDENTITY, false).unwrap();
        let b = scene.add_instance("box", part.clone(), Mat4::IDENTITY, false).unwrap();
        let c = scene.add_instance("box", part, Mat4::IDENTITY, false).unwrap();
        assert_eq!(scene.instance(a).unwrap().name, "box");
        assert_eq!(scene.instance(b).unwrap().name, "box@1");
        assert_eq!(scene.instance(c).unwrap().name, "box@2");
    }

    #[test]
    fn shared_materials_until_cloned() {
        let mut scene = Scene::new();
        let g = scene.add_geometry(triangle());
        let m = scene.add_material(Material::lambert([0.5; 3])).unwrap();
        let parts = vec![MeshPart { geometry: g, material: m }, MeshPart { geometry: g, material: m }];
        let shared = scene.add_instance("a", parts.clone(), Mat4::IDENTITY, false).unwrap();
        let private = scene.add_instance("b", parts, Mat4::IDENTITY, true).unwrap();

        // One clone for the distinct material, shared by both parts
        assert_eq!(scene.materials().len(), 2);
        let private_parts = scene.instance(private).unwrap().parts.clone();
        assert_eq!(private_parts[0].material, private_parts[1].material);
        assert_ne!(private_parts[0].material, m);

        scene.material_mut(m).unwrap().base_color = BaseColor::Constant([1.0, 0.0, 0.0]);
        let copy = private_parts[0].material;
        assert_eq!(scene.material(copy).unwrap().base_color, BaseColor::Constant([0.5; 3]));
        assert_eq!(scene.instance(shared).unwrap().parts[1].material, m);

        let detached = scene.clone_part_material(shared, 1).unwrap();
        assert_ne!(detached, m);
        assert_eq!(scene.instance(shared).unwrap().parts[0].material, m);
    }

    #[test]
    fn mutations_bump_revision() {
        let mut scene = Scene::new();
        let g = scene.add_geometry(triangle());
        let m = scene.add_material(Material::default()).unwrap();
        let id = scene
            .add_instance("t", vec![MeshPart { geometry: g, material: m }], Mat4::IDENTITY, false)
            .unwrap();
        let before = scene.revision();
        scene.set_transform(id, Mat4::from_translation(glam::Vec3::X)).unwrap();
        assert!(scene.revision() > before);

        let before = scene.revision();
        scene.remove_instance(id).unwrap();
        assert!(scene.revision() > before);
        assert!(matches!(
            scene.set_transform(id, Mat4::IDENTITY),
            Err(RenderError::UnknownHandle { kind: "instance", .. })
        ));
    }

    #[test]
    fn material_flattening() {
        let mut material = Material::lambert([0.2, 0.4, 0.6]);
        material.specular_fresnel = false;
        let params = material.to_params();
        assert_eq!(params.class(), MaterialParams::LAMBERT);
        assert_ne!(params.kind & MaterialParams::FRESNEL_DIFFUSE, 0);
        assert_eq!(params.kind & MaterialParams::FRESNEL_SPECULAR, 0);
        assert_eq!(params.base_color_texture, TracerConfig::NO_TEXTURE);

        material.base_color = BaseColor::Texture(TextureId(3));
        assert_eq!(material.to_params().base_color_texture, 3);
    }

    #[test]
    fn texture_table_concatenates_texels() {
        let mut scene = Scene::new();
        scene.add_texture(Texture::new(2, 1, vec![[1.0; 4]; 2]).unwrap());
        scene.add_texture(Texture::new(1, 3, vec![[0.5; 4]; 3]).unwrap());
        let (infos, texels) = scene.texture_table();
        assert_eq!(infos[1].offset, 2);
        assert_eq!(infos.len(), 2);
        assert_eq!(texels.len(), 5);
        assert!(matches!(
            Texture::new(2, 2, vec![[0.0; 4]; 3]),
            Err(RenderError::InvalidImage(_))
        ));
    }

    #[test]
    fn texture_handles_are_checked() {
        let mut scene = Scene::new();
        let missing = Material {
            base_color: BaseColor::Texture(TextureId(0)),
            ..Material::default()
        };
        assert!(matches!(
            scene.add_material(missing.clone()),
            Err(RenderError::UnknownHandle { kind: "texture", index: 0 })
        ));
        assert!(scene.materials().is_empty());

        let texture = scene.add_texture(Texture::new(1, 1, vec![[1.0; 4]]).unwrap());
        let m = scene.add_material(missing).unwrap();
        assert_eq!(scene.material(m).unwrap().base_color, BaseColor::Texture(texture));
        assert!(scene.validate_materials().is_ok());

        scene.material_mut(m).unwrap().base_color = BaseColor::Texture(TextureId(7));
        assert!(matches!(
            scene.validate_materials(),
            Err(RenderError::UnknownHandle { kind: "texture", index: 7 })
        ));
    }

    #[test]
    fn scenes_have_distinct_ids() {
        let a = Scene::new();
        let b = Scene::default();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.revision(), b.revision());
    }
}

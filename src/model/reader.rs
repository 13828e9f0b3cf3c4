//! PMX 模型加载器
//!
//! 支持 PMX 2.0 / 2.1，UTF-16LE 与 UTF-8 文本，索引宽度 1/2/4。
//! 软体节（2.1）不读取。

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use glam::{Quat, Vec2, Vec3, Vec4};

use crate::{MmdError, Result};

use super::{
    Append, BoneDef, BoneFlags, BoneMorphOffset, BoneTail, DisplayItem, DisplaySlot,
    GroupMorphOffset, IkDef, IkLink, ImpulseMorphOffset, JointDef, Material, MaterialFlags,
    MaterialMorphOffset, MaterialOp, MorphDef, MorphKind, PhysicsMode, PmxModel, RigidBodyDef,
    RigidBodyShape, SphereMode, ToonRef, UvMorphOffset, Vertex, VertexMorphOffset, VertexWeight,
};

const PMX_MAGIC: &[u8; 4] = b"PMX ";

/// 预分配上限，避免损坏文件中的巨大计数
const MAX_PREALLOC: usize = 1 << 16;

/// 文本编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf16Le,
    Utf8,
}

/// PMX 头部
#[derive(Debug, Clone, PartialEq)]
pub struct PmxHeader {
    pub version: f32,
    pub encoding: TextEncoding,
    pub additional_uv: u8,
    pub vertex_index_size: u8,
    pub texture_index_size: u8,
    pub material_index_size: u8,
    pub bone_index_size: u8,
    pub morph_index_size: u8,
    pub rigid_body_index_size: u8,
}

/// 从 PMX 文件加载模型
pub fn load_pmx<P: AsRef<Path>>(path: P) -> Result<PmxModel> {
    let file = File::open(path.as_ref())?;
    let model = PmxReader::new(BufReader::new(file))?.read_model()?;
    log::info!(
        "PMX 加载完成: {} (顶点 {}, 骨骼 {}, Morph {}, 刚体 {}, 关节 {})",
        path.as_ref().display(),
        model.vertices.len(),
        model.bones.len(),
        model.morphs.len(),
        model.rigid_bodies.len(),
        model.joints.len()
    );
    Ok(model)
}

/// PMX 读取器
pub struct PmxReader<R: Read> {
    reader: R,
    header: PmxHeader,
}

impl PmxReader<std::io::Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::new(std::io::Cursor::new(bytes))
    }
}

impl<R: Read> PmxReader<R> {
    /// 读取并校验头部
    pub fn new(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| MmdError::PmxParse(format!("Failed to read magic: {}", e)))?;
        if &magic != PMX_MAGIC {
            return Err(MmdError::PmxParse("Invalid PMX magic".to_string()));
        }

        let version = reader
            .read_f32::<LittleEndian>()
            .map_err(|e| MmdError::PmxParse(format!("Failed to read version: {}", e)))?;
        if !(version == 2.0 || version == 2.1) {
            return Err(MmdError::Unsupported(format!("PMX version {}", version)));
        }

        let globals_len = reader
            .read_u8()
            .map_err(|e| MmdError::PmxParse(format!("Failed to read header size: {}", e)))?
            as usize;
        if globals_len < 8 {
            return Err(MmdError::PmxParse(format!(
                "Header size {} is smaller than 8",
                globals_len
            )));
        }
        let mut globals = vec![0u8; globals_len];
        reader
            .read_exact(&mut globals)
            .map_err(|e| MmdError::PmxParse(format!("Failed to read header globals: {}", e)))?;

        let encoding = match globals[0] {
            0 => TextEncoding::Utf16Le,
            1 => TextEncoding::Utf8,
            other => {
                return Err(MmdError::Unsupported(format!("PMX text encoding {}", other)))
            }
        };
        if globals[1] > 4 {
            return Err(MmdError::Unsupported(format!(
                "PMX additional UV count {}",
                globals[1]
            )));
        }
        for &size in &globals[2..8] {
            if !matches!(size, 1 | 2 | 4) {
                return Err(MmdError::Unsupported(format!("PMX index size {}", size)));
            }
        }

        let header = PmxHeader {
            version,
            encoding,
            additional_uv: globals[1],
            vertex_index_size: globals[2],
            texture_index_size: globals[3],
            material_index_size: globals[4],
            bone_index_size: globals[5],
            morph_index_size: globals[6],
            rigid_body_index_size: globals[7],
        };
        Ok(Self { reader, header })
    }

    pub fn header(&self) -> &PmxHeader {
        &self.header
    }

    /// 读取全部节并返回完成校验的模型
    pub fn read_model(mut self) -> Result<PmxModel> {
        let mut model = PmxModel::new(self.text("model name")?);
        model.name_en = self.text("model english name")?;
        model.comment = self.text("comment")?;
        model.comment_en = self.text("english comment")?;

        let count = self.count("vertex")?;
        model.vertices.reserve(count.min(MAX_PREALLOC));
        for _ in 0..count {
            let v = self.vertex()?;
            model.vertices.push(v);
        }

        let count = self.count("face index")?;
        model.indices.reserve(count.min(MAX_PREALLOC));
        for _ in 0..count {
            let i = self.vertex_index()?;
            model.indices.push(i);
        }

        let count = self.count("texture")?;
        for _ in 0..count {
            let t = self.text("texture path")?;
            model.textures.push(t.replace('\\', "/"));
        }

        let count = self.count("material")?;
        for _ in 0..count {
            let m = self.material()?;
            model.materials.push(m);
        }

        let count = self.count("bone")?;
        model.bones.reserve(count.min(MAX_PREALLOC));
        for _ in 0..count {
            let b = self.bone()?;
            model.bones.push(b);
        }

        let count = self.count("morph")?;
        for _ in 0..count {
            let m = self.morph()?;
            model.morphs.push(m);
        }

        let count = self.count("display slot")?;
        for _ in 0..count {
            let d = self.display_slot()?;
            model.display_slots.push(d);
        }

        let count = self.count("rigid body")?;
        for _ in 0..count {
            let r = self.rigid_body()?;
            model.rigid_bodies.push(r);
        }

        let count = self.count("joint")?;
        for _ in 0..count {
            let j = self.joint()?;
            model.joints.push(j);
        }

        model.finalize();
        Ok(model)
    }

    // ---- 基础类型 ----

    fn u8(&mut self, what: &str) -> Result<u8> {
        self.reader
            .read_u8()
            .map_err(|e| MmdError::PmxParse(format!("Failed to read {}: {}", what, e)))
    }

    fn i32(&mut self, what: &str) -> Result<i32> {
        self.reader
            .read_i32::<LittleEndian>()
            .map_err(|e| MmdError::PmxParse(format!("Failed to read {}: {}", what, e)))
    }

    fn f32(&mut self, what: &str) -> Result<f32> {
        self.reader
            .read_f32::<LittleEndian>()
            .map_err(|e| MmdError::PmxParse(format!("Failed to read {}: {}", what, e)))
    }

    fn vec2(&mut self, what: &str) -> Result<Vec2> {
        Ok(Vec2::new(self.f32(what)?, self.f32(what)?))
    }

    fn vec3(&mut self, what: &str) -> Result<Vec3> {
        let mut v = [0f32; 3];
        self.reader
            .read_f32_into::<LittleEndian>(&mut v)
            .map_err(|e| MmdError::PmxParse(format!("Failed to read {}: {}", what, e)))?;
        Ok(Vec3::from_array(v))
    }

    fn vec4(&mut self, what: &str) -> Result<Vec4> {
        let mut v = [0f32; 4];
        self.reader
            .read_f32_into::<LittleEndian>(&mut v)
            .map_err(|e| MmdError::PmxParse(format!("Failed to read {}: {}", what, e)))?;
        Ok(Vec4::from_array(v))
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let n = self.i32(&format!("{} count", what))?;
        usize::try_from(n).map_err(|_| MmdError::PmxParse(format!("Negative {} count {}", what, n)))
    }

    fn text(&mut self, what: &str) -> Result<String> {
        let len = self.count(what)?;
        // 长度来自文件，读到多少分配多少
        let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC));
        (&mut self.reader)
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| MmdError::PmxParse(format!("Failed to read {}: {}", what, e)))?;
        if buf.len() != len {
            return Err(MmdError::PmxParse(format!(
                "Truncated {}: expected {} bytes, got {}",
                what,
                len,
                buf.len()
            )));
        }
        Ok(match self.header.encoding {
            TextEncoding::Utf8 => String::from_utf8_lossy(&buf).into_owned(),
            TextEncoding::Utf16Le => {
                let (s, _) = encoding_rs::UTF_16LE.decode_without_bom_handling(&buf);
                s.into_owned()
            }
        })
    }

    /// 有符号索引（-1 表示无）
    fn index(&mut self, size: u8, what: &str) -> Result<i32> {
        let r = match size {
            1 => self.reader.read_i8().map(i32::from),
            2 => self.reader.read_i16::<LittleEndian>().map(i32::from),
            _ => self.reader.read_i32::<LittleEndian>(),
        };
        r.map_err(|e| MmdError::PmxParse(format!("Failed to read {} index: {}", what, e)))
    }

    /// 顶点索引：1/2 字节无符号
    fn vertex_index(&mut self) -> Result<u32> {
        let r = match self.header.vertex_index_size {
            1 => self.reader.read_u8().map(u32::from),
            2 => self.reader.read_u16::<LittleEndian>().map(u32::from),
            _ => self.reader.read_i32::<LittleEndian>().map(|v| v.max(0) as u32),
        };
        r.map_err(|e| MmdError::PmxParse(format!("Failed to read vertex index: {}", e)))
    }

    fn bone_index(&mut self) -> Result<i32> {
        self.index(self.header.bone_index_size, "bone")
    }

    fn texture_index(&mut self) -> Result<i32> {
        self.index(self.header.texture_index_size, "texture")
    }

    fn material_index(&mut self) -> Result<i32> {
        self.index(self.header.material_index_size, "material")
    }

    fn morph_index(&mut self) -> Result<i32> {
        self.index(self.header.morph_index_size, "morph")
    }

    fn rigid_body_index(&mut self) -> Result<i32> {
        self.index(self.header.rigid_body_index_size, "rigid body")
    }

    // ---- 各节 ----

    fn vertex(&mut self) -> Result<Vertex> {
        let position = self.vec3("vertex position")?;
        let normal = self.vec3("vertex normal")?;
        let uv = self.vec2("vertex uv")?;
        let mut extra_uvs = Vec::with_capacity(self.header.additional_uv as usize);
        for _ in 0..self.header.additional_uv {
            extra_uvs.push(self.vec4("additional uv")?);
        }

        let weight = match self.u8("weight type")? {
            0 => VertexWeight::Bdef1 {
                bone: self.bone_index()?,
            },
            1 => {
                let bones = [self.bone_index()?, self.bone_index()?];
                VertexWeight::Bdef2 {
                    bones,
                    weight: self.f32("bdef2 weight")?,
                }
            }
            t @ (2 | 4) => {
                let bones = [
                    self.bone_index()?,
                    self.bone_index()?,
                    self.bone_index()?,
                    self.bone_index()?,
                ];
                let w = self.vec4("bdef4 weights")?.to_array();
                if t == 2 {
                    VertexWeight::Bdef4 { bones, weights: w }
                } else {
                    VertexWeight::Qdef { bones, weights: w }
                }
            }
            3 => {
                let bones = [self.bone_index()?, self.bone_index()?];
                VertexWeight::Sdef {
                    bones,
                    weight: self.f32("sdef weight")?,
                    c: self.vec3("sdef c")?,
                    r0: self.vec3("sdef r0")?,
                    r1: self.vec3("sdef r1")?,
                }
            }
            other => {
                return Err(MmdError::PmxParse(format!("Unknown weight type {}", other)));
            }
        };
        let edge_scale = self.f32("edge scale")?;

        Ok(Vertex {
            position,
            normal,
            uv,
            extra_uvs,
            weight,
            edge_scale,
        })
    }

    fn material(&mut self) -> Result<Material> {
        let name = self.text("material name")?;
        let name_en = self.text("material english name")?;
        let diffuse = self.vec4("diffuse")?;
        let specular = self.vec3("specular")?;
        let specular_power = self.f32("specular power")?;
        let ambient = self.vec3("ambient")?;
        let flags = MaterialFlags::from_bits_truncate(self.u8("draw flags")?);
        let edge_color = self.vec4("edge color")?;
        let edge_size = self.f32("edge size")?;
        let texture_index = self.texture_index()?;
        let sphere_index = self.texture_index()?;
        let sphere_mode = SphereMode::from_u8(self.u8("sphere mode")?);
        let toon = if self.u8("toon flag")? == 1 {
            ToonRef::Shared(self.u8("shared toon")?)
        } else {
            ToonRef::Texture(self.texture_index()?)
        };
        let memo = self.text("memo")?;
        let index_count = self.i32("material index count")?.max(0) as u32;

        Ok(Material {
            name,
            name_en,
            diffuse,
            specular,
            specular_power,
            ambient,
            flags,
            edge_color,
            edge_size,
            texture_index,
            sphere_index,
            sphere_mode,
            toon,
            memo,
            index_count,
        })
    }

    fn bone(&mut self) -> Result<BoneDef> {
        let name = self.text("bone name")?;
        let mut bone = BoneDef::new(name, Vec3::ZERO, -1);
        bone.name_en = self.text("bone english name")?;
        bone.position = self.vec3("bone position")?;
        bone.parent = self.bone_index()?;
        bone.layer = self.i32("bone layer")?;
        let raw_flags = self
            .reader
            .read_u16::<LittleEndian>()
            .map_err(|e| MmdError::PmxParse(format!("Failed to read bone flags: {}", e)))?;
        bone.flags = BoneFlags::from_bits_truncate(raw_flags);

        bone.tail = if bone.flags.contains(BoneFlags::TAIL_IS_BONE) {
            BoneTail::Bone(self.bone_index()?)
        } else {
            BoneTail::Offset(self.vec3("bone tail offset")?)
        };

        if bone
            .flags
            .intersects(BoneFlags::APPEND_ROTATE | BoneFlags::APPEND_TRANSLATE)
        {
            let parent = self.bone_index()?;
            let ratio = self.f32("append ratio")?;
            bone.append = Some(Append { parent, ratio });
        }
        if bone.flags.contains(BoneFlags::FIXED_AXIS) {
            bone.fixed_axis = Some(self.vec3("fixed axis")?);
        }
        if bone.flags.contains(BoneFlags::LOCAL_AXIS) {
            let x = self.vec3("local axis x")?;
            let z = self.vec3("local axis z")?;
            bone.local_axis = Some((x, z));
        }
        if bone.flags.contains(BoneFlags::EXTERNAL_PARENT) {
            bone.external_parent_key = Some(self.i32("external parent key")?);
        }
        if bone.flags.contains(BoneFlags::IK) {
            let target = self.bone_index()?;
            let loop_count = self.i32("ik loop count")?.max(0) as u32;
            let limit_angle = self.f32("ik limit angle")?;
            let link_count = self.count("ik link")?;
            let mut links = Vec::with_capacity(link_count.min(64));
            for _ in 0..link_count {
                let link_bone = self.bone_index()?;
                if self.u8("ik link limited")? != 0 {
                    let min = self.vec3("ik link min")?;
                    let max = self.vec3("ik link max")?;
                    links.push(IkLink::with_limits(link_bone, min, max));
                } else {
                    links.push(IkLink::new(link_bone));
                }
            }
            bone.ik = Some(IkDef {
                target,
                loop_count,
                limit_angle,
                links,
            });
        }
        Ok(bone)
    }

    fn morph(&mut self) -> Result<MorphDef> {
        let name = self.text("morph name")?;
        let name_en = self.text("morph english name")?;
        let panel = self.u8("morph panel")?;
        let morph_type = self.u8("morph type")?;
        let count = self.count("morph offset")?;
        let cap = count.min(MAX_PREALLOC);

        let kind = match morph_type {
            0 | 9 => {
                let mut offsets = Vec::with_capacity(cap);
                for _ in 0..count {
                    let morph = self.morph_index()?;
                    let ratio = self.f32("group morph ratio")?;
                    offsets.push(GroupMorphOffset { morph, ratio });
                }
                if morph_type == 0 {
                    MorphKind::Group(offsets)
                } else {
                    MorphKind::Flip(offsets)
                }
            }
            1 => {
                let mut offsets = Vec::with_capacity(cap);
                for _ in 0..count {
                    let vertex = self.vertex_index()?;
                    let offset = self.vec3("vertex morph offset")?;
                    offsets.push(VertexMorphOffset { vertex, offset });
                }
                MorphKind::Vertex(offsets)
            }
            2 => {
                let mut offsets = Vec::with_capacity(cap);
                for _ in 0..count {
                    let bone = self.bone_index()?;
                    let translation = self.vec3("bone morph translation")?;
                    let q = self.vec4("bone morph rotation")?;
                    let rotation = Quat::from_vec4(q);
                    let rotation = if rotation.length_squared() > 1e-12 {
                        rotation.normalize()
                    } else {
                        Quat::IDENTITY
                    };
                    offsets.push(BoneMorphOffset {
                        bone,
                        translation,
                        rotation,
                    });
                }
                MorphKind::Bone(offsets)
            }
            3..=7 => {
                let mut offsets = Vec::with_capacity(cap);
                for _ in 0..count {
                    let vertex = self.vertex_index()?;
                    let offset = self.vec4("uv morph offset")?;
                    offsets.push(UvMorphOffset { vertex, offset });
                }
                if morph_type == 3 {
                    MorphKind::Uv(offsets)
                } else {
                    MorphKind::ExtendedUv(morph_type - 3, offsets)
                }
            }
            8 => {
                let mut offsets = Vec::with_capacity(cap);
                for _ in 0..count {
                    let material = self.material_index()?;
                    let op = if self.u8("material morph op")? == 0 {
                        MaterialOp::Multiply
                    } else {
                        MaterialOp::Add
                    };
                    offsets.push(MaterialMorphOffset {
                        material,
                        op,
                        diffuse: self.vec4("material morph diffuse")?,
                        specular: self.vec3("material morph specular")?,
                        specular_power: self.f32("material morph specular power")?,
                        ambient: self.vec3("material morph ambient")?,
                        edge_color: self.vec4("material morph edge color")?,
                        edge_size: self.f32("material morph edge size")?,
                        texture_tint: self.vec4("material morph texture tint")?,
                        sphere_tint: self.vec4("material morph sphere tint")?,
                        toon_tint: self.vec4("material morph toon tint")?,
                    });
                }
                MorphKind::Material(offsets)
            }
            10 => {
                let mut offsets = Vec::with_capacity(cap);
                for _ in 0..count {
                    let rigid_body = self.rigid_body_index()?;
                    let local = self.u8("impulse local flag")? != 0;
                    let velocity = self.vec3("impulse velocity")?;
                    let torque = self.vec3("impulse torque")?;
                    offsets.push(ImpulseMorphOffset {
                        rigid_body,
                        local,
                        velocity,
                        torque,
                    });
                }
                MorphKind::Impulse(offsets)
            }
            other => {
                return Err(MmdError::Unsupported(format!("PMX morph type {}", other)));
            }
        };

        Ok(MorphDef {
            name,
            name_en,
            panel,
            kind,
        })
    }

    fn display_slot(&mut self) -> Result<DisplaySlot> {
        let name = self.text("display slot name")?;
        let name_en = self.text("display slot english name")?;
        let special = self.u8("display slot special flag")? != 0;
        let count = self.count("display slot item")?;
        let mut items = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            let item = match self.u8("display item type")? {
                0 => DisplayItem::Bone(self.bone_index()?),
                1 => DisplayItem::Morph(self.morph_index()?),
                other => {
                    return Err(MmdError::PmxParse(format!(
                        "Unknown display item type {}",
                        other
                    )));
                }
            };
            items.push(item);
        }
        Ok(DisplaySlot {
            name,
            name_en,
            special,
            items,
        })
    }

    fn rigid_body(&mut self) -> Result<RigidBodyDef> {
        let name = self.text("rigid body name")?;
        let name_en = self.text("rigid body english name")?;
        let bone = self.bone_index()?;
        let group = self.u8("rigid body group")?;
        let mask = self
            .reader
            .read_u16::<LittleEndian>()
            .map_err(|e| MmdError::PmxParse(format!("Failed to read rigid body mask: {}", e)))?;
        let shape_raw = self.u8("rigid body shape")?;
        let shape = RigidBodyShape::from_u8(shape_raw)
            .ok_or_else(|| MmdError::PmxParse(format!("Unknown rigid body shape {}", shape_raw)))?;
        let size = self.vec3("rigid body size")?;
        let position = self.vec3("rigid body position")?;
        let rotation = self.vec3("rigid body rotation")?;
        let mass = self.f32("rigid body mass")?;
        let linear_damping = self.f32("linear damping")?;
        let angular_damping = self.f32("angular damping")?;
        let restitution = self.f32("restitution")?;
        let friction = self.f32("friction")?;
        let mode_raw = self.u8("physics mode")?;
        let mode = PhysicsMode::from_u8(mode_raw)
            .ok_or_else(|| MmdError::PmxParse(format!("Unknown physics mode {}", mode_raw)))?;

        Ok(RigidBodyDef {
            name,
            name_en,
            bone,
            group,
            mask,
            shape,
            size,
            position,
            rotation,
            mass,
            linear_damping,
            angular_damping,
            restitution,
            friction,
            mode,
        })
    }

    fn joint(&mut self) -> Result<JointDef> {
        let name = self.text("joint name")?;
        let name_en = self.text("joint english name")?;
        let joint_type = self.u8("joint type")?;
        if joint_type > 5 {
            return Err(MmdError::Unsupported(format!("PMX joint type {}", joint_type)));
        }
        Ok(JointDef {
            name,
            name_en,
            rigid_body_a: self.rigid_body_index()?,
            rigid_body_b: self.rigid_body_index()?,
            position: self.vec3("joint position")?,
            rotation: self.vec3("joint rotation")?,
            translation_min: self.vec3("joint translation min")?,
            translation_max: self.vec3("joint translation max")?,
            rotation_min: self.vec3("joint rotation min")?,
            rotation_max: self.vec3("joint rotation max")?,
            spring_translation: self.vec3("joint spring translation")?,
            spring_rotation: self.vec3("joint spring rotation")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    /// 测试用的小型 PMX 写入器（UTF-8，骨骼索引 2 字节，其余 1 字节）
    struct Writer(Vec<u8>);

    impl Writer {
        fn new(version: f32, encoding: u8) -> Self {
            let mut w = Writer(Vec::new());
            w.0.extend_from_slice(b"PMX ");
            w.f(version);
            w.0.push(8);
            w.0.extend_from_slice(&[encoding, 1, 1, 1, 1, 2, 1, 1]);
            w
        }
        fn f(&mut self, v: f32) {
            self.0.write_f32::<LittleEndian>(v).unwrap();
        }
        fn fs(&mut self, vs: &[f32]) {
            for &v in vs {
                self.f(v);
            }
        }
        fn i(&mut self, v: i32) {
            self.0.write_i32::<LittleEndian>(v).unwrap();
        }
        fn u(&mut self, v: u8) {
            self.0.push(v);
        }
        fn bone(&mut self, v: i16) {
            self.0.write_i16::<LittleEndian>(v).unwrap();
        }
        fn s(&mut self, text: &str) {
            self.i(text.len() as i32);
            self.0.extend_from_slice(text.as_bytes());
        }
    }

    fn sample_model_bytes() -> Vec<u8> {
        let mut w = Writer::new(2.0, 1);
        w.s("テスト");
        w.s("test");
        w.s("");
        w.s("");

        // 顶点: BDEF1 / BDEF4(未归一化) / SDEF
        w.i(3);
        w.fs(&[0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        w.fs(&[0.1, 0.2, 0.3, 0.4]);
        w.u(0);
        w.bone(0);
        w.f(1.0);

        w.fs(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        w.fs(&[0.0; 4]);
        w.u(2);
        for b in [0, 1, -1, -1] {
            w.bone(b);
        }
        w.fs(&[1.0, 3.0, 0.0, 0.0]);
        w.f(1.0);

        w.fs(&[0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        w.fs(&[0.0; 4]);
        w.u(3);
        w.bone(0);
        w.bone(1);
        w.f(0.5);
        w.fs(&[0.0, 1.0, 0.0, 0.1, 1.0, 0.0, -0.1, 1.0, 0.0]);
        w.f(1.0);

        // 面
        w.i(3);
        w.0.extend_from_slice(&[0, 1, 2]);

        // 纹理
        w.i(1);
        w.s("tex\\body.png");

        // 材质
        w.i(1);
        w.s("body");
        w.s("");
        w.fs(&[1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 5.0, 0.5, 0.5, 0.5]);
        w.u(0x11);
        w.fs(&[0.0, 0.0, 0.0, 1.0, 1.0]);
        w.u(0);
        w.u(0xFF);
        w.u(0);
        w.u(1);
        w.u(3);
        w.s("memo");
        w.i(3);

        // 骨骼: 根 / 带 IK 的子骨骼
        w.i(2);
        w.s("センター");
        w.s("center");
        w.fs(&[0.0, 0.0, 0.0]);
        w.bone(-1);
        w.i(0);
        w.0.write_u16::<LittleEndian>(0x001F).unwrap();
        w.bone(1);

        w.s("足ＩＫ");
        w.s("leg ik");
        w.fs(&[0.0, 1.0, 0.0]);
        w.bone(0);
        w.i(1);
        w.0.write_u16::<LittleEndian>(0x0020 | 0x0002 | 0x0004 | 0x0400).unwrap();
        w.fs(&[0.0, 0.5, 0.0]);
        w.fs(&[0.0, 1.0, 0.0]);
        w.bone(0);
        w.i(40);
        w.f(2.0);
        w.i(1);
        w.bone(0);
        w.u(1);
        w.fs(&[-3.14, 0.0, 0.0, -0.01, 0.0, 0.0]);

        // Morph: 顶点 / 组
        w.i(2);
        w.s("あ");
        w.s("a");
        w.u(3);
        w.u(1);
        w.i(1);
        w.u(2);
        w.fs(&[0.0, 0.5, 0.0]);

        w.s("group");
        w.s("");
        w.u(4);
        w.u(0);
        w.i(1);
        w.u(0);
        w.f(0.5);

        // 显示枠
        w.i(1);
        w.s("Root");
        w.s("Root");
        w.u(1);
        w.i(2);
        w.u(0);
        w.bone(0);
        w.u(1);
        w.u(1);

        // 刚体
        w.i(2);
        for (name, mode) in [("head", 0u8), ("hair", 1u8)] {
            w.s(name);
            w.s("");
            w.bone(0);
            w.u(1);
            w.0.write_u16::<LittleEndian>(0xFFFE).unwrap();
            w.u(0);
            w.fs(&[0.5, 0.0, 0.0]);
            w.fs(&[0.0, 1.0, 0.0]);
            w.fs(&[0.0, 0.0, 0.0]);
            w.fs(&[1.0, 0.5, 0.5, 0.0, 0.5]);
            w.u(mode);
        }

        // 关节
        w.i(1);
        w.s("joint");
        w.s("");
        w.u(0);
        w.u(0);
        w.u(1);
        w.fs(&[0.0; 18]);
        w.fs(&[0.0, 0.0, 0.0, 10.0, 10.0, 10.0]);
        w.0
    }

    #[test]
    fn reads_all_sections() {
        let model = PmxReader::from_bytes(sample_model_bytes())
            .unwrap()
            .read_model()
            .unwrap();

        assert_eq!(model.name, "テスト");
        assert_eq!(model.vertices.len(), 3);
        assert_eq!(model.vertices[0].extra_uvs, vec![Vec4::new(0.1, 0.2, 0.3, 0.4)]);
        match &model.vertices[1].weight {
            VertexWeight::Bdef4 { weights, .. } => {
                assert!((weights[0] - 0.25).abs() < 1e-6);
                assert!((weights[1] - 0.75).abs() < 1e-6);
            }
            other => panic!("unexpected weight {:?}", other),
        }
        assert!(matches!(model.vertices[2].weight, VertexWeight::Sdef { .. }));
        assert_eq!(model.indices, vec![0, 1, 2]);
        assert_eq!(model.textures, vec!["tex/body.png".to_string()]);

        let mat = &model.materials[0];
        assert!(mat.is_double_sided() && mat.has_edge());
        assert_eq!(mat.toon, ToonRef::Shared(3));
        assert_eq!(mat.index_count, 3);

        let leg = &model.bones[1];
        assert_eq!(leg.parent, 0);
        assert_eq!(leg.fixed_axis, Some(Vec3::Y));
        let ik = leg.ik.as_ref().unwrap();
        assert_eq!(ik.loop_count, 40);
        assert!(ik.links[0].limits.is_some());
        assert_eq!(model.bones[0].tail, BoneTail::Bone(1));

        assert!(matches!(model.morphs[0].kind, MorphKind::Vertex(_)));
        assert!(matches!(model.morphs[1].kind, MorphKind::Group(_)));
        assert_eq!(model.display_slots[0].items.len(), 2);
        assert_eq!(model.rigid_bodies[1].mode, PhysicsMode::Dynamic);
        assert_eq!(model.rigid_bodies[0].mask, 0xFFFE);
        assert_eq!(model.joints[0].rigid_body_b, 1);
        assert_eq!(model.joints[0].spring_rotation, Vec3::splat(10.0));
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut bytes = sample_model_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            PmxReader::from_bytes(bytes),
            Err(MmdError::PmxParse(_))
        ));

        let w = Writer::new(3.0, 1);
        assert!(matches!(
            PmxReader::from_bytes(w.0),
            Err(MmdError::Unsupported(_))
        ));

        let w = Writer::new(2.0, 7);
        assert!(matches!(
            PmxReader::from_bytes(w.0),
            Err(MmdError::Unsupported(_))
        ));
    }

    #[test]
    fn truncated_file_is_parse_error() {
        let mut bytes = sample_model_bytes();
        bytes.truncate(bytes.len() - 10);
        let err = PmxReader::from_bytes(bytes).unwrap().read_model().unwrap_err();
        assert!(matches!(err, MmdError::PmxParse(_)));
    }

    #[test]
    fn oversized_text_length_is_parse_error() {
        let mut w = Writer::new(2.0, 1);
        w.i(i32::MAX);
        w.0.extend_from_slice(b"name");
        let err = PmxReader::from_bytes(w.0).unwrap().read_model().unwrap_err();
        assert!(matches!(err, MmdError::PmxParse(ref m) if m.contains("Truncated")), "{:?}", err);
    }

    #[test]
    fn utf16_text_is_decoded() {
        let mut w = Writer::new(2.1, 0);
        let name: Vec<u8> = "初音".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        w.i(name.len() as i32);
        w.0.extend_from_slice(&name);
        for _ in 0..3 {
            w.i(0);
        }
        // 其余各节为空
        for _ in 0..9 {
            w.i(0);
        }
        let model = PmxReader::from_bytes(w.0).unwrap().read_model().unwrap();
        assert_eq!(model.name, "初音");
        assert!(model.bones.is_empty());
    }
}

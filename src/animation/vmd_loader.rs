//! VMD 文件加载器
//!
//! 解析 VMD 动画文件并转换为 Motion 数据。坐标保持 MMD 原生左手系，
//! 不做 Z 轴翻转。

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use glam::{Quat, Vec3};

use crate::{MmdError, Result};

use super::keyframe::{BoneKeyframe, IkKeyframe, MorphKeyframe};
use super::motion::Motion;

/// VMD 文件头
const VMD_HEADER_V1: &[u8] = b"Vocaloid Motion Data file";
const VMD_HEADER_V2: &[u8] = b"Vocaloid Motion Data 0002";

/// 跳过的节每条记录字节数
const CAMERA_RECORD_SIZE: usize = 61;
const LIGHT_RECORD_SIZE: usize = 28;
const SHADOW_RECORD_SIZE: usize = 9;

/// VMD 文件数据
#[derive(Debug, Clone)]
pub struct VmdFile {
    /// 模型名称
    pub model_name: String,
    /// Motion 数据
    pub motion: Motion,
}

impl VmdFile {
    /// 从文件路径加载 VMD
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let vmd = Self::load_from_reader(&mut reader)?;
        log::info!(
            "VMD 加载完成: {} (模型 '{}', 最大帧 {})",
            path.as_ref().display(),
            vmd.model_name,
            vmd.motion.max_frame()
        );
        Ok(vmd)
    }

    /// 从字节切片加载 VMD
    pub fn load_from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = std::io::Cursor::new(bytes);
        Self::load_from_reader(&mut reader)
    }

    /// 从 Reader 加载 VMD
    pub fn load_from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; 30];
        reader
            .read_exact(&mut header)
            .map_err(|e| MmdError::VmdParse(format!("Failed to read header: {}", e)))?;

        // 两种头部都是 25 字节有效内容
        let name_len = if header[..25] == VMD_HEADER_V2[..] {
            20
        } else if header[..25] == VMD_HEADER_V1[..] {
            10
        } else {
            return Err(MmdError::VmdParse("Invalid VMD header".to_string()));
        };

        let mut model_name_bytes = vec![0u8; name_len];
        reader
            .read_exact(&mut model_name_bytes)
            .map_err(|e| MmdError::VmdParse(format!("Failed to read model name: {}", e)))?;

        let mut motion = Motion::new();
        motion.model_name = decode_name(&model_name_bytes);

        let bone_count = read_count(reader, "bone keyframe")?;
        for _ in 0..bone_count {
            let (name, keyframe) = read_bone_keyframe(reader)?;
            motion.insert_bone_keyframe(&name, keyframe);
        }

        let morph_count = read_count(reader, "morph keyframe")?;
        for _ in 0..morph_count {
            let (name, keyframe) = read_morph_keyframe(reader)?;
            motion.insert_morph_keyframe(&name, keyframe);
        }

        // 以下各节在旧文件中可能不存在，读不到计数即结束
        if skip_section(reader, CAMERA_RECORD_SIZE)?
            && skip_section(reader, LIGHT_RECORD_SIZE)?
            && skip_section(reader, SHADOW_RECORD_SIZE)?
        {
            if let Ok(ik_count) = reader.read_u32::<LittleEndian>() {
                for _ in 0..ik_count {
                    for (name, keyframe) in read_ik_keyframe(reader)? {
                        motion.insert_ik_keyframe(&name, keyframe);
                    }
                }
            }
        }

        Ok(Self {
            model_name: motion.model_name.clone(),
            motion,
        })
    }

    /// 获取最大帧数
    pub fn max_frame(&self) -> u32 {
        self.motion.max_frame()
    }

    pub fn into_motion(self) -> Motion {
        self.motion
    }
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    reader
        .read_u32::<LittleEndian>()
        .map_err(|e| MmdError::VmdParse(format!("Failed to read {} count: {}", what, e)))
}

/// 跳过一节；没有计数字段时返回 false
fn skip_section<R: Read>(reader: &mut R, record_size: usize) -> Result<bool> {
    let count = match reader.read_u32::<LittleEndian>() {
        Ok(c) => c as u64,
        Err(_) => return Ok(false),
    };
    let bytes = count * record_size as u64;
    let skipped = std::io::copy(&mut reader.by_ref().take(bytes), &mut std::io::sink())?;
    if skipped != bytes {
        return Err(MmdError::VmdParse(format!(
            "Section truncated: expected {} bytes, got {}",
            bytes, skipped
        )));
    }
    Ok(true)
}

fn read_vec3<R: Read>(reader: &mut R, what: &str) -> Result<Vec3> {
    let mut v = [0f32; 3];
    reader
        .read_f32_into::<LittleEndian>(&mut v)
        .map_err(|e| MmdError::VmdParse(format!("Failed to read {}: {}", what, e)))?;
    Ok(Vec3::from_array(v))
}

/// 读取骨骼关键帧
fn read_bone_keyframe<R: Read>(reader: &mut R) -> Result<(String, BoneKeyframe)> {
    let mut name_bytes = [0u8; 15];
    reader
        .read_exact(&mut name_bytes)
        .map_err(|e| MmdError::VmdParse(format!("Failed to read bone name: {}", e)))?;
    let name = decode_name(&name_bytes);

    let frame = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| MmdError::VmdParse(format!("Failed to read frame index: {}", e)))?;

    let translation = read_vec3(reader, "translation")?;

    let mut q = [0f32; 4];
    reader
        .read_f32_into::<LittleEndian>(&mut q)
        .map_err(|e| MmdError::VmdParse(format!("Failed to read rotation: {}", e)))?;
    let rotation = Quat::from_array(q);
    let rotation = if rotation.length_squared() > 1e-12 && rotation.is_finite() {
        rotation.normalize()
    } else {
        Quat::IDENTITY
    };

    // 插值参数 (64 字节)，只有第一行 16 字节有效
    let mut interpolation = [0u8; 64];
    reader
        .read_exact(&mut interpolation)
        .map_err(|e| MmdError::VmdParse(format!("Failed to read interpolation: {}", e)))?;

    let mut keyframe = BoneKeyframe::with_pose(frame, translation, rotation);
    keyframe.set_vmd_interpolation(&interpolation);
    Ok((name, keyframe))
}

/// 读取 Morph 关键帧
fn read_morph_keyframe<R: Read>(reader: &mut R) -> Result<(String, MorphKeyframe)> {
    let mut name_bytes = [0u8; 15];
    reader
        .read_exact(&mut name_bytes)
        .map_err(|e| MmdError::VmdParse(format!("Failed to read morph name: {}", e)))?;
    let name = decode_name(&name_bytes);

    let frame = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| MmdError::VmdParse(format!("Failed to read frame index: {}", e)))?;
    let weight = reader
        .read_f32::<LittleEndian>()
        .map_err(|e| MmdError::VmdParse(format!("Failed to read weight: {}", e)))?;

    Ok((name, MorphKeyframe::new(frame, weight)))
}

/// 读取 IK 关键帧
///
/// 每条记录包含帧号、显示标志以及若干 (IK 名, 启用) 对。
fn read_ik_keyframe<R: Read>(reader: &mut R) -> Result<Vec<(String, IkKeyframe)>> {
    let frame = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| MmdError::VmdParse(format!("Failed to read IK frame index: {}", e)))?;
    let _show = reader
        .read_u8()
        .map_err(|e| MmdError::VmdParse(format!("Failed to read IK show flag: {}", e)))?;
    let count = read_count(reader, "IK info")?;

    let mut keyframes = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let mut name_bytes = [0u8; 20];
        reader
            .read_exact(&mut name_bytes)
            .map_err(|e| MmdError::VmdParse(format!("Failed to read IK name: {}", e)))?;
        let enabled = reader
            .read_u8()
            .map_err(|e| MmdError::VmdParse(format!("Failed to read IK enable flag: {}", e)))?
            != 0;
        keyframes.push((decode_name(&name_bytes), IkKeyframe::new(frame, enabled)));
    }
    Ok(keyframes)
}

/// 解码定长名称：遇 NUL 截断；带 UTF-8 BOM 时按 UTF-8，否则按 Shift-JIS
pub(crate) fn decode_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let bytes = &bytes[..end];

    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    let (decoded, _, _) = encoding_rs::SHIFT_JIS.decode(bytes);
    decoded.into_owned()
}

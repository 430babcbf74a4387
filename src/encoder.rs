// Splat GPU encoder
// Converts splat columns into what the vertex stage samples per splat:
//   - Texture path: center / rotation / scale / color in 2D textures addressed by splat id
//   - Vertex path (legacy): one 44-byte instance row per splat
// Rotations are canonicalized to w >= 0 and scales are exponentiated here, never earlier.

use glam::{Quat, Vec3, Vec4};
use half::f16;
use tracing::{debug, info, warn};

use crate::config::EncoderConfig;
use crate::device::{
    probe_texture_format, GraphicsDevice, InstanceLayout, TexelData, TextureFormat, VertexFormat,
};
use crate::splat_data::SplatCollection;

pub const CENTER_TEXTURE: &str = "splat_center";
pub const ROTATION_TEXTURE: &str = "splat_rotation";
pub const SCALE_TEXTURE: &str = "splat_scale";
pub const COLOR_TEXTURE: &str = "splat_color";
pub const TEXTURE_SIZE_PARAM: &str = "splat_texture_size";

/// Flip a quaternion into the w >= 0 hemisphere
pub fn canonical_rotation(q: Quat) -> Quat {
    if q.w < 0.0 {
        -q
    } else {
        q
    }
}

/// Rebuild a unit quaternion from its xyz part, assuming w >= 0.
/// The radicand is clamped so denormalized input cannot produce NaN.
pub fn rotation_from_xyz(xyz: Vec3) -> Quat {
    let w = (1.0 - xyz.length_squared()).max(0.0).sqrt();
    let v = xyz.extend(w);
    let len = v.length();
    if len > 0.0 {
        Quat::from_vec4(v / len)
    } else {
        Quat::IDENTITY
    }
}

/// Pack RGBA in [0, 1] into one word, red in the low byte
pub fn pack_rgba8(c: Vec4) -> u32 {
    let q = |v: f32| ((v.clamp(0.0, 1.0) * 255.0).round() as u32) & 255;
    q(c.x) | (q(c.y) << 8) | (q(c.z) << 16) | (q(c.w) << 24)
}

pub fn unpack_rgba8(packed: u32) -> Vec4 {
    let ch = |shift: u32| ((packed >> shift) & 255) as f32 / 255.0;
    Vec4::new(ch(0), ch(8), ch(16), ch(24))
}

/// Texture dimensions for n splats: width ceil(sqrt(n)), height ceil(n / width)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureLayout {
    pub width: u32,
    pub height: u32,
}

impl TextureLayout {
    pub fn for_count(n: usize) -> Self {
        let width = ((n as f64).sqrt().ceil() as usize).max(1);
        let height = n.div_ceil(width).max(1);
        Self {
            width: u32::try_from(width).unwrap_or(u32::MAX),
            height: u32::try_from(height).unwrap_or(u32::MAX),
        }
    }

    /// Texel holding splat `id`
    pub fn texel_coord(&self, id: u32) -> (u32, u32) {
        (id % self.width, id / self.width)
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Value range used by the unorm8 fallback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexelRange {
    pub min: Vec4,
    pub max: Vec4,
}

impl TexelRange {
    fn fit(texels: &[Vec4]) -> Self {
        let mut min = Vec4::splat(f32::INFINITY);
        let mut max = Vec4::splat(f32::NEG_INFINITY);
        for t in texels.iter().filter(|t| t.is_finite()) {
            min = min.min(*t);
            max = max.max(*t);
        }
        if !min.is_finite() || !max.is_finite() {
            return Self {
                min: Vec4::ZERO,
                max: Vec4::ZERO,
            };
        }
        Self { min, max }
    }
}

/// One encoded attribute texture
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTexture {
    pub name: &'static str,
    pub format: TextureFormat,
    pub data: TexelData,
    /// Only set for Rgba8Unorm, where texels are normalized into this range
    pub range: Option<TexelRange>,
    /// Finite values that did not fit the format and were clamped (Rgba16Float only)
    pub clamped: usize,
}

impl EncodedTexture {
    fn encode(
        name: &'static str,
        format: TextureFormat,
        layout: TextureLayout,
        texels: &[Vec4],
        fixed_range: Option<TexelRange>,
    ) -> Self {
        let count = layout.texel_count() * 4;
        let mut clamped = 0;
        let (data, range) = match format {
            TextureFormat::Rgba32Float => {
                let mut out = vec![0.0f32; count];
                for (dst, t) in out.chunks_exact_mut(4).zip(texels) {
                    dst.copy_from_slice(&t.to_array());
                }
                (TexelData::F32(out), None)
            }
            TextureFormat::Rgba16Float => {
                let max = f16::MAX.to_f32();
                let mut out = vec![0u16; count];
                for (dst, t) in out.chunks_exact_mut(4).zip(texels) {
                    for (d, v) in dst.iter_mut().zip(t.to_array()) {
                        if v.abs() > max && v.is_finite() {
                            clamped += 1;
                        }
                        *d = f16::from_f32(v.clamp(-max, max)).to_bits();
                    }
                }
                if clamped > 0 {
                    warn!(
                        "{}: {} values exceed the Rgba16Float range and were clamped to ±{}",
                        name, clamped, max
                    );
                }
                (TexelData::F16(out), None)
            }
            TextureFormat::Rgba8Unorm => {
                let range = fixed_range.unwrap_or_else(|| TexelRange::fit(texels));
                let extent = range.max - range.min;
                let mut out = vec![0u8; count];
                for (dst, t) in out.chunks_exact_mut(4).zip(texels) {
                    for k in 0..4 {
                        let norm = if extent[k] > 0.0 {
                            ((t[k] - range.min[k]) / extent[k]).clamp(0.0, 1.0)
                        } else {
                            0.0
                        };
                        dst[k] = (norm * 255.0).round() as u8;
                    }
                }
                (TexelData::U8(out), Some(range))
            }
        };
        Self {
            name,
            format,
            data,
            range,
            clamped,
        }
    }

    /// Read back texel `i` in attribute units
    pub fn texel(&self, i: usize) -> Vec4 {
        let base = i * 4;
        match &self.data {
            TexelData::F32(v) => Vec4::from_slice(&v[base..base + 4]),
            TexelData::F16(v) => {
                let c = |k: usize| f16::from_bits(v[base + k]).to_f32();
                Vec4::new(c(0), c(1), c(2), c(3))
            }
            TexelData::U8(v) => {
                let range = self.range.unwrap_or(TexelRange {
                    min: Vec4::ZERO,
                    max: Vec4::ONE,
                });
                let t = Vec4::new(
                    v[base] as f32,
                    v[base + 1] as f32,
                    v[base + 2] as f32,
                    v[base + 3] as f32,
                ) / 255.0;
                range.min + t * (range.max - range.min)
            }
        }
    }
}

/// The four attribute textures for a collection
#[derive(Debug, Clone, PartialEq)]
pub struct SplatTextureSet {
    pub layout: TextureLayout,
    pub format: TextureFormat,
    pub center: EncodedTexture,
    pub rotation: EncodedTexture,
    pub scale: EncodedTexture,
    pub color: EncodedTexture,
}

impl SplatTextureSet {
    pub fn encode(collection: &SplatCollection, format: TextureFormat) -> Self {
        let n = collection.num_splats();
        let layout = TextureLayout::for_count(n);

        let mut centers = Vec::with_capacity(n);
        let mut rotations = Vec::with_capacity(n);
        let mut scales = Vec::with_capacity(n);
        let mut colors = Vec::with_capacity(n);
        for i in 0..n {
            centers.push(collection.position(i).extend(0.0));
            let q = canonical_rotation(collection.rotation(i));
            rotations.push(Vec4::new(q.x, q.y, q.z, 0.0));
            scales.push(collection.scale(i).extend(0.0));
            colors.push(collection.color(i));
        }

        let unit = TexelRange {
            min: Vec4::new(-1.0, -1.0, -1.0, 0.0),
            max: Vec4::new(1.0, 1.0, 1.0, 0.0),
        };
        let normalized = TexelRange {
            min: Vec4::ZERO,
            max: Vec4::ONE,
        };

        debug!(
            "Encoding {} splats into {}x{} {:?} textures",
            n, layout.width, layout.height, format
        );
        Self {
            layout,
            format,
            center: EncodedTexture::encode(CENTER_TEXTURE, format, layout, &centers, None),
            rotation: EncodedTexture::encode(ROTATION_TEXTURE, format, layout, &rotations, Some(unit)),
            scale: EncodedTexture::encode(SCALE_TEXTURE, format, layout, &scales, None),
            color: EncodedTexture::encode(COLOR_TEXTURE, format, layout, &colors, Some(normalized)),
        }
    }

    pub fn textures(&self) -> [&EncodedTexture; 4] {
        [&self.center, &self.rotation, &self.scale, &self.color]
    }

    pub fn center(&self, i: usize) -> Vec3 {
        self.center.texel(i).truncate()
    }

    /// Rotation with w recovered from the stored xyz
    pub fn rotation(&self, i: usize) -> Quat {
        rotation_from_xyz(self.rotation.texel(i).truncate())
    }

    pub fn scale(&self, i: usize) -> Vec3 {
        self.scale.texel(i).truncate()
    }

    pub fn color(&self, i: usize) -> Vec4 {
        self.color.texel(i)
    }

    /// Create, fill and bind the textures on the host device
    pub fn upload<D: GraphicsDevice>(&self, device: &mut D) -> Vec<D::Texture> {
        let mut handles = Vec::with_capacity(4);
        for tex in self.textures() {
            let handle = device.create_texture(tex.name, tex.format, self.layout.width, self.layout.height);
            device.write_texture(&handle, &tex.data);
            device.set_texture_parameter(tex.name, &handle);
            if let Some(range) = tex.range {
                device.set_vector_parameter(&format!("{}_range_min", tex.name), range.min.to_array());
                device.set_vector_parameter(&format!("{}_range_max", tex.name), range.max.to_array());
            }
            handles.push(handle);
        }
        device.set_vector_parameter(
            TEXTURE_SIZE_PARAM,
            [self.layout.width as f32, self.layout.height as f32, 0.0, 0.0],
        );
        handles
    }
}

/// Per-instance row for the vertex-attribute path
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SplatInstance {
    pub center: [f32; 3],
    /// xyzw, canonical hemisphere
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    /// RGBA8, red in the low byte
    pub color: u32,
}

impl SplatInstance {
    /// Row size in 32-bit words
    pub const WORDS: usize = 11;

    pub fn from_splat(collection: &SplatCollection, i: usize) -> Self {
        let q = canonical_rotation(collection.rotation(i));
        Self {
            center: collection.position(i).to_array(),
            rotation: q.to_array(),
            scale: collection.scale(i).to_array(),
            color: pack_rgba8(collection.color(i)),
        }
    }

    pub fn layout() -> InstanceLayout {
        InstanceLayout::packed(&[
            ("splat_center", VertexFormat::Float32x3),
            ("splat_rotation", VertexFormat::Float32x4),
            ("splat_scale", VertexFormat::Float32x3),
            ("splat_color", VertexFormat::Unorm8x4),
        ])
    }
}

pub fn encode_instances(collection: &SplatCollection) -> Vec<SplatInstance> {
    (0..collection.num_splats())
        .map(|i| SplatInstance::from_splat(collection, i))
        .collect()
}

/// Pick the texture format for this device and log the decision
pub fn choose_texture_format<D: GraphicsDevice + ?Sized>(
    device: &D,
    config: &EncoderConfig,
) -> TextureFormat {
    let format = probe_texture_format(device, config.preferred_format);
    match format {
        TextureFormat::Rgba32Float => info!("Splat textures: {:?}", format),
        TextureFormat::Rgba16Float => {
            warn!("Splat textures: float32 unsupported, using {:?} (half precision)", format)
        }
        TextureFormat::Rgba8Unorm => warn!(
            "Splat textures: no float texture support, using {:?} with range normalization",
            format
        ),
    }
    format
}

// Host renderer interface
// The rendering engine is an external collaborator; splat resources only talk to it through
// GraphicsDevice. Everything here describes formats and layouts, nothing owns GPU memory.

/// Texel formats the encoder can target, highest precision first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// Four 32-bit float components
    Rgba32Float,
    /// Four 16-bit float components
    Rgba16Float,
    /// Four 8-bit normalized components (range-normalized fallback)
    Rgba8Unorm,
}

impl TextureFormat {
    /// Priority order used by capability probing
    pub const PRIORITY: [TextureFormat; 3] = [
        TextureFormat::Rgba32Float,
        TextureFormat::Rgba16Float,
        TextureFormat::Rgba8Unorm,
    ];

    pub fn bytes_per_texel(&self) -> usize {
        match self {
            TextureFormat::Rgba32Float => 16,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba8Unorm => 4,
        }
    }

    pub fn is_float(&self) -> bool {
        !matches!(self, TextureFormat::Rgba8Unorm)
    }
}

/// Per-attribute vertex formats used by instance layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32,
    Float32x3,
    Float32x4,
    Uint32,
    /// Four u8 channels packed into one 32-bit word
    Unorm8x4,
}

impl VertexFormat {
    pub fn size(&self) -> usize {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 | VertexFormat::Unorm8x4 => 4,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub name: &'static str,
    pub format: VertexFormat,
    pub offset: usize,
}

/// Per-instance vertex layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLayout {
    pub stride: usize,
    pub attributes: Vec<VertexAttribute>,
}

impl InstanceLayout {
    /// Build a tightly packed layout from (name, format) pairs
    pub fn packed(attributes: &[(&'static str, VertexFormat)]) -> Self {
        let mut offset = 0;
        let attributes = attributes
            .iter()
            .map(|&(name, format)| {
                let attr = VertexAttribute { name, format, offset };
                offset += format.size();
                attr
            })
            .collect();
        Self {
            stride: offset,
            attributes,
        }
    }
}

/// Pixel payload for a texture upload, already in the texture's format
#[derive(Debug, Clone, PartialEq)]
pub enum TexelData {
    F32(Vec<f32>),
    /// f16 bit patterns
    F16(Vec<u16>),
    U8(Vec<u8>),
}

impl TexelData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TexelData::F32(v) => bytemuck::cast_slice(v),
            TexelData::F16(v) => bytemuck::cast_slice(v),
            TexelData::U8(v) => v,
        }
    }

    /// Number of scalar components
    pub fn len(&self) -> usize {
        match self {
            TexelData::F32(v) => v.len(),
            TexelData::F16(v) => v.len(),
            TexelData::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Narrow interface onto the host renderer.
///
/// Implementations map these calls onto their engine's texture, vertex buffer and material
/// APIs. Handles are opaque to the splat code.
pub trait GraphicsDevice {
    type Texture;
    type VertexBuffer;

    /// Whether textures of `format` can be created and sampled
    fn supports_format(&self, format: TextureFormat) -> bool;

    fn create_texture(
        &mut self,
        label: &str,
        format: TextureFormat,
        width: u32,
        height: u32,
    ) -> Self::Texture;

    /// Lock the texture, write all texels, unlock
    fn write_texture(&mut self, texture: &Self::Texture, data: &TexelData);

    fn create_instance_buffer(
        &mut self,
        label: &str,
        layout: &InstanceLayout,
        count: usize,
    ) -> Self::VertexBuffer;

    fn write_instance_buffer(&mut self, buffer: &Self::VertexBuffer, bytes: &[u8]);

    fn set_texture_parameter(&mut self, name: &str, texture: &Self::Texture);

    fn set_vector_parameter(&mut self, name: &str, value: [f32; 4]);

    /// Ask the host to draw another frame
    fn request_redraw(&mut self);
}

/// Highest-precision float format the device supports, or the unorm fallback
pub fn probe_texture_format<D: GraphicsDevice + ?Sized>(
    device: &D,
    preferred: Option<TextureFormat>,
) -> TextureFormat {
    if let Some(format) = preferred {
        if device.supports_format(format) {
            return format;
        }
    }
    TextureFormat::PRIORITY
        .into_iter()
        .find(|f| device.supports_format(*f))
        .unwrap_or(TextureFormat::Rgba8Unorm)
}

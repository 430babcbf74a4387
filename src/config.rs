// Configuration for loading, encoding and sorting splats
// Each config has a sensible Default plus a few named profiles.

use crate::device::TextureFormat;

/// Camera movement below this (per component) does not trigger a re-sort
pub const DEFAULT_SORT_EPSILON: f32 = 1e-4;

/// Options applied while turning PLY elements into splat data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadOptions {
    /// Mirror X/Y positions and negate rot_1/rot_2 to match renderer handedness.
    /// Applied once, while the raw columns are converted.
    pub mirror: bool,
    /// Chunk size used when pulling bytes from a reader
    pub chunk_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mirror: true,
            chunk_size: 64 * 1024,
        }
    }
}

impl LoadOptions {
    /// Keep source coordinates untouched
    pub fn raw() -> Self {
        Self {
            mirror: false,
            ..Default::default()
        }
    }
}

/// How splat attributes reach the vertex stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingMode {
    /// Attributes in 2D textures, fetched through a sorted splat-id buffer
    #[default]
    Texture,
    /// Attributes as per-instance vertex rows, reordered wholesale by the sorter
    VertexAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncoderConfig {
    pub mode: EncodingMode,
    /// Try this format first; falls back through the priority list if unsupported
    pub preferred_format: Option<TextureFormat>,
}

/// Element type of published index buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexFormat {
    #[default]
    U32,
    /// Indices as f32 values, for hosts without integer vertex attributes
    F32,
}

/// Sort worker configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortConfig {
    /// Per-component pose delta required before a new pass runs
    pub epsilon: f32,
    pub index_format: IndexFormat,
    /// Compute keys and sort lanes on the rayon pool (requires the `native` feature)
    pub parallel_keys: bool,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_SORT_EPSILON,
            index_format: IndexFormat::U32,
            parallel_keys: true,
        }
    }
}

impl SortConfig {
    /// Re-sort on any pose change at all
    pub fn exact() -> Self {
        Self {
            epsilon: 0.0,
            ..Default::default()
        }
    }

    /// Single-threaded sorting with float indices
    pub fn compatible() -> Self {
        Self {
            index_format: IndexFormat::F32,
            parallel_keys: false,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderConfig {
    pub encoder: EncoderConfig,
    pub sort: SortConfig,
}

impl RenderConfig {
    /// Vertex-attribute encoding with full-row sorting
    pub fn legacy() -> Self {
        Self {
            encoder: EncoderConfig {
                mode: EncodingMode::VertexAttributes,
                preferred_format: None,
            },
            sort: SortConfig::default(),
        }
    }
}

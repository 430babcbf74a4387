// 3D Gaussian Splatting support: PLY loading, GPU encoding and back-to-front sorting
// The host renderer is reached only through the GraphicsDevice trait.

pub mod camera;
pub mod config;
pub mod device;
pub mod encoder;
pub mod error;
pub mod ply;
pub mod render_resource;
pub mod sort;
pub mod sort_manager;
pub mod splat_data;

// Re-exports
pub use camera::CameraPose;
pub use config::{
    EncoderConfig, EncodingMode, IndexFormat, LoadOptions, RenderConfig, SortConfig,
    DEFAULT_SORT_EPSILON,
};
pub use device::{
    probe_texture_format, GraphicsDevice, InstanceLayout, TexelData, TextureFormat, VertexAttribute,
    VertexFormat,
};
pub use encoder::{
    canonical_rotation, choose_texture_format, encode_instances, rotation_from_xyz, SplatInstance,
    SplatTextureSet, TextureLayout,
};
pub use error::{PlyError, Result, SplatError};
pub use ply::{read_ply, PlyElement, PlyFormat, PlyReader, PropertyStorage, ScalarType};
pub use render_resource::SplatRenderResource;
pub use sort::{sort_order, OrderBuffer, OrderData, SortRequest, SortResponse, SortSource, SortWorker};
pub use sort_manager::{SortManager, SortPhase};
pub use splat_data::{sh_to_color, sigmoid, Aabb, SplatCollection, SH_C0};

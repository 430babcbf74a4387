// Splat render resource
// Ties a loaded SplatCollection to the host renderer: uploads the encoded attributes once,
// owns the instance buffer the sorted order is written into, and drives the sort manager
// from the per-frame camera transform.

use std::time::Duration;

use glam::{Mat4, Vec3};
use tracing::{debug, info};

use crate::camera::CameraPose;
use crate::config::{EncodingMode, IndexFormat, RenderConfig};
use crate::device::{GraphicsDevice, InstanceLayout, VertexFormat};
use crate::encoder::{choose_texture_format, encode_instances, SplatInstance, SplatTextureSet};
use crate::error::{Result, SplatError};
use crate::sort_manager::{SortManager, SortPhase};
use crate::splat_data::{Aabb, SplatCollection};

pub const ORDER_ATTRIBUTE: &str = "splat_id";

/// Per-instance layout of the sorted splat-id buffer
pub fn order_layout(format: IndexFormat) -> InstanceLayout {
    let vertex_format = match format {
        IndexFormat::U32 => VertexFormat::Uint32,
        IndexFormat::F32 => VertexFormat::Float32,
    };
    InstanceLayout::packed(&[(ORDER_ATTRIBUTE, vertex_format)])
}

pub struct SplatRenderResource<D: GraphicsDevice> {
    mode: EncodingMode,
    num_splats: usize,
    /// Instance buffer the current order is written into
    instance_buffer: D::VertexBuffer,
    /// Kept alive for as long as the material samples them
    textures: Vec<D::Texture>,
    aabb: Aabb,
    focal_point: Vec3,
    inverse_transform: Mat4,
    sorter: SortManager,
}

impl<D: GraphicsDevice> SplatRenderResource<D> {
    pub fn new(device: &mut D, splats: &SplatCollection, config: &RenderConfig) -> Result<Self> {
        if splats.is_empty() {
            return Err(SplatError::EmptyScene);
        }
        let num_splats = splats.num_splats();
        let aabb = splats.calc_aabb().ok_or(SplatError::EmptyScene)?;
        let focal_point = splats.calc_focal_point().unwrap_or_else(|| aabb.center());

        let mut sorter = SortManager::spawn(config.sort)?;
        let mode = config.encoder.mode;

        let (instance_buffer, textures) = match mode {
            EncodingMode::Texture => {
                let format = choose_texture_format(device, &config.encoder);
                let textures = SplatTextureSet::encode(splats, format).upload(device);

                let layout = order_layout(config.sort.index_format);
                let buffer = device.create_instance_buffer("splat_order", &layout, num_splats);
                sorter.set_centers(splats.centers());
                if let Some(front) = sorter.front() {
                    device.write_instance_buffer(&buffer, front.as_bytes());
                }
                (buffer, textures)
            }
            EncodingMode::VertexAttributes => {
                let rows: Vec<u32> =
                    bytemuck::cast_slice(&encode_instances(splats)).to_vec();
                let buffer =
                    device.create_instance_buffer("splat_instances", &SplatInstance::layout(), num_splats);
                device.write_instance_buffer(&buffer, bytemuck::cast_slice(&rows));
                sorter.set_rows(rows, SplatInstance::WORDS);
                (buffer, Vec::new())
            }
        };

        info!(
            "Created splat render resource: {} splats, {:?} encoding, bounds {:?}..{:?}",
            num_splats, mode, aabb.min, aabb.max
        );
        Ok(Self {
            mode,
            num_splats,
            instance_buffer,
            textures,
            aabb,
            focal_point,
            inverse_transform: Mat4::IDENTITY,
            sorter,
        })
    }

    /// World transform of the splat entity; camera poses are moved into its local space
    pub fn set_entity_transform(&mut self, transform: Mat4) {
        self.inverse_transform = transform.inverse();
    }

    /// Per-frame hook: forward the camera and swap in a newly published order.
    /// Returns true when the instance buffer changed and a redraw was requested.
    pub fn update(&mut self, device: &mut D, camera_world: &Mat4) -> bool {
        let pose = CameraPose::from_world_transform(camera_world).to_local(&self.inverse_transform);
        self.sorter.set_camera(pose);
        match self.sorter.poll() {
            Some(order) => {
                device.write_instance_buffer(&self.instance_buffer, order.as_bytes());
                device.request_redraw();
                true
            }
            None => false,
        }
    }

    /// Block until the worker publishes an order for the current pose, then upload it
    pub fn wait_for_order(&mut self, device: &mut D, timeout: Duration) -> bool {
        if !self.sorter.wait_for_update(timeout) {
            return false;
        }
        if let Some(order) = self.sorter.front() {
            device.write_instance_buffer(&self.instance_buffer, order.as_bytes());
            device.request_redraw();
        }
        true
    }

    /// Extent-aware bounds for culling
    pub fn aabb(&self) -> Aabb {
        self.aabb
    }

    pub fn focal_point(&self) -> Vec3 {
        self.focal_point
    }

    pub fn num_splats(&self) -> usize {
        self.num_splats
    }

    pub fn mode(&self) -> EncodingMode {
        self.mode
    }

    pub fn textures(&self) -> &[D::Texture] {
        &self.textures
    }

    pub fn instance_buffer(&self) -> &D::VertexBuffer {
        &self.instance_buffer
    }

    pub fn sort_phase(&self) -> SortPhase {
        self.sorter.phase()
    }

    pub fn sorter(&self) -> &SortManager {
        &self.sorter
    }

    /// Stop sorting; the last order stays in the instance buffer
    pub fn destroy(&mut self) {
        self.sorter.shutdown();
        debug!("Splat render resource destroyed");
    }
}

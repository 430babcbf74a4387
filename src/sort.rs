// Splat depth sort
// Pure sort-worker state machine plus the manager <-> worker message types.
// Keys are view-axis depths, quantized to u32 and packed with the splat index into u64 lanes
// (key in the upper half) so one numeric sort yields the back-to-front order.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use glam::Vec3;
use tracing::{debug, trace};

use crate::camera::CameraPose;
use crate::config::{IndexFormat, SortConfig};

/// Splat centers as seen by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum SortSource {
    /// Interleaved xyz
    Centers(Vec<f32>),
    /// Full attribute rows of `stride` 32-bit words; words 0..3 hold the center as f32 bits
    Rows { rows: Vec<u32>, stride: usize },
}

impl SortSource {
    pub fn len(&self) -> usize {
        match self {
            SortSource::Centers(c) => c.len() / 3,
            SortSource::Rows { rows, stride } if *stride >= 3 => rows.len() / stride,
            SortSource::Rows { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn center(&self, i: usize) -> Vec3 {
        match self {
            SortSource::Centers(c) => Vec3::from_slice(&c[i * 3..i * 3 + 3]),
            SortSource::Rows { rows, stride } => {
                let r = &rows[i * stride..i * stride + 3];
                Vec3::new(f32::from_bits(r[0]), f32::from_bits(r[1]), f32::from_bits(r[2]))
            }
        }
    }
}

/// Payload of an order buffer
#[derive(Debug, PartialEq)]
pub enum OrderData {
    /// Splat ids as u32
    Indices(Vec<u32>),
    /// Splat ids as f32 values
    FloatIndices(Vec<f32>),
    /// Attribute rows gathered in draw order
    Rows { rows: Vec<u32>, stride: usize },
}

/// One half of the ping-pong pair.
///
/// Deliberately not `Clone`: a buffer is either held by the manager or by the worker, and
/// moves between them through the message channel.
#[derive(Debug, PartialEq)]
pub struct OrderBuffer {
    data: OrderData,
}

impl OrderBuffer {
    /// Identity order 0..count
    pub fn identity(count: usize, format: IndexFormat) -> Self {
        let data = match format {
            IndexFormat::U32 => OrderData::Indices((0..count as u32).collect()),
            IndexFormat::F32 => OrderData::FloatIndices((0..count).map(|i| i as f32).collect()),
        };
        Self { data }
    }

    /// Rows in their original order
    pub fn from_rows(rows: Vec<u32>, stride: usize) -> Self {
        Self {
            data: OrderData::Rows { rows, stride },
        }
    }

    pub fn data(&self) -> &OrderData {
        &self.data
    }

    /// Number of splats covered
    pub fn len(&self) -> usize {
        match &self.data {
            OrderData::Indices(v) => v.len(),
            OrderData::FloatIndices(v) => v.len(),
            OrderData::Rows { rows, stride } => rows.len() / (*stride).max(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes for upload into the host's instance buffer
    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            OrderData::Indices(v) => bytemuck::cast_slice(v),
            OrderData::FloatIndices(v) => bytemuck::cast_slice(v),
            OrderData::Rows { rows, .. } => bytemuck::cast_slice(rows),
        }
    }

    /// Draw order as splat ids, when this buffer carries indices
    pub fn indices(&self) -> Option<Vec<u32>> {
        match &self.data {
            OrderData::Indices(v) => Some(v.clone()),
            OrderData::FloatIndices(v) => Some(v.iter().map(|&f| f as u32).collect()),
            OrderData::Rows { .. } => None,
        }
    }

    fn write_indices(&mut self, lanes: &[u64], format: IndexFormat) {
        let ids = lanes.iter().map(|&lane| lane as u32);
        match (format, &mut self.data) {
            (IndexFormat::U32, OrderData::Indices(v)) => {
                v.clear();
                v.extend(ids);
            }
            (IndexFormat::F32, OrderData::FloatIndices(v)) => {
                v.clear();
                v.extend(ids.map(|i| i as f32));
            }
            (IndexFormat::U32, _) => self.data = OrderData::Indices(ids.collect()),
            (IndexFormat::F32, _) => {
                self.data = OrderData::FloatIndices(ids.map(|i| i as f32).collect())
            }
        }
    }

    fn write_rows(&mut self, lanes: &[u64], source: &[u32], stride: usize) {
        if !matches!(self.data, OrderData::Rows { .. }) {
            self.data = OrderData::Rows {
                rows: Vec::with_capacity(source.len()),
                stride,
            };
        }
        if let OrderData::Rows { rows, stride: s } = &mut self.data {
            *s = stride;
            rows.clear();
            for &lane in lanes {
                let i = (lane as u32) as usize;
                rows.extend_from_slice(&source[i * stride..(i + 1) * stride]);
            }
        }
    }
}

/// Manager -> worker message. Every field is optional; buffers are moved, never copied.
#[derive(Debug, Default)]
pub struct SortRequest {
    /// New splat centers (or rows), tagged with the manager's data generation
    pub source: Option<(u64, SortSource)>,
    /// A writable buffer handed (back) to the worker
    pub buffer: Option<OrderBuffer>,
    pub camera: Option<CameraPose>,
    /// Integer (true) or float (false) index output
    pub int_indices: Option<bool>,
}

impl SortRequest {
    pub fn camera(pose: CameraPose) -> Self {
        Self {
            camera: Some(pose),
            ..Default::default()
        }
    }

    pub fn buffer(buffer: OrderBuffer) -> Self {
        Self {
            buffer: Some(buffer),
            ..Default::default()
        }
    }
}

/// Worker -> manager message: a freshly ordered buffer
#[derive(Debug)]
pub struct SortResponse {
    pub buffer: OrderBuffer,
    /// Data generation the order belongs to
    pub generation: u64,
    /// Monotonic pass counter
    pub pass: u64,
    /// Pose the order was computed for
    pub pose: CameraPose,
}

/// Sort worker state. Pure: the thread wrapper lives in `sort_manager`.
pub struct SortWorker {
    config: SortConfig,
    index_format: IndexFormat,
    source: Option<SortSource>,
    generation: u64,
    /// Writable buffers currently owned by the worker
    buffers: Vec<OrderBuffer>,
    /// Latest pose received; overwritten by newer poses
    pose: Option<CameraPose>,
    /// Pose of the last completed pass
    sorted_pose: Option<CameraPose>,
    data_changed: bool,
    keys: Vec<f32>,
    lanes: Vec<u64>,
    passes: u64,
}

impl SortWorker {
    pub fn new(config: SortConfig) -> Self {
        Self {
            config,
            index_format: config.index_format,
            source: None,
            generation: 0,
            buffers: Vec::with_capacity(2),
            pose: None,
            sorted_pose: None,
            data_changed: false,
            keys: Vec::new(),
            lanes: Vec::new(),
            passes: 0,
        }
    }

    /// Fold one message into the worker state
    pub fn apply(&mut self, request: SortRequest) {
        if let Some((generation, source)) = request.source {
            // Buffers sized for the previous data are dropped with it
            self.buffers.clear();
            self.generation = generation;
            self.source = Some(source);
            self.data_changed = true;
        }
        if let Some(buffer) = request.buffer {
            self.buffers.push(buffer);
        }
        if let Some(int_indices) = request.int_indices {
            let format = if int_indices {
                IndexFormat::U32
            } else {
                IndexFormat::F32
            };
            if format != self.index_format {
                self.index_format = format;
                self.data_changed = true;
            }
        }
        if let Some(pose) = request.camera {
            self.pose = Some(pose);
        }
    }

    /// Whether the next `run_pass` would do any work
    pub fn needs_pass(&self) -> bool {
        let Some(pose) = self.pose else {
            return false;
        };
        if self.source.is_none() || self.buffers.is_empty() {
            return false;
        }
        self.data_changed
            || self
                .sorted_pose
                .map_or(true, |last| pose.differs_from(&last, self.config.epsilon))
    }

    /// Run one sort pass if data, a writable buffer and a sufficiently new pose are present
    pub fn run_pass(&mut self) -> Option<SortResponse> {
        if !self.needs_pass() {
            return None;
        }
        let pose = self.pose?;
        let source = self.source.as_ref()?;
        let mut buffer = self.buffers.pop()?;

        compute_keys(source, &pose, &mut self.keys, self.config.parallel_keys);
        pack_lanes(&self.keys, &mut self.lanes);
        sort_lanes(&mut self.lanes, self.config.parallel_keys);

        match source {
            SortSource::Centers(_) => buffer.write_indices(&self.lanes, self.index_format),
            SortSource::Rows { rows, stride } => buffer.write_rows(&self.lanes, rows, *stride),
        }

        self.passes += 1;
        self.sorted_pose = Some(pose);
        self.data_changed = false;
        trace!("Sort pass {} over {} splats", self.passes, self.lanes.len());

        Some(SortResponse {
            buffer,
            generation: self.generation,
            pass: self.passes,
            pose,
        })
    }

    /// Completed passes so far
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn owned_buffers(&self) -> usize {
        self.buffers.len()
    }
}

/// key = dot(center - camera position, camera direction)
pub fn compute_keys(source: &SortSource, pose: &CameraPose, keys: &mut Vec<f32>, parallel: bool) {
    keys.resize(source.len(), 0.0);
    let pose = *pose;
    fill_keys(keys, |i| (source.center(i) - pose.position).dot(pose.direction), parallel);
}

#[cfg(feature = "rayon")]
fn fill_keys<F: Fn(usize) -> f32 + Sync>(keys: &mut [f32], key: F, parallel: bool) {
    if parallel {
        keys.par_iter_mut().enumerate().for_each(|(i, k)| *k = key(i));
    } else {
        keys.iter_mut().enumerate().for_each(|(i, k)| *k = key(i));
    }
}

#[cfg(not(feature = "rayon"))]
fn fill_keys<F: Fn(usize) -> f32>(keys: &mut [f32], key: F, _parallel: bool) {
    keys.iter_mut().enumerate().for_each(|(i, k)| *k = key(i));
}

/// Quantize keys into [0, u32::MAX] so the largest key maps to 0 (drawn first) and pack
/// each with its index. Non-finite keys go last; a zero range keeps input order.
pub fn pack_lanes(keys: &[f32], lanes: &mut Vec<u64>) {
    let (min, max) = keys
        .iter()
        .filter(|k| k.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &k| {
            (lo.min(k), hi.max(k))
        });
    let range = max as f64 - min as f64;
    let range = if range.is_finite() && range > 0.0 {
        range
    } else {
        0.0
    };

    lanes.clear();
    lanes.extend(keys.iter().enumerate().map(|(i, &k)| {
        let q = if !k.is_finite() {
            u32::MAX
        } else if range > 0.0 {
            (((max as f64 - k as f64) / range) * u32::MAX as f64) as u32
        } else {
            0
        };
        ((q as u64) << 32) | i as u64
    }));
}

#[cfg(feature = "rayon")]
pub fn sort_lanes(lanes: &mut [u64], parallel: bool) {
    if parallel {
        lanes.par_sort_unstable();
    } else {
        lanes.sort_unstable();
    }
}

#[cfg(not(feature = "rayon"))]
pub fn sort_lanes(lanes: &mut [u64], _parallel: bool) {
    lanes.sort_unstable();
}

/// One-shot back-to-front order of interleaved centers
pub fn sort_order(centers: &[f32], pose: &CameraPose) -> Vec<u32> {
    let source = SortSource::Centers(centers.to_vec());
    let mut keys = Vec::new();
    let mut lanes = Vec::new();
    compute_keys(&source, pose, &mut keys, false);
    pack_lanes(&keys, &mut lanes);
    sort_lanes(&mut lanes, false);
    debug!("Sorted {} splats", lanes.len());
    lanes.iter().map(|&lane| lane as u32).collect()
}

// Shared test helpers: PLY byte builders and a recording GraphicsDevice
#![allow(dead_code)]

use std::collections::HashMap;

use gsplat_sort::{GraphicsDevice, InstanceLayout, TexelData, TextureFormat};

/// Binary little-endian PLY with one "vertex" element of float properties
pub fn float_ply(props: &[&str], rows: &[Vec<f32>]) -> Vec<u8> {
    let mut out = header("binary_little_endian", props, rows.len()).into_bytes();
    for row in rows {
        for v in row {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

/// Same layout as `float_ply`, big-endian
pub fn float_ply_be(props: &[&str], rows: &[Vec<f32>]) -> Vec<u8> {
    let mut out = header("binary_big_endian", props, rows.len()).into_bytes();
    for row in rows {
        for v in row {
            out.extend_from_slice(&v.to_be_bytes());
        }
    }
    out
}

fn header(format: &str, props: &[&str], count: usize) -> String {
    let mut h = format!("ply\nformat {format} 1.0\ncomment test data\nelement vertex {count}\n");
    for p in props {
        h.push_str(&format!("property float {p}\n"));
    }
    h.push_str("end_header\n");
    h
}

pub const SPLAT_PROPS: [&str; 14] = [
    "x", "y", "z", "f_dc_0", "f_dc_1", "f_dc_2", "opacity", "scale_0", "scale_1", "scale_2",
    "rot_0", "rot_1", "rot_2", "rot_3",
];

/// One splat row in SPLAT_PROPS order
pub fn splat_row(center: [f32; 3], log_scale: f32, rot_wxyz: [f32; 4]) -> Vec<f32> {
    let mut row = center.to_vec();
    row.extend_from_slice(&[0.0, 0.0, 0.0, 0.0]);
    row.extend_from_slice(&[log_scale; 3]);
    row.extend_from_slice(&rot_wxyz);
    row
}

/// Unit-scale, identity-rotation splats at the given centers
pub fn splat_ply(centers: &[[f32; 3]]) -> Vec<u8> {
    let rows: Vec<Vec<f32>> = centers
        .iter()
        .map(|&c| splat_row(c, 0.0, [1.0, 0.0, 0.0, 0.0]))
        .collect();
    float_ply(&SPLAT_PROPS, &rows)
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateTexture {
        label: String,
        format: TextureFormat,
        width: u32,
        height: u32,
    },
    WriteTexture(usize),
    CreateInstanceBuffer {
        label: String,
        stride: usize,
        count: usize,
    },
    WriteInstanceBuffer(usize),
    SetTexture(String, usize),
    SetVector(String, [f32; 4]),
    Redraw,
}

/// GraphicsDevice double that records every call and keeps uploaded contents
pub struct RecordingDevice {
    pub supported: Vec<TextureFormat>,
    pub calls: Vec<DeviceCall>,
    pub textures: HashMap<usize, TexelData>,
    pub buffers: HashMap<usize, Vec<u8>>,
    next_id: usize,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::with_formats(&TextureFormat::PRIORITY)
    }

    pub fn with_formats(formats: &[TextureFormat]) -> Self {
        Self {
            supported: formats.to_vec(),
            calls: Vec::new(),
            textures: HashMap::new(),
            buffers: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn redraws(&self) -> usize {
        self.calls.iter().filter(|c| **c == DeviceCall::Redraw).count()
    }

    pub fn vector(&self, name: &str) -> Option<[f32; 4]> {
        self.calls.iter().rev().find_map(|c| match c {
            DeviceCall::SetVector(n, v) if n == name => Some(*v),
            _ => None,
        })
    }

    pub fn bound_textures(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::SetTexture(n, _) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    /// Buffer contents reinterpreted as u32 words
    pub fn buffer_words(&self, id: usize) -> Vec<u32> {
        self.buffers[&id]
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }
}

impl GraphicsDevice for RecordingDevice {
    type Texture = usize;
    type VertexBuffer = usize;

    fn supports_format(&self, format: TextureFormat) -> bool {
        self.supported.contains(&format)
    }

    fn create_texture(&mut self, label: &str, format: TextureFormat, width: u32, height: u32) -> usize {
        self.calls.push(DeviceCall::CreateTexture {
            label: label.to_string(),
            format,
            width,
            height,
        });
        self.id()
    }

    fn write_texture(&mut self, texture: &usize, data: &TexelData) {
        self.calls.push(DeviceCall::WriteTexture(*texture));
        self.textures.insert(*texture, data.clone());
    }

    fn create_instance_buffer(&mut self, label: &str, layout: &InstanceLayout, count: usize) -> usize {
        self.calls.push(DeviceCall::CreateInstanceBuffer {
            label: label.to_string(),
            stride: layout.stride,
            count,
        });
        let id = self.id();
        self.buffers.insert(id, vec![0; layout.stride * count]);
        id
    }

    fn write_instance_buffer(&mut self, buffer: &usize, bytes: &[u8]) {
        self.calls.push(DeviceCall::WriteInstanceBuffer(*buffer));
        self.buffers.insert(*buffer, bytes.to_vec());
    }

    fn set_texture_parameter(&mut self, name: &str, texture: &usize) {
        self.calls.push(DeviceCall::SetTexture(name.to_string(), *texture));
    }

    fn set_vector_parameter(&mut self, name: &str, value: [f32; 4]) {
        self.calls.push(DeviceCall::SetVector(name.to_string(), value));
    }

    fn request_redraw(&mut self) {
        self.calls.push(DeviceCall::Redraw);
    }
}

// Splat data model
// Owns decoded per-splat columns (positions, rotations, log-scales, SH DC colors, opacity
// logits) and answers scene queries: extent-aware bounds and a focal point for framing.

use std::collections::HashMap;
use std::io::Read;

use glam::{Mat3, Mat4, Quat, Vec3, Vec4};
use tracing::{debug, info};

use crate::config::LoadOptions;
use crate::error::{Result, SplatError};
use crate::ply::{read_ply, PlyElement, PropertyStorage, ScalarType};

/// Zeroth-order spherical harmonic basis constant
pub const SH_C0: f32 = 0.28209479177387814;

/// Log-scale used when a file carries no scale_* columns
pub const DEFAULT_LOG_SCALE: f32 = -4.0;

pub const VERTEX_ELEMENT: &str = "vertex";

/// Columns the loader asks the PLY reader to keep
pub const SPLAT_PROPERTIES: [&str; 17] = [
    "x", "y", "z", "rot_0", "rot_1", "rot_2", "rot_3", "scale_0", "scale_1", "scale_2",
    "f_dc_0", "f_dc_1", "f_dc_2", "opacity", "red", "green", "blue",
];

const REQUIRED_PROPERTIES: [&str; 3] = ["x", "y", "z"];

/// Columns negated by the handedness mirror
const MIRRORED_PROPERTIES: [&str; 4] = ["x", "y", "rot_1", "rot_2"];

/// Numerically stable logistic function
pub fn sigmoid(v: f32) -> f32 {
    if v > 0.0 {
        1.0 / (1.0 + (-v).exp())
    } else {
        let e = v.exp();
        e / (1.0 + e)
    }
}

/// Display value of one SH DC coefficient
pub fn sh_to_color(c: f32) -> f32 {
    (0.5 + SH_C0 * c).clamp(0.0, 1.0)
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }
}

/// All splats of one loaded asset, stored column-wise
#[derive(Debug, Clone)]
pub struct SplatCollection {
    num_splats: usize,
    props: HashMap<String, Vec<f32>>,
}

impl SplatCollection {
    /// Load splats from a PLY byte stream
    pub fn load<R: Read>(reader: R, options: &LoadOptions) -> Result<Self> {
        let elements = read_ply(reader, Some(&SPLAT_PROPERTIES[..]), options.chunk_size)?;
        Self::from_elements(&elements, options)
    }

    /// Build from parsed PLY elements. Requires a "vertex" element with x, y, z.
    pub fn from_elements(elements: &[PlyElement], options: &LoadOptions) -> Result<Self> {
        let vertex = elements
            .iter()
            .find(|e| e.name == VERTEX_ELEMENT)
            .ok_or_else(|| SplatError::MissingElement(VERTEX_ELEMENT.to_string()))?;

        let mut columns = Vec::new();
        for name in SPLAT_PROPERTIES {
            if let Some(storage) = vertex.storage(name) {
                columns.push((name.to_string(), column_from_storage(name, storage)));
            }
        }
        Self::from_columns(vertex.count, columns, options)
    }

    /// Build from named f32 columns. Colors given as red/green/blue are expected in [0, 1].
    pub fn from_columns(
        num_splats: usize,
        columns: impl IntoIterator<Item = (String, Vec<f32>)>,
        options: &LoadOptions,
    ) -> Result<Self> {
        let mut props: HashMap<String, Vec<f32>> = HashMap::new();
        for (name, values) in columns {
            if values.len() != num_splats {
                return Err(SplatError::LengthMismatch {
                    name,
                    len: values.len(),
                    expected: num_splats,
                });
            }
            props.insert(name, values);
        }

        for name in REQUIRED_PROPERTIES {
            if !props.contains_key(name) {
                return Err(SplatError::MissingProperty(name.to_string()));
            }
        }

        if options.mirror {
            for name in MIRRORED_PROPERTIES {
                if let Some(column) = props.get_mut(name) {
                    column.iter_mut().for_each(|v| *v = -*v);
                }
            }
        }

        let collection = Self { num_splats, props };
        info!(
            "Loaded {} splats (rotation: {}, scale: {}, sh color: {}, opacity: {}, mirrored: {})",
            num_splats,
            collection.has_rotation(),
            collection.has_scale(),
            collection.get_prop("f_dc_0").is_some(),
            collection.get_prop("opacity").is_some(),
            options.mirror,
        );
        Ok(collection)
    }

    pub fn num_splats(&self) -> usize {
        self.num_splats
    }

    pub fn is_empty(&self) -> bool {
        self.num_splats == 0
    }

    /// Backing column for a property, if the source file had it
    pub fn get_prop(&self, name: &str) -> Option<&[f32]> {
        self.props.get(name).map(Vec::as_slice)
    }

    fn prop3(&self, names: [&str; 3]) -> Option<[&[f32]; 3]> {
        Some([
            self.get_prop(names[0])?,
            self.get_prop(names[1])?,
            self.get_prop(names[2])?,
        ])
    }

    fn has_rotation(&self) -> bool {
        ["rot_0", "rot_1", "rot_2", "rot_3"]
            .iter()
            .all(|n| self.props.contains_key(*n))
    }

    fn has_scale(&self) -> bool {
        self.prop3(["scale_0", "scale_1", "scale_2"]).is_some()
    }

    pub fn position(&self, i: usize) -> Vec3 {
        match self.prop3(["x", "y", "z"]) {
            Some([x, y, z]) => Vec3::new(x[i], y[i], z[i]),
            None => Vec3::ZERO,
        }
    }

    /// Unit rotation; rot_0..rot_3 hold (w, x, y, z). Identity when absent or degenerate.
    pub fn rotation(&self, i: usize) -> Quat {
        let cols = (
            self.get_prop("rot_0"),
            self.get_prop("rot_1"),
            self.get_prop("rot_2"),
            self.get_prop("rot_3"),
        );
        let (Some(w), Some(x), Some(y), Some(z)) = cols else {
            return Quat::IDENTITY;
        };
        let v = Vec4::new(x[i], y[i], z[i], w[i]);
        let len2 = v.length_squared();
        if len2 > 0.0 && len2.is_finite() {
            Quat::from_vec4(v / len2.sqrt())
        } else {
            Quat::IDENTITY
        }
    }

    pub fn log_scale(&self, i: usize) -> Vec3 {
        match self.prop3(["scale_0", "scale_1", "scale_2"]) {
            Some([a, b, c]) => Vec3::new(a[i], b[i], c[i]),
            None => Vec3::splat(DEFAULT_LOG_SCALE),
        }
    }

    /// Effective scale, exp of the stored log-scale
    pub fn scale(&self, i: usize) -> Vec3 {
        let l = self.log_scale(i);
        Vec3::new(l.x.exp(), l.y.exp(), l.z.exp())
    }

    /// Display opacity; fully opaque when the file has none
    pub fn opacity(&self, i: usize) -> f32 {
        self.get_prop("opacity").map_or(1.0, |o| sigmoid(o[i]))
    }

    /// Display RGBA. SH DC terms win over legacy red/green/blue; white when neither exists.
    pub fn color(&self, i: usize) -> Vec4 {
        let rgb = if let Some([r, g, b]) = self.prop3(["f_dc_0", "f_dc_1", "f_dc_2"]) {
            Vec3::new(sh_to_color(r[i]), sh_to_color(g[i]), sh_to_color(b[i]))
        } else if let Some([r, g, b]) = self.prop3(["red", "green", "blue"]) {
            Vec3::new(r[i], g[i], b[i]).clamp(Vec3::ZERO, Vec3::ONE)
        } else {
            Vec3::ONE
        };
        rgb.extend(self.opacity(i))
    }

    /// Derived affine transform: translation * rotation * scale
    pub fn splat_matrix(&self, i: usize) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale(i), self.rotation(i), self.position(i))
    }

    /// Interleaved xyz centers, the sorter's input
    pub fn centers(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.num_splats * 3);
        if let Some([x, y, z]) = self.prop3(["x", "y", "z"]) {
            for i in 0..self.num_splats {
                out.extend_from_slice(&[x[i], y[i], z[i]]);
            }
        }
        out
    }

    /// Bounds of one splat: a [-1, 1] cube scaled by 2 * scale, rotated and translated
    pub fn splat_aabb(&self, i: usize) -> Aabb {
        let m = Mat3::from_quat(self.rotation(i)) * Mat3::from_diagonal(2.0 * self.scale(i));
        let half = m.x_axis.abs() + m.y_axis.abs() + m.z_axis.abs();
        Aabb::from_center_half_extents(self.position(i), half)
    }

    /// Scene bounds covering every splat's extent, not just its center
    pub fn calc_aabb(&self) -> Option<Aabb> {
        let mut boxes = (0..self.num_splats)
            .map(|i| self.splat_aabb(i))
            .filter(Aabb::is_finite);
        let first = boxes.next()?;
        let aabb = boxes.fold(first, |acc, b| acc.union(&b));
        debug!("Splat AABB: min {:?} max {:?}", aabb.min, aabb.max);
        Some(aabb)
    }

    /// Centroid weighted toward small splats: w = 1 / (1 + exp(max log-scale))
    pub fn calc_focal_point(&self) -> Option<Vec3> {
        if self.num_splats == 0 {
            return None;
        }
        let mut weighted = [0.0f64; 3];
        let mut total = 0.0f64;
        let mut plain = [0.0f64; 3];
        let mut finite = 0usize;
        for i in 0..self.num_splats {
            let p = self.position(i);
            if !p.is_finite() {
                continue;
            }
            let w = sigmoid(-self.log_scale(i).max_element()) as f64;
            for (k, v) in p.to_array().into_iter().enumerate() {
                weighted[k] += w * v as f64;
                plain[k] += v as f64;
            }
            total += w;
            finite += 1;
        }
        if finite == 0 {
            return None;
        }
        let (sum, norm) = if total > 0.0 && total.is_finite() {
            (weighted, total)
        } else {
            (plain, finite as f64)
        };
        Some(Vec3::new(
            (sum[0] / norm) as f32,
            (sum[1] / norm) as f32,
            (sum[2] / norm) as f32,
        ))
    }
}

/// Convert a typed column to f32, normalizing integer color channels to [0, 1]
fn column_from_storage(name: &str, storage: &PropertyStorage) -> Vec<f32> {
    let is_color = matches!(name, "red" | "green" | "blue");
    let divisor = match storage.scalar_type() {
        ScalarType::UChar if is_color => 255.0,
        ScalarType::UShort if is_color => 65535.0,
        _ => 1.0,
    };
    let mut column = storage.to_f32_vec();
    if divisor != 1.0 {
        column.iter_mut().for_each(|v| *v /= divisor);
    }
    column
}

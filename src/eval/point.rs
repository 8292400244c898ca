// eval/point.rs - Per-query sample context and small value types
//
// `PointInfo` is the snapshot handed to every node before it is queried.
// `Vec3` carries gradients, `RgbColor` carries color outputs.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul};

// ── Vec3 type ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

pub const ZERO_VEC3: Vec3 = Vec3 {
    x: 0.0,
    y: 0.0,
    z: 0.0,
};

pub const UNIT_X: Vec3 = Vec3 {
    x: 1.0,
    y: 0.0,
    z: 0.0,
};

pub const UNIT_Y: Vec3 = Vec3 {
    x: 0.0,
    y: 1.0,
    z: 0.0,
};

pub const UNIT_Z: Vec3 = Vec3 {
    x: 0.0,
    y: 0.0,
    z: 1.0,
};

impl Vec3 {
    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    #[inline]
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    #[inline]
    fn add_assign(&mut self, rhs: Vec3) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;

    #[inline]
    fn mul(self, s: f64) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }
}

// ── Color ───────────────────────────────────────────────────────────

/// Linear RGB color, components nominally in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl RgbColor {
    pub const BLACK: RgbColor = RgbColor::new(0.0, 0.0, 0.0);
    pub const WHITE: RgbColor = RgbColor::new(1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        RgbColor { r, g, b }
    }

    /// Linear interpolation: `self * (1 - t) + other * t`.
    pub fn lerp(self, other: RgbColor, t: f32) -> RgbColor {
        let s = 1.0 - t;
        RgbColor::new(
            self.r * s + other.r * t,
            self.g * s + other.g * t,
            self.b * s + other.b * t,
        )
    }
}

// ── PointInfo ───────────────────────────────────────────────────────

/// Everything a node may need to know about the point being sampled.
///
/// `xsize`, `ysize` and `zsize` are half-widths of the region the sample
/// stands for. A caller builds a fresh value for every sample point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointInfo {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub xsize: f64,
    pub ysize: f64,
    pub zsize: f64,
    pub time: f64,
    /// Cosine of the angle between the view ray and the surface normal.
    pub view_angle: Option<f64>,
}

impl PointInfo {
    /// A point sample with an empty footprint.
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        PointInfo {
            x,
            y,
            z,
            ..Default::default()
        }
    }

    pub fn with_footprint(self, xsize: f64, ysize: f64, zsize: f64) -> Self {
        PointInfo {
            xsize,
            ysize,
            zsize,
            ..self
        }
    }

    pub fn with_time(self, time: f64) -> Self {
        PointInfo { time, ..self }
    }

    pub fn with_view_angle(self, view_angle: f64) -> Self {
        PointInfo {
            view_angle: Some(view_angle),
            ..self
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

// eval/noise.rs - Seeded 3D gradient noise and the band-limited octave sum
//
// `simplex_3d_with_gradient` returns the analytic derivative alongside the
// value, which is what lets the octave sum report a gradient and a
// footprint error without finite differencing.
//
// `octave_sum` is the antialiasing core shared by Turbulence and Wood:
// octaves whose frequency the footprint cannot resolve are skipped, and the
// last resolvable band is faded linearly to zero at the cutoff so the result
// stays continuous as the footprint changes.

use crate::eval::point::{Vec3, ZERO_VEC3};

// 3D: 12 gradient directions (edges of a cube)
const GRAD3: [[f64; 3]; 12] = [
    [1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0],
    [1.0, -1.0, 0.0],
    [-1.0, -1.0, 0.0],
    [1.0, 0.0, 1.0],
    [-1.0, 0.0, 1.0],
    [1.0, 0.0, -1.0],
    [-1.0, 0.0, -1.0],
    [0.0, 1.0, 1.0],
    [0.0, -1.0, 1.0],
    [0.0, 1.0, -1.0],
    [0.0, -1.0, -1.0],
];

/// Permutation table: 256 shuffled entries followed by a copy of themselves.
pub type PermTable = [u8; 512];

// ── Mulberry32 PRNG ─────────────────────────────────────────────────

/// Small deterministic PRNG used to shuffle permutation tables.
///
/// Also handy for reproducible sample points in tests.
pub struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    pub fn new(seed: i32) -> Self {
        Self { state: seed as u32 }
    }

    /// Generate the next f64 in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x6d2b79f5);

        let mut t: u32 = (self.state ^ (self.state >> 15)).wrapping_mul(1 | self.state);
        t = t.wrapping_add((t ^ (t >> 7)).wrapping_mul(61 | t)) ^ t;

        ((t ^ (t >> 14)) as f64) / 4294967296.0
    }
}

// ── Permutation table ───────────────────────────────────────────────

/// Build a 512-entry permutation table using a Fisher-Yates shuffle.
pub fn build_perm_table(seed: i32) -> PermTable {
    let mut rng = Mulberry32::new(seed);
    let mut perm = [0u8; 512];

    for i in 0..256u16 {
        perm[i as usize] = i as u8;
    }

    for i in (1..=255usize).rev() {
        let j = (rng.next_f64() * (i as f64 + 1.0)).floor() as usize;
        perm.swap(i, j);
    }

    for i in 0..256 {
        perm[i + 256] = perm[i];
    }

    perm
}

// ── 3D Simplex Noise ────────────────────────────────────────────────

// Skew/unskew constants
const F3: f64 = 1.0 / 3.0;
const G3: f64 = 1.0 / 6.0;

/// Result of a 3D noise evaluation that also returns the analytic gradient.
#[derive(Debug, Clone, Copy)]
pub struct NoiseWithGradient3D {
    pub value: f64,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl NoiseWithGradient3D {
    pub fn gradient(&self) -> Vec3 {
        Vec3::new(self.dx, self.dy, self.dz)
    }
}

/// Corner offsets of the simplex containing the skewed cell point.
#[inline]
fn simplex_corners(x0: f64, y0: f64, z0: f64) -> (usize, usize, usize, usize, usize, usize) {
    if x0 >= y0 {
        if y0 >= z0 {
            (1, 0, 0, 1, 1, 0)
        } else if x0 >= z0 {
            (1, 0, 0, 1, 0, 1)
        } else {
            (0, 0, 1, 1, 0, 1)
        }
    } else if y0 < z0 {
        (0, 0, 1, 0, 1, 1)
    } else if x0 < z0 {
        (0, 1, 0, 0, 1, 1)
    } else {
        (0, 1, 0, 1, 1, 0)
    }
}

/// 3D simplex noise with analytic gradient.
/// Value is in approximately [-1, 1].
pub fn simplex_3d_with_gradient(perm: &PermTable, x: f64, y: f64, z: f64) -> NoiseWithGradient3D {
    let s = (x + y + z) * F3;
    let i = (x + s).floor() as i64;
    let j = (y + s).floor() as i64;
    let k = (z + s).floor() as i64;
    let t = (i + j + k) as f64 * G3;
    let x0 = x - (i as f64 - t);
    let y0 = y - (j as f64 - t);
    let z0 = z - (k as f64 - t);

    let (i1, j1, k1, i2, j2, k2) = simplex_corners(x0, y0, z0);

    let x1 = x0 - i1 as f64 + G3;
    let y1 = y0 - j1 as f64 + G3;
    let z1 = z0 - k1 as f64 + G3;
    let x2 = x0 - i2 as f64 + 2.0 * G3;
    let y2 = y0 - j2 as f64 + 2.0 * G3;
    let z2 = z0 - k2 as f64 + 2.0 * G3;
    let x3 = x0 - 1.0 + 3.0 * G3;
    let y3 = y0 - 1.0 + 3.0 * G3;
    let z3 = z0 - 1.0 + 3.0 * G3;

    let ii = (i & 255) as usize;
    let jj = (j & 255) as usize;
    let kk = (k & 255) as usize;
    let gi0 = (perm[ii + perm[jj + perm[kk] as usize] as usize] % 12) as usize;
    let gi1 = (perm[ii + i1 + perm[jj + j1 + perm[kk + k1] as usize] as usize] % 12) as usize;
    let gi2 = (perm[ii + i2 + perm[jj + j2 + perm[kk + k2] as usize] as usize] % 12) as usize;
    let gi3 = (perm[ii + 1 + perm[jj + 1 + perm[kk + 1] as usize] as usize] % 12) as usize;

    let mut value = 0.0;
    let mut gdx = 0.0;
    let mut gdy = 0.0;
    let mut gdz = 0.0;

    // Kernel radius² = 0.6
    let mut corner = |g: &[f64; 3], ox: f64, oy: f64, oz: f64| {
        let tc = 0.6 - ox * ox - oy * oy - oz * oz;
        if tc >= 0.0 {
            let dot = g[0] * ox + g[1] * oy + g[2] * oz;
            let tc2 = tc * tc;
            let tc4 = tc2 * tc2;
            value += tc4 * dot;
            let k = -8.0 * tc2 * tc * dot;
            gdx += tc4 * g[0] + k * ox;
            gdy += tc4 * g[1] + k * oy;
            gdz += tc4 * g[2] + k * oz;
        }
    };

    corner(&GRAD3[gi0], x0, y0, z0);
    corner(&GRAD3[gi1], x1, y1, z1);
    corner(&GRAD3[gi2], x2, y2, z2);
    corner(&GRAD3[gi3], x3, y3, z3);

    NoiseWithGradient3D {
        value: 32.0 * value,
        dx: 32.0 * gdx,
        dy: 32.0 * gdy,
        dz: 32.0 * gdz,
    }
}

/// 3D simplex noise, value only.
#[inline]
pub fn simplex_3d(perm: &PermTable, x: f64, y: f64, z: f64) -> f64 {
    simplex_3d_with_gradient(perm, x, y, z).value
}

/// Unfiltered fractal sum, every octave at full amplitude.
pub fn fbm_3d(
    perm: &PermTable,
    x: f64,
    y: f64,
    z: f64,
    freq: f64,
    octaves: u32,
    lacunarity: f64,
    gain: f64,
) -> f64 {
    let mut sum = 0.0;
    let mut amp = 1.0;
    let mut f = freq;
    for _ in 0..octaves {
        sum += simplex_3d(perm, x * f, y * f, z * f) * amp;
        f *= lacunarity;
        amp *= gain;
    }
    sum
}

// ── Band-limited octave sum ─────────────────────────────────────────

/// Shape of a multi-octave noise sum.
#[derive(Debug, Clone, Copy)]
pub struct OctaveParams {
    pub octaves: u32,
    /// Amplitude of the first (lowest-frequency) octave.
    pub amplitude: f64,
    /// Amplitude factor between successive octaves.
    pub persistence: f64,
}

/// Result of [`octave_sum`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OctaveSum {
    pub value: f64,
    /// Partial derivatives with respect to the noise-space coordinates.
    pub partials: Vec3,
    /// `Σ |size_axis * ∂value/∂axis|` over every contributing octave.
    pub error: f64,
    /// Octaves that contributed at full amplitude.
    pub full_octaves: u32,
    /// Octaves that contributed at all (full or faded).
    pub contributing: u32,
}

/// Frequency above which a footprint with these half-widths cannot resolve
/// detail. Zero-size footprints resolve everything.
#[inline]
pub fn cutoff_frequency(size: Vec3) -> f64 {
    let max_size = size.x.max(size.y).max(size.z);
    if max_size > 0.0 {
        0.5 / max_size
    } else {
        f64::INFINITY
    }
}

/// Sum `params.octaves` octaves of noise at `pos`, dropping the octaves a
/// footprint of half-widths `size` cannot resolve.
///
/// Octave `i` has frequency `2^i`. Octaves at or above the cutoff are not
/// evaluated; octaves in the top half of the remaining band are weighted by
/// `2 * (1 - scale / cutoff)`.
pub fn octave_sum(perm: &PermTable, pos: Vec3, size: Vec3, params: OctaveParams) -> OctaveSum {
    let cutoff = cutoff_frequency(size);
    let mut out = OctaveSum {
        partials: ZERO_VEC3,
        ..Default::default()
    };

    let mut amp = params.amplitude;
    let mut scale = 1.0;
    for _ in 0..params.octaves {
        if scale >= cutoff {
            break;
        }
        let weight = if scale > 0.5 * cutoff {
            2.0 * (1.0 - scale / cutoff)
        } else {
            out.full_octaves += 1;
            1.0
        };
        out.contributing += 1;

        let n = simplex_3d_with_gradient(perm, pos.x * scale, pos.y * scale, pos.z * scale);
        let a = amp * weight;
        out.value += a * n.value;

        // d/dx noise(x * scale) = scale * noise'(x * scale)
        let d = n.gradient() * (a * scale);
        out.partials += d;
        out.error += (d.x * size.x).abs() + (d.y * size.y).abs() + (d.z * size.z).abs();

        amp *= params.persistence;
        scale *= 2.0;
    }
    out
}

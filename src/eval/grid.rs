// eval/grid.rs - Rendering a procedure over a grid, and batch sampling
//
// `render_grid` renders one output over a width × height grid in the XY
// plane. Each row is one pool index, evaluated by whichever worker picks it
// up on that worker's own procedure duplicate. Every pixel is sampled at its
// center with a footprint of half a pixel in X and Y.
//
// `sample_points` is the one-shot path: arbitrary points, evaluated with
// rayon, one procedure built per rayon split.

use crate::error::{PoolError, ProcError, TaskError};
use crate::eval::graph::{Procedure, ProcedureDescription};
use crate::eval::node::Sample;
use crate::eval::point::{PointInfo, RgbColor};
use crate::eval::registry::NodeRegistry;
use crate::pool::WorkerPool;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub width: u32,
    pub height: u32,
    /// World rectangle covered by the grid.
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    /// Fixed Z of the sampling plane.
    pub z: f64,
    pub time: f64,
    pub view_angle: Option<f64>,
    /// Output position to render.
    pub output: usize,
    /// Extra filter radius on top of the pixel footprint.
    pub blur: f64,
}

impl Default for GridSettings {
    fn default() -> Self {
        GridSettings {
            width: 64,
            height: 64,
            x_min: 0.0,
            x_max: 1.0,
            y_min: 0.0,
            y_max: 1.0,
            z: 0.0,
            time: 0.0,
            view_angle: None,
            output: 0,
            blur: 0.0,
        }
    }
}

impl GridSettings {
    fn step(&self) -> (f64, f64) {
        (
            (self.x_max - self.x_min) / f64::from(self.width.max(1)),
            (self.y_max - self.y_min) / f64::from(self.height.max(1)),
        )
    }

    /// Sample context of pixel `(col, row)`.
    pub fn pixel(&self, col: u32, row: u32) -> PointInfo {
        let (dx, dy) = self.step();
        let x = self.x_min + (f64::from(col) + 0.5) * dx;
        let y = self.y_min + (f64::from(row) + 0.5) * dy;
        let p = PointInfo::at(x, y, self.z)
            .with_footprint(0.5 * dx.abs(), 0.5 * dy.abs(), 0.0)
            .with_time(self.time);
        match self.view_angle {
            Some(angle) => p.with_view_angle(angle),
            None => p,
        }
    }
}

/// Result of rendering a numeric output over a grid.
#[derive(Debug, Clone, Serialize)]
pub struct GridResult {
    /// Row-major, `width * height` values.
    pub values: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub min_value: f32,
    pub max_value: f32,
}

impl GridResult {
    pub fn get(&self, col: u32, row: u32) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.values.get((row * self.width + col) as usize).copied()
    }
}

/// Result of rendering a color output over a grid.
#[derive(Debug, Clone, Serialize)]
pub struct ColorGridResult {
    /// Row-major RGB triples.
    pub pixels: Vec<[f32; 3]>,
    pub width: u32,
    pub height: u32,
}

/// One duplicate of `proc` per worker, lane numbers starting at 1.
pub fn duplicate_lanes(proc: &Procedure, threads: usize) -> Vec<Procedure> {
    (0..threads).map(|lane| proc.duplicate(lane + 1)).collect()
}

/// Render rows on the pool, writing each row's pixels through `shade`.
fn render_rows<T, F>(
    pool: &mut WorkerPool<Procedure>,
    settings: &GridSettings,
    shade: F,
) -> Result<Vec<T>, PoolError>
where
    T: Copy + Default + Send + 'static,
    F: Fn(&Procedure, &GridSettings) -> T + Send + Sync + 'static,
{
    let width = settings.width as usize;
    let height = settings.height as usize;
    let pixels = Arc::new(Mutex::new(vec![T::default(); width * height]));

    let sink = Arc::clone(&pixels);
    let settings_for_task = settings.clone();
    pool.run(height, move |lane: &mut Procedure, row| {
        let settings = &settings_for_task;
        let mut line = Vec::with_capacity(width);
        for col in 0..width {
            lane.init_for_point(&settings.pixel(col as u32, row as u32));
            line.push(shade(lane, settings));
        }
        let mut out = sink.lock().map_err(|_| TaskError::from("pixel buffer poisoned"))?;
        out[row * width..(row + 1) * width].copy_from_slice(&line);
        Ok(())
    })?;

    let mut guard = pixels.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(std::mem::take(&mut *guard))
}

/// Render numeric output `settings.output` on the pool's lanes.
pub fn render_grid(
    pool: &mut WorkerPool<Procedure>,
    settings: &GridSettings,
) -> Result<GridResult, PoolError> {
    let values = render_rows(pool, settings, |lane, s| {
        lane.output_sample(s.output, s.blur).value as f32
    })?;

    let (min_value, max_value) = if values.is_empty() {
        (0.0, 0.0)
    } else {
        values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    };

    Ok(GridResult {
        values,
        width: settings.width,
        height: settings.height,
        min_value,
        max_value,
    })
}

/// Render color output `settings.output` on the pool's lanes.
pub fn render_color_grid(
    pool: &mut WorkerPool<Procedure>,
    settings: &GridSettings,
) -> Result<ColorGridResult, PoolError> {
    let pixels = render_rows(pool, settings, |lane, s| {
        let RgbColor { r, g, b } = lane.output_color_blurred(s.output, s.blur);
        [r, g, b]
    })?;
    Ok(ColorGridResult {
        pixels,
        width: settings.width,
        height: settings.height,
    })
}

/// Evaluate output `output` at arbitrary points in parallel.
pub fn sample_points(
    desc: &ProcedureDescription,
    registry: &NodeRegistry,
    points: &[PointInfo],
    output: usize,
) -> Result<Vec<Sample>, ProcError> {
    // Build once up front so a bad description fails here, not per split.
    Procedure::from_description(desc, registry)?;

    Ok(points
        .par_iter()
        .map_init(
            || Procedure::from_description(desc, registry).ok(),
            |proc, point| match proc {
                Some(proc) => {
                    proc.init_for_point(point);
                    proc.output_sample(output, 0.0)
                }
                None => Sample::ZERO,
            },
        )
        .collect())
}

use crate::sensor::ThermalGrid;

/// Keys cubic convolution parameter (Catmull-Rom).
const A: f32 = -0.5;

#[derive(Debug, Clone, Copy)]
struct Taps {
    index: [usize; 4],
    weight: [f32; 4],
}

/// Separable bicubic upsampler with precomputed kernel weights.
///
/// Output samples are spread evenly from the first to the last source cell,
/// so the corners of the output land exactly on the corner readings.
pub struct Upsampler {
    src_rows: usize,
    src_cols: usize,
    row_taps: Vec<Taps>,
    col_taps: Vec<Taps>,
    /// Horizontal pass result, `src_rows x out_cols`.
    scratch: Vec<f32>,
    out: Vec<f32>,
}

impl Upsampler {
    pub fn new(src_rows: usize, src_cols: usize, factor: usize) -> Self {
        let out_rows = src_rows * factor.max(1);
        let out_cols = src_cols * factor.max(1);
        Self {
            src_rows,
            src_cols,
            row_taps: build_taps(src_rows, out_rows),
            col_taps: build_taps(src_cols, out_cols),
            scratch: vec![0.0; src_rows * out_cols],
            out: vec![0.0; out_rows * out_cols],
        }
    }

    pub fn out_rows(&self) -> usize {
        self.row_taps.len()
    }

    pub fn out_cols(&self) -> usize {
        self.col_taps.len()
    }

    /// Upsample `grid` and return the row-major result.
    ///
    /// Grids of a different shape than the one this upsampler was built for
    /// are rejected with `None`.
    pub fn upsample(&mut self, grid: &ThermalGrid) -> Option<&[f32]> {
        if grid.rows() != self.src_rows || grid.cols() != self.src_cols {
            return None;
        }
        let out_cols = self.out_cols();

        for r in 0..self.src_rows {
            for (c, taps) in self.col_taps.iter().enumerate() {
                self.scratch[r * out_cols + c] = taps
                    .index
                    .iter()
                    .zip(taps.weight)
                    .map(|(&i, w)| grid.get(r, i) * w)
                    .sum();
            }
        }

        for (r, taps) in self.row_taps.iter().enumerate() {
            for c in 0..out_cols {
                self.out[r * out_cols + c] = taps
                    .index
                    .iter()
                    .zip(taps.weight)
                    .map(|(&i, w)| self.scratch[i * out_cols + c] * w)
                    .sum();
            }
        }
        Some(self.out.as_slice())
    }
}

fn build_taps(src: usize, out: usize) -> Vec<Taps> {
    let last = src.saturating_sub(1);
    (0..out)
        .map(|j| {
            let x = if out > 1 {
                j as f32 * last as f32 / (out - 1) as f32
            } else {
                0.0
            };
            let base = x.floor();
            let f = x - base;
            let base = base as isize;
            let clamp = |i: isize| i.clamp(0, last as isize) as usize;
            Taps {
                index: [clamp(base - 1), clamp(base), clamp(base + 1), clamp(base + 2)],
                weight: [kernel(1.0 + f), kernel(f), kernel(1.0 - f), kernel(2.0 - f)],
            }
        })
        .collect()
}

fn kernel(t: f32) -> f32 {
    let t = t.abs();
    if t <= 1.0 {
        (A + 2.0) * t.powi(3) - (A + 3.0) * t.powi(2) + 1.0
    } else if t < 2.0 {
        A * t.powi(3) - 5.0 * A * t.powi(2) + 8.0 * A * t - 4.0 * A
    } else {
        0.0
    }
}

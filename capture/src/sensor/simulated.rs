use super::{SensorError, ThermalGrid, ThermalSensor};

const AMBIENT: f32 = 22.0;
const PEAK: f32 = 34.0;
/// Blob radius in sensor cells.
const SPREAD: f32 = 1.6;
/// Radians the heat source advances per read.
const STEP: f32 = 0.08;

/// Synthetic sensor: a warm blob orbiting the centre of the field of view
/// over an ambient background. Deterministic for a given read count.
pub struct SimulatedSensor {
    rows: usize,
    cols: usize,
    reads: u64,
}

impl SimulatedSensor {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows: rows.max(1),
            cols: cols.max(1),
            reads: 0,
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new(8, 8)
    }
}

impl ThermalSensor for SimulatedSensor {
    fn read_grid(&mut self) -> Result<ThermalGrid, SensorError> {
        let phase = self.reads as f32 * STEP;
        self.reads += 1;

        let cy = (self.rows as f32 - 1.0) / 2.0;
        let cx = (self.cols as f32 - 1.0) / 2.0;
        let orbit = cx.min(cy) * 0.6;
        let (by, bx) = (cy + orbit * phase.sin(), cx + orbit * phase.cos());

        let mut values = Vec::with_capacity(self.rows * self.cols);
        for r in 0..self.rows {
            for c in 0..self.cols {
                let d2 = (r as f32 - by).powi(2) + (c as f32 - bx).powi(2);
                let heat = (PEAK - AMBIENT) * (-d2 / (2.0 * SPREAD * SPREAD)).exp();
                let ripple = 0.3 * ((r * 7 + c * 3) as f32 + phase).sin();
                values.push(AMBIENT + heat + ripple);
            }
        }
        Ok(ThermalGrid {
            rows: self.rows,
            cols: self.cols,
            values,
        })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

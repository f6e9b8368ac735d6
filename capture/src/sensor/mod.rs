pub mod amg8833;
pub mod simulated;

/// One temperature reading per sensor element, row-major, in °C.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalGrid {
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

impl ThermalGrid {
    /// Returns `None` if `values` does not hold exactly `rows * cols` readings.
    pub fn new(rows: usize, cols: usize, values: Vec<f32>) -> Option<Self> {
        if rows == 0 || cols == 0 || values.len() != rows * cols {
            return None;
        }
        Some(Self { rows, cols, values })
    }

    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            values: vec![value; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.cols + col]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("failed to open sensor at {0}: {1}")]
    Open(String, std::io::Error),
    #[error("sensor I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sensor busy")]
    Busy,
    #[error("sensor not supported on this platform")]
    Unsupported,
}

/// A low-resolution thermal sensor driven by the capture thread.
///
/// A failed read means "no frame this cycle"; the pipeline skips it and
/// tries again on the next tick.
pub trait ThermalSensor: Send {
    fn read_grid(&mut self) -> Result<ThermalGrid, SensorError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

impl ThermalSensor for Box<dyn ThermalSensor> {
    fn read_grid(&mut self) -> Result<ThermalGrid, SensorError> {
        (**self).read_grid()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_dimensions() {
        assert!(ThermalGrid::new(8, 8, vec![0.0; 63]).is_none());
        assert!(ThermalGrid::new(0, 8, vec![]).is_none());
        let grid = ThermalGrid::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(grid.get(1, 0), 4.0);
        assert_eq!(grid.get(0, 2), 3.0);
    }
}

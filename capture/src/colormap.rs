use image::Rgb;

const LUT_SIZE: usize = 256;

/// Anchor colours of the diverging red-blue gradient, cold (blue) through
/// white to hot (red).
const RED_BLUE: [[u8; 3]; 11] = [
    [5, 48, 97],
    [33, 102, 172],
    [67, 147, 195],
    [146, 197, 222],
    [209, 229, 240],
    [247, 247, 247],
    [253, 219, 199],
    [244, 165, 130],
    [214, 96, 77],
    [178, 24, 43],
    [103, 0, 31],
];

/// Maps temperatures to colours through a fixed gradient between two clamp
/// bounds. Readings outside the bounds saturate to the end colours.
#[derive(Debug, Clone)]
pub struct Colormap {
    min: f32,
    max: f32,
    lut: Vec<Rgb<u8>>,
}

impl Colormap {
    pub fn red_blue(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            lut: build_lut(&RED_BLUE),
        }
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn map(&self, temp: f32) -> Rgb<u8> {
        let span = self.max - self.min;
        let norm = if span > 0.0 { (temp - self.min) / span } else { 0.0 };
        // NaN falls through to the cold end.
        let idx = (norm * LUT_SIZE as f32).clamp(0.0, (LUT_SIZE - 1) as f32) as usize;
        self.lut[idx]
    }

    /// Colour at a position along the gradient, 0.0 cold to 1.0 hot.
    pub fn at_fraction(&self, fraction: f32) -> Rgb<u8> {
        self.map(self.min + fraction * (self.max - self.min))
    }

    pub fn coldest(&self) -> Rgb<u8> {
        self.lut[0]
    }

    pub fn hottest(&self) -> Rgb<u8> {
        self.lut[LUT_SIZE - 1]
    }
}

fn build_lut(anchors: &[[u8; 3]]) -> Vec<Rgb<u8>> {
    let segments = (anchors.len() - 1) as f32;
    (0..LUT_SIZE)
        .map(|i| {
            let pos = i as f32 / (LUT_SIZE - 1) as f32 * segments;
            let lo = (pos.floor() as usize).min(anchors.len() - 2);
            let t = pos - lo as f32;
            let (a, b) = (anchors[lo], anchors[lo + 1]);
            Rgb(std::array::from_fn(|ch| {
                (f32::from(a[ch]) + (f32::from(b[ch]) - f32::from(a[ch])) * t).round() as u8
            }))
        })
        .collect()
}

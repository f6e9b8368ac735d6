pub mod camera;
pub mod colormap;
pub mod interpolate;
pub mod pipeline;
pub mod render;
pub mod sensor;

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{SensorError, ThermalGrid, ThermalSensor};

pub const ROWS: usize = 8;
pub const COLS: usize = 8;

const REG_POWER_CONTROL: u8 = 0x00;
const REG_RESET: u8 = 0x01;
const REG_FRAME_RATE: u8 = 0x02;
const REG_PIXEL_BASE: u8 = 0x80;

const POWER_NORMAL: u8 = 0x00;
const RESET_INITIAL: u8 = 0x3F;
const FRAME_RATE_10FPS: u8 = 0x00;

/// Two bytes per pixel, low byte first.
const PIXEL_BLOCK_LEN: usize = ROWS * COLS * 2;
/// °C per LSB of a pixel reading.
const PIXEL_RESOLUTION: f32 = 0.25;

#[cfg(target_os = "linux")]
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// Panasonic AMG8833 Grid-EYE on a Linux i2c-dev bus.
pub struct Amg8833 {
    dev: File,
    address: u16,
    block: [u8; PIXEL_BLOCK_LEN],
}

impl Amg8833 {
    /// Open the bus, bind the device address and put the sensor in normal
    /// mode at 10 frames/second.
    pub fn open(bus: &Path, address: u16) -> Result<Self, SensorError> {
        let dev = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(bus)
            .map_err(|e| SensorError::Open(bus.display().to_string(), e))?;
        bind_address(&dev, address)?;

        let mut sensor = Self {
            dev,
            address,
            block: [0; PIXEL_BLOCK_LEN],
        };
        sensor.write_register(REG_POWER_CONTROL, POWER_NORMAL)?;
        std::thread::sleep(Duration::from_millis(50));
        sensor.write_register(REG_RESET, RESET_INITIAL)?;
        std::thread::sleep(Duration::from_millis(2));
        sensor.write_register(REG_FRAME_RATE, FRAME_RATE_10FPS)?;
        // First valid frame arrives after two sensor periods.
        std::thread::sleep(Duration::from_millis(200));

        info!(bus = %bus.display(), address = format!("{address:#04x}"), "AMG8833 initialised");
        Ok(sensor)
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), SensorError> {
        self.dev.write_all(&[reg, value])?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn bind_address(dev: &File, address: u16) -> Result<(), SensorError> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: I2C_SLAVE takes the 7-bit device address by value and only
    // updates the kernel's state for this file descriptor.
    let rc = unsafe { libc::ioctl(dev.as_raw_fd(), I2C_SLAVE as _, libc::c_ulong::from(address)) };
    if rc < 0 {
        return Err(SensorError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn bind_address(_dev: &File, _address: u16) -> Result<(), SensorError> {
    Err(SensorError::Unsupported)
}

impl ThermalSensor for Amg8833 {
    fn read_grid(&mut self) -> Result<ThermalGrid, SensorError> {
        self.dev.write_all(&[REG_PIXEL_BASE])?;
        let n = self.dev.read(&mut self.block)?;
        if n != PIXEL_BLOCK_LEN {
            debug!(address = self.address, got = n, "short pixel read");
            return Err(SensorError::Busy);
        }
        Ok(decode_pixels(&self.block))
    }

    fn name(&self) -> &str {
        "amg8833"
    }
}

/// Decode the pixel register block into temperatures.
///
/// Each pixel is a 12-bit two's complement value split across a low byte
/// and the low nibble of a high byte.
pub fn decode_pixels(block: &[u8; PIXEL_BLOCK_LEN]) -> ThermalGrid {
    let values = block
        .chunks_exact(2)
        .map(|pair| {
            let raw = (u16::from(pair[1] & 0x0F) << 8) | u16::from(pair[0]);
            let signed = if raw & 0x800 != 0 {
                raw as i16 - 0x1000
            } else {
                raw as i16
            };
            f32::from(signed) * PIXEL_RESOLUTION
        })
        .collect();
    ThermalGrid {
        rows: ROWS,
        cols: COLS,
        values,
    }
}

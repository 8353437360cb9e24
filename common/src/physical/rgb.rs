use core::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Colour written to the addressable light. Components are bytes, so every
/// constructed value is already inside the 0-255 range the firmware accepts.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RgbError {
    /// A component was negative or above 255.
    #[error("Colour component {0} outside of 0-255!")]
    ComponentOutOfRange(i32),
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build a colour from 0.0-1.0 channel values as produced by a colour
    /// picker. Channels are clamped first and then truncated, so 1.0 maps to
    /// 255 and anything at or below 0.0 (or NaN) maps to 0.
    pub fn from_unit_floats(r: f32, g: f32, b: f32) -> Self {
        Self {
            r: unit_to_byte(r),
            g: unit_to_byte(g),
            b: unit_to_byte(b),
        }
    }
}

fn unit_to_byte(channel: f32) -> u8 {
    if channel.is_nan() {
        return 0;
    }
    (channel.clamp(0f32, 1f32) * 255f32) as u8
}

fn component(value: i32) -> Result<u8, RgbError> {
    u8::try_from(value).map_err(|_| RgbError::ComponentOutOfRange(value))
}

impl TryFrom<(i32, i32, i32)> for Rgb {
    type Error = RgbError;

    fn try_from(value: (i32, i32, i32)) -> Result<Self, Self::Error> {
        Ok(Self {
            r: component(value.0)?,
            g: component(value.1)?,
            b: component(value.2)?,
        })
    }
}

impl Display for Rgb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "<Rgb: {},{},{}>", self.r, self.g, self.b)
    }
}

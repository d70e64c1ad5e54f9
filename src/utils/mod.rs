//! Shared helpers: image decoding and vector math

pub mod image;
pub mod math;

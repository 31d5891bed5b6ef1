//! Shared fixtures for unit tests.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};

use crate::types::{Frame, FrameImage};

pub(crate) fn encode_png(image: GrayImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

/// Horizontal ramp; `flipped` runs it right to left.
pub(crate) fn gradient_png(width: u32, height: u32, flipped: bool) -> Vec<u8> {
    encode_png(GrayImage::from_fn(width, height, |x, _| {
        let column = if flipped { width - 1 - x } else { x };
        Luma([(column * 255 / width.max(1)) as u8])
    }))
}

/// Left half bright, right half dark (or the reverse).
pub(crate) fn split_png(width: u32, height: u32, inverted: bool) -> Vec<u8> {
    encode_png(GrayImage::from_fn(width, height, |x, _| {
        let bright = (x < width / 2) != inverted;
        Luma([if bright { 240 } else { 16 }])
    }))
}

pub(crate) fn frame(seq: u64, timestamp: f64, bytes: Vec<u8>) -> Frame {
    Frame {
        seq,
        timestamp,
        image: FrameImage::from(bytes),
    }
}

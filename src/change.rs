use image::{imageops::FilterType, DynamicImage};

use crate::{config::ChangeConfig, error::Result, types::Frame};

const HASH_SIDE: u32 = 8;

/// 64-bit average hash of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageHash(pub u64);

impl ImageHash {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_image(&image::load_from_memory(bytes)?))
    }

    pub fn from_image(image: &DynamicImage) -> Self {
        let small = image
            .grayscale()
            .resize_exact(HASH_SIDE, HASH_SIDE, FilterType::Triangle)
            .to_luma8();
        let pixels = small.as_raw();
        let mean = pixels.iter().map(|&p| u32::from(p)).sum::<u32>() as f64 / pixels.len() as f64;

        let bits = pixels
            .iter()
            .enumerate()
            .filter(|(_, p)| f64::from(**p) > mean)
            .fold(0u64, |acc, (i, _)| acc | (1 << i));
        Self(bits)
    }

    /// Hamming distance, 0..=64.
    pub fn distance(self, other: ImageHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeDetector {
    threshold: u32,
}

impl ChangeDetector {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn from_config(config: &ChangeConfig) -> Self {
        Self::new(config.threshold)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn distance(&self, a: &Frame, b: &Frame) -> Result<u32> {
        let left = ImageHash::from_bytes(a.image.bytes())?;
        let right = ImageHash::from_bytes(b.image.bytes())?;
        Ok(left.distance(right))
    }

    pub fn changed(&self, a: &Frame, b: &Frame) -> Result<bool> {
        Ok(self.distance(a, b)? > self.threshold)
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::from_config(&ChangeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        testing::{frame, gradient_png, split_png},
        types::FrameImage,
    };

    #[test]
    fn identical_images_have_zero_distance() {
        let a = frame(0, 0.0, gradient_png(64, 48, false));
        let b = frame(1, 0.15, gradient_png(64, 48, false));
        let detector = ChangeDetector::default();
        assert_eq!(detector.distance(&a, &b).expect("distance"), 0);
        assert!(!detector.changed(&a, &b).expect("changed"));
    }

    #[test]
    fn inverted_layout_counts_as_change() {
        let a = frame(0, 0.0, split_png(64, 64, false));
        let b = frame(1, 0.15, split_png(64, 64, true));
        let detector = ChangeDetector::default();
        let distance = detector.distance(&a, &b).expect("distance");
        assert!(distance > 10, "distance {distance}");
        assert!(detector.changed(&a, &b).expect("changed"));
    }

    #[test]
    fn threshold_is_exclusive() {
        let a = frame(0, 0.0, split_png(64, 64, false));
        let b = frame(1, 0.15, split_png(64, 64, true));
        let distance = ChangeDetector::default().distance(&a, &b).expect("distance");
        assert!(!ChangeDetector::new(distance).changed(&a, &b).expect("changed"));
        assert!(ChangeDetector::new(distance - 1).changed(&a, &b).expect("changed"));
    }

    #[test]
    fn undecodable_frame_is_an_error() {
        let good = frame(0, 0.0, gradient_png(16, 16, false));
        let bad = Frame {
            seq: 1,
            timestamp: 0.1,
            image: FrameImage::from(b"not an image".to_vec()),
        };
        let err = ChangeDetector::default()
            .distance(&good, &bad)
            .expect_err("decode failure");
        assert!(matches!(err, Error::Image(_)));
    }

    #[test]
    fn hash_distance_is_symmetric() {
        let a = ImageHash(0b1011);
        let b = ImageHash(0b0110);
        assert_eq!(a.distance(b), 3);
        assert_eq!(b.distance(a), 3);
    }
}

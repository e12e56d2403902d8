//! Average-hash fingerprints over an 8x8 grayscale reduction.
//!
//! The image is resampled to 8x8 with a triangle (bilinear) filter, each pixel is
//! reduced to Rec. 601 luminance, and bit `i` of the 64-bit value is set when pixel
//! `i` (row-major, top-left first) is strictly brighter than the mean. Bit 0 is the
//! least significant bit. Changing the filter or the luminance weights changes every
//! stored fingerprint, so both are fixed here.

use std::fmt;
use std::str::FromStr;

use image::{imageops::FilterType, DynamicImage, Rgb};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

pub const GRID: u32 = 8;
pub const RESAMPLE: FilterType = FilterType::Triangle;

/// 64-bit perceptual hash, rendered as 16 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn to_hex(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidInput(format!("not a 16-digit hex fingerprint: {s:?}")));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| Error::InvalidInput(e.to_string()))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A fingerprint together with the decoded pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measured {
    pub fingerprint: Fingerprint,
    pub width: u32,
    pub height: u32,
}

/// Decode `bytes` and fingerprint the pixels.
pub fn fingerprint(bytes: &[u8]) -> Result<Fingerprint> {
    measure(bytes).map(|m| m.fingerprint)
}

/// Like [`fingerprint`], also reporting the decoded dimensions.
pub fn measure(bytes: &[u8]) -> Result<Measured> {
    let img = image::load_from_memory(bytes)?;
    if img.width() == 0 || img.height() == 0 {
        return Err(Error::Decode("image has no pixels".into()));
    }
    Ok(Measured {
        fingerprint: fingerprint_image(&img),
        width: img.width(),
        height: img.height(),
    })
}

pub fn fingerprint_image(img: &DynamicImage) -> Fingerprint {
    let small = img.resize_exact(GRID, GRID, RESAMPLE).to_rgb8();
    let levels: Vec<u8> = small.pixels().map(luminance).collect();

    let total: u32 = levels.iter().map(|&v| v as u32).sum();
    let mean = total as f64 / levels.len() as f64;

    let bits = levels
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v as f64 > mean)
        .fold(0u64, |acc, (i, _)| acc | (1u64 << i));
    Fingerprint(bits)
}

fn luminance(p: &Rgb<u8>) -> u8 {
    let [r, g, b] = p.0;
    let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

/// Runs the CPU-bound decode off the async executor.
pub async fn measure_blocking(bytes: Vec<u8>) -> Result<Measured> {
    tokio::task::spawn_blocking(move || measure(&bytes))
        .await
        .map_err(|e| Error::Decode(format!("hashing task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn encode(img: RgbImage, fmt: ImageFormat) -> Vec<u8> {
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), fmt)
            .unwrap();
        out
    }

    fn split_left_dark(size: u32) -> RgbImage {
        ImageBuffer::from_fn(size, size, |x, _| {
            if x < size / 2 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        })
    }

    #[test]
    fn known_vector_for_vertical_split() {
        let bytes = encode(split_left_dark(8), ImageFormat::Png);
        let fp = fingerprint(&bytes).unwrap();
        assert_eq!(fp.to_hex(), "f0f0f0f0f0f0f0f0");
    }

    #[test]
    fn downsampled_horizontal_split_sets_top_rows() {
        let img: RgbImage = ImageBuffer::from_fn(32, 32, |_, y| {
            if y < 16 { Rgb([255, 255, 255]) } else { Rgb([0, 0, 0]) }
        });
        let fp = fingerprint(&encode(img, ImageFormat::Png)).unwrap();
        assert_eq!(fp, Fingerprint::from_bits(0x0000_0000_ffff_ffff));
    }

    #[test]
    fn uniform_image_hashes_to_zero() {
        let img: RgbImage = ImageBuffer::from_pixel(13, 7, Rgb([90, 120, 40]));
        let fp = fingerprint(&encode(img, ImageFormat::Png)).unwrap();
        assert_eq!(fp.to_hex(), "0000000000000000");
    }

    #[test]
    fn repeated_calls_agree() {
        let img: RgbImage = ImageBuffer::from_fn(40, 30, |x, y| {
            Rgb([(x * 6) as u8, (y * 8) as u8, ((x + y) * 3) as u8])
        });
        let bytes = encode(img, ImageFormat::Png);
        assert_eq!(fingerprint(&bytes).unwrap(), fingerprint(&bytes).unwrap());
    }

    #[test]
    fn container_does_not_matter_for_identical_pixels() {
        let img: RgbImage = ImageBuffer::from_fn(24, 24, |x, y| {
            if (x / 6 + y / 6) % 2 == 0 { Rgb([230, 10, 10]) } else { Rgb([10, 10, 200]) }
        });
        let png = encode(img.clone(), ImageFormat::Png);
        let bmp = encode(img, ImageFormat::Bmp);
        assert_ne!(png, bmp);
        assert_eq!(fingerprint(&png).unwrap(), fingerprint(&bmp).unwrap());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = fingerprint(b"definitely not an image").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn measure_reports_dimensions() {
        let m = measure(&encode(split_left_dark(16), ImageFormat::Png)).unwrap();
        assert_eq!((m.width, m.height), (16, 16));
    }

    #[test]
    fn hex_form_is_fixed_width() {
        let fp = Fingerprint::from_bits(0xab);
        assert_eq!(fp.to_string(), "00000000000000ab");
        assert_eq!("00000000000000ab".parse::<Fingerprint>().unwrap(), fp);
        assert!("abc".parse::<Fingerprint>().is_err());
        assert!("zzzzzzzzzzzzzzzz".parse::<Fingerprint>().is_err());
    }
}

//! Single-channel float images.
//!
//! [`FloatImage`] is the pixel container shared by the drift estimation and
//! the DQE measurement. Pixels are stored row-major as `f32`; all sums are
//! accumulated in `f64`.

use std::fs::File;
use std::path::Path;

use image::DynamicImage;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};

use crate::error::{EftemError, Result};

// ---------------------------------------------------------------------------
// Rect – integer region of interest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: i64, y: i64, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The same region enlarged by `delta` pixels on every side, `None` if a
    /// coordinate overflows.
    pub fn grown(&self, delta: usize) -> Option<Self> {
        let offset = i64::try_from(delta).ok()?;
        let growth = delta.checked_mul(2)?;
        Some(Self {
            x: self.x.checked_sub(offset)?,
            y: self.y.checked_sub(offset)?,
            width: self.width.checked_add(growth)?,
            height: self.height.checked_add(growth)?,
        })
    }

    /// Whether the region lies completely within a `width` x `height` image.
    pub fn fits_in(&self, width: usize, height: usize) -> bool {
        let end = |start: i64, len: usize| {
            usize::try_from(start).ok().and_then(|s| s.checked_add(len))
        };
        self.width > 0
            && self.height > 0
            && end(self.x, self.width).is_some_and(|right| right <= width)
            && end(self.y, self.height).is_some_and(|bottom| bottom <= height)
    }

    /// Region of `width` x `height` centred in an image of the given size,
    /// leaving a margin of `margin` pixels on every side.
    pub fn centered(image_width: usize, image_height: usize, margin: usize) -> Self {
        let offset = i64::try_from(margin).unwrap_or(i64::MAX);
        Self {
            x: offset,
            y: offset,
            width: image_width.saturating_sub(margin.saturating_mul(2)),
            height: image_height.saturating_sub(margin.saturating_mul(2)),
        }
    }
}

// ---------------------------------------------------------------------------
// ImageStatistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageStatistics {
    pub pixel_count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1 in the denominator).
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl ImageStatistics {
    pub fn variance(&self) -> f64 {
        self.std_dev * self.std_dev
    }
}

// ---------------------------------------------------------------------------
// FloatImage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FloatImage {
    width: usize,
    height: usize,
    pixels: Vec<f32>,
}

impl FloatImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0.0; width * height],
        }
    }

    /// `None` if the pixel count does not match the dimensions.
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<f32>) -> Option<Self> {
        (pixels.len() == width * height).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Load an image as raw grey values.
    ///
    /// Sample values are kept as stored: a 16-bit count of 1000 becomes
    /// `1000.0`. Grey TIFF files (including 32-bit float) are read with the
    /// `tiff` decoder, everything else through `image`. Colour images are
    /// reduced to luma at their own bit depth.
    pub fn load(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let image = match ext.as_str() {
            "tif" | "tiff" => match Self::load_grey_tiff(path)? {
                Some(image) => image,
                None => Self::load_with_image(path)?,
            },
            _ => Self::load_with_image(path)?,
        };
        log::debug!(
            "Loaded {} ({}x{})",
            path.display(),
            image.width,
            image.height
        );
        Ok(image)
    }

    /// `Ok(None)` for TIFF files that are not single-channel grey.
    fn load_grey_tiff(path: &Path) -> Result<Option<Self>> {
        let tiff_error = |source| EftemError::Tiff {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(|source| EftemError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut decoder = Decoder::new(file).map_err(tiff_error)?;
        if !matches!(decoder.colortype().map_err(tiff_error)?, tiff::ColorType::Gray(_)) {
            return Ok(None);
        }
        let (width, height) = decoder.dimensions().map_err(tiff_error)?;
        let pixels: Vec<f32> = match decoder.read_image().map_err(tiff_error)? {
            DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
            DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
            DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
            DecodingResult::I8(buf) => buf.into_iter().map(f32::from).collect(),
            DecodingResult::I16(buf) => buf.into_iter().map(f32::from).collect(),
            DecodingResult::I32(buf) => buf.into_iter().map(|v| v as f32).collect(),
            DecodingResult::F32(buf) => buf,
            DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
            _ => {
                log::debug!("{}: 64-bit TIFF samples left to `image`", path.display());
                return Ok(None);
            }
        };
        Ok(Self::from_pixels(width as usize, height as usize, pixels))
    }

    fn load_with_image(path: &Path) -> Result<Self> {
        let decoded = image::open(path).map_err(|source| EftemError::ImageDecode {
            path: path.to_path_buf(),
            source,
        })?;
        let (width, height) = (decoded.width() as usize, decoded.height() as usize);
        let pixels: Vec<f32> = match decoded {
            DynamicImage::ImageLuma8(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
            DynamicImage::ImageLuma16(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
            float @ (DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_)) => {
                float.to_luma32f().into_raw()
            }
            other if other.color().bytes_per_pixel() / other.color().channel_count() > 1 => {
                other.to_luma16().into_raw().into_iter().map(f32::from).collect()
            }
            other => other.to_luma8().into_raw().into_iter().map(f32::from).collect(),
        };
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Write the pixels as a single-channel 32-bit float TIFF.
    pub fn save_tiff(&self, path: &Path) -> Result<()> {
        let tiff_error = |source| EftemError::Tiff {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(|source| EftemError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut encoder = TiffEncoder::new(file).map_err(tiff_error)?;
        encoder
            .write_image::<colortype::Gray32Float>(
                self.width as u32,
                self.height as u32,
                &self.pixels,
            )
            .map_err(tiff_error)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.pixels[y * self.width + x] = value;
    }

    pub fn row(&self, y: usize) -> &[f32] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    /// Copy of the region `rect`, `None` if it does not fit into the image.
    pub fn crop(&self, rect: &Rect) -> Option<Self> {
        if !rect.fits_in(self.width, self.height) {
            return None;
        }
        let (x0, y0) = (rect.x as usize, rect.y as usize);
        let mut pixels = Vec::with_capacity(rect.width * rect.height);
        for y in y0..y0 + rect.height {
            pixels.extend_from_slice(&self.row(y)[x0..x0 + rect.width]);
        }
        Some(Self {
            width: rect.width,
            height: rect.height,
            pixels,
        })
    }

    /// Shrink by summing `factor` x `factor` blocks. Incomplete blocks at the
    /// right and bottom edge are dropped.
    pub fn bin_sum(&self, factor: usize) -> Self {
        let factor = factor.max(1);
        if factor == 1 {
            return self.clone();
        }
        let width = self.width / factor;
        let height = self.height / factor;
        let mut binned = vec![0.0f64; width * height];
        for y in 0..height * factor {
            let row = self.row(y);
            let out_row = &mut binned[(y / factor) * width..(y / factor + 1) * width];
            for (x, &value) in row[..width * factor].iter().enumerate() {
                out_row[x / factor] += value as f64;
            }
        }
        Self {
            width,
            height,
            pixels: binned.into_iter().map(|v| v as f32).collect(),
        }
    }

    pub fn statistics(&self) -> ImageStatistics {
        let n = self.pixels.len();
        if n == 0 {
            return ImageStatistics {
                pixel_count: 0,
                mean: f64::NAN,
                std_dev: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
            };
        }
        let mut sum = 0.0f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &p in &self.pixels {
            let v = p as f64;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        let mean = sum / n as f64;
        // second pass keeps the variance accurate for large offsets
        let squared: f64 = self
            .pixels
            .iter()
            .map(|&p| {
                let d = p as f64 - mean;
                d * d
            })
            .sum();
        let std_dev = if n > 1 {
            (squared / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        ImageStatistics {
            pixel_count: n,
            mean,
            std_dev,
            min,
            max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_copies_region() {
        let image = FloatImage::from_fn(4, 3, |x, y| (y * 4 + x) as f32);
        let crop = image.crop(&Rect::new(1, 1, 2, 2)).unwrap();
        assert_eq!(crop.dimensions(), (2, 2));
        assert_eq!(crop.pixels(), &[5.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn crop_outside_image_is_rejected() {
        let image = FloatImage::new(4, 4);
        assert!(image.crop(&Rect::new(-1, 0, 2, 2)).is_none());
        assert!(image.crop(&Rect::new(3, 0, 2, 2)).is_none());
        assert!(image.crop(&Rect::new(0, 0, 4, 4)).is_some());
    }

    fn temp_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("eftem_image_{}_{name}", std::process::id()))
    }

    #[test]
    fn grown_rect_adds_delta_on_every_side() {
        let grown = Rect::new(5, 6, 10, 20).grown(3);
        assert_eq!(grown, Some(Rect::new(2, 3, 16, 26)));
    }

    #[test]
    fn huge_values_do_not_overflow_rect_arithmetic() {
        assert_eq!(Rect::new(0, 0, 10, 10).grown(usize::MAX), None);
        assert_eq!(Rect::new(i64::MIN, 0, 10, 10).grown(1), None);
        assert_eq!(Rect::new(0, 0, usize::MAX - 1, 10).grown(1), None);
        assert!(!Rect::new(i64::MAX, 0, usize::MAX, 1).fits_in(100, 100));
        assert!(!Rect::new(1, 1, usize::MAX, 1).fits_in(100, 100));
    }

    #[test]
    fn oversized_margin_leaves_an_empty_region() {
        let rect = Rect::centered(20, 10, usize::MAX);
        assert_eq!((rect.width, rect.height), (0, 0));
        assert!(!rect.fits_in(20, 10));
    }

    #[test]
    fn sixteen_bit_tiff_keeps_raw_counts() {
        let path = temp_file("counts16.tif");
        let counts: Vec<u16> = (0..64 * 64).map(|i| 1000 + (i % 64) as u16).collect();
        image::ImageBuffer::<image::Luma<u16>, _>::from_raw(64, 64, counts.clone())
            .unwrap()
            .save(&path)
            .unwrap();

        let loaded = FloatImage::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.dimensions(), (64, 64));
        let expected: Vec<f32> = counts.iter().map(|&c| c as f32).collect();
        assert_eq!(loaded.pixels(), expected.as_slice());
        assert_eq!(loaded.statistics().min, 1000.0);
        assert_eq!(loaded.statistics().max, 1063.0);
    }

    #[test]
    fn eight_bit_png_keeps_raw_values() {
        let path = temp_file("grey8.png");
        image::GrayImage::from_fn(3, 2, |x, y| image::Luma([(10 * x + 100 * y) as u8]))
            .save(&path)
            .unwrap();

        let loaded = FloatImage::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.pixels(), &[0.0, 10.0, 20.0, 100.0, 110.0, 120.0]);
    }

    #[test]
    fn float_tiff_is_written_and_read_back() {
        let path = temp_file("float32.tif");
        let image = FloatImage::from_fn(4, 4, |x, y| x as f32 * 0.25 - y as f32 * 1250.5);
        image.save_tiff(&path).unwrap();

        let loaded = FloatImage::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, image);
    }

    #[test]
    fn missing_tiff_is_an_io_error() {
        let err = FloatImage::load(Path::new("/definitely/not/here.tif")).unwrap_err();
        assert!(matches!(err, EftemError::Io { .. }));
    }

    #[test]
    fn bin_sum_adds_blocks_and_drops_remainder() {
        let image = FloatImage::from_fn(5, 4, |_, _| 1.0);
        let binned = image.bin_sum(2);
        assert_eq!(binned.dimensions(), (2, 2));
        assert!(binned.pixels().iter().all(|&v| v == 4.0));
    }

    #[test]
    fn bin_sum_by_one_is_identity() {
        let image = FloatImage::from_fn(3, 3, |x, y| (x * 7 + y) as f32);
        assert_eq!(image.bin_sum(1), image);
    }

    #[test]
    fn statistics_use_sample_variance() {
        let image = FloatImage::from_pixels(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let stats = image.statistics();
        assert_eq!(stats.mean, 2.5);
        assert!((stats.variance() - 5.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
    }

    #[test]
    fn from_pixels_checks_length() {
        assert!(FloatImage::from_pixels(2, 2, vec![0.0; 3]).is_none());
    }
}

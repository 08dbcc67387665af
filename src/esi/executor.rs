use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::thread_count;
use crate::drift::CancelToken;
use crate::error::{EftemError, Result};
use crate::fit::{FitOptions, PowerLawMode};
use crate::image::FloatImage;

use super::background::{fit_pixel, EsiImage, PixelError};

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

/// Energy-filtered images around one ionisation edge, in any order.
/// Images below `edge_energy` are pre-edge, the others post-edge.
#[derive(Debug, Clone)]
pub struct MapInput<'a> {
    pub images: &'a [EsiImage],
    pub edge_energy: f64,
    pub mode: PowerLawMode,
    pub options: FitOptions,
}

/// Background and net signal at one post-edge energy loss.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementalMap {
    pub energy_loss: f64,
    pub background: FloatImage,
    /// Post-edge counts minus the background.
    pub signal: FloatImage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementalMaps {
    pub edge_energy: f64,
    /// Power-law parameters per pixel, NaN where the fit failed.
    pub a: FloatImage,
    pub r: FloatImage,
    /// Row-major, `None` for good pixels.
    pub errors: Vec<Option<PixelError>>,
    /// Sorted by energy loss.
    pub maps: Vec<ElementalMap>,
    pub skipped_rows: usize,
}

impl ElementalMaps {
    pub fn error_at(&self, x: usize, y: usize) -> Option<PixelError> {
        self.errors[y * self.a.width() + x]
    }

    pub fn error_count(&self) -> usize {
        self.errors.iter().filter(|e| e.is_some()).count()
    }

    /// [`PixelError::code`] per pixel, 0 for good pixels.
    pub fn error_image(&self) -> FloatImage {
        let (width, height) = self.a.dimensions();
        let codes = self
            .errors
            .iter()
            .map(|e| e.map_or(0.0, |e| f32::from(e.code())))
            .collect();
        FloatImage::from_pixels(width, height, codes).unwrap_or_else(|| FloatImage::new(0, 0))
    }
}

/// Pre- and post-edge images sorted by energy loss.
struct EdgeSplit<'a> {
    pre: Vec<&'a EsiImage>,
    post: Vec<&'a EsiImage>,
    width: usize,
    height: usize,
}

impl MapInput<'_> {
    fn split(&self) -> Result<EdgeSplit<'_>> {
        let edge = self.edge_energy;
        if let Some((index, image)) = self
            .images
            .iter()
            .enumerate()
            .find(|(_, image)| !(image.energy_loss.is_finite() && image.energy_loss > 0.0))
        {
            return Err(EftemError::InvalidEnergyLoss {
                index,
                energy_loss: image.energy_loss,
            });
        }
        let mut sorted: Vec<&EsiImage> = self.images.iter().collect();
        sorted.sort_by(|a, b| a.energy_loss.total_cmp(&b.energy_loss));
        let (pre, post): (Vec<_>, Vec<_>) =
            sorted.into_iter().partition(|i| i.energy_loss < edge);
        if pre.len() < 2 {
            return Err(EftemError::TooFewPreEdgeImages {
                edge,
                count: pre.len(),
            });
        }
        if post.is_empty() {
            return Err(EftemError::NoPostEdgeImage { edge });
        }

        let expected = pre[0].image.dimensions();
        if let Some((index, image)) = self
            .images
            .iter()
            .enumerate()
            .find(|(_, i)| i.image.dimensions() != expected)
        {
            return Err(EftemError::DimensionMismatch {
                index,
                expected,
                actual: image.image.dimensions(),
            });
        }
        let (width, height) = expected;
        if width == 0 || height == 0 {
            return Err(EftemError::Config("the images are empty".to_string()));
        }
        Ok(EdgeSplit {
            pre,
            post,
            width,
            height,
        })
    }
}

/// Output rows of one task; every slice is `width` long.
struct RowOut<'a> {
    a: &'a mut [f32],
    r: &'a mut [f32],
    errors: &'a mut [Option<PixelError>],
    backgrounds: Vec<&'a mut [f32]>,
    signals: Vec<&'a mut [f32]>,
}

// ---------------------------------------------------------------------------
// MapCalculator – one fit task per image row
// ---------------------------------------------------------------------------

pub struct MapCalculator {
    pool: rayon::ThreadPool,
}

impl MapCalculator {
    /// `threads == 0` uses one thread per core.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_count(threads))
            .thread_name(|i| format!("esi-map-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Fit the pre-edge counts of every pixel, extrapolate the background to
    /// each post-edge image and subtract it. Failed or cancelled pixels are
    /// NaN in every output image.
    pub fn run(&self, input: &MapInput<'_>, cancel: &CancelToken) -> Result<ElementalMaps> {
        let split = input.split()?;
        let (width, height) = (split.width, split.height);
        let energies: Vec<f64> = split.pre.iter().map(|i| i.energy_loss).collect();
        log::info!(
            "Elemental map at {} eV: pre-edge {energies:?}, {} post-edge images, {height} rows \
             on {} threads",
            input.edge_energy,
            split.post.len(),
            self.threads()
        );

        let len = width * height;
        let mut a = vec![f32::NAN; len];
        let mut r = vec![f32::NAN; len];
        let mut errors: Vec<Option<PixelError>> = vec![None; len];
        let blank = || vec![f32::NAN; len];
        let mut backgrounds: Vec<Vec<f32>> = split.post.iter().map(|_| blank()).collect();
        let mut signals: Vec<Vec<f32>> = split.post.iter().map(|_| blank()).collect();

        let mut rows: Vec<RowOut<'_>> = a
            .chunks_mut(width)
            .zip(r.chunks_mut(width))
            .zip(errors.chunks_mut(width))
            .map(|((a, r), errors)| RowOut {
                a,
                r,
                errors,
                backgrounds: Vec::with_capacity(split.post.len()),
                signals: Vec::with_capacity(split.post.len()),
            })
            .collect();
        for (background, signal) in backgrounds.iter_mut().zip(signals.iter_mut()) {
            let chunks = background.chunks_mut(width).zip(signal.chunks_mut(width));
            for (row, (background, signal)) in rows.iter_mut().zip(chunks) {
                row.backgrounds.push(background);
                row.signals.push(signal);
            }
        }

        let skipped = AtomicUsize::new(0);
        self.pool.scope(|scope| {
            for (y, mut out) in rows.into_iter().enumerate() {
                let (split, energies, skipped) = (&split, &energies, &skipped);
                scope.spawn(move |_| {
                    if cancel.is_cancelled() {
                        out.errors.fill(Some(PixelError::Cancelled));
                        skipped.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    map_row(split, energies, input, y, out);
                });
            }
        });

        let maps = split
            .post
            .iter()
            .zip(backgrounds.into_iter().zip(signals))
            .map(|(image, (background, signal))| ElementalMap {
                energy_loss: image.energy_loss,
                background: to_image(width, height, background),
                signal: to_image(width, height, signal),
            })
            .collect();
        let result = ElementalMaps {
            edge_energy: input.edge_energy,
            a: to_image(width, height, a),
            r: to_image(width, height, r),
            errors,
            maps,
            skipped_rows: skipped.into_inner(),
        };
        let failed = result.error_count();
        if failed > 0 {
            log::warn!("Elemental map: {failed} of {len} pixels have no background");
        }
        log::info!("Elemental map: finished, {} skipped rows", result.skipped_rows);
        Ok(result)
    }
}

fn map_row(
    split: &EdgeSplit<'_>,
    energies: &[f64],
    input: &MapInput<'_>,
    y: usize,
    mut out: RowOut<'_>,
) {
    let mut counts = vec![0.0; split.pre.len()];
    for x in 0..split.width {
        for (count, pre) in counts.iter_mut().zip(&split.pre) {
            *count = pre.image.get(x, y) as f64;
        }
        let fit = match fit_pixel(energies, &counts, input.mode, &input.options) {
            Ok(fit) => fit,
            Err(err) => {
                out.errors[x] = Some(err);
                continue;
            }
        };
        out.a[x] = fit.a as f32;
        out.r[x] = fit.r as f32;
        for ((post, background), signal) in split
            .post
            .iter()
            .zip(out.backgrounds.iter_mut())
            .zip(out.signals.iter_mut())
        {
            let value = fit.value(post.energy_loss);
            background[x] = value as f32;
            signal[x] = (post.image.get(x, y) as f64 - value) as f32;
        }
    }
}

fn to_image(width: usize, height: usize, pixels: Vec<f32>) -> FloatImage {
    FloatImage::from_pixels(width, height, pixels).unwrap_or_else(|| FloatImage::new(0, 0))
}

/// Write every output as a 32-bit float TIFF into `dir`: `a.tif`, `r.tif`,
/// `errors.tif` and `background_<E>eV.tif` / `map_<E>eV.tif` per post-edge
/// image.
pub fn save_maps(maps: &ElementalMaps, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|source| EftemError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut outputs: Vec<(String, FloatImage)> = vec![
        ("a.tif".to_string(), maps.a.clone()),
        ("r.tif".to_string(), maps.r.clone()),
        ("errors.tif".to_string(), maps.error_image()),
    ];
    for map in &maps.maps {
        let energy = map.energy_loss;
        outputs.push((format!("background_{energy}eV.tif"), map.background.clone()));
        outputs.push((format!("map_{energy}eV.tif"), map.signal.clone()));
    }

    let mut written = Vec::with_capacity(outputs.len());
    for (name, image) in outputs {
        let path = dir.join(name);
        image.save_tiff(&path)?;
        log::info!("Saved {}", path.display());
        written.push(path);
    }
    Ok(written)
}

use std::sync::mpsc;
use std::thread;

use parking_lot::Mutex;

use crate::config::{thread_count, DqeConfig};
use crate::error::{EftemError, Result};
use crate::image::{FloatImage, Rect};

/// Below this many binned pixels per side the statistics become meaningless.
const MIN_BINNED_SIDE: usize = 10;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DqeSettings {
    /// Pixels ignored on every side of the image.
    pub border: usize,
    /// Largest binning factor, 0 = automatic.
    pub max_binning: usize,
    pub sensitivity: f64,
    /// Worker threads, 0 = one per core.
    pub workers: usize,
}

impl Default for DqeSettings {
    fn default() -> Self {
        Self::from(&DqeConfig::default())
    }
}

impl From<&DqeConfig> for DqeSettings {
    fn from(config: &DqeConfig) -> Self {
        Self {
            border: config.border,
            max_binning: config.max_binning,
            sensitivity: config.sensitivity,
            workers: config.workers,
        }
    }
}

impl DqeSettings {
    /// Largest binning factor for a (cropped) image of the given size.
    ///
    /// Automatic or too large values become a tenth of the shorter side, at
    /// least 1.
    pub fn effective_max_binning(&self, width: usize, height: usize) -> usize {
        let requested = self.max_binning;
        if requested == 0
            || requested > width / MIN_BINNED_SIDE
            || requested > height / MIN_BINNED_SIDE
        {
            let automatic = (width.min(height) / MIN_BINNED_SIDE).max(1);
            if requested != 0 {
                log::info!("The max. binning was set to {automatic}");
            }
            automatic
        } else {
            requested
        }
    }
}

// ---------------------------------------------------------------------------
// DqeDataset – one binning factor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DqeDataset {
    pub binning: usize,
    pub mean: f64,
    pub variance: f64,
    pub dqe: f64,
}

impl DqeDataset {
    /// Bin `image` by summation and derive `dqe = mean / variance * sensitivity`.
    pub fn compute(image: &FloatImage, binning: usize, sensitivity: f64) -> Self {
        let stats = image.bin_sum(binning).statistics();
        let variance = stats.variance();
        Self {
            binning,
            mean: stats.mean,
            variance,
            dqe: stats.mean / variance * sensitivity,
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// All datasets of one image, sorted by binning factor.
#[derive(Debug, Clone, PartialEq)]
pub struct DqeMeasurement {
    pub image_name: String,
    pub border: usize,
    /// The binning limit actually used.
    pub max_binning: usize,
    pub sensitivity: f64,
    pub datasets: Vec<DqeDataset>,
}

/// Crop the border, resolve the binning limit and measure every factor from
/// 1 to the limit on a pool of worker threads.
pub fn measure_dqe(
    image: &FloatImage,
    image_name: &str,
    settings: &DqeSettings,
) -> Result<DqeMeasurement> {
    let (width, height) = image.dimensions();
    let cropped = image
        .crop(&Rect::centered(width, height, settings.border))
        .ok_or_else(|| {
            EftemError::Config(format!(
                "a border of {} pixels leaves nothing of a {width}x{height} image",
                settings.border
            ))
        })?;
    let max_binning = settings.effective_max_binning(cropped.width(), cropped.height());
    let workers = thread_count(settings.workers);
    log::info!(
        "DQE of {image_name}: border {}, binning 1..={max_binning}, {workers} workers",
        settings.border
    );

    let datasets = run_workers(&cropped, max_binning, settings.sensitivity, workers)?;
    Ok(DqeMeasurement {
        image_name: image_name.to_string(),
        border: settings.border,
        max_binning,
        sensitivity: settings.sensitivity,
        datasets,
    })
}

/// Workers pop binning factors from a shared stack and send their datasets
/// to the collector, which counts down until every factor has reported.
pub fn run_workers(
    image: &FloatImage,
    max_binning: usize,
    sensitivity: f64,
    workers: usize,
) -> Result<Vec<DqeDataset>> {
    // Popped from the back, so factor 1 is handed out first.
    let pending = Mutex::new((1..=max_binning).rev().collect::<Vec<usize>>());
    let (tx, rx) = mpsc::sync_channel::<DqeDataset>(max_binning.max(1));
    let workers = workers.clamp(1, max_binning.max(1));

    let mut datasets = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let tx = tx.clone();
                let pending = &pending;
                scope.spawn(move || {
                    log::debug!("DQE worker {worker} started");
                    loop {
                        let next = pending.lock().pop();
                        let Some(binning) = next else { break };
                        let dataset = DqeDataset::compute(image, binning, sensitivity);
                        log::debug!("DQE worker {worker}: binning {binning} -> {:.6}", dataset.dqe);
                        if tx.send(dataset).is_err() {
                            break;
                        }
                    }
                    log::debug!("DQE worker {worker} finished");
                })
            })
            .collect();
        drop(tx);

        let mut received = Vec::with_capacity(max_binning);
        while received.len() < max_binning {
            match rx.recv() {
                Ok(dataset) => received.push(dataset),
                Err(_) => break,
            }
        }
        for handle in handles {
            if handle.join().is_err() {
                log::error!("A DQE worker panicked");
            }
        }
        received
    });

    if datasets.len() != max_binning {
        return Err(EftemError::DqeWorkerLost {
            received: datasets.len(),
            expected: max_binning,
        });
    }
    datasets.sort_by_key(|d| d.binning);
    Ok(datasets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy(width: usize, height: usize) -> FloatImage {
        let mut state = 0x2545_f491_u32;
        let pixels = (0..width * height)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                100.0 + (state % 21) as f32
            })
            .collect();
        FloatImage::from_pixels(width, height, pixels).unwrap()
    }

    #[test]
    fn binning_one_reproduces_image_statistics() {
        let image = noisy(30, 20);
        let stats = image.statistics();
        let dataset = DqeDataset::compute(&image, 1, 2.0);
        assert_eq!(dataset.mean, stats.mean);
        assert_eq!(dataset.variance, stats.variance());
        assert!((dataset.dqe - stats.mean / stats.variance() * 2.0).abs() < 1e-12);
    }

    #[test]
    fn dqe_is_mean_over_variance() {
        let image = FloatImage::from_pixels(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let dataset = DqeDataset::compute(&image, 1, 1.0);
        assert!((dataset.mean - 2.5).abs() < 1e-12);
        assert!((dataset.variance - 5.0 / 3.0).abs() < 1e-12);
        assert!((dataset.dqe - 1.5).abs() < 1e-12);
        assert!((dataset.std_dev() - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn four_workers_deliver_every_factor_once() {
        let image = noisy(64, 48);
        let datasets = run_workers(&image, 4, 1.0, 4).unwrap();
        let factors: Vec<usize> = datasets.iter().map(|d| d.binning).collect();
        assert_eq!(factors, vec![1, 2, 3, 4]);
        for dataset in &datasets {
            assert_eq!(*dataset, DqeDataset::compute(&image, dataset.binning, 1.0));
        }
    }

    #[test]
    fn single_worker_matches_many() {
        let image = noisy(50, 50);
        assert_eq!(
            run_workers(&image, 5, 1.5, 1).unwrap(),
            run_workers(&image, 5, 1.5, 8).unwrap()
        );
    }

    #[test]
    fn automatic_max_binning() {
        let settings = DqeSettings::default();
        assert_eq!(settings.effective_max_binning(100, 80), 8);

        let too_large = DqeSettings {
            max_binning: 50,
            ..settings
        };
        assert_eq!(too_large.effective_max_binning(100, 80), 8);

        let fine = DqeSettings {
            max_binning: 5,
            ..settings
        };
        assert_eq!(fine.effective_max_binning(100, 80), 5);
        assert_eq!(settings.effective_max_binning(6, 6), 1);
    }

    #[test]
    fn border_is_ignored() {
        // Bright frame of 4 pixels around a uniform-ish interior
        let image = FloatImage::from_fn(40, 40, |x, y| {
            if x < 4 || y < 4 || x >= 36 || y >= 36 {
                1.0e4
            } else {
                10.0 + ((x + y) % 2) as f32
            }
        });
        let settings = DqeSettings {
            border: 4,
            workers: 2,
            ..DqeSettings::default()
        };
        let measurement = measure_dqe(&image, "frame", &settings).unwrap();
        assert_eq!(measurement.max_binning, 3);
        assert_eq!(measurement.datasets.len(), 3);
        assert!((measurement.datasets[0].mean - 10.5).abs() < 1e-9);
    }

    #[test]
    fn oversized_border_is_rejected() {
        let image = noisy(10, 10);
        let settings = DqeSettings {
            border: 5,
            ..DqeSettings::default()
        };
        assert!(matches!(
            measure_dqe(&image, "tiny", &settings),
            Err(EftemError::Config(_))
        ));
    }
}

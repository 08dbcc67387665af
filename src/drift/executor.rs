use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::thread_count;
use crate::error::{EftemError, Result};
use crate::image::{FloatImage, Rect};

use super::correlation::{correlate_row, CorrelationError, Shift, ShiftMap, TargetStats};

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Shared flag checked by every row task before it starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

/// A stack of equally sized images and the window to track.
#[derive(Debug, Clone, Copy)]
pub struct DriftInput<'a> {
    pub images: &'a [FloatImage],
    pub roi: Rect,
    pub template_index: usize,
    /// Largest shift searched in each direction.
    pub delta: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriftResult {
    /// One map per image; `None` for the template.
    pub maps: Vec<Option<ShiftMap>>,
    pub failed_rows: usize,
    pub skipped_rows: usize,
}

impl DriftResult {
    pub fn best_shifts(&self) -> Vec<Option<Shift>> {
        self.maps
            .iter()
            .map(|map| map.as_ref().and_then(ShiftMap::best_shift))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_rows == 0 && self.skipped_rows == 0
    }
}

/// Read-only data shared by all row tasks of one image.
struct ImageJob<'a> {
    index: usize,
    reference: &'a FloatImage,
    target: FloatImage,
    stats: TargetStats,
    delta: usize,
}

impl DriftInput<'_> {
    /// Checks the stack and returns the region cropped from the template.
    fn validate(&self) -> Result<Rect> {
        let len = self.images.len();
        if len < 2 {
            return Err(EftemError::EmptyStack { len });
        }
        if self.template_index >= len {
            return Err(EftemError::InvalidTemplate {
                index: self.template_index,
                len,
            });
        }
        let expected = self.images[self.template_index].dimensions();
        if let Some((index, image)) = self
            .images
            .iter()
            .enumerate()
            .find(|(_, image)| image.dimensions() != expected)
        {
            return Err(EftemError::DimensionMismatch {
                index,
                expected,
                actual: image.dimensions(),
            });
        }
        self.reference_rect(expected).ok_or(EftemError::InvalidRoi {
            x: self.roi.x,
            y: self.roi.y,
            width: self.roi.width,
            height: self.roi.height,
            delta: self.delta,
            image_width: expected.0,
            image_height: expected.1,
        })
    }

    /// The ROI grown by `delta`, if it lies inside a `width` x `height` image.
    fn reference_rect(&self, (width, height): (usize, usize)) -> Option<Rect> {
        self.roi
            .grown(self.delta)
            .filter(|grown| grown.fits_in(width, height))
    }
}

// ---------------------------------------------------------------------------
// DriftEstimator – row tasks on a dedicated pool
// ---------------------------------------------------------------------------

pub struct DriftEstimator {
    pool: rayon::ThreadPool,
}

impl DriftEstimator {
    /// `threads == 0` uses one thread per core.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_count(threads))
            .thread_name(|i| format!("drift-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Correlate every non-template image with the template and wait for
    /// all row tasks. Failed or cancelled rows stay NaN.
    pub fn run(&self, input: &DriftInput<'_>, cancel: &CancelToken) -> Result<DriftResult> {
        self.run_with(input, cancel, |job, row, out| {
            correlate_row(job.reference, &job.target, job.stats, job.delta, row, out)
        })
    }

    fn run_with<F>(
        &self,
        input: &DriftInput<'_>,
        cancel: &CancelToken,
        row_fn: F,
    ) -> Result<DriftResult>
    where
        F: Fn(&ImageJob<'_>, usize, &mut [f64]) -> std::result::Result<(), CorrelationError>
            + Sync,
    {
        let reference_rect = input.validate()?;
        let template = &input.images[input.template_index];
        let reference = template
            .crop(&reference_rect)
            .ok_or_else(|| EftemError::Config("reference window left the image".into()))?;

        let mut jobs = Vec::with_capacity(input.images.len() - 1);
        for (index, image) in input.images.iter().enumerate() {
            if index == input.template_index {
                continue;
            }
            let target = image
                .crop(&input.roi)
                .ok_or_else(|| EftemError::Config("ROI left the image".into()))?;
            let stats = TargetStats::of(&target);
            jobs.push(ImageJob {
                index,
                reference: &reference,
                target,
                stats,
                delta: input.delta,
            });
        }

        log::info!(
            "Drift: template {}, delta {}, ROI {:?}, {} images on {} threads",
            input.template_index,
            input.delta,
            input.roi,
            jobs.len(),
            self.threads()
        );

        let mut maps: Vec<ShiftMap> = jobs.iter().map(|_| ShiftMap::new(input.delta)).collect();
        let failed = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);

        self.pool.scope(|scope| {
            for (job, map) in jobs.iter().zip(maps.iter_mut()) {
                for (row, out) in map.rows_mut().enumerate() {
                    let (row_fn, failed, skipped) = (&row_fn, &failed, &skipped);
                    scope.spawn(move |_| {
                        if cancel.is_cancelled() {
                            skipped.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                        let outcome =
                            panic::catch_unwind(AssertUnwindSafe(|| row_fn(job, row, &mut *out)));
                        let reason = match outcome {
                            Ok(Ok(())) => return,
                            Ok(Err(err)) => err.to_string(),
                            Err(_) => "task panicked".to_string(),
                        };
                        log::error!("Drift: image {} row {row} failed: {reason}", job.index);
                        out.fill(f64::NAN);
                        failed.fetch_add(1, Ordering::Relaxed);
                    });
                }
            }
        });

        let failed_rows = failed.into_inner();
        let skipped_rows = skipped.into_inner();
        let mut per_image = maps.into_iter();
        let maps = (0..input.images.len())
            .map(|index| {
                if index == input.template_index {
                    None
                } else {
                    per_image.next()
                }
            })
            .collect();

        log::info!("Drift: finished, {failed_rows} failed rows, {skipped_rows} skipped rows");
        Ok(DriftResult {
            maps,
            failed_rows,
            skipped_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(x: i64, y: i64) -> f32 {
        let (x, y) = (x as f32, y as f32);
        (0.61 * x).sin() * 30.0 + (0.37 * y).cos() * 20.0 + (0.11 * x * y).sin() * 15.0 + 80.0
    }

    /// Image whose content is the texture moved by `(-dx, -dy)`.
    fn shifted(dx: i64, dy: i64) -> FloatImage {
        FloatImage::from_fn(40, 40, |x, y| texture(x as i64 + dx, y as i64 + dy))
    }

    fn input(images: &[FloatImage]) -> DriftInput<'_> {
        DriftInput {
            images,
            roi: Rect::new(10, 10, 16, 16),
            template_index: 0,
            delta: 4,
        }
    }

    #[test]
    fn recovers_known_shift() {
        let images = vec![shifted(0, 0), shifted(2, -1), shifted(0, 0)];
        let estimator = DriftEstimator::new(3).unwrap();
        let result = estimator.run(&input(&images), &CancelToken::new()).unwrap();

        assert!(result.is_complete());
        assert!(result.maps[0].is_none());
        let shifts = result.best_shifts();
        let moved = shifts[1].unwrap();
        assert_eq!((moved.dx, moved.dy), (2, -1));
        assert!((moved.coefficient - 1.0).abs() < 1e-6);
        let still = shifts[2].unwrap();
        assert_eq!((still.dx, still.dy), (0, 0));
    }

    #[test]
    fn cancelled_run_leaves_maps_empty() {
        let images = vec![shifted(0, 0), shifted(1, 1)];
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = DriftEstimator::new(2)
            .unwrap()
            .run(&input(&images), &cancel)
            .unwrap();
        assert_eq!(result.skipped_rows, 9);
        assert_eq!(result.failed_rows, 0);
        let map = result.maps[1].as_ref().unwrap();
        assert!(map.values().iter().all(|v| v.is_nan()));
        assert!(result.best_shifts()[1].is_none());
    }

    #[test]
    fn failed_rows_degrade_to_nan() {
        let images = vec![shifted(0, 0), shifted(0, 0)];
        let estimator = DriftEstimator::new(2).unwrap();
        let result = estimator
            .run_with(&input(&images), &CancelToken::new(), |job, row, out| {
                out.fill(0.5);
                match row {
                    1 => panic!("row {row} of image {}", job.index),
                    3 => Err(CorrelationError::RowOutOfRange { row, size: 0 }),
                    _ => Ok(()),
                }
            })
            .unwrap();

        assert_eq!(result.failed_rows, 2);
        let map = result.maps[1].as_ref().unwrap();
        for y in 0..map.size() {
            let failed = y == 1 || y == 3;
            assert!(map.row(y).iter().all(|v| v.is_nan() == failed), "row {y}");
        }
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let images = vec![shifted(0, 0), shifted(0, 0)];
        let estimator = DriftEstimator::new(1).unwrap();
        let cancel = CancelToken::new();

        let mut bad_roi = input(&images);
        bad_roi.roi = Rect::new(2, 2, 16, 16);
        assert!(matches!(
            estimator.run(&bad_roi, &cancel),
            Err(EftemError::InvalidRoi { delta: 4, .. })
        ));

        let mut huge_delta = input(&images);
        huge_delta.delta = usize::MAX;
        assert!(matches!(
            estimator.run(&huge_delta, &cancel),
            Err(EftemError::InvalidRoi { .. })
        ));

        let mut far_roi = input(&images);
        far_roi.roi = Rect::new(i64::MAX, i64::MIN, usize::MAX, 16);
        assert!(matches!(
            estimator.run(&far_roi, &cancel),
            Err(EftemError::InvalidRoi { .. })
        ));

        let mut bad_template = input(&images);
        bad_template.template_index = 2;
        assert!(matches!(
            estimator.run(&bad_template, &cancel),
            Err(EftemError::InvalidTemplate { index: 2, len: 2 })
        ));

        assert!(matches!(
            estimator.run(&input(&images[..1]), &cancel),
            Err(EftemError::EmptyStack { len: 1 })
        ));

        let mixed = vec![shifted(0, 0), FloatImage::new(30, 40)];
        assert!(matches!(
            estimator.run(&input(&mixed), &cancel),
            Err(EftemError::DimensionMismatch { index: 1, .. })
        ));
    }
}

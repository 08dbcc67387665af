use std::fmt;

// ---------------------------------------------------------------------------
// EnergyInterval – closed energy-loss window
// ---------------------------------------------------------------------------

/// A closed interval `[start, stop]` on the energy-loss axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyInterval {
    pub start: f64,
    pub stop: f64,
}

impl EnergyInterval {
    pub fn new(start: f64, stop: f64) -> Self {
        Self { start, stop }
    }

    /// Inclusive on both ends.
    pub fn contains(&self, energy: f64) -> bool {
        energy >= self.start && energy <= self.stop
    }

    /// Intersect with `[min, max]`. `None` if nothing (or a single point) is left.
    pub fn clamp_to(&self, min: f64, max: f64) -> Option<Self> {
        let start = self.start.max(min);
        let stop = self.stop.min(max);
        if start >= stop {
            None
        } else {
            Some(Self { start, stop })
        }
    }
}

impl fmt::Display for EnergyInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.2}, {:.2}]", self.start, self.stop)
    }
}

// ---------------------------------------------------------------------------
// PointSet – ordered (energy loss, intensity) samples
// ---------------------------------------------------------------------------

/// Ordered samples, ascending in energy loss. `x` and `y` have equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl PointSet {
    /// Build from unordered pairs; the result is sorted by energy loss.
    pub fn from_pairs(mut pairs: Vec<(f64, f64)>) -> Self {
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (x, y) = pairs.into_iter().unzip();
        Self { x, y }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }

    /// Smallest and largest energy loss.
    pub fn range(&self) -> Option<(f64, f64)> {
        Some((*self.x.first()?, *self.x.last()?))
    }
}

// ---------------------------------------------------------------------------
// Spectrum – one imported EEL spectrum
// ---------------------------------------------------------------------------

/// An imported EEL spectrum with its axis units.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Usually the file or image name.
    pub name: String,
    pub points: PointSet,
    /// Unit of the energy-loss axis (x).
    pub x_unit: String,
    /// Unit of the intensity axis (y).
    pub y_unit: String,
}

impl Spectrum {
    pub const DEFAULT_X_UNIT: &'static str = "eV";
    pub const DEFAULT_Y_UNIT: &'static str = "a.u.";

    pub fn new(name: impl Into<String>, points: PointSet) -> Self {
        Self {
            name: name.into(),
            points,
            x_unit: Self::DEFAULT_X_UNIT.to_string(),
            y_unit: Self::DEFAULT_Y_UNIT.to_string(),
        }
    }

    pub fn with_units(mut self, x_unit: impl Into<String>, y_unit: impl Into<String>) -> Self {
        self.x_unit = x_unit.into();
        self.y_unit = y_unit.into();
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Valid energy-loss range `[min, max]` of this spectrum.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.points.range()
    }

    pub fn x_label(&self) -> String {
        format!("Energy loss ({})", self.x_unit)
    }

    pub fn y_label(&self) -> String {
        format!("Intensity ({})", self.y_unit)
    }
}

use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// BackgroundFunction – the model contract
// ---------------------------------------------------------------------------

/// A parametric EELS background model.
///
/// `value` and `gradient` are pure; `gradient` is the analytic derivative of
/// `value` with respect to each parameter and has one entry per parameter.
/// The power-law and three-parameter models require `x > 0`, which the
/// caller guarantees.
pub trait BackgroundFunction: Send + Sync {
    fn name(&self) -> &'static str;

    fn value(&self, x: f64, parameters: &[f64]) -> f64;

    fn gradient(&self, x: f64, parameters: &[f64]) -> Vec<f64>;

    /// Seed vector for the solver.
    fn initial_parameters(&self) -> Vec<f64>;

    fn parameter_count(&self) -> usize {
        self.initial_parameters().len()
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// `y = p0 + p1 * x`
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearFunction;

impl BackgroundFunction for LinearFunction {
    fn name(&self) -> &'static str {
        "Linear function"
    }

    fn value(&self, x: f64, p: &[f64]) -> f64 {
        p[0] + x * p[1]
    }

    fn gradient(&self, x: f64, _p: &[f64]) -> Vec<f64> {
        vec![1.0, x]
    }

    fn initial_parameters(&self) -> Vec<f64> {
        vec![1.0, 1.0]
    }
}

/// `y = a * x^r` with parameters `[a, r]`. For EELS backgrounds `r` is
/// negative; the public power-law result reports `-r`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerLawFunction;

impl BackgroundFunction for PowerLawFunction {
    fn name(&self) -> &'static str {
        "Power law function"
    }

    fn value(&self, x: f64, p: &[f64]) -> f64 {
        p[0] * x.powf(p[1])
    }

    fn gradient(&self, x: f64, p: &[f64]) -> Vec<f64> {
        let pow = x.powf(p[1]);
        vec![pow, p[0] * pow * x.ln()]
    }

    fn initial_parameters(&self) -> Vec<f64> {
        vec![20f64.exp(), -2.0]
    }
}

/// `y = exp(p0 * ln x + p1 + p2 / x)`
///
/// Reduces to a power law for `p2 = 0`; the `p2 / x` term absorbs the
/// additional background on the tail of a plasmon peak.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreeParameterFunction;

impl BackgroundFunction for ThreeParameterFunction {
    fn name(&self) -> &'static str {
        "Three parameter function"
    }

    fn value(&self, x: f64, p: &[f64]) -> f64 {
        (p[0] * x.ln() + p[1] + p[2] / x).exp()
    }

    fn gradient(&self, x: f64, p: &[f64]) -> Vec<f64> {
        let v = self.value(x, p);
        vec![v * x.ln(), v, v / x]
    }

    fn initial_parameters(&self) -> Vec<f64> {
        vec![1.0, 1.0, 1.0]
    }
}

// ---------------------------------------------------------------------------
// FunctionRegistry – name → constructor
// ---------------------------------------------------------------------------

pub type FunctionFactory = fn() -> Box<dyn BackgroundFunction>;

/// Static table of the available background models, keyed by display name.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    factories: BTreeMap<&'static str, FunctionFactory>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FunctionRegistry {
    /// Registry with every model shipped by this crate.
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: BTreeMap::new(),
        };
        registry.register(LinearFunction.name(), || Box::new(LinearFunction));
        registry.register(PowerLawFunction.name(), || Box::new(PowerLawFunction));
        registry.register(ThreeParameterFunction.name(), || {
            Box::new(ThreeParameterFunction)
        });
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: FunctionFactory) {
        self.factories.insert(name, factory);
    }

    /// Model names in alphabetical order.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn BackgroundFunction>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Central difference of `value` with respect to parameter `k`.
    fn numeric_gradient(f: &dyn BackgroundFunction, x: f64, p: &[f64], k: usize) -> f64 {
        let h = 1e-6 * p[k].abs().max(1.0);
        let mut up = p.to_vec();
        let mut down = p.to_vec();
        up[k] += h;
        down[k] -= h;
        (f.value(x, &up) - f.value(x, &down)) / (2.0 * h)
    }

    fn assert_gradient_matches(f: &dyn BackgroundFunction, params: &[Vec<f64>]) {
        for p in params {
            for &x in &[0.5, 1.0, 7.5, 120.0, 850.0] {
                let analytic = f.gradient(x, p);
                assert_eq!(analytic.len(), f.parameter_count());
                for (k, &a) in analytic.iter().enumerate() {
                    let n = numeric_gradient(f, x, p, k);
                    let scale = a.abs().max(n.abs()).max(1e-12);
                    assert!(
                        (a - n).abs() / scale < 1e-6,
                        "{} d/dp{k} at x={x}, p={p:?}: analytic {a}, numeric {n}",
                        f.name()
                    );
                }
            }
        }
    }

    #[test]
    fn linear_gradient_matches_numeric() {
        assert_gradient_matches(
            &LinearFunction,
            &[vec![1.0, 1.0], vec![-3.0, 0.25], vec![1e4, -12.0]],
        );
    }

    #[test]
    fn power_law_gradient_matches_numeric() {
        assert_gradient_matches(
            &PowerLawFunction,
            &[vec![5.0, -2.0], vec![1e6, -3.1], vec![0.3, 0.5]],
        );
    }

    #[test]
    fn three_parameter_gradient_matches_numeric() {
        assert_gradient_matches(
            &ThreeParameterFunction,
            &[vec![-2.0, 3.0, 0.5], vec![-3.5, 10.0, -4.0], vec![0.2, -1.0, 1.0]],
        );
    }

    #[test]
    fn three_parameter_reduces_to_power_law() {
        let a = 12.0f64;
        let r = -2.7;
        for &x in &[10.0, 55.0, 400.0] {
            let power = PowerLawFunction.value(x, &[a, r]);
            let three = ThreeParameterFunction.value(x, &[r, a.ln(), 0.0]);
            assert!((power - three).abs() / power < 1e-12);
        }
    }

    #[test]
    fn seeds_match_parameter_counts() {
        assert_eq!(LinearFunction.initial_parameters(), vec![1.0, 1.0]);
        assert_eq!(PowerLawFunction.initial_parameters(), vec![20f64.exp(), -2.0]);
        assert_eq!(ThreeParameterFunction.parameter_count(), 3);
    }

    #[test]
    fn registry_knows_every_builtin_model() {
        let registry = FunctionRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec![
                "Linear function",
                "Power law function",
                "Three parameter function"
            ]
        );
        for name in registry.names() {
            let function = registry.create(name).unwrap();
            assert_eq!(function.name(), name);
        }
        assert!(registry.create("Gaussian").is_none());
    }
}

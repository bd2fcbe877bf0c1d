//! Definite integrals of sampled functions.

use crate::derivative::nth_derivative;
use crate::sampling::SampledFunction;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Decimal places used when the error bound is exactly zero.
const MAX_DECIMAL_PLACES: usize = 15;

/// Trapezoidal estimate and its error bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegralEstimate {
    pub value: f64,
    pub error: f64,
}

impl IntegralEstimate {
    /// Number of decimals worth printing given the error's magnitude.
    pub fn decimal_places(&self) -> usize {
        if self.error == 0.0 || !self.error.is_finite() {
            return MAX_DECIMAL_PLACES;
        }
        (1.0 + self.error.log10()).floor().abs() as usize
    }

    /// The value rounded to [`IntegralEstimate::decimal_places`].
    pub fn rounded(&self) -> f64 {
        let scale = 10f64.powi(self.decimal_places() as i32);
        let rounded = (self.value * scale).round() / scale;
        if rounded.is_finite() {
            rounded
        } else {
            self.value
        }
    }

    /// `"{value} ± {error}"` with the value rounded and the error in
    /// scientific notation.
    pub fn format(&self) -> String {
        format!("{} ± {:.2e}", self.rounded(), self.error)
    }
}

/// Largest `|f''|` over the samples: 9-point stencil when there are enough
/// samples, 3-point second difference otherwise, 0 with fewer than 3.
fn max_second_derivative(values: &[f64], h: f64) -> f64 {
    let second = if values.len() >= 9 {
        nth_derivative(values, h, 2)
    } else {
        values
            .windows(3)
            .map(|w| (w[0] - 2.0 * w[1] + w[2]) / (h * h))
            .collect()
    };
    second.iter().fold(0.0, |acc: f64, v| acc.max(v.abs()))
}

/// Integrates `graph` over its whole domain with the composite trapezoidal
/// rule. NaN samples are read as 0.
///
/// The error bound is `max|f''| * width^3 / (12 * n^2)`.
pub fn integrate(graph: &SampledFunction) -> Result<IntegralEstimate> {
    let h = graph.spacing()?;
    let values = graph.values_without_nan();
    let n = values.len();

    let interior: f64 = values[1..n - 1].iter().sum();
    let value = h * (interior + 0.5 * (values[0] + values[n - 1]));

    let width = graph.inputs[n - 1] - graph.inputs[0];
    let error = max_second_derivative(&values, h) * width.powi(3) / (12.0 * (n * n) as f64);

    if !value.is_finite() || !error.is_finite() {
        bail!(
            "Integral of '{}' is not finite ({} ± {}).",
            graph.label,
            value,
            error
        );
    }
    Ok(IntegralEstimate { value, error })
}

#[cfg(test)]
mod tests {
    use super::{integrate, IntegralEstimate};
    use crate::registry::FunctionRegistry;
    use crate::rpn::Rpn;
    use crate::sampling::{Domain, SampledFunction};

    fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn integral_of(expression: &str, start: f64, end: f64) -> IntegralEstimate {
        let registry = FunctionRegistry::with_all();
        let rpn = Rpn::parse(expression, Some("x")).expect("parse");
        let inputs = Domain::new(start, end, 10_001).inputs();
        let graph = SampledFunction::from_expression(rpn, &registry, inputs, expression)
            .expect("valid expression");
        integrate(&graph).expect("finite integral")
    }

    #[test]
    fn linear_functions_are_exact() {
        let estimate = integral_of("x", 0.0, 1.0);
        assert!((estimate.value - 0.5).abs() < 1e-12);
        assert!(estimate.error < 1e-12);

        let estimate = integral_of("7 x * 2 -", -4.0, 3.0);
        assert!((estimate.value + 38.5).abs() < 1e-10);
        assert!(estimate.error < 1e-9);
    }

    #[test]
    fn error_bound_covers_curved_functions() {
        let estimate = integral_of("x 3 ^ 2 x * -", -2.0, 6.0);
        assert!(estimate.error > 0.0);
        assert!((estimate.value - 288.0).abs() <= estimate.error);
    }

    #[test]
    fn half_circle_gives_half_pi() {
        let estimate = integral_of("1 x x * - sqrt", -1.0, 1.0);
        assert!((estimate.value - std::f64::consts::FRAC_PI_2).abs() < 1e-4);
    }

    #[test]
    fn steps_are_integrated() {
        let estimate = integral_of("x heaviside", -1.0, 3.0);
        assert!((estimate.value - 3.0).abs() < 1e-3);
    }

    #[test]
    fn undefined_samples_count_as_zero() {
        let estimate = integral_of("x abs 2 - sqrt", -4.0, 4.0);
        let expected = 8.0 * std::f64::consts::SQRT_2 / 3.0;
        assert!((estimate.value - expected).abs() < 1e-3);
    }

    #[test]
    fn short_inputs() {
        let graph = SampledFunction::from_data(vec![0.0, 1.0], vec![1.0, 3.0], "pair")
            .expect("valid data");
        let estimate = integrate(&graph).expect("two samples");
        assert_eq!(estimate, IntegralEstimate { value: 2.0, error: 0.0 });

        let graph = SampledFunction::from_data(vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 4.0], "parabola")
            .expect("valid data");
        let estimate = integrate(&graph).expect("three samples");
        assert_eq!(estimate.value, 3.0);
        assert!((estimate.error - 2.0 * 8.0 / 108.0).abs() < 1e-12);

        let graph = SampledFunction::from_data(vec![0.0], vec![1.0], "one").expect("valid data");
        assert_err_contains(integrate(&graph), "At least two samples");
    }

    #[test]
    fn report_precision_follows_the_error() {
        let estimate = IntegralEstimate {
            value: 0.123456789,
            error: 2.3e-5,
        };
        assert_eq!(estimate.decimal_places(), 4);
        assert_eq!(estimate.rounded(), 0.1235);
        assert_eq!(estimate.format(), "0.1235 ± 2.30e-5");

        let exact = IntegralEstimate {
            value: 0.5,
            error: 0.0,
        };
        assert_eq!(exact.decimal_places(), 15);
        assert_eq!(exact.format(), "0.5 ± 0.00e0");

        let coarse = IntegralEstimate {
            value: 1234.5,
            error: 12.0,
        };
        assert_eq!(coarse.decimal_places(), 2);
    }
}

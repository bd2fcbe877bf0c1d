//! Numerical differentiation of sampled functions with central finite
//! differences.
//!
//! Orders 1 to 4 use 9-point stencils, orders 5 and 6 use 11-point stencils.
//! Higher orders apply the 6th order stencil repeatedly, then the stencil of
//! the remaining order. Every application eats the stencil's half width on
//! both ends of the array.

use crate::sampling::{GraphKind, SampledFunction};
use anyhow::{bail, Result};

// Coefficients from the standard central finite difference tables.
const FIRST: [f64; 9] = [
    1.0 / 280.0,
    -4.0 / 105.0,
    1.0 / 5.0,
    -4.0 / 5.0,
    0.0,
    4.0 / 5.0,
    -1.0 / 5.0,
    4.0 / 105.0,
    -1.0 / 280.0,
];

const SECOND: [f64; 9] = [
    -1.0 / 560.0,
    8.0 / 315.0,
    -1.0 / 5.0,
    8.0 / 5.0,
    -205.0 / 72.0,
    8.0 / 5.0,
    -1.0 / 5.0,
    8.0 / 315.0,
    -1.0 / 560.0,
];

const THIRD: [f64; 9] = [
    -7.0 / 240.0,
    3.0 / 10.0,
    -169.0 / 120.0,
    61.0 / 30.0,
    0.0,
    -61.0 / 30.0,
    169.0 / 120.0,
    -3.0 / 10.0,
    7.0 / 240.0,
];

const FOURTH: [f64; 9] = [
    7.0 / 240.0,
    -2.0 / 5.0,
    169.0 / 60.0,
    -122.0 / 15.0,
    91.0 / 8.0,
    -122.0 / 15.0,
    169.0 / 60.0,
    -2.0 / 5.0,
    7.0 / 240.0,
];

const FIFTH: [f64; 11] = [
    -13.0 / 288.0,
    19.0 / 36.0,
    -87.0 / 32.0,
    13.0 / 2.0,
    -323.0 / 48.0,
    0.0,
    323.0 / 48.0,
    -13.0 / 2.0,
    87.0 / 32.0,
    -19.0 / 36.0,
    13.0 / 288.0,
];

const SIXTH: [f64; 11] = [
    13.0 / 240.0,
    -19.0 / 24.0,
    87.0 / 16.0,
    -39.0 / 2.0,
    323.0 / 8.0,
    -1023.0 / 20.0,
    323.0 / 8.0,
    -39.0 / 2.0,
    87.0 / 16.0,
    -19.0 / 24.0,
    13.0 / 240.0,
];

fn stencil(order: usize) -> &'static [f64] {
    match order {
        1 => &FIRST,
        2 => &SECOND,
        3 => &THIRD,
        4 => &FOURTH,
        5 => &FIFTH,
        _ => &SIXTH,
    }
}

/// Correlates `values` with `coefficients` and scales by `h^order`.
/// The output is `coefficients.len() - 1` elements shorter than the input.
fn apply_stencil(values: &[f64], coefficients: &[f64], h: f64, order: usize) -> Vec<f64> {
    let scale = h.powi(order as i32);
    values
        .windows(coefficients.len())
        .map(|window| {
            window
                .iter()
                .zip(coefficients)
                .map(|(v, c)| v * c)
                .sum::<f64>()
                / scale
        })
        .collect()
}

/// Number of samples lost on each side by a derivative of order `n`.
pub fn size_reduction(n: usize) -> usize {
    let (q, r) = (n / 6, n % 6);
    let reduction = 5 * q;
    match r {
        0 => reduction,
        5 => reduction + 5,
        _ => reduction + 4,
    }
}

/// Largest sample count a derivative of order `n` is computed on.
pub fn max_points(n: usize) -> usize {
    match n {
        0 | 1 => 1_000_000,
        2 => 500_000,
        3 => 10_000,
        4 => 1_000,
        5 | 6 => 100,
        _ => 50,
    }
}

/// Stride decimation: keeps every `ceil(len / max)`-th element when `values`
/// is longer than `max`, so at most `max` elements remain.
pub fn resize<T: Copy>(values: &[T], max: usize) -> Vec<T> {
    if max == 0 || values.len() <= max {
        return values.to_vec();
    }
    let step = values.len().div_ceil(max);
    values.iter().step_by(step).copied().collect()
}

/// The n-th derivative of uniformly spaced samples. The result is
/// `2 * size_reduction(n)` elements shorter than `values` (empty when
/// `values` is too short).
pub fn nth_derivative(values: &[f64], h: f64, n: usize) -> Vec<f64> {
    let mut current = values.to_vec();
    for _ in 0..n / 6 {
        current = apply_stencil(&current, &SIXTH, h, 6);
    }
    let remainder = n % 6;
    if remainder != 0 {
        current = apply_stencil(&current, stencil(remainder), h, remainder);
    }
    current
}

/// Differentiates `graph` `order` times.
///
/// NaN samples are read as 0. Long inputs are decimated to
/// [`max_points`]`(order)` first, and the inputs are clipped to the span where
/// the stencils are defined.
pub fn derivative(graph: &SampledFunction, order: usize) -> Result<SampledFunction> {
    if order == 0 {
        bail!("Derivative order must be at least 1.");
    }
    if order > 3 {
        log::info!(
            "derivative of order {} requested, precision degrades quickly with the order",
            order
        );
    }

    let limit = max_points(order);
    let (inputs, values) = if graph.len() > limit {
        log::info!(
            "'{}' is resampled from {} to at most {} points for its derivative of order {}",
            graph.label,
            graph.len(),
            limit,
            order
        );
        (
            resize(&graph.inputs, limit),
            resize(&graph.values_without_nan(), limit),
        )
    } else {
        (graph.inputs.clone(), graph.values_without_nan())
    };

    let shrinkage = size_reduction(order);
    if inputs.len() <= 2 * shrinkage {
        bail!(
            "Derivative of order {} needs more than {} samples, got {}.",
            order,
            2 * shrinkage,
            inputs.len()
        );
    }
    let h = inputs[1] - inputs[0];
    if !(h > 0.0) || !h.is_finite() {
        bail!("Sample spacing must be positive and finite, got {}.", h);
    }

    let derived = nth_derivative(&values, h, order);
    let clipped = inputs[shrinkage..inputs.len() - shrinkage].to_vec();
    debug_assert_eq!(derived.len(), clipped.len());

    Ok(SampledFunction {
        inputs: clipped,
        values: derived,
        rpn: None,
        label: format!("d{order}/dx{order} * {}", graph.label),
        kind: GraphKind::Derivative,
    })
}

#[cfg(test)]
mod tests {
    use super::{derivative, max_points, nth_derivative, resize, size_reduction};
    use crate::sampling::{GraphKind, SampledFunction};

    fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    /// `points` samples of `f` on `[0, 1)`.
    fn sample(points: usize, f: impl Fn(f64) -> f64) -> SampledFunction {
        let inputs: Vec<f64> = (0..points).map(|i| i as f64 / points as f64).collect();
        let values = inputs.iter().map(|&x| f(x)).collect();
        SampledFunction::from_data(inputs, values, "f").expect("valid samples")
    }

    fn assert_all_close(values: &[f64], expected: f64, tolerance: f64) {
        assert!(!values.is_empty());
        for value in values {
            assert!(
                (value - expected).abs() < tolerance,
                "expected {expected} +- {tolerance}, got {value}"
            );
        }
    }

    #[test]
    fn reductions_follow_stencil_widths() {
        let reductions: Vec<usize> = (1..=12).map(size_reduction).collect();
        assert_eq!(reductions, vec![4, 4, 4, 4, 5, 5, 9, 9, 9, 9, 10, 10]);
    }

    #[test]
    fn max_points_shrink_with_the_order() {
        let limits: Vec<usize> = (1..=9).map(max_points).collect();
        assert_eq!(
            limits,
            vec![1_000_000, 500_000, 10_000, 1000, 100, 100, 50, 50, 50]
        );
    }

    #[test]
    fn resize_uses_an_integer_stride() {
        let values: Vec<usize> = (0..100).collect();
        let resized = resize(&values, 13);
        assert_eq!(resized.len(), 13);
        assert_eq!(resized[0], 0);
        assert_eq!(resized[1], 8);
        assert_eq!(*resized.last().expect("non-empty"), 96);
        assert_eq!(resize(&values, 100), values);

        let values: Vec<usize> = (0..199).collect();
        let resized = resize(&values, 100);
        assert_eq!(resized.len(), 100);
        assert_eq!(resized[1], 2);
        assert_eq!(resize(&values, 1000), values);
    }

    #[test]
    fn powers_of_x_give_factorials() {
        let cases: [(usize, f64, f64); 4] = [(1, 1.0, 1e-7), (2, 2.0, 1e-7), (3, 6.0, 1e-7), (4, 24.0, 1e-6)];
        for (order, expected, tolerance) in cases {
            let graph = sample(100, |x| x.powi(order as i32));
            let derived = derivative(&graph, order).expect("enough samples");
            assert_eq!(derived.len(), 100 - 2 * size_reduction(order));
            assert_all_close(&derived.values, expected, tolerance);
        }
    }

    #[test]
    fn higher_orders_are_looser() {
        let fifth = derivative(&sample(100, |x| 0.1 * x.powi(5)), 5).expect("fifth");
        assert_all_close(&fifth.values, 12.0, 1e-4);

        let sixth = derivative(&sample(100, |x| 0.01 * x.powi(6)), 6).expect("sixth");
        assert_all_close(&sixth.values, 7.2, 0.1);

        let seventh = derivative(&sample(50, |x| 0.001 * x.powi(7)), 7).expect("seventh");
        assert_eq!(seventh.len(), 50 - 18);
        assert_all_close(&seventh.values, 5.04, 0.1);
    }

    #[test]
    fn inputs_are_clipped_symmetrically() {
        let graph = sample(100, |x| x * x);
        let derived = derivative(&graph, 1).expect("first");
        assert_eq!(derived.inputs.first(), graph.inputs.get(4));
        assert_eq!(derived.inputs.last(), graph.inputs.get(95));
        assert_eq!(derived.label, "d1/dx1 * f");
        assert_eq!(derived.kind, GraphKind::Derivative);
        assert!(derived.rpn.is_none());
        for (x, dy) in derived.inputs.iter().zip(&derived.values) {
            assert!((dy - 2.0 * x).abs() < 1e-9);
        }
    }

    #[test]
    fn nan_samples_are_read_as_zero() {
        let mut graph = sample(30, |_| 1.0);
        graph.values[15] = f64::NAN;
        let derived = derivative(&graph, 1).expect("first");
        assert!(derived.values.iter().all(|v| v.is_finite()));
        assert!(derived.values.iter().any(|v| v.abs() > 1.0));
    }

    #[test]
    fn long_inputs_are_decimated_before_differentiating() {
        let graph = sample(1000, |x| x.powi(5));
        let derived = derivative(&graph, 5).expect("fifth");
        // 1000 samples at stride 10 leave 100, minus 5 on each side.
        assert_eq!(derived.len(), 90);
        assert_eq!(derived.inputs[0], graph.inputs[50]);
        assert_all_close(&derived.values, 120.0, 1e-3);

        // Just under twice the cap still goes through a stride of 2.
        let graph = sample(199, |x| x.powi(5));
        let derived = derivative(&graph, 5).expect("fifth");
        assert!(derived.len() + 2 * size_reduction(5) <= max_points(5));
        assert_eq!(derived.len(), 90);
        assert_eq!(derived.inputs[0], graph.inputs[10]);
        assert_all_close(&derived.values, 120.0, 1e-3);
    }

    #[test]
    fn short_inputs_are_rejected() {
        assert_err_contains(derivative(&sample(8, |x| x), 1), "needs more than 8 samples");
        assert_err_contains(derivative(&sample(20, |x| x), 0), "at least 1");
        assert!(nth_derivative(&[1.0, 2.0], 1.0, 1).is_empty());
    }
}

//! Zeros and zero zones of sampled functions.
//!
//! Sign changes and exact zeros are located on the grid first. When the
//! sampled function still carries its expression, every location is then
//! refined by bisection on the continuous function; otherwise simple zeros
//! are interpolated linearly and zones stay on grid coordinates.

use crate::registry::FunctionRegistry;
use crate::rpn::Program;
use crate::sampling::SampledFunction;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BisectionSettings {
    /// Bracket width under which refinement stops.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for BisectionSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-15,
            max_iterations: 200,
        }
    }
}

/// A single crossing or touch, or an interval over which the function is
/// exactly zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ZeroRecord {
    Simple(f64),
    Zone { start: f64, end: f64 },
}

impl ZeroRecord {
    pub fn start(&self) -> f64 {
        match *self {
            ZeroRecord::Simple(x) => x,
            ZeroRecord::Zone { start, .. } => start,
        }
    }

    /// `None` for a simple zero.
    pub fn end(&self) -> Option<f64> {
        match *self {
            ZeroRecord::Simple(_) => None,
            ZeroRecord::Zone { end, .. } => Some(end),
        }
    }
}

/// Grid positions found by the scan, before any refinement.
#[derive(Debug, Default, PartialEq)]
struct Scan {
    /// Indices where the function is exactly zero at a single sample.
    touches: Vec<usize>,
    /// `i` such that the sign changes strictly between `i` and `i + 1`.
    crossings: Vec<usize>,
    /// Inclusive index ranges of zero runs.
    zones: Vec<(usize, usize)>,
}

fn scan(values: &[f64]) -> Scan {
    let mut result = Scan::default();
    let last = values.len().saturating_sub(1);
    // Alternating start/end indices; odd length means a zone is open.
    let mut bounds: Vec<usize> = Vec::new();

    // Closes the open zone at `index`, turning one-sample zones into touches.
    fn close(bounds: &mut Vec<usize>, touches: &mut Vec<usize>, index: usize) {
        if bounds.len() % 2 == 0 {
            touches.push(index);
        } else if bounds.last() == Some(&index) {
            bounds.pop();
            touches.push(index);
        } else {
            bounds.push(index);
        }
    }

    for (i, pair) in values.windows(2).enumerate() {
        let (y1, y2) = (pair[0], pair[1]);
        if y1.is_nan() || y2.is_nan() {
            // A run interrupted by a hole ends at the last defined sample, and
            // a run after a hole starts at its first one.
            if y1 == 0.0 && bounds.len() % 2 == 1 {
                close(&mut bounds, &mut result.touches, i);
            } else if y2 == 0.0 {
                bounds.push(i + 1);
            }
            continue;
        }

        let product = y1 * y2;
        if product > 0.0 {
            continue;
        }
        if product < 0.0 {
            result.crossings.push(i);
        } else if y1 != 0.0 {
            if i + 1 == last {
                result.touches.push(i + 1);
            } else {
                bounds.push(i + 1);
            }
        } else if y2 != 0.0 {
            if i == 0 {
                result.touches.push(0);
            } else {
                close(&mut bounds, &mut result.touches, i);
            }
        } else if i == 0 {
            bounds.push(0);
        }
    }

    if bounds.len() % 2 == 1 {
        bounds.push(last);
    }
    for pair in bounds.chunks_exact(2) {
        if pair[0] == pair[1] {
            result.touches.push(pair[0]);
        } else {
            result.zones.push((pair[0], pair[1]));
        }
    }
    result
}

/// Bisection on a sign change in `[xa, xb]`. Returns the lower end of the
/// final bracket, or the midpoint as soon as it is an exact zero.
fn refine_crossing(f: &mut impl FnMut(f64) -> f64, xa: f64, xb: f64, settings: &BisectionSettings) -> f64 {
    let (mut xa, mut xb) = (xa, xb);
    let mut fa = f(xa);
    let mut iterations = 0;
    while iterations < settings.max_iterations && xb - xa > settings.tolerance {
        let xm = 0.5 * (xa + xb);
        let fm = f(xm);
        let sign = fa * fm;
        if sign > 0.0 {
            xa = xm;
            fa = fm;
        } else if sign < 0.0 {
            xb = xm;
        } else {
            return xm;
        }
        iterations += 1;
    }
    xa
}

/// Bisection on the boundaries of a zero run. Boundaries on the edge of the
/// sampled domain are kept as they are.
fn refine_zone(
    f: &mut impl FnMut(f64) -> f64,
    inputs: &[f64],
    (start, end): (usize, usize),
    settings: &BisectionSettings,
) -> (f64, f64) {
    let refine_start = start > 0;
    let refine_end = end + 1 < inputs.len();

    // (last non-zero, first zero) and (last zero, first non-zero).
    let (mut start_xa, mut start_xb) = if refine_start {
        (inputs[start - 1], inputs[start])
    } else {
        (inputs[0], inputs[0])
    };
    let (mut end_xa, mut end_xb) = if refine_end {
        (inputs[end], inputs[end + 1])
    } else {
        (inputs[end], inputs[end])
    };

    let mut iterations = 0;
    while iterations < settings.max_iterations
        && (start_xb - start_xa > settings.tolerance || end_xb - end_xa > settings.tolerance)
    {
        if refine_start {
            let xm = 0.5 * (start_xa + start_xb);
            if f(xm) == 0.0 {
                start_xb = xm;
            } else {
                start_xa = xm;
            }
        }
        if refine_end {
            let xm = 0.5 * (end_xa + end_xb);
            if f(xm) == 0.0 {
                end_xa = xm;
            } else {
                end_xb = xm;
            }
        }
        iterations += 1;
    }
    (start_xa, end_xa)
}

fn interpolate_crossing(inputs: &[f64], values: &[f64], i: usize) -> f64 {
    let (x1, x2) = (inputs[i], inputs[i + 1]);
    let (y1, y2) = (values[i], values[i + 1]);
    x1 - y1 * (x2 - x1) / (y2 - y1)
}

/// Every zero of `graph`, sorted by position.
///
/// Graphs that carry an expression are re-evaluated through `registry` at
/// off-grid points; the others are refined from their samples only.
pub fn find_zeros(
    graph: &SampledFunction,
    registry: &FunctionRegistry,
    settings: &BisectionSettings,
) -> Result<Vec<ZeroRecord>> {
    let inputs = &graph.inputs;
    let values = &graph.values;
    let found = scan(values);

    let mut zeros: Vec<ZeroRecord> = found
        .touches
        .iter()
        .map(|&i| ZeroRecord::Simple(inputs[i]))
        .collect();

    match &graph.rpn {
        Some(rpn) => {
            let program: Program = rpn
                .fold(registry)
                .compile(registry)
                .with_context(|| format!("cannot re-evaluate '{}' to refine its zeros", graph.label))?;
            let mut stack = Vec::new();
            let mut f = |x: f64| program.evaluate(x, &mut stack);
            for &i in &found.crossings {
                zeros.push(ZeroRecord::Simple(refine_crossing(
                    &mut f,
                    inputs[i],
                    inputs[i + 1],
                    settings,
                )));
            }
            for &zone in &found.zones {
                let (start, end) = refine_zone(&mut f, inputs, zone, settings);
                zeros.push(ZeroRecord::Zone { start, end });
            }
        }
        None => {
            for &i in &found.crossings {
                zeros.push(ZeroRecord::Simple(interpolate_crossing(inputs, values, i)));
            }
            for &(start, end) in &found.zones {
                zeros.push(ZeroRecord::Zone {
                    start: inputs[start],
                    end: inputs[end],
                });
            }
        }
    }

    zeros.sort_by(|a, b| {
        a.start()
            .total_cmp(&b.start())
            .then_with(|| a.end().unwrap_or(a.start()).total_cmp(&b.end().unwrap_or(b.start())))
    });
    log::debug!("'{}': {} zero(s) found", graph.label, zeros.len());
    Ok(zeros)
}

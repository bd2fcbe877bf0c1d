//! Sampled functions and the input sweeps they are built on.

use crate::registry::FunctionRegistry;
use crate::rpn::{self, Rpn, RpnError};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Interval and resolution of a linear input sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub start: f64,
    pub end: f64,
    pub points: usize,
    /// Round every input to the nearest integer and drop duplicates.
    pub integer: bool,
}

impl Default for Domain {
    fn default() -> Self {
        Self {
            start: -10.0,
            end: 10.0,
            points: 10_001,
            integer: false,
        }
    }
}

impl Domain {
    pub fn new(start: f64, end: f64, points: usize) -> Self {
        Self {
            start,
            end,
            points,
            integer: false,
        }
    }

    /// Bounds written as constant postfix expressions (`pi 2 *`, `e -u`).
    pub fn from_expressions(
        start: &str,
        end: &str,
        points: usize,
        registry: &FunctionRegistry,
    ) -> Result<Self> {
        let start = rpn::evaluate_constant(start, registry)
            .with_context(|| format!("cannot compute lower bound of x-axis '{start}'"))?;
        let end = rpn::evaluate_constant(end, registry)
            .with_context(|| format!("cannot compute upper bound of x-axis '{end}'"))?;
        if !start.is_finite() || !end.is_finite() {
            bail!("x-axis bounds must be finite, got [{}, {}].", start, end);
        }
        Ok(Self::new(start, end, points))
    }

    pub fn with_integer(mut self, integer: bool) -> Self {
        self.integer = integer;
        self
    }

    /// `(lower, upper)`, swapped when given in the wrong order.
    pub fn bounds(&self) -> (f64, f64) {
        if self.end < self.start {
            log::warn!(
                "the upper x bound ({}) is inferior to the lower x bound ({}), they will be swapped.",
                self.end,
                self.start
            );
            (self.end, self.start)
        } else {
            (self.start, self.end)
        }
    }

    /// The sweep itself, both bounds included, non-decreasing.
    pub fn inputs(&self) -> Vec<f64> {
        let (lower, upper) = self.bounds();
        let mut inputs = linspace(lower, upper, self.points);
        if self.integer {
            for x in inputs.iter_mut() {
                *x = x.round_ties_even();
            }
            inputs.dedup();
        }
        inputs
    }
}

/// `points` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (points - 1) as f64;
            let mut values: Vec<f64> = (0..points).map(|i| start + i as f64 * step).collect();
            values[points - 1] = end;
            values
        }
    }
}

/// Where the values of a sampled function came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphKind {
    Expression,
    Derivative,
    Data,
    Regression,
}

/// A function known only at a set of inputs.
///
/// `inputs` and `values` always have the same length and `inputs` is
/// non-decreasing. `rpn` is set when the values come from a live expression
/// that can be re-evaluated between grid points.
#[derive(Debug, Clone)]
pub struct SampledFunction {
    pub inputs: Vec<f64>,
    pub values: Vec<f64>,
    pub rpn: Option<Rpn>,
    pub label: String,
    pub kind: GraphKind,
}

impl SampledFunction {
    /// Validates `rpn`, then evaluates it over `inputs`.
    pub fn from_expression(
        rpn: Rpn,
        registry: &FunctionRegistry,
        inputs: Vec<f64>,
        label: impl Into<String>,
    ) -> Result<Self, RpnError> {
        rpn.validate(registry)?;
        let values = rpn.try_evaluate_many(registry, &inputs)?;
        Ok(Self {
            inputs,
            values,
            rpn: Some(rpn),
            label: label.into(),
            kind: GraphKind::Expression,
        })
    }

    /// Wraps external `(x, y)` samples, ordering them by `x`.
    pub fn from_data(inputs: Vec<f64>, values: Vec<f64>, label: impl Into<String>) -> Result<Self> {
        if inputs.len() != values.len() {
            bail!(
                "Data length mismatch: {} inputs for {} values.",
                inputs.len(),
                values.len()
            );
        }
        if inputs.iter().any(|x| x.is_nan()) {
            bail!("Data inputs must not contain NaN.");
        }

        let mut pairs: Vec<(f64, f64)> = inputs.into_iter().zip(values).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (inputs, values) = pairs.into_iter().unzip();
        Ok(Self {
            inputs,
            values,
            rpn: None,
            label: label.into(),
            kind: GraphKind::Data,
        })
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Distance between the first two inputs, taken as the grid spacing.
    pub fn spacing(&self) -> Result<f64> {
        if self.inputs.len() < 2 {
            bail!(
                "At least two samples are required, got {}.",
                self.inputs.len()
            );
        }
        let h = self.inputs[1] - self.inputs[0];
        if !(h > 0.0) || !h.is_finite() {
            bail!("Sample spacing must be positive and finite, got {}.", h);
        }
        Ok(h)
    }

    /// Values with every NaN replaced by 0.
    pub fn values_without_nan(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|&v| if v.is_nan() { 0.0 } else { v })
            .collect()
    }
}

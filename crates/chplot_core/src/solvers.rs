use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Model evaluated at a parameter vector, one prediction per data point.
pub type Model<'a> = dyn FnMut(&[f64]) -> Vec<f64> + 'a;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeastSquaresFit {
    pub parameters: Vec<f64>,
    /// Sum of squared residuals at `parameters`.
    pub cost: f64,
    pub iterations: usize,
    pub evaluations: usize,
}

/// Nonlinear least-squares: finds parameters minimizing
/// `sum((model(p)[i] - ydata[i])^2)` starting from `initial`.
pub trait LeastSquaresSolver {
    fn fit(&self, model: &mut Model<'_>, ydata: &[f64], initial: &[f64]) -> Result<LeastSquaresFit>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LmSettings {
    pub max_iterations: usize,
    /// Budget of model evaluations, Jacobian columns included.
    pub max_evaluations: usize,
    /// Stop when an accepted step reduces the cost by less than this fraction.
    pub ftol: f64,
    /// Stop when a step is smaller than this fraction of the parameter norm.
    pub xtol: f64,
    /// Stop when the largest gradient component falls under this value.
    pub gtol: f64,
    pub initial_lambda: f64,
}

impl Default for LmSettings {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            max_evaluations: 20_000,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-14,
            initial_lambda: 1e-3,
        }
    }
}

const MAX_LAMBDA: f64 = 1e16;

/// Levenberg-Marquardt with forward-difference Jacobians and Marquardt's
/// diagonal scaling of the damping term.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    pub settings: LmSettings,
}

impl LevenbergMarquardt {
    pub fn new(settings: LmSettings) -> Self {
        Self { settings }
    }
}

/// Residuals at one parameter vector. Points where the model is undefined
/// (non-finite prediction) contribute a zero residual and are flagged.
struct Residuals {
    values: DVector<f64>,
    defined: Vec<bool>,
}

impl Residuals {
    fn defined_count(&self) -> usize {
        self.defined.iter().filter(|&&d| d).count()
    }

    fn cost(&self) -> f64 {
        self.values.norm_squared()
    }
}

/// Residuals `model(p) - ydata`, counted as one evaluation.
fn residuals(
    model: &mut Model<'_>,
    parameters: &[f64],
    ydata: &[f64],
    evaluations: &mut usize,
) -> Result<Residuals> {
    let predictions = model(parameters);
    *evaluations += 1;
    if predictions.len() != ydata.len() {
        bail!(
            "Model returned {} values for {} data points.",
            predictions.len(),
            ydata.len()
        );
    }
    let defined: Vec<bool> = predictions.iter().map(|p| p.is_finite()).collect();
    let values = DVector::from_iterator(
        ydata.len(),
        predictions
            .iter()
            .zip(ydata)
            .map(|(p, y)| if p.is_finite() { p - y } else { 0.0 }),
    );
    Ok(Residuals { values, defined })
}

fn forward_jacobian(
    model: &mut Model<'_>,
    parameters: &DVector<f64>,
    residual: &Residuals,
    ydata: &[f64],
    evaluations: &mut usize,
) -> Result<DMatrix<f64>> {
    let m = residual.values.len();
    let n = parameters.len();
    let mut jacobian = DMatrix::zeros(m, n);
    let mut shifted: Vec<f64> = parameters.iter().copied().collect();
    for j in 0..n {
        let step = f64::EPSILON.sqrt() * parameters[j].abs().max(1.0);
        shifted[j] = parameters[j] + step;
        let column = residuals(model, &shifted, ydata, evaluations)?;
        shifted[j] = parameters[j];
        for i in 0..m {
            // Points where the model is undefined carry no slope information.
            if !(residual.defined[i] && column.defined[i]) {
                continue;
            }
            let derivative = (column.values[i] - residual.values[i]) / step;
            if derivative.is_finite() {
                jacobian[(i, j)] = derivative;
            }
        }
    }
    Ok(jacobian)
}

impl LeastSquaresSolver for LevenbergMarquardt {
    fn fit(&self, model: &mut Model<'_>, ydata: &[f64], initial: &[f64]) -> Result<LeastSquaresFit> {
        let settings = &self.settings;
        if initial.is_empty() {
            bail!("At least one parameter is required.");
        }
        if ydata.len() < initial.len() {
            bail!(
                "Not enough data points: {} points for {} parameters.",
                ydata.len(),
                initial.len()
            );
        }
        if settings.max_iterations == 0 || settings.max_evaluations == 0 {
            bail!("max_iterations and max_evaluations must be greater than zero.");
        }
        if settings.initial_lambda <= 0.0 {
            bail!("initial_lambda must be positive.");
        }

        let n = initial.len();
        let mut evaluations = 0usize;
        let mut parameters = DVector::from_column_slice(initial);
        let mut residual = residuals(model, initial, ydata, &mut evaluations)?;
        if residual.defined_count() == 0 {
            bail!("Initial parameters give non-finite residuals at every data point.");
        }
        let mut cost = residual.cost();
        if !cost.is_finite() {
            bail!("Initial parameters give non-finite residuals.");
        }
        let mut lambda = settings.initial_lambda;

        for iteration in 0..settings.max_iterations {
            let jacobian = forward_jacobian(model, &parameters, &residual, ydata, &mut evaluations)?;
            let gradient = jacobian.transpose() * &residual.values;
            if gradient.amax() <= settings.gtol {
                return Ok(LeastSquaresFit {
                    parameters: parameters.iter().copied().collect(),
                    cost,
                    iterations: iteration,
                    evaluations,
                });
            }

            let normal = jacobian.transpose() * &jacobian;
            let scaling: Vec<f64> = (0..n)
                .map(|j| if normal[(j, j)] > 0.0 { normal[(j, j)] } else { 1.0 })
                .collect();

            loop {
                if evaluations >= settings.max_evaluations {
                    bail!(
                        "Least-squares fit did not converge within {} evaluations (cost = {}).",
                        settings.max_evaluations,
                        cost
                    );
                }
                if lambda > MAX_LAMBDA {
                    // No step along the damped gradient improves the cost.
                    log::debug!("damping saturated after {} iterations", iteration);
                    return Ok(LeastSquaresFit {
                        parameters: parameters.iter().copied().collect(),
                        cost,
                        iterations: iteration,
                        evaluations,
                    });
                }

                let mut damped = normal.clone();
                for j in 0..n {
                    damped[(j, j)] += lambda * scaling[j];
                }
                let Some(step) = damped.lu().solve(&(-&gradient)) else {
                    lambda *= 10.0;
                    continue;
                };

                let candidate = &parameters + &step;
                let candidate_residual =
                    residuals(model, candidate.as_slice(), ydata, &mut evaluations)?;
                let candidate_cost = candidate_residual.cost();

                // Stepping into a region where the model is undefined at more
                // points would lower the cost by dropping data.
                if candidate_cost.is_finite()
                    && candidate_cost < cost
                    && candidate_residual.defined_count() >= residual.defined_count()
                {
                    let reduction = (cost - candidate_cost) / cost;
                    let small_step =
                        step.norm() <= settings.xtol * (parameters.norm() + settings.xtol);
                    parameters = candidate;
                    residual = candidate_residual;
                    cost = candidate_cost;
                    lambda = (lambda / 10.0).max(f64::MIN_POSITIVE);
                    if reduction <= settings.ftol || small_step {
                        return Ok(LeastSquaresFit {
                            parameters: parameters.iter().copied().collect(),
                            cost,
                            iterations: iteration + 1,
                            evaluations,
                        });
                    }
                    break;
                }
                lambda *= 10.0;
            }
        }

        bail!(
            "Least-squares fit did not converge in {} iterations (cost = {}).",
            settings.max_iterations,
            cost
        )
    }
}

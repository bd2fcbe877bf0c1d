//! Curve fitting of postfix expressions with free parameters.
//!
//! Parameters are names starting with `_r` followed by a letter, then any
//! letters, digits or underscores (`_ra`, `_rslope_2`). While fitting they
//! live in the registry as plain constants, so the expression is evaluated by
//! the usual batch path.

use crate::registry::FunctionRegistry;
use crate::rpn::{Rpn, Token};
use crate::sampling::{linspace, GraphKind, SampledFunction};
use crate::solvers::LeastSquaresSolver;
use anyhow::{bail, Context, Result};
use regex::{NoExpand, Regex};

pub const PARAMETER_PREFIX: &str = "_r";

pub fn is_parameter(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(PARAMETER_PREFIX) else {
        return false;
    };
    let mut chars = rest.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Unique parameter names of `rpn`, in order of first occurrence.
pub fn regression_parameters(rpn: &Rpn) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in rpn.names() {
        if is_parameter(name) && !names.iter().any(|known| known == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// A validated regression expression and its parameters.
#[derive(Debug, Clone)]
pub struct RegressionModel {
    rpn: Rpn,
    parameters: Vec<String>,
}

impl RegressionModel {
    /// Checks that `rpn` has at least one parameter and that it is a valid
    /// expression once every parameter is replaced by 0.
    pub fn new(rpn: Rpn, registry: &FunctionRegistry) -> Result<Self> {
        let parameters = regression_parameters(&rpn);
        if parameters.is_empty() {
            bail!(
                "no regression parameter (name starting with '{}') in '{}'",
                PARAMETER_PREFIX,
                rpn
            );
        }

        let mut zeroed = rpn.clone();
        for name in &parameters {
            zeroed = zeroed.substitute(name, &[Token::Number(0.0)]);
        }
        zeroed
            .validate(registry)
            .with_context(|| format!("invalid regression expression '{}'", rpn))?;

        Ok(Self { rpn, parameters })
    }

    pub fn rpn(&self) -> &Rpn {
        &self.rpn
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Binds every parameter to its value, then evaluates over `xs`.
    pub fn evaluate(&self, registry: &mut FunctionRegistry, values: &[f64], xs: &[f64]) -> Vec<f64> {
        debug_assert_eq!(values.len(), self.parameters.len());
        for (name, value) in self.parameters.iter().zip(values) {
            registry.insert_constant(name.as_str(), *value);
        }
        self.rpn.evaluate_many(registry, xs)
    }

    /// The expression with every parameter replaced by its value. Negative
    /// values are written as their magnitude followed by `-u`.
    pub fn fit_rpn(&self, values: &[f64]) -> Rpn {
        let mut rpn = self.rpn.clone();
        for (name, &value) in self.parameters.iter().zip(values) {
            let replacement = if value < 0.0 {
                vec![Token::Number(-value), Token::Name("-u".to_string())]
            } else {
                vec![Token::Number(value)]
            };
            rpn = rpn.substitute(name, &replacement);
        }
        rpn
    }
}

/// Replaces every whole-word occurrence of each parameter in an infix
/// expression by its parenthesized value.
pub fn fit_expression(expression: &str, names: &[String], values: &[f64]) -> Result<String> {
    let mut result = expression.to_string();
    for (name, value) in names.iter().zip(values) {
        let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(name)))?;
        let replacement = format!("({:?})", value);
        result = pattern
            .replace_all(&result, NoExpand(&replacement))
            .into_owned();
    }
    Ok(result)
}

#[derive(Debug, Clone)]
pub struct RegressionResult {
    /// Fitted values, named without their prefix.
    pub parameters: Vec<(String, f64)>,
    pub fit_rpn: Rpn,
    pub r_squared: f64,
    pub max_residual: f64,
    /// The fitted curve resampled over the data's range.
    pub graph: SampledFunction,
}

/// `(R^2, max |residual|)` over the pairs where the prediction is defined.
fn goodness_of_fit(ydata: &[f64], predictions: &[f64]) -> (f64, f64) {
    let pairs: Vec<(f64, f64)> = ydata
        .iter()
        .zip(predictions)
        .filter(|(_, p)| p.is_finite())
        .map(|(y, p)| (*y, *p))
        .collect();
    if pairs.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let mean = pairs.iter().map(|(y, _)| y).sum::<f64>() / pairs.len() as f64;
    let ss_res: f64 = pairs.iter().map(|(y, p)| (y - p).powi(2)).sum();
    let ss_tot: f64 = pairs.iter().map(|(y, _)| (y - mean).powi(2)).sum();
    let max_residual = pairs.iter().fold(0.0, |acc: f64, (y, p)| acc.max((y - p).abs()));
    let r_squared = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };
    (r_squared, max_residual)
}

/// Fits `model` to `data`, starting every parameter at 1.
///
/// Pairs where either coordinate is NaN are dropped first. The resulting
/// curve has `points` samples over `[min(x), max(x)]`. The parameters stay
/// registered in `registry` with their fitted values.
pub fn fit(
    model: &RegressionModel,
    data: &SampledFunction,
    registry: &mut FunctionRegistry,
    solver: &dyn LeastSquaresSolver,
    points: usize,
) -> Result<RegressionResult> {
    let (xdata, ydata): (Vec<f64>, Vec<f64>) = data
        .inputs
        .iter()
        .zip(&data.values)
        .filter(|(x, y)| !x.is_nan() && !y.is_nan())
        .map(|(x, y)| (*x, *y))
        .unzip();
    if xdata.is_empty() {
        bail!("'{}' has no defined sample to fit", data.label);
    }

    for name in model.parameters() {
        if registry.contains(name) {
            log::debug!("regression parameter '{}' replaces an existing entry", name);
        }
    }

    let initial = vec![1.0; model.parameters().len()];
    let mut objective = |values: &[f64]| model.evaluate(registry, values, &xdata);
    let fitted = solver
        .fit(&mut objective, &ydata, &initial)
        .with_context(|| format!("regression of '{}' failed", data.label))?;
    let values = fitted.parameters;

    let predictions = model.evaluate(registry, &values, &xdata);
    let (r_squared, max_residual) = goodness_of_fit(&ydata, &predictions);

    let fit_rpn = model.fit_rpn(&values);
    let lower = xdata.iter().copied().fold(f64::INFINITY, f64::min);
    let upper = xdata.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let inputs = linspace(lower, upper, points);
    let curve = fit_rpn.evaluate_many(registry, &inputs);

    let parameters: Vec<(String, f64)> = model
        .parameters()
        .iter()
        .zip(&values)
        .map(|(name, value)| {
            let short = name.strip_prefix(PARAMETER_PREFIX).unwrap_or(name);
            (short.to_string(), *value)
        })
        .collect();
    for (name, value) in &parameters {
        log::info!("regression of '{}': {} = {}", data.label, name, value);
    }

    Ok(RegressionResult {
        parameters,
        fit_rpn: fit_rpn.clone(),
        r_squared,
        max_residual,
        graph: SampledFunction {
            inputs,
            values: curve,
            rpn: Some(fit_rpn),
            label: format!("Regression [{}]", data.label),
            kind: GraphKind::Regression,
        },
    })
}

/// Fits `model` to every graph, skipping (with a warning) those that fail.
pub fn fit_each<'a, I>(
    model: &RegressionModel,
    graphs: I,
    registry: &mut FunctionRegistry,
    solver: &dyn LeastSquaresSolver,
    points: usize,
) -> Vec<RegressionResult>
where
    I: IntoIterator<Item = &'a SampledFunction>,
{
    let mut results = Vec::new();
    for graph in graphs {
        match fit(model, graph, registry, solver, points) {
            Ok(result) => results.push(result),
            Err(err) => log::warn!("regression skipped: {:#}", err),
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::{
        fit, fit_each, fit_expression, is_parameter, regression_parameters, RegressionModel,
    };
    use crate::registry::FunctionRegistry;
    use crate::rpn::Rpn;
    use crate::sampling::{linspace, GraphKind, SampledFunction};
    use crate::solvers::LevenbergMarquardt;

    fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn parse(text: &str) -> Rpn {
        Rpn::parse(text, Some("x")).expect("expression should tokenize")
    }

    fn data(f: impl Fn(f64) -> f64, start: f64, end: f64, points: usize) -> SampledFunction {
        let inputs = linspace(start, end, points);
        let values = inputs.iter().map(|&x| f(x)).collect();
        SampledFunction::from_data(inputs, values, "data").expect("valid data")
    }

    #[test]
    fn parameters_are_unique_and_ordered() {
        let rpn = parse("_rab x * _ra + _rab - _r1 + _r -");
        assert_eq!(regression_parameters(&rpn), vec!["_rab", "_ra"]);
        assert!(is_parameter("_rslope_2"));
        assert!(!is_parameter("_r"));
        assert!(!is_parameter("_r1"));
        assert!(!is_parameter("_ra-b"));
        assert!(!is_parameter("ra"));
    }

    #[test]
    fn models_need_parameters_and_a_valid_shape() {
        let registry = FunctionRegistry::with_core();
        assert_err_contains(
            RegressionModel::new(parse("x 2 *"), &registry),
            "no regression parameter",
        );
        assert_err_contains(
            RegressionModel::new(parse("_ra x sin *"), &registry),
            "unknown function: 'sin'",
        );
        assert_err_contains(
            RegressionModel::new(parse("_ra x"), &registry),
            "does not give only one result",
        );
        let model = RegressionModel::new(parse("_ra x / _rb +"), &registry).expect("valid");
        assert_eq!(model.parameters(), ["_ra", "_rb"]);
    }

    #[test]
    fn recovers_a_slope() {
        let mut registry = FunctionRegistry::with_core();
        let model = RegressionModel::new(parse("_ra x *"), &registry).expect("valid");
        let samples = data(|x| 3.0 * x, -1.0, 1.0, 21);
        let result = fit(
            &model,
            &samples,
            &mut registry,
            &LevenbergMarquardt::default(),
            101,
        )
        .expect("fit");

        assert_eq!(result.parameters.len(), 1);
        assert_eq!(result.parameters[0].0, "a");
        assert!((result.parameters[0].1 - 3.0).abs() < 1e-6);
        assert!((result.r_squared - 1.0).abs() < 1e-9);
        assert!(result.max_residual < 1e-6);

        let fresh = FunctionRegistry::with_core();
        let replayed = result.fit_rpn.evaluate_many(&fresh, &samples.inputs);
        for (y, expected) in replayed.iter().zip(&samples.values) {
            assert!((y - expected).abs() < 1e-6);
        }

        assert_eq!(result.graph.label, "Regression [data]");
        assert_eq!(result.graph.kind, GraphKind::Regression);
        assert_eq!(result.graph.len(), 101);
        assert_eq!(result.graph.inputs[0], -1.0);
        assert_eq!(result.graph.inputs[100], 1.0);
    }

    #[test]
    fn recovers_a_cubic() {
        let mut registry = FunctionRegistry::with_core();
        let model = RegressionModel::new(
            parse("_ra x 3 ^ * _rb x x * * + _rc x * + _rd +"),
            &registry,
        )
        .expect("valid");
        let samples = data(|x| 0.5 * x.powi(3) - 2.0 * x * x + x - 3.0, -2.0, 2.0, 1000);
        let result = fit(
            &model,
            &samples,
            &mut registry,
            &LevenbergMarquardt::default(),
            10,
        )
        .expect("fit");
        let expected = [0.5, -2.0, 1.0, -3.0];
        for ((_, value), expected) in result.parameters.iter().zip(expected) {
            assert!((value - expected).abs() < 1e-6, "got {value}, expected {expected}");
        }
        assert!(result.fit_rpn.to_string().contains("-u"));
    }

    #[test]
    fn undefined_samples_are_dropped() {
        let mut registry = FunctionRegistry::with_core();
        let model = RegressionModel::new(parse("_ra x * _rb +"), &registry).expect("valid");
        let mut samples = data(|x| 2.0 * x + 1.0, 0.0, 4.0, 41);
        samples.values[7] = f64::NAN;
        samples.values[20] = f64::NAN;
        let result = fit(
            &model,
            &samples,
            &mut registry,
            &LevenbergMarquardt::default(),
            5,
        )
        .expect("fit");
        assert!((result.parameters[0].1 - 2.0).abs() < 1e-6);
        assert!((result.parameters[1].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn model_undefined_on_part_of_the_data_still_fits() {
        let mut registry = FunctionRegistry::with_all();
        let model = RegressionModel::new(parse("_ra x sqrt *"), &registry).expect("valid");
        let samples = data(|x| if x < 0.0 { 0.0 } else { 3.0 * x.sqrt() }, -0.1, 4.0, 42);
        let result = fit(
            &model,
            &samples,
            &mut registry,
            &LevenbergMarquardt::default(),
            42,
        )
        .expect("fit");
        assert!((result.parameters[0].1 - 3.0).abs() < 1e-6);
        assert!(result.max_residual < 1e-6);
        assert!(result.graph.values[0].is_nan());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn evaluate_needs_one_value_per_parameter() {
        let mut registry = FunctionRegistry::with_core();
        let model = RegressionModel::new(parse("_ra x * _rb +"), &registry).expect("valid");
        model.evaluate(&mut registry, &[1.0], &[0.0, 1.0]);
    }

    #[test]
    fn constant_data_has_unit_r_squared() {
        let mut registry = FunctionRegistry::with_core();
        let model = RegressionModel::new(parse("_rk"), &registry).expect("valid");
        let samples = data(|_| 2.0, 0.0, 1.0, 11);
        let result = fit(
            &model,
            &samples,
            &mut registry,
            &LevenbergMarquardt::default(),
            3,
        )
        .expect("fit");
        assert!((result.parameters[0].1 - 2.0).abs() < 1e-9);
        assert_eq!(result.r_squared, 1.0);
    }

    #[test]
    fn failed_fits_are_skipped() {
        let mut registry = FunctionRegistry::with_core();
        let model = RegressionModel::new(parse("_ra _rb x * +"), &registry).expect("valid");
        let good = data(|x| x + 1.0, 0.0, 1.0, 11);
        let empty = SampledFunction::from_data(vec![0.0, 1.0], vec![f64::NAN, f64::NAN], "holes")
            .expect("valid data");
        let results = fit_each(
            &model,
            [&empty, &good],
            &mut registry,
            &LevenbergMarquardt::default(),
            3,
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].graph.label, "Regression [data]");
    }

    #[test]
    fn fit_rpn_writes_negative_values_with_unary_minus() {
        let registry = FunctionRegistry::with_core();
        let model = RegressionModel::new(parse("_ra x * _rb +"), &registry).expect("valid");
        let rpn = model.fit_rpn(&[-2.5, 0.25]);
        assert_eq!(rpn.to_string(), "2.5 -u x * 0.25 +");
        assert_eq!(rpn.evaluate(&registry, 2.0), -4.75);
    }

    #[test]
    fn fit_expression_substitutes_whole_words() {
        let names = vec!["_ra".to_string(), "_rb".to_string()];
        assert_eq!(
            fit_expression("_ra * x + _rb", &names, &[1.5, -0.3]).expect("valid"),
            "(1.5) * x + (-0.3)"
        );

        let names = vec!["_ra".to_string(), "_rab".to_string()];
        assert_eq!(
            fit_expression("_ra + _rab*sin(x)", &names, &[1.0, 2.0]).expect("valid"),
            "(1.0) + (2.0)*sin(x)"
        );
    }
}

/// The `chplot_core` crate is the numeric engine behind chplot: it evaluates
/// postfix (RPN) expressions of one free variable over large input sweeps and
/// analyses the sampled curves.
///
/// Key components:
/// - **Registry**: `FunctionRegistry`, the name -> (arity, operation) table passed to every evaluation, populated lazily from the `Builtin` catalogue.
/// - **RPN**: tokenizer, validator, constant folding and a compiled stack program for batch evaluation.
/// - **Analysis**: finite-difference derivatives, zero and zero-zone location, trapezoidal integrals.
/// - **Regression**: least-squares fitting of expressions with `_r` parameters (Levenberg-Marquardt).
pub mod builtins;
pub mod derivative;
pub mod integral;
pub mod registry;
pub mod regression;
pub mod rpn;
pub mod sampling;
pub mod solvers;
pub mod special;
pub mod zeros;

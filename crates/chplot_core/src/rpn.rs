use crate::builtins::{Builtin, NumericError};
use crate::registry::{Entry, FunctionRegistry, NativeFunction};
use std::fmt;
use thiserror::Error;

/// Structural problems of a postfix sequence, found before any evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpnError {
    #[error("unknown function: '{0}'")]
    UnknownFunction(String),
    #[error("not enough parameters for function '{name}': {found} found, {expected} expected.")]
    ArityMismatch {
        name: String,
        found: usize,
        expected: usize,
    },
    #[error("expression does not give only one result.")]
    MultipleResults,
    #[error("expression does not give any result.")]
    EmptyExpression,
    #[error("invalid number: '{0}'")]
    InvalidLiteral(String),
}

/// Why a single evaluation produced no number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Structure(#[from] RpnError),
    #[error(transparent)]
    Numeric(#[from] NumericError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    /// The free variable.
    Variable,
    /// Anything resolved through the registry: operators, functions, constants.
    Name(String),
}

/// A tokenized postfix expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Rpn {
    tokens: Vec<Token>,
    variable: Option<String>,
}

/// A token looks numeric when it starts with a digit or a decimal point, or
/// with a sign directly followed by one (`-u` and `+` stay operators).
fn is_numeric(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() || c == '.' => true,
        Some('+') | Some('-') => matches!(chars.next(), Some(c) if c.is_ascii_digit() || c == '.'),
        _ => false,
    }
}

impl Rpn {
    /// Splits a space-separated postfix string. `variable` is the name of the
    /// free variable, `None` for constant expressions.
    pub fn parse(text: &str, variable: Option<&str>) -> Result<Self, RpnError> {
        let mut tokens = Vec::new();
        for raw in text.split(' ').filter(|raw| !raw.is_empty()) {
            let token = if is_numeric(raw) {
                Token::Number(
                    raw.parse()
                        .map_err(|_| RpnError::InvalidLiteral(raw.to_string()))?,
                )
            } else if Some(raw) == variable {
                Token::Variable
            } else {
                Token::Name(raw.to_string())
            };
            tokens.push(token);
        }
        if tokens.is_empty() {
            return Err(RpnError::EmptyExpression);
        }
        Ok(Self {
            tokens,
            variable: variable.map(str::to_string),
        })
    }

    pub fn from_tokens(tokens: Vec<Token>, variable: Option<&str>) -> Self {
        Self {
            tokens,
            variable: variable.map(str::to_string),
        }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn variable(&self) -> Option<&str> {
        self.variable.as_deref()
    }

    /// Names referenced by the expression, in order, duplicates included.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|token| match token {
            Token::Name(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Replays the stack machine with the free variable fixed at 0 to catch
    /// structural errors. Numeric failures are replaced by 0: only the shape
    /// of the expression is checked here.
    pub fn validate(&self, registry: &FunctionRegistry) -> Result<(), RpnError> {
        let mut stack: Vec<f64> = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            match token {
                Token::Number(value) => stack.push(*value),
                Token::Variable => stack.push(0.0),
                Token::Name(name) => {
                    let entry = registry
                        .lookup(name)
                        .ok_or_else(|| RpnError::UnknownFunction(name.clone()))?;
                    let arity = entry.arity();
                    if stack.len() < arity {
                        return Err(RpnError::ArityMismatch {
                            name: name.clone(),
                            found: stack.len(),
                            expected: arity,
                        });
                    }
                    let base = stack.len() - arity;
                    let result = entry.apply(&stack[base..]).unwrap_or(0.0);
                    stack.truncate(base);
                    stack.push(result);
                }
            }
        }
        match stack.len() {
            0 => Err(RpnError::EmptyExpression),
            1 => Ok(()),
            _ => Err(RpnError::MultipleResults),
        }
    }

    /// Evaluates at `x`, reporting why no number came out.
    ///
    /// The result may be infinite; [`Rpn::evaluate`] is the variant that
    /// canonicalizes to NaN.
    pub fn try_evaluate(&self, registry: &FunctionRegistry, x: f64) -> Result<f64, EvalError> {
        let program = self.compile(registry)?;
        program.execute(x, &mut Vec::with_capacity(program.max_depth))
    }

    /// Evaluates at `x`. Any failure, and any infinite result, gives NaN.
    pub fn evaluate(&self, registry: &FunctionRegistry, x: f64) -> f64 {
        collapse(self.try_evaluate(registry, x))
    }

    /// Collapses every sub-sequence that does not depend on the free variable
    /// into a single literal. The result evaluates identically for every `x`.
    ///
    /// An operator is applied only when all of its operands are literals and
    /// the application succeeds; otherwise it is kept as is. Unknown names are
    /// kept too, so validation still reports them afterwards.
    pub fn fold(&self, registry: &FunctionRegistry) -> Rpn {
        let mut folded: Vec<Token> = Vec::with_capacity(self.tokens.len());
        let mut operands: Vec<f64> = Vec::new();
        for token in &self.tokens {
            let Token::Name(name) = token else {
                folded.push(token.clone());
                continue;
            };
            let Some(entry) = registry.lookup(name) else {
                folded.push(token.clone());
                continue;
            };
            let arity = entry.arity();
            if folded.len() < arity {
                folded.push(token.clone());
                continue;
            }
            let base = folded.len() - arity;
            operands.clear();
            for operand in &folded[base..] {
                match operand {
                    Token::Number(value) => operands.push(*value),
                    _ => break,
                }
            }
            if operands.len() != arity {
                folded.push(token.clone());
                continue;
            }
            match entry.apply(&operands) {
                Ok(value) => {
                    folded.truncate(base);
                    folded.push(Token::Number(value));
                }
                Err(_) => folded.push(token.clone()),
            }
        }
        Rpn {
            tokens: folded,
            variable: self.variable.clone(),
        }
    }

    /// Resolves every name once and checks the stack discipline, producing a
    /// program that can be run many times without further lookups.
    pub fn compile(&self, registry: &FunctionRegistry) -> Result<Program, RpnError> {
        let mut ops = Vec::with_capacity(self.tokens.len());
        let mut depth = 0usize;
        let mut max_depth = 0usize;
        for token in &self.tokens {
            let (op, arity) = match token {
                Token::Number(value) => (OpCode::LoadConst(*value), 0),
                Token::Variable => (OpCode::LoadVar, 0),
                Token::Name(name) => {
                    let entry = registry
                        .lookup(name)
                        .ok_or_else(|| RpnError::UnknownFunction(name.clone()))?;
                    let arity = entry.arity();
                    if depth < arity {
                        return Err(RpnError::ArityMismatch {
                            name: name.clone(),
                            found: depth,
                            expected: arity,
                        });
                    }
                    let op = match entry {
                        Entry::Constant(value) => OpCode::LoadConst(*value),
                        Entry::Builtin(builtin) => OpCode::Apply(*builtin),
                        Entry::Native(native) => OpCode::Call(native.clone()),
                    };
                    (op, arity)
                }
            };
            depth = depth - arity + 1;
            max_depth = max_depth.max(depth);
            ops.push(op);
        }
        match depth {
            0 => Err(RpnError::EmptyExpression),
            1 => Ok(Program { ops, max_depth }),
            _ => Err(RpnError::MultipleResults),
        }
    }

    /// Batch evaluation: folds and compiles once, then runs the program for
    /// every input. One output per input; a failing sample only affects
    /// itself.
    pub fn try_evaluate_many(
        &self,
        registry: &FunctionRegistry,
        xs: &[f64],
    ) -> Result<Vec<f64>, RpnError> {
        let program = self.fold(registry).compile(registry)?;
        let mut stack = Vec::with_capacity(program.max_depth);
        Ok(xs
            .iter()
            .map(|&x| collapse(program.execute(x, &mut stack)))
            .collect())
    }

    /// Like [`Rpn::try_evaluate_many`], but a structurally invalid expression
    /// yields NaN everywhere instead of an error.
    pub fn evaluate_many(&self, registry: &FunctionRegistry, xs: &[f64]) -> Vec<f64> {
        self.try_evaluate_many(registry, xs).unwrap_or_else(|err| {
            log::warn!("cannot evaluate '{}': {}", self, err);
            vec![f64::NAN; xs.len()]
        })
    }

    /// Replaces every occurrence of the name `name` by `replacement`.
    pub fn substitute(&self, name: &str, replacement: &[Token]) -> Rpn {
        let mut tokens = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            match token {
                Token::Name(candidate) if candidate == name => {
                    tokens.extend_from_slice(replacement)
                }
                _ => tokens.push(token.clone()),
            }
        }
        Rpn {
            tokens,
            variable: self.variable.clone(),
        }
    }
}

impl fmt::Display for Rpn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match token {
                Token::Number(value) => write_number(f, *value)?,
                Token::Variable => f.write_str(self.variable.as_deref().unwrap_or("x"))?,
                Token::Name(name) => f.write_str(name)?,
            }
        }
        Ok(())
    }
}

/// Writes a literal so that it tokenizes back to the same value.
fn write_number(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_nan() {
        f.write_str("nan")
    } else if value == f64::INFINITY {
        f.write_str("inf")
    } else if value == f64::NEG_INFINITY {
        f.write_str("inf -u")
    } else {
        write!(f, "{:?}", value)
    }
}

fn collapse(result: Result<f64, EvalError>) -> f64 {
    match result {
        Ok(value) if !value.is_infinite() => value,
        _ => f64::NAN,
    }
}

/// Instructions of a compiled expression.
#[derive(Debug, Clone)]
pub enum OpCode {
    /// Pushes a literal or a constant resolved at compile time.
    LoadConst(f64),
    /// Pushes the free variable.
    LoadVar,
    /// Pops `arity` operands, pushes the built-in's result.
    Apply(Builtin),
    /// Pops `arity` operands, pushes the native function's result.
    Call(NativeFunction),
}

/// A compiled expression. Its stack discipline was checked by
/// [`Rpn::compile`].
#[derive(Debug, Clone)]
pub struct Program {
    ops: Vec<OpCode>,
    max_depth: usize,
}

impl Program {
    pub fn ops(&self) -> &[OpCode] {
        &self.ops
    }

    /// Runs the program with the free variable bound to `x`. `stack` is a
    /// scratch buffer reused across calls.
    pub fn execute(&self, x: f64, stack: &mut Vec<f64>) -> Result<f64, EvalError> {
        stack.clear();
        for op in &self.ops {
            match op {
                OpCode::LoadConst(value) => stack.push(*value),
                OpCode::LoadVar => stack.push(x),
                OpCode::Apply(builtin) => {
                    let base = operand_base(stack, builtin.arity(), builtin.name())?;
                    let value = builtin.apply(&stack[base..])?;
                    stack.truncate(base);
                    stack.push(value);
                }
                OpCode::Call(native) => {
                    let base = operand_base(stack, native.arity(), "<native>")?;
                    let value = native.call(&stack[base..])?;
                    stack.truncate(base);
                    stack.push(value);
                }
            }
        }
        stack.pop().ok_or(EvalError::Structure(RpnError::EmptyExpression))
    }

    /// Single evaluation where failures and infinities become NaN.
    pub fn evaluate(&self, x: f64, stack: &mut Vec<f64>) -> f64 {
        collapse(self.execute(x, stack))
    }

    /// Evaluates at every input; failures and infinities become NaN.
    pub fn evaluate_many(&self, xs: &[f64]) -> Vec<f64> {
        let mut stack = Vec::with_capacity(self.max_depth);
        xs.iter()
            .map(|&x| collapse(self.execute(x, &mut stack)))
            .collect()
    }
}

fn operand_base(stack: &[f64], arity: usize, name: &str) -> Result<usize, RpnError> {
    stack
        .len()
        .checked_sub(arity)
        .ok_or_else(|| RpnError::ArityMismatch {
            name: name.to_string(),
            found: stack.len(),
            expected: arity,
        })
}

/// Evaluates an expression without free variable (e.g. `pi 2 /`).
pub fn evaluate_constant(text: &str, registry: &FunctionRegistry) -> Result<f64, RpnError> {
    let rpn = Rpn::parse(text, None)?;
    rpn.validate(registry)?;
    Ok(rpn.evaluate(registry, 0.0))
}

//! Name -> (arity, operation) lookup table used by the evaluator.
//!
//! The registry is an explicit value passed to every evaluation call instead of
//! process-wide state. It is a flat namespace: inserting an existing name
//! replaces the previous entry, and the replaced entry is handed back so the
//! caller can decide whether the shadowing deserves a warning.

use crate::builtins::{Builtin, FunctionGroup, NumericError, CONSTANTS};
use crate::rpn::{self, Rpn, Token};
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A user-supplied operation of fixed arity.
#[derive(Clone)]
pub struct NativeFunction {
    arity: usize,
    func: Arc<dyn Fn(&[f64]) -> Result<f64, NumericError> + Send + Sync>,
}

impl NativeFunction {
    pub fn new<F>(arity: usize, func: F) -> Self
    where
        F: Fn(&[f64]) -> Result<f64, NumericError> + Send + Sync + 'static,
    {
        Self {
            arity,
            func: Arc::new(func),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn call(&self, args: &[f64]) -> Result<f64, NumericError> {
        (self.func)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// What a name resolves to.
#[derive(Debug, Clone)]
pub enum Entry {
    /// Arity-0 entry holding its pre-computed value.
    Constant(f64),
    Builtin(Builtin),
    Native(NativeFunction),
}

impl Entry {
    pub fn arity(&self) -> usize {
        match self {
            Entry::Constant(_) => 0,
            Entry::Builtin(builtin) => builtin.arity(),
            Entry::Native(native) => native.arity(),
        }
    }

    /// Applies the entry to exactly `arity()` operands.
    pub fn apply(&self, args: &[f64]) -> Result<f64, NumericError> {
        match self {
            Entry::Constant(value) => Ok(*value),
            Entry::Builtin(builtin) => builtin.apply(args),
            Entry::Native(native) => native.call(args),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, Entry>,
    loaded_groups: HashSet<FunctionGroup>,
}

impl FunctionRegistry {
    /// An empty registry: not even `+` is known.
    pub fn new() -> Self {
        Self::default()
    }

    /// Operators, `abs`/`min`/`max` and the constant table. Other built-in
    /// groups are added on demand by [`FunctionRegistry::load_necessary`].
    pub fn with_core() -> Self {
        let mut registry = Self::new();
        for &(name, value) in CONSTANTS {
            registry.insert_constant(name, value);
        }
        registry.load_group(FunctionGroup::Core);
        registry
    }

    /// Every built-in group, loaded eagerly.
    pub fn with_all() -> Self {
        let mut registry = Self::with_core();
        for group in [
            FunctionGroup::Math,
            FunctionGroup::Other,
            FunctionGroup::Probability,
        ] {
            registry.load_group(group);
        }
        registry
    }

    pub fn lookup(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert-or-replace. Returns the entry previously bound to `name`.
    pub fn insert(&mut self, name: impl Into<String>, entry: Entry) -> Option<Entry> {
        self.entries.insert(name.into(), entry)
    }

    pub fn insert_constant(&mut self, name: impl Into<String>, value: f64) -> Option<Entry> {
        self.insert(name, Entry::Constant(value))
    }

    pub fn insert_function<F>(&mut self, name: impl Into<String>, arity: usize, func: F) -> Option<Entry>
    where
        F: Fn(&[f64]) -> Result<f64, NumericError> + Send + Sync + 'static,
    {
        self.insert(name, Entry::Native(NativeFunction::new(arity, func)))
    }

    pub fn is_loaded(&self, group: FunctionGroup) -> bool {
        self.loaded_groups.contains(&group)
    }

    /// Registers every built-in of `group`. Names the caller already bound are
    /// left alone so user definitions keep shadowing built-ins.
    pub fn load_group(&mut self, group: FunctionGroup) {
        if !self.loaded_groups.insert(group) {
            return;
        }
        for (name, builtin) in Builtin::names_in(group) {
            self.entries
                .entry(name.to_string())
                .or_insert(Entry::Builtin(builtin));
        }
    }

    /// Scans the tokens of every expression and loads each built-in group
    /// that at least one of them references. Returns the newly loaded groups.
    pub fn load_necessary<'a, I>(&mut self, rpns: I) -> Vec<FunctionGroup>
    where
        I: IntoIterator<Item = &'a Rpn>,
    {
        let mut wanted = HashSet::new();
        for rpn in rpns {
            for token in rpn.tokens() {
                if let Token::Name(name) = token {
                    if let Some(builtin) = Builtin::from_name(name) {
                        wanted.insert(builtin.group());
                    }
                }
            }
        }

        let mut loaded = Vec::new();
        for group in [
            FunctionGroup::Core,
            FunctionGroup::Math,
            FunctionGroup::Other,
            FunctionGroup::Probability,
        ] {
            if wanted.contains(&group) && !self.is_loaded(group) {
                self.load_group(group);
                log::debug!("loaded {:?} functions", group);
                loaded.push(group);
            }
        }
        loaded
    }

    /// Evaluates a constant postfix expression and binds its value to `name`.
    ///
    /// Returns `Ok(None)` (and registers nothing) when the expression evaluates
    /// to NaN. Shadowing an existing name is allowed but logged.
    pub fn define_constant(&mut self, name: &str, expression: &str) -> Result<Option<f64>> {
        let value = rpn::evaluate_constant(expression, self)
            .with_context(|| format!("invalid expression for constant '{name}'"))?;
        if value.is_nan() {
            log::warn!("constant '{name}' = '{expression}' is not a number, it is ignored");
            return Ok(None);
        }
        if self.insert_constant(name, value).is_some() {
            log::warn!("constant '{name}' overrides an existing function or constant");
        }
        Ok(Some(value))
    }
}

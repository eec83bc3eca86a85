//! Option values and key routing.
//!
//! Composite option keys have the form `<module>_<option>`. Keys tagged with
//! the condensing strategy's tag are stripped and forwarded to the strategy;
//! every other key belongs to the backend and is forwarded whole, so backend
//! option names may themselves contain the separator.

use std::fmt;

use crate::error::{XcondError, XcondResult};

/// Separator between module tag and option name.
pub const SEPARATOR: char = '_';

/// Value handed to an option setter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl OptValue {
    pub fn as_f64(&self, key: &str) -> XcondResult<f64> {
        match *self {
            OptValue::Float(v) => Ok(v),
            OptValue::Int(v) => Ok(v as f64),
            OptValue::Bool(_) => Err(type_err(key, "a number")),
        }
    }

    /// Non-negative integer; floats are accepted when integral.
    pub fn as_usize(&self, key: &str) -> XcondResult<usize> {
        match *self {
            OptValue::Int(v) if v >= 0 => Ok(v as usize),
            OptValue::Float(v) if v >= 0.0 && v.fract() == 0.0 => Ok(v as usize),
            _ => Err(type_err(key, "a non-negative integer")),
        }
    }

    /// Booleans, or integers read as flags.
    pub fn as_bool(&self, key: &str) -> XcondResult<bool> {
        match *self {
            OptValue::Bool(v) => Ok(v),
            OptValue::Int(v) => Ok(v != 0),
            OptValue::Float(_) => Err(type_err(key, "a flag")),
        }
    }
}

fn type_err(key: &str, expected: &'static str) -> XcondError {
    XcondError::OptionType {
        key: key.to_string(),
        expected,
    }
}

impl From<f64> for OptValue {
    fn from(v: f64) -> Self {
        OptValue::Float(v)
    }
}

impl From<i64> for OptValue {
    fn from(v: i64) -> Self {
        OptValue::Int(v)
    }
}

impl From<i32> for OptValue {
    fn from(v: i32) -> Self {
        OptValue::Int(v.into())
    }
}

impl From<usize> for OptValue {
    fn from(v: usize) -> Self {
        OptValue::Int(v as i64)
    }
}

impl From<bool> for OptValue {
    fn from(v: bool) -> Self {
        OptValue::Bool(v)
    }
}

impl fmt::Display for OptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptValue::Int(v) => write!(f, "{v}"),
            OptValue::Float(v) => write!(f, "{v:e}"),
            OptValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Destination of an option key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionRoute<'k> {
    /// Forward to the condensing strategy under the stripped name.
    Strategy(&'k str),
    /// Forward to the QP backend under the full key.
    Backend(&'k str),
}

/// Routing table from module tag to setter, built once per solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionRouter {
    strategy_tag: &'static str,
}

impl OptionRouter {
    pub fn new(strategy_tag: &'static str) -> Self {
        debug_assert!(!strategy_tag.is_empty() && !strategy_tag.contains(SEPARATOR));
        Self { strategy_tag }
    }

    pub fn strategy_tag(&self) -> &'static str {
        self.strategy_tag
    }

    pub fn route<'k>(&self, key: &'k str) -> XcondResult<OptionRoute<'k>> {
        let invalid = |reason| XcondError::InvalidOption {
            key: key.to_string(),
            reason,
        };

        if key.is_empty() {
            return Err(invalid("empty key"));
        }
        match key.split_once(SEPARATOR) {
            Some(("", _)) => Err(invalid("empty module tag")),
            Some((tag, "")) if tag == self.strategy_tag => Err(invalid("missing option name")),
            Some((tag, name)) if tag == self.strategy_tag => Ok(OptionRoute::Strategy(name)),
            Some(_) => Ok(OptionRoute::Backend(key)),
            None if key == self.strategy_tag => Err(invalid("missing option name")),
            None => Ok(OptionRoute::Backend(key)),
        }
    }
}

// Copyright 2025 The Gridlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The canonical sparse affine representation handed to the LP builder:
//! an insertion-ordered map of terms plus a constant.  Term order never
//! affects semantics, but keeping it deterministic keeps printed output
//! and golden tests stable across runs and reimplementations.

use std::fmt;
use std::ops;

use float_cmp::{approx_eq, F64Margin};
use indexmap::IndexMap;

use crate::ast::TimeIndex;
use crate::common::{Ident, Result};
use crate::comp_err;

/// Coefficients smaller than this in magnitude are treated as zero: they
/// are pruned from term maps, and the printer uses the same threshold to
/// pick signs.  Golden outputs depend on this exact value.
pub const EPS: f64 = 1e-16;

/// Identifies one decision-variable instance: a component's variable at an
/// optional time and scenario index.  The LP builder maps each distinct key
/// to one solver column.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TermKey {
    pub component: Ident,
    pub variable: Ident,
    pub time: Option<TimeIndex>,
    pub scenario: Option<usize>,
}

impl fmt::Display for TermKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.variable)?;
        match (self.time, self.scenario) {
            (None, None) => Ok(()),
            (Some(t), None) => write!(f, "[{t}]"),
            (None, Some(s)) => write!(f, "[s{s}]"),
            (Some(t), Some(s)) => write!(f, "[{t}, s{s}]"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Term {
    pub coeff: f64,
    pub component: Ident,
    pub variable: Ident,
    pub time: Option<TimeIndex>,
    pub scenario: Option<usize>,
}

impl Term {
    pub fn new<C: Into<Ident>, V: Into<Ident>>(coeff: f64, component: C, variable: V) -> Self {
        Term {
            coeff,
            component: component.into(),
            variable: variable.into(),
            time: None,
            scenario: None,
        }
    }

    pub fn at(mut self, time: TimeIndex) -> Self {
        self.time = Some(time);
        self
    }

    pub fn for_scenario(mut self, scenario: usize) -> Self {
        self.scenario = Some(scenario);
        self
    }

    pub fn key(&self) -> TermKey {
        TermKey {
            component: self.component.clone(),
            variable: self.variable.clone(),
            time: self.time,
            scenario: self.scenario,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LinearExpression {
    terms: IndexMap<TermKey, Term>,
    constant: f64,
}

impl LinearExpression {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_constant(constant: f64) -> Self {
        LinearExpression {
            terms: IndexMap::new(),
            constant,
        }
    }

    pub fn from_term(term: Term) -> Self {
        let mut expr = LinearExpression::new();
        expr.add_term(term);
        expr
    }

    pub fn constant(&self) -> f64 {
        self.constant
    }

    /// True when no terms survived pruning: the expression is a plain
    /// number.
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.constant.abs() < EPS
    }

    pub fn terms(&self) -> impl Iterator<Item = &Term> {
        self.terms.values()
    }

    pub fn get(&self, key: &TermKey) -> Option<&Term> {
        self.terms.get(key)
    }

    /// Merges a term in, summing coefficients on an existing key and
    /// dropping the entry entirely if the sum vanishes.
    pub fn add_term(&mut self, term: Term) {
        let key = term.key();
        match self.terms.get_mut(&key) {
            Some(existing) => {
                existing.coeff += term.coeff;
                if existing.coeff.abs() < EPS {
                    self.terms.shift_remove(&key);
                }
            }
            None => {
                if term.coeff.abs() >= EPS {
                    self.terms.insert(key, term);
                }
            }
        }
    }

    fn merge(mut self, other: LinearExpression, sign: f64) -> LinearExpression {
        for (_, mut term) in other.terms {
            term.coeff *= sign;
            self.add_term(term);
        }
        self.constant += sign * other.constant;
        self
    }

    fn scale(mut self, factor: f64) -> LinearExpression {
        let mut pruned: Vec<TermKey> = Vec::new();
        for (key, term) in self.terms.iter_mut() {
            term.coeff *= factor;
            if term.coeff.abs() < EPS {
                pruned.push(key.clone());
            }
        }
        for key in pruned {
            self.terms.shift_remove(&key);
        }
        self.constant *= factor;
        self
    }

    fn scale_div(mut self, divisor: f64) -> LinearExpression {
        let mut pruned: Vec<TermKey> = Vec::new();
        for (key, term) in self.terms.iter_mut() {
            term.coeff /= divisor;
            if term.coeff.abs() < EPS {
                pruned.push(key.clone());
            }
        }
        for key in pruned {
            self.terms.shift_remove(&key);
        }
        self.constant /= divisor;
        self
    }

    /// Product of two linear expressions.  Exactly one side may carry
    /// terms; two non-constant operands cannot stay linear, whichever
    /// order they appear in.
    pub fn checked_mul(self, rhs: LinearExpression) -> Result<LinearExpression> {
        match (self.is_constant(), rhs.is_constant()) {
            (true, _) => Ok(rhs.scale(self.constant)),
            (_, true) => Ok(self.scale(rhs.constant)),
            (false, false) => comp_err!(
                NonLinearExpression,
                format!("({}) * ({})", self, rhs)
            ),
        }
    }

    /// Quotient of two linear expressions: the divisor must be a nonzero
    /// constant.
    pub fn checked_div(self, rhs: LinearExpression) -> Result<LinearExpression> {
        if !rhs.is_constant() {
            return comp_err!(
                NonLinearExpression,
                format!("({}) / ({})", self, rhs)
            );
        }
        if rhs.constant.abs() < EPS {
            return comp_err!(DivisionByZero, format!("{self}"));
        }
        Ok(self.scale_div(rhs.constant))
    }
}

impl ops::Add for LinearExpression {
    type Output = LinearExpression;

    fn add(self, rhs: LinearExpression) -> LinearExpression {
        self.merge(rhs, 1.0)
    }
}

impl ops::AddAssign for LinearExpression {
    fn add_assign(&mut self, rhs: LinearExpression) {
        let lhs = std::mem::take(self);
        *self = lhs.merge(rhs, 1.0);
    }
}

impl ops::Sub for LinearExpression {
    type Output = LinearExpression;

    fn sub(self, rhs: LinearExpression) -> LinearExpression {
        self.merge(rhs, -1.0)
    }
}

impl ops::Neg for LinearExpression {
    type Output = LinearExpression;

    fn neg(self) -> LinearExpression {
        self.scale(-1.0)
    }
}

impl ops::Mul<f64> for LinearExpression {
    type Output = LinearExpression;

    fn mul(self, factor: f64) -> LinearExpression {
        self.scale(factor)
    }
}

/// Equality is deliberately asymmetric in its tolerance: constants compare
/// with the pruning epsilon, coefficients compare exactly.  A reproducible
/// compile must land on bit-identical coefficients, while accumulated
/// constants are allowed the usual float dust.
impl PartialEq for LinearExpression {
    fn eq(&self, other: &Self) -> bool {
        if self.terms.len() != other.terms.len() {
            return false;
        }
        for (key, term) in self.terms.iter() {
            match other.terms.get(key) {
                Some(other_term) if other_term.coeff == term.coeff => {}
                _ => return false,
            }
        }
        approx_eq!(
            f64,
            self.constant,
            other.constant,
            F64Margin {
                epsilon: EPS,
                ulps: 4
            }
        )
    }
}

impl fmt::Display for LinearExpression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut wrote = false;
        for (key, term) in self.terms.iter() {
            let coeff = term.coeff;
            if wrote {
                if coeff < -EPS {
                    write!(f, " - ")?;
                } else {
                    write!(f, " + ")?;
                }
            } else if coeff < -EPS {
                write!(f, "-")?;
            }
            let magnitude = coeff.abs();
            if (magnitude - 1.0).abs() < EPS {
                write!(f, "{key}")?;
            } else {
                write!(f, "{magnitude} {key}")?;
            }
            wrote = true;
        }
        if self.constant > EPS {
            if wrote {
                write!(f, " + {}", self.constant)?;
            } else {
                write!(f, "{}", self.constant)?;
            }
            wrote = true;
        } else if self.constant < -EPS {
            if wrote {
                write!(f, " - {}", -self.constant)?;
            } else {
                write!(f, "{}", self.constant)?;
            }
            wrote = true;
        }
        if !wrote {
            write!(f, "0")?;
        }
        Ok(())
    }
}

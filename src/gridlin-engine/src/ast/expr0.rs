// Copyright 2025 The Gridlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::ops;

use super::{print_expr, BinaryOp, CmpOp};
use crate::common::Ident;

/// Expr0 is the surface expression tree: what model library code builds and
/// what the upstream text parser produces.  Port references and the
/// time/scenario operators are still present; later stages eliminate them.
///
/// Trees are immutable templates.  Every pass consumes its input by value or
/// reference and rebuilds; nothing is mutated in place.
#[derive(PartialEq, Clone, Debug)]
pub enum Expr0 {
    Const(f64),
    Param(Ident),
    Var(Ident),
    ComponentParam(Ident, Ident),
    ComponentVar(Ident, Ident),
    Neg(Box<Expr0>),
    Op2(BinaryOp, Box<Expr0>, Box<Expr0>),
    Cmp(CmpOp, Box<Expr0>, Box<Expr0>),
    /// operand, offset expression: `x[t+d]`
    TimeShift(Box<Expr0>, Box<Expr0>),
    /// operand, absolute step expression: `x[d]`
    TimeEval(Box<Expr0>, Box<Expr0>),
    /// operand, from, to (inclusive window of relative offsets)
    TimeSum(Box<Expr0>, Box<Expr0>, Box<Expr0>),
    AllTimeSum(Box<Expr0>),
    /// operand, operator name (only "Expectation" is expandable)
    ScenarioOp(Box<Expr0>, Ident),
    /// port name, field name; the connected component supplies the value
    PortField(Ident, Ident),
    /// a PortField operand, aggregator name (only "PortSum" is supported)
    PortAgg(Box<Expr0>, Ident),
}

pub fn literal(n: f64) -> Expr0 {
    Expr0::Const(n)
}

pub fn var<S: Into<Ident>>(name: S) -> Expr0 {
    Expr0::Var(name.into())
}

pub fn param<S: Into<Ident>>(name: S) -> Expr0 {
    Expr0::Param(name.into())
}

pub fn comp_var<S: Into<Ident>, T: Into<Ident>>(component: S, name: T) -> Expr0 {
    Expr0::ComponentVar(component.into(), name.into())
}

pub fn comp_param<S: Into<Ident>, T: Into<Ident>>(component: S, name: T) -> Expr0 {
    Expr0::ComponentParam(component.into(), name.into())
}

pub fn port_field<S: Into<Ident>, T: Into<Ident>>(port: S, field: T) -> Expr0 {
    Expr0::PortField(port.into(), field.into())
}

impl Expr0 {
    /// `self[t+delta]` for a constant offset.
    pub fn shift(self, delta: i64) -> Expr0 {
        self.shift_expr(Expr0::Const(delta as f64))
    }

    pub fn shift_expr(self, delta: Expr0) -> Expr0 {
        Expr0::TimeShift(Box::new(self), Box::new(delta))
    }

    /// The sum of the operand shifted by each given offset: `x[t-1, t+4]`
    /// builds `x[t-1] + x[t+4]`.
    pub fn shift_many(self, offsets: &[i64]) -> Expr0 {
        let mut it = offsets.iter();
        let first = match it.next() {
            Some(o) => self.clone().shift(*o),
            None => return Expr0::Const(0.0),
        };
        it.fold(first, |acc, o| acc + self.clone().shift(*o))
    }

    /// `self[t]` evaluated at an absolute timestep.
    pub fn eval(self, step: i64) -> Expr0 {
        self.eval_expr(Expr0::Const(step as f64))
    }

    pub fn eval_expr(self, step: Expr0) -> Expr0 {
        Expr0::TimeEval(Box::new(self), Box::new(step))
    }

    /// The sum of the operand over the inclusive window of relative offsets.
    pub fn time_sum(self, from: i64, to: i64) -> Expr0 {
        self.time_sum_expr(Expr0::Const(from as f64), Expr0::Const(to as f64))
    }

    pub fn time_sum_expr(self, from: Expr0, to: Expr0) -> Expr0 {
        Expr0::TimeSum(Box::new(self), Box::new(from), Box::new(to))
    }

    /// The sum of the operand over every timestep of the problem window.
    pub fn time_sum_all(self) -> Expr0 {
        Expr0::AllTimeSum(Box::new(self))
    }

    /// Uniform-probability expectation across scenarios.
    pub fn expec(self) -> Expr0 {
        Expr0::ScenarioOp(Box::new(self), "Expectation".to_string())
    }

    /// Additive aggregation of every expression connected to a port field.
    /// Only meaningful on a `PortField`; the resolver rejects anything else.
    pub fn sum_connections(self) -> Expr0 {
        Expr0::PortAgg(Box::new(self), "PortSum".to_string())
    }

    pub fn eq(self, rhs: Expr0) -> Expr0 {
        Expr0::Cmp(CmpOp::Eq, Box::new(self), Box::new(rhs))
    }

    pub fn leq(self, rhs: Expr0) -> Expr0 {
        Expr0::Cmp(CmpOp::Leq, Box::new(self), Box::new(rhs))
    }

    pub fn geq(self, rhs: Expr0) -> Expr0 {
        Expr0::Cmp(CmpOp::Geq, Box::new(self), Box::new(rhs))
    }

    /// Printed-text heuristic for "does this expression reference `ident`".
    ///
    /// This is a substring match on the canonical printed form, so it can
    /// false-positive when one identifier is a prefix or substring of
    /// another (`x` matches `x_max`).  Callers that need an exact answer
    /// must walk the tree instead.
    pub fn mentions(&self, ident: &str) -> bool {
        print_expr(self).contains(ident)
    }

    /// True while any port reference survives in the tree.  Static checks
    /// that cannot see through ports wait for resolution instead.
    pub fn has_ports(&self) -> bool {
        match self {
            Expr0::Const(_)
            | Expr0::Param(_)
            | Expr0::Var(_)
            | Expr0::ComponentParam(_, _)
            | Expr0::ComponentVar(_, _) => false,
            Expr0::PortField(_, _) | Expr0::PortAgg(_, _) => true,
            Expr0::Neg(r) | Expr0::AllTimeSum(r) | Expr0::ScenarioOp(r, _) => r.has_ports(),
            Expr0::Op2(_, l, r) | Expr0::Cmp(_, l, r) => l.has_ports() || r.has_ports(),
            Expr0::TimeShift(operand, arg) | Expr0::TimeEval(operand, arg) => {
                operand.has_ports() || arg.has_ports()
            }
            Expr0::TimeSum(operand, from, to) => {
                operand.has_ports() || from.has_ports() || to.has_ports()
            }
        }
    }
}

impl Default for Expr0 {
    fn default() -> Self {
        Expr0::Const(0.0)
    }
}

impl ops::Add for Expr0 {
    type Output = Expr0;

    fn add(self, rhs: Expr0) -> Expr0 {
        Expr0::Op2(BinaryOp::Add, Box::new(self), Box::new(rhs))
    }
}

impl ops::Sub for Expr0 {
    type Output = Expr0;

    fn sub(self, rhs: Expr0) -> Expr0 {
        Expr0::Op2(BinaryOp::Sub, Box::new(self), Box::new(rhs))
    }
}

impl ops::Mul for Expr0 {
    type Output = Expr0;

    fn mul(self, rhs: Expr0) -> Expr0 {
        Expr0::Op2(BinaryOp::Mul, Box::new(self), Box::new(rhs))
    }
}

impl ops::Div for Expr0 {
    type Output = Expr0;

    fn div(self, rhs: Expr0) -> Expr0 {
        Expr0::Op2(BinaryOp::Div, Box::new(self), Box::new(rhs))
    }
}

impl ops::Neg for Expr0 {
    type Output = Expr0;

    fn neg(self) -> Expr0 {
        Expr0::Neg(Box::new(self))
    }
}

impl ops::Add<f64> for Expr0 {
    type Output = Expr0;

    fn add(self, rhs: f64) -> Expr0 {
        self + Expr0::Const(rhs)
    }
}

impl ops::Sub<f64> for Expr0 {
    type Output = Expr0;

    fn sub(self, rhs: f64) -> Expr0 {
        self - Expr0::Const(rhs)
    }
}

impl ops::Mul<f64> for Expr0 {
    type Output = Expr0;

    fn mul(self, rhs: f64) -> Expr0 {
        self * Expr0::Const(rhs)
    }
}

impl ops::Div<f64> for Expr0 {
    type Output = Expr0;

    fn div(self, rhs: f64) -> Expr0 {
        self / Expr0::Const(rhs)
    }
}

impl ops::Mul<Expr0> for f64 {
    type Output = Expr0;

    fn mul(self, rhs: Expr0) -> Expr0 {
        Expr0::Const(self) * rhs
    }
}

impl ops::Add<Expr0> for f64 {
    type Output = Expr0;

    fn add(self, rhs: Expr0) -> Expr0 {
        Expr0::Const(self) + rhs
    }
}

impl ops::Sub<Expr0> for f64 {
    type Output = Expr0;

    fn sub(self, rhs: Expr0) -> Expr0 {
        Expr0::Const(self) - rhs
    }
}

// Copyright 2025 The Gridlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;
use std::fmt;

use smallvec::SmallVec;

use super::expr0::Expr0;
use super::{print_expr, BinaryOp};
use crate::common::{Ident, Result};
use crate::comp_err;

/// Expr1 is the port-free expression tree: the same shape as `Expr0` with
/// port references already substituted by the wiring of the network, and
/// comparisons already split into constraint bound pairs.  Operator
/// expansion and linearization only ever see this stage or later, so a port
/// reference leaking that far is unrepresentable rather than a runtime
/// check.
#[derive(PartialEq, Clone, Debug)]
pub enum Expr1 {
    Const(f64),
    Param(Ident),
    Var(Ident),
    ComponentParam(Ident, Ident),
    ComponentVar(Ident, Ident),
    Neg(Box<Expr1>),
    Op2(BinaryOp, Box<Expr1>, Box<Expr1>),
    TimeShift(Box<Expr1>, Box<Expr1>),
    TimeEval(Box<Expr1>, Box<Expr1>),
    TimeSum(Box<Expr1>, Box<Expr1>, Box<Expr1>),
    AllTimeSum(Box<Expr1>),
    ScenarioOp(Box<Expr1>, Ident),
}

/// Identifies one port-field reference of one component inside a network.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct PortFieldKey {
    pub component: Ident,
    pub port: Ident,
    pub field: Ident,
}

impl PortFieldKey {
    pub fn new<C, P, F>(component: C, port: P, field: F) -> Self
    where
        C: Into<Ident>,
        P: Into<Ident>,
        F: Into<Ident>,
    {
        PortFieldKey {
            component: component.into(),
            port: port.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for PortFieldKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.component, self.port, self.field)
    }
}

/// Network wiring: the expressions connected to each port-field reference.
/// Built externally from component port definitions plus the connection
/// graph.  Most keys carry exactly one candidate.
pub type PortsExpressions = HashMap<PortFieldKey, SmallVec<[Expr0; 2]>>;

/// Substitutes every port reference in `expr` using the network wiring for
/// `component`, rebuilding everything else unchanged.
///
/// A bare `PortField` requires exactly one connected expression; the
/// `PortSum` aggregator sums however many there are (zero sums to the
/// additive identity).  Substituted candidates are themselves resolved
/// under the same component, so chained references terminate or fail here
/// rather than leaking into later passes.
pub fn resolve_ports(expr: &Expr0, component: &str, ports: &PortsExpressions) -> Result<Expr1> {
    let resolved = match expr {
        Expr0::Const(n) => Expr1::Const(*n),
        Expr0::Param(id) => Expr1::Param(id.clone()),
        Expr0::Var(id) => Expr1::Var(id.clone()),
        Expr0::ComponentParam(c, id) => Expr1::ComponentParam(c.clone(), id.clone()),
        Expr0::ComponentVar(c, id) => Expr1::ComponentVar(c.clone(), id.clone()),
        Expr0::Neg(r) => Expr1::Neg(Box::new(resolve_ports(r, component, ports)?)),
        Expr0::Op2(op, l, r) => Expr1::Op2(
            *op,
            Box::new(resolve_ports(l, component, ports)?),
            Box::new(resolve_ports(r, component, ports)?),
        ),
        Expr0::Cmp(_, _, _) => {
            return comp_err!(
                UnsupportedNode,
                format!(
                    "port resolution: comparisons must be split into constraint bounds first: {}",
                    print_expr(expr)
                )
            );
        }
        Expr0::TimeShift(operand, delta) => Expr1::TimeShift(
            Box::new(resolve_ports(operand, component, ports)?),
            Box::new(resolve_ports(delta, component, ports)?),
        ),
        Expr0::TimeEval(operand, step) => Expr1::TimeEval(
            Box::new(resolve_ports(operand, component, ports)?),
            Box::new(resolve_ports(step, component, ports)?),
        ),
        Expr0::TimeSum(operand, from, to) => Expr1::TimeSum(
            Box::new(resolve_ports(operand, component, ports)?),
            Box::new(resolve_ports(from, component, ports)?),
            Box::new(resolve_ports(to, component, ports)?),
        ),
        Expr0::AllTimeSum(operand) => {
            Expr1::AllTimeSum(Box::new(resolve_ports(operand, component, ports)?))
        }
        Expr0::ScenarioOp(operand, name) => Expr1::ScenarioOp(
            Box::new(resolve_ports(operand, component, ports)?),
            name.clone(),
        ),
        Expr0::PortField(port, field) => {
            let key = PortFieldKey::new(component, port.clone(), field.clone());
            let candidates = ports.get(&key).map(|c| c.as_slice()).unwrap_or(&[]);
            if candidates.len() != 1 {
                return comp_err!(
                    InvalidPortArity,
                    format!(
                        "{}: {} connected expressions (expected exactly 1)",
                        key,
                        candidates.len()
                    )
                );
            }
            resolve_ports(&candidates[0], component, ports)?
        }
        Expr0::PortAgg(operand, aggregator) => {
            if aggregator != "PortSum" {
                return comp_err!(UnsupportedAggregator, aggregator.clone());
            }
            let (port, field) = match operand.as_ref() {
                Expr0::PortField(port, field) => (port, field),
                other => {
                    return comp_err!(
                        UnsupportedNode,
                        format!(
                            "port resolution: PortSum requires a port field operand: {}",
                            print_expr(other)
                        )
                    );
                }
            };
            let key = PortFieldKey::new(component, port.clone(), field.clone());
            let candidates = ports.get(&key).map(|c| c.as_slice()).unwrap_or(&[]);
            match candidates.split_first() {
                None => Expr1::Const(0.0),
                Some((first, rest)) => {
                    let mut sum = resolve_ports(first, component, ports)?;
                    for candidate in rest {
                        sum = Expr1::Op2(
                            BinaryOp::Add,
                            Box::new(sum),
                            Box::new(resolve_ports(candidate, component, ports)?),
                        );
                    }
                    sum
                }
            }
        }
    };

    Ok(resolved)
}

impl From<Expr1> for Expr0 {
    fn from(expr: Expr1) -> Self {
        match expr {
            Expr1::Const(n) => Expr0::Const(n),
            Expr1::Param(id) => Expr0::Param(id),
            Expr1::Var(id) => Expr0::Var(id),
            Expr1::ComponentParam(c, id) => Expr0::ComponentParam(c, id),
            Expr1::ComponentVar(c, id) => Expr0::ComponentVar(c, id),
            Expr1::Neg(r) => Expr0::Neg(Box::new((*r).into())),
            Expr1::Op2(op, l, r) => Expr0::Op2(op, Box::new((*l).into()), Box::new((*r).into())),
            Expr1::TimeShift(operand, delta) => {
                Expr0::TimeShift(Box::new((*operand).into()), Box::new((*delta).into()))
            }
            Expr1::TimeEval(operand, step) => {
                Expr0::TimeEval(Box::new((*operand).into()), Box::new((*step).into()))
            }
            Expr1::TimeSum(operand, from, to) => Expr0::TimeSum(
                Box::new((*operand).into()),
                Box::new((*from).into()),
                Box::new((*to).into()),
            ),
            Expr1::AllTimeSum(operand) => Expr0::AllTimeSum(Box::new((*operand).into())),
            Expr1::ScenarioOp(operand, name) => {
                Expr0::ScenarioOp(Box::new((*operand).into()), name)
            }
        }
    }
}

// Copyright 2025 The Gridlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;
use std::ops;

use crate::ast::expr0::Expr0;
use crate::ast::expr1::Expr1;
use crate::ast::print_expr;
use crate::common::Result;
use crate::comp_err;

/// Whether a value can vary per timestep and/or per scenario.
///
/// Structures form a small lattice under OR-merge: combining two operands
/// yields a value that varies along any axis either operand varies along.
/// `IndexingStructure::scalar()` is the merge identity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndexingStructure {
    pub time: bool,
    pub scenario: bool,
}

impl IndexingStructure {
    pub fn new(time: bool, scenario: bool) -> Self {
        IndexingStructure { time, scenario }
    }

    pub fn scalar() -> Self {
        IndexingStructure {
            time: false,
            scenario: false,
        }
    }

    pub fn is_scalar(&self) -> bool {
        !self.time && !self.scenario
    }
}

impl ops::BitOr for IndexingStructure {
    type Output = IndexingStructure;

    fn bitor(self, rhs: IndexingStructure) -> IndexingStructure {
        IndexingStructure {
            time: self.time || rhs.time,
            scenario: self.scenario || rhs.scenario,
        }
    }
}

impl fmt::Display for IndexingStructure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.time, self.scenario) {
            (false, false) => write!(f, "scalar"),
            (true, false) => write!(f, "time"),
            (false, true) => write!(f, "scenario"),
            (true, true) => write!(f, "time x scenario"),
        }
    }
}

/// Supplies the declared indexing structure of named parameters and
/// variables.  Implemented by the model/network layer; unknown names fail
/// with `UnresolvedIdentifier`.
pub trait StructureProvider {
    fn get_parameter_structure(&self, name: &str) -> Result<IndexingStructure>;
    fn get_variable_structure(&self, name: &str) -> Result<IndexingStructure>;
    fn get_component_parameter_structure(
        &self,
        component: &str,
        name: &str,
    ) -> Result<IndexingStructure>;
    fn get_component_variable_structure(
        &self,
        component: &str,
        name: &str,
    ) -> Result<IndexingStructure>;
}

/// Infers whether an expression varies by time and/or scenario, bottom-up.
///
/// Must run either before port resolution on a port-free template or after
/// resolution; a tree that still mixes unresolved ports with other
/// operators has no well-defined structure and is rejected.
pub fn compute_indexation(
    expr: &Expr0,
    provider: &dyn StructureProvider,
) -> Result<IndexingStructure> {
    let structure = match expr {
        Expr0::Const(_) => IndexingStructure::scalar(),
        Expr0::Param(name) => provider.get_parameter_structure(name)?,
        Expr0::Var(name) => provider.get_variable_structure(name)?,
        Expr0::ComponentParam(component, name) => {
            provider.get_component_parameter_structure(component, name)?
        }
        Expr0::ComponentVar(component, name) => {
            provider.get_component_variable_structure(component, name)?
        }
        Expr0::Neg(r) => compute_indexation(r, provider)?,
        Expr0::Op2(_, l, r) | Expr0::Cmp(_, l, r) => {
            compute_indexation(l, provider)? | compute_indexation(r, provider)?
        }
        Expr0::TimeShift(operand, _) => IndexingStructure {
            time: true,
            ..compute_indexation(operand, provider)?
        },
        Expr0::TimeEval(operand, _)
        | Expr0::TimeSum(operand, _, _)
        | Expr0::AllTimeSum(operand) => IndexingStructure {
            time: false,
            ..compute_indexation(operand, provider)?
        },
        Expr0::ScenarioOp(operand, name) => {
            if name != "Expectation" {
                return comp_err!(UnsupportedOperator, name.clone());
            }
            IndexingStructure {
                scenario: false,
                ..compute_indexation(operand, provider)?
            }
        }
        Expr0::PortField(_, _) | Expr0::PortAgg(_, _) => {
            return comp_err!(
                UnsupportedNode,
                format!(
                    "indexing inference: unresolved port reference: {}",
                    print_expr(expr)
                )
            );
        }
    };

    Ok(structure)
}

/// The same fold over the port-free stage.
pub fn compute_indexation_resolved(
    expr: &Expr1,
    provider: &dyn StructureProvider,
) -> Result<IndexingStructure> {
    let structure = match expr {
        Expr1::Const(_) => IndexingStructure::scalar(),
        Expr1::Param(name) => provider.get_parameter_structure(name)?,
        Expr1::Var(name) => provider.get_variable_structure(name)?,
        Expr1::ComponentParam(component, name) => {
            provider.get_component_parameter_structure(component, name)?
        }
        Expr1::ComponentVar(component, name) => {
            provider.get_component_variable_structure(component, name)?
        }
        Expr1::Neg(r) => compute_indexation_resolved(r, provider)?,
        Expr1::Op2(_, l, r) => {
            compute_indexation_resolved(l, provider)? | compute_indexation_resolved(r, provider)?
        }
        Expr1::TimeShift(operand, _) => IndexingStructure {
            time: true,
            ..compute_indexation_resolved(operand, provider)?
        },
        Expr1::TimeEval(operand, _)
        | Expr1::TimeSum(operand, _, _)
        | Expr1::AllTimeSum(operand) => IndexingStructure {
            time: false,
            ..compute_indexation_resolved(operand, provider)?
        },
        Expr1::ScenarioOp(operand, name) => {
            if name != "Expectation" {
                return comp_err!(UnsupportedOperator, name.clone());
            }
            IndexingStructure {
                scenario: false,
                ..compute_indexation_resolved(operand, provider)?
            }
        }
    };

    Ok(structure)
}

/// Polynomial degree of an expression in its decision variables: constants
/// and parameters are degree 0, a bare variable is degree 1, sums take the
/// max and products add.  Division by anything of nonzero degree can never
/// be linear and fails immediately.
///
/// Used to reject nonlinear equations before the expensive passes run, and
/// to require that objective contributions stay linear.
pub fn degree(expr: &Expr0) -> Result<u32> {
    let d = match expr {
        Expr0::Const(_) | Expr0::Param(_) | Expr0::ComponentParam(_, _) => 0,
        Expr0::Var(_) | Expr0::ComponentVar(_, _) => 1,
        Expr0::Neg(r) => degree(r)?,
        Expr0::Op2(op, l, r) => {
            use crate::ast::BinaryOp::*;
            match op {
                Add | Sub => degree(l)?.max(degree(r)?),
                Mul => degree(l)? + degree(r)?,
                Div => {
                    let denom = degree(r)?;
                    if denom > 0 {
                        return comp_err!(
                            NonLinearExpression,
                            format!("division by a non-constant: {}", print_expr(expr))
                        );
                    }
                    degree(l)?
                }
            }
        }
        Expr0::Cmp(_, l, r) => degree(l)?.max(degree(r)?),
        Expr0::TimeShift(operand, _)
        | Expr0::TimeEval(operand, _)
        | Expr0::TimeSum(operand, _, _)
        | Expr0::AllTimeSum(operand)
        | Expr0::ScenarioOp(operand, _) => degree(operand)?,
        Expr0::PortField(_, _) | Expr0::PortAgg(_, _) => {
            return comp_err!(
                UnsupportedNode,
                format!(
                    "degree check: unresolved port reference: {}",
                    print_expr(expr)
                )
            );
        }
    };

    Ok(d)
}

pub fn is_linear(expr: &Expr0) -> Result<bool> {
    Ok(degree(expr)? <= 1)
}

pub fn is_constant(expr: &Expr0) -> Result<bool> {
    Ok(degree(expr)? == 0)
}

// Copyright 2025 The Gridlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;

use super::expr0::Expr0;
use super::expr1::Expr1;
use super::{print_expr, BinaryOp};
use crate::common::{Ident, Result};
use crate::comp_err;
use crate::linexpr::EPS;

/// How an expanded leaf is attached to the time axis.
///
/// `Shift(k)` is relative: the leaf refers to timestep `t+k` of whatever
/// row the surrounding constraint is instantiated at.  `Step(t)` is
/// absolute.  A leaf with no time index at all does not vary with time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TimeIndex {
    Shift(i64),
    Step(i64),
}

impl fmt::Display for TimeIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TimeIndex::Shift(k) if *k == 0 => write!(f, "t"),
            TimeIndex::Shift(k) if *k < 0 => write!(f, "t-{}", -k),
            TimeIndex::Shift(k) => write!(f, "t+{k}"),
            TimeIndex::Step(t) => write!(f, "{t}"),
        }
    }
}

/// The finite window used to expand all-time and all-scenario operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProblemDimensions {
    pub timesteps: usize,
    pub scenarios: usize,
}

impl ProblemDimensions {
    pub fn new(timesteps: usize, scenarios: usize) -> Self {
        assert!(
            timesteps >= 1 && scenarios >= 1,
            "problem dimensions must span at least one timestep and one scenario"
        );
        ProblemDimensions {
            timesteps,
            scenarios,
        }
    }
}

/// Expr2 is the fully expanded expression tree: time and scenario operators
/// are gone, and every remaining leaf carries its resolved indices.  The
/// n-ary `Sum` holds window expansions as one flat vector so that tree
/// depth stays bounded by expression nesting, not by the number of
/// timesteps being summed over.
#[derive(PartialEq, Clone, Debug)]
pub enum Expr2 {
    Const(f64),
    Var {
        component: Ident,
        name: Ident,
        time: Option<TimeIndex>,
        scenario: Option<usize>,
    },
    Param {
        component: Ident,
        name: Ident,
        time: Option<TimeIndex>,
        scenario: Option<usize>,
    },
    Neg(Box<Expr2>),
    Op2(BinaryOp, Box<Expr2>, Box<Expr2>),
    Sum(Vec<Expr2>),
}

fn fmt_leaf(
    f: &mut String,
    component: &str,
    name: &str,
    time: Option<TimeIndex>,
    scenario: Option<usize>,
) {
    f.push_str(component);
    f.push('.');
    f.push_str(name);
    match (time, scenario) {
        (None, None) => {}
        (Some(t), None) => f.push_str(&format!("[{t}]")),
        (None, Some(s)) => f.push_str(&format!("[s{s}]")),
        (Some(t), Some(s)) => f.push_str(&format!("[{t}, s{s}]")),
    }
}

fn child_needs_parens(parent: &Expr2, child: &Expr2) -> bool {
    match parent {
        Expr2::Const(_) | Expr2::Var { .. } | Expr2::Param { .. } | Expr2::Sum(_) => false,
        Expr2::Neg(_) => matches!(child, Expr2::Op2(_, _, _) | Expr2::Sum(_)),
        Expr2::Op2(parent_op, _, _) => match child {
            Expr2::Neg(_) => true,
            // a flattened sum binds like addition
            Expr2::Sum(_) => parent_op.precedence() > BinaryOp::Add.precedence(),
            Expr2::Op2(child_op, _, _) => parent_op.precedence() > child_op.precedence(),
            _ => false,
        },
    }
}

fn paren_if_necessary(parent: &Expr2, child: &Expr2, eqn: String) -> String {
    if child_needs_parens(parent, child) {
        format!("({eqn})")
    } else {
        eqn
    }
}

/// Canonical text for an expanded expression, used in error details and
/// golden tests.
pub fn pretty(expr: &Expr2) -> String {
    match expr {
        Expr2::Const(n) => format!("{n}"),
        Expr2::Var {
            component,
            name,
            time,
            scenario,
        }
        | Expr2::Param {
            component,
            name,
            time,
            scenario,
        } => {
            let mut out = String::new();
            fmt_leaf(&mut out, component, name, *time, *scenario);
            out
        }
        Expr2::Neg(r) => format!("-{}", paren_if_necessary(expr, r, pretty(r))),
        Expr2::Op2(op, l, r) => format!(
            "{} {} {}",
            paren_if_necessary(expr, l, pretty(l)),
            op.as_str(),
            paren_if_necessary(expr, r, pretty(r))
        ),
        Expr2::Sum(items) => {
            let items: Vec<String> = items.iter().map(pretty).collect();
            items.join(" + ")
        }
    }
}

/// Reduces constant operator arguments (shift offsets, window bounds) to
/// integers.  Implemented by the embedding system when arguments may
/// reference resolved parameters; `LiteralEvaluator` covers the common case
/// of literal arithmetic.
pub trait ConstEvaluator {
    fn eval_int(&self, expr: &Expr1) -> Result<i64>;
}

/// Folds literal arithmetic; anything touching an identifier or an operator
/// is not a constant and fails.
#[derive(Copy, Clone, Debug, Default)]
pub struct LiteralEvaluator;

impl LiteralEvaluator {
    fn eval_f64(&self, expr: &Expr1) -> Result<f64> {
        match expr {
            Expr1::Const(n) => Ok(*n),
            Expr1::Param(id)
            | Expr1::Var(id) => comp_err!(
                UnresolvedIdentifier,
                format!("constant evaluation: {id}")
            ),
            Expr1::ComponentParam(c, id) | Expr1::ComponentVar(c, id) => comp_err!(
                UnresolvedIdentifier,
                format!("constant evaluation: {c}.{id}")
            ),
            Expr1::Neg(r) => Ok(-self.eval_f64(r)?),
            Expr1::Op2(op, l, r) => {
                let l = self.eval_f64(l)?;
                let r = self.eval_f64(r)?;
                match op {
                    BinaryOp::Add => Ok(l + r),
                    BinaryOp::Sub => Ok(l - r),
                    BinaryOp::Mul => Ok(l * r),
                    BinaryOp::Div => {
                        if r.abs() < EPS {
                            comp_err!(DivisionByZero, format!("constant evaluation: {l} / {r}"))
                        } else {
                            Ok(l / r)
                        }
                    }
                }
            }
            Expr1::TimeShift(_, _)
            | Expr1::TimeEval(_, _)
            | Expr1::TimeSum(_, _, _)
            | Expr1::AllTimeSum(_)
            | Expr1::ScenarioOp(_, _) => comp_err!(
                UnsupportedNode,
                format!(
                    "constant evaluation: {}",
                    print_expr(&Expr0::from(expr.clone()))
                )
            ),
        }
    }
}

impl ConstEvaluator for LiteralEvaluator {
    fn eval_int(&self, expr: &Expr1) -> Result<i64> {
        let n = self.eval_f64(expr)?;
        if n.fract() != 0.0 {
            return comp_err!(
                ExpectedInteger,
                format!(
                    "{} evaluates to {n}",
                    print_expr(&Expr0::from(expr.clone()))
                )
            );
        }
        Ok(n as i64)
    }
}

/// Adds `offset` to every relative leaf.  A leaf pinned to an absolute
/// timestep cannot be shifted again; evaluate-then-shift is always an
/// error.
fn shift_leaves(expr: Expr2, offset: i64) -> Result<Expr2> {
    let shifted = match expr {
        Expr2::Const(_) => expr,
        Expr2::Var {
            time: Some(TimeIndex::Step(_)),
            ..
        }
        | Expr2::Param {
            time: Some(TimeIndex::Step(_)),
            ..
        } => {
            return comp_err!(
                InvalidTimeOperatorComposition,
                format!("cannot shift a leaf evaluated at an absolute timestep: {}", pretty(&expr))
            );
        }
        Expr2::Var {
            component,
            name,
            time,
            scenario,
        } => Expr2::Var {
            component,
            name,
            time: time.map(|t| match t {
                TimeIndex::Shift(k) => TimeIndex::Shift(k + offset),
                TimeIndex::Step(_) => unreachable!("absolute leaves rejected above"),
            }),
            scenario,
        },
        Expr2::Param {
            component,
            name,
            time,
            scenario,
        } => Expr2::Param {
            component,
            name,
            time: time.map(|t| match t {
                TimeIndex::Shift(k) => TimeIndex::Shift(k + offset),
                TimeIndex::Step(_) => unreachable!("absolute leaves rejected above"),
            }),
            scenario,
        },
        Expr2::Neg(r) => Expr2::Neg(Box::new(shift_leaves(*r, offset)?)),
        Expr2::Op2(op, l, r) => Expr2::Op2(
            op,
            Box::new(shift_leaves(*l, offset)?),
            Box::new(shift_leaves(*r, offset)?),
        ),
        Expr2::Sum(items) => Expr2::Sum(
            items
                .into_iter()
                .map(|item| shift_leaves(item, offset))
                .collect::<Result<Vec<_>>>()?,
        ),
    };
    Ok(shifted)
}

/// Pins every relative leaf to the absolute timestep `step + k`.  A leaf
/// already pinned is an error unless `allow_existing` is set (the all-time
/// sum re-evaluates its operand at every window position and must tolerate
/// absolute leaves produced by an inner evaluation).
fn eval_leaves(expr: Expr2, step: i64, allow_existing: bool) -> Result<Expr2> {
    let evaluated = match expr {
        Expr2::Const(_) => expr,
        Expr2::Var {
            time: Some(TimeIndex::Step(_)),
            ..
        }
        | Expr2::Param {
            time: Some(TimeIndex::Step(_)),
            ..
        } => {
            if allow_existing {
                expr
            } else {
                return comp_err!(
                    InvalidTimeOperatorComposition,
                    format!("leaf is already evaluated at an absolute timestep: {}", pretty(&expr))
                );
            }
        }
        Expr2::Var {
            component,
            name,
            time,
            scenario,
        } => Expr2::Var {
            component,
            name,
            time: time.map(|t| match t {
                TimeIndex::Shift(k) => TimeIndex::Step(k + step),
                TimeIndex::Step(_) => unreachable!("absolute leaves handled above"),
            }),
            scenario,
        },
        Expr2::Param {
            component,
            name,
            time,
            scenario,
        } => Expr2::Param {
            component,
            name,
            time: time.map(|t| match t {
                TimeIndex::Shift(k) => TimeIndex::Step(k + step),
                TimeIndex::Step(_) => unreachable!("absolute leaves handled above"),
            }),
            scenario,
        },
        Expr2::Neg(r) => Expr2::Neg(Box::new(eval_leaves(*r, step, allow_existing)?)),
        Expr2::Op2(op, l, r) => Expr2::Op2(
            op,
            Box::new(eval_leaves(*l, step, allow_existing)?),
            Box::new(eval_leaves(*r, step, allow_existing)?),
        ),
        Expr2::Sum(items) => Expr2::Sum(
            items
                .into_iter()
                .map(|item| eval_leaves(item, step, allow_existing))
                .collect::<Result<Vec<_>>>()?,
        ),
    };
    Ok(evaluated)
}

/// Tags every leaf with scenario `s`.  Overwrites an existing tag, which
/// makes nested expectation collapse to a single expectation under the
/// uniform law.
fn set_scenario(expr: Expr2, s: usize) -> Expr2 {
    match expr {
        Expr2::Const(_) => expr,
        Expr2::Var {
            component,
            name,
            time,
            ..
        } => Expr2::Var {
            component,
            name,
            time,
            scenario: Some(s),
        },
        Expr2::Param {
            component,
            name,
            time,
            ..
        } => Expr2::Param {
            component,
            name,
            time,
            scenario: Some(s),
        },
        Expr2::Neg(r) => Expr2::Neg(Box::new(set_scenario(*r, s))),
        Expr2::Op2(op, l, r) => Expr2::Op2(
            op,
            Box::new(set_scenario(*l, s)),
            Box::new(set_scenario(*r, s)),
        ),
        Expr2::Sum(items) => {
            Expr2::Sum(items.into_iter().map(|item| set_scenario(item, s)).collect())
        }
    }
}

/// Expands time and scenario operators against a fixed problem window,
/// producing a tree whose leaves carry resolved indices.
///
/// Bare component variables and parameters promote to a relative offset of
/// zero.  Window operators expand their operand once and replay the leaf
/// rewrite per window position, accumulating into one flat `Sum`.
pub fn expand(
    expr: &Expr1,
    dims: ProblemDimensions,
    evaluator: &dyn ConstEvaluator,
) -> Result<Expr2> {
    let expanded = match expr {
        Expr1::Const(n) => Expr2::Const(*n),
        Expr1::Param(id) | Expr1::Var(id) => {
            return comp_err!(
                UnresolvedIdentifier,
                format!("reference is not scoped to a component: {id}")
            );
        }
        Expr1::ComponentVar(component, name) => Expr2::Var {
            component: component.clone(),
            name: name.clone(),
            time: Some(TimeIndex::Shift(0)),
            scenario: None,
        },
        Expr1::ComponentParam(component, name) => Expr2::Param {
            component: component.clone(),
            name: name.clone(),
            time: Some(TimeIndex::Shift(0)),
            scenario: None,
        },
        Expr1::Neg(r) => Expr2::Neg(Box::new(expand(r, dims, evaluator)?)),
        Expr1::Op2(op, l, r) => Expr2::Op2(
            *op,
            Box::new(expand(l, dims, evaluator)?),
            Box::new(expand(r, dims, evaluator)?),
        ),
        Expr1::TimeShift(operand, delta) => {
            let delta = evaluator.eval_int(delta)?;
            shift_leaves(expand(operand, dims, evaluator)?, delta)?
        }
        Expr1::TimeEval(operand, step) => {
            let step = evaluator.eval_int(step)?;
            eval_leaves(expand(operand, dims, evaluator)?, step, false)?
        }
        Expr1::TimeSum(operand, from, to) => {
            let from = evaluator.eval_int(from)?;
            let to = evaluator.eval_int(to)?;
            if from > to {
                return Ok(Expr2::Const(0.0));
            }
            let base = expand(operand, dims, evaluator)?;
            let mut items = Vec::with_capacity((to - from + 1) as usize);
            for offset in from..=to {
                items.push(shift_leaves(base.clone(), offset)?);
            }
            Expr2::Sum(items)
        }
        Expr1::AllTimeSum(operand) => {
            let base = expand(operand, dims, evaluator)?;
            let mut items = Vec::with_capacity(dims.timesteps);
            for step in 0..dims.timesteps {
                items.push(eval_leaves(base.clone(), step as i64, true)?);
            }
            Expr2::Sum(items)
        }
        Expr1::ScenarioOp(operand, name) => {
            if name != "Expectation" {
                return comp_err!(UnsupportedOperator, name.clone());
            }
            let base = expand(operand, dims, evaluator)?;
            let mut items = Vec::with_capacity(dims.scenarios);
            for s in 0..dims.scenarios {
                items.push(set_scenario(base.clone(), s));
            }
            Expr2::Op2(
                BinaryOp::Div,
                Box::new(Expr2::Sum(items)),
                Box::new(Expr2::Const(dims.scenarios as f64)),
            )
        }
    };

    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr0::{comp_param, comp_var, literal, var};
    use crate::ast::expr1::resolve_ports;
    use crate::common::ErrorCode;

    fn dims(t: usize, s: usize) -> ProblemDimensions {
        ProblemDimensions::new(t, s)
    }

    fn expand0(expr: &crate::ast::Expr0, d: ProblemDimensions) -> Result<Expr2> {
        let resolved = resolve_ports(expr, "test", &Default::default())?;
        expand(&resolved, d, &LiteralEvaluator)
    }

    fn x_at(time: TimeIndex) -> Expr2 {
        Expr2::Var {
            component: "c".to_string(),
            name: "x".to_string(),
            time: Some(time),
            scenario: None,
        }
    }

    #[test]
    fn test_bare_leaf_promotes_to_relative_zero() {
        let e = expand0(&comp_var("c", "x"), dims(2, 1)).unwrap();
        assert_eq!(x_at(TimeIndex::Shift(0)), e);

        let e = expand0(&comp_param("c", "p"), dims(2, 1)).unwrap();
        assert_eq!(
            Expr2::Param {
                component: "c".to_string(),
                name: "p".to_string(),
                time: Some(TimeIndex::Shift(0)),
                scenario: None,
            },
            e
        );
    }

    #[test]
    fn test_unscoped_reference_is_rejected() {
        let err = expand0(&var("x"), dims(1, 1)).unwrap_err();
        assert_eq!(ErrorCode::UnresolvedIdentifier, err.code);
    }

    #[test]
    fn test_shifts_compose_additively() {
        let e = expand0(&comp_var("c", "x").shift(-1).shift(1), dims(2, 1)).unwrap();
        assert_eq!(x_at(TimeIndex::Shift(0)), e);
    }

    #[test]
    fn test_shift_then_eval_pins_to_absolute() {
        let e = expand0(&comp_var("c", "x").shift(-1).eval(3), dims(4, 1)).unwrap();
        assert_eq!(x_at(TimeIndex::Step(2)), e);
    }

    #[test]
    fn test_eval_then_shift_is_rejected() {
        let err = expand0(&comp_var("c", "x").eval(0).shift(1), dims(2, 1)).unwrap_err();
        assert_eq!(ErrorCode::InvalidTimeOperatorComposition, err.code);
        assert!(err.get_details().unwrap().contains("c.x[0]"));
    }

    #[test]
    fn test_eval_of_evaluated_is_rejected() {
        let err = expand0(&comp_var("c", "x").eval(0).eval(1), dims(2, 1)).unwrap_err();
        assert_eq!(ErrorCode::InvalidTimeOperatorComposition, err.code);
    }

    #[test]
    fn test_time_sum_expands_each_offset() {
        let e = expand0(&comp_var("c", "x").time_sum(-2, 0), dims(2, 1)).unwrap();
        assert_eq!(
            Expr2::Sum(vec![
                x_at(TimeIndex::Shift(-2)),
                x_at(TimeIndex::Shift(-1)),
                x_at(TimeIndex::Shift(0)),
            ]),
            e
        );
    }

    #[test]
    fn test_time_sum_over_shifted_operand() {
        let e = expand0(&comp_var("c", "x").shift(-1).time_sum(0, 1), dims(2, 1)).unwrap();
        assert_eq!(
            Expr2::Sum(vec![x_at(TimeIndex::Shift(-1)), x_at(TimeIndex::Shift(0))]),
            e
        );
    }

    #[test]
    fn test_time_sum_over_evaluated_operand_is_rejected() {
        let err = expand0(&comp_var("c", "x").eval(0).time_sum(0, 1), dims(2, 1)).unwrap_err();
        assert_eq!(ErrorCode::InvalidTimeOperatorComposition, err.code);
    }

    #[test]
    fn test_empty_time_sum_is_zero() {
        let e = expand0(&comp_var("c", "x").time_sum(1, 0), dims(2, 1)).unwrap();
        assert_eq!(Expr2::Const(0.0), e);
    }

    #[test]
    fn test_all_time_sum_evaluates_every_step() {
        let e = expand0(&comp_var("c", "x").time_sum_all(), dims(2, 1)).unwrap();
        assert_eq!(
            Expr2::Sum(vec![x_at(TimeIndex::Step(0)), x_at(TimeIndex::Step(1))]),
            e
        );
    }

    #[test]
    fn test_all_time_sum_over_shifted_operand() {
        let e = expand0(&comp_var("c", "x").shift(1).time_sum_all(), dims(2, 1)).unwrap();
        assert_eq!(
            Expr2::Sum(vec![x_at(TimeIndex::Step(1)), x_at(TimeIndex::Step(2))]),
            e
        );
    }

    #[test]
    fn test_all_time_sum_tolerates_evaluated_operand() {
        // an inner absolute evaluation survives re-evaluation untouched
        let e = expand0(&comp_var("c", "x").eval(1).time_sum_all(), dims(2, 1)).unwrap();
        assert_eq!(
            Expr2::Sum(vec![x_at(TimeIndex::Step(1)), x_at(TimeIndex::Step(1))]),
            e
        );
    }

    #[test]
    fn test_expectation_averages_scenarios() {
        let e = expand0(&comp_param("c", "p").expec(), dims(1, 2)).unwrap();
        let leaf = |s: usize| Expr2::Param {
            component: "c".to_string(),
            name: "p".to_string(),
            time: Some(TimeIndex::Shift(0)),
            scenario: Some(s),
        };
        assert_eq!(
            Expr2::Op2(
                BinaryOp::Div,
                Box::new(Expr2::Sum(vec![leaf(0), leaf(1)])),
                Box::new(Expr2::Const(2.0)),
            ),
            e
        );
    }

    #[test]
    fn test_unknown_scenario_operator_is_rejected() {
        let expr = crate::ast::Expr0::ScenarioOp(
            Box::new(comp_var("c", "x")),
            "Variance".to_string(),
        );
        let err = expand0(&expr, dims(1, 2)).unwrap_err();
        assert_eq!(ErrorCode::UnsupportedOperator, err.code);
        assert_eq!(Some("Variance".to_string()), err.get_details());
    }

    #[test]
    fn test_shift_offset_supports_constant_arithmetic() {
        let offset = literal(2.0) - literal(3.0);
        let e = expand0(&comp_var("c", "x").shift_expr(offset), dims(2, 1)).unwrap();
        assert_eq!(x_at(TimeIndex::Shift(-1)), e);
    }

    #[test]
    fn test_non_integer_offset_is_rejected() {
        let err = expand0(&comp_var("c", "x").shift_expr(literal(0.5)), dims(2, 1)).unwrap_err();
        assert_eq!(ErrorCode::ExpectedInteger, err.code);
    }

    #[test]
    fn test_identifier_offset_is_rejected() {
        let err = expand0(&comp_var("c", "x").shift_expr(var("d")), dims(2, 1)).unwrap_err();
        assert_eq!(ErrorCode::UnresolvedIdentifier, err.code);
    }

    #[test]
    fn test_pretty_expanded_leaves() {
        assert_eq!("c.x[t-1]", pretty(&x_at(TimeIndex::Shift(-1))));
        assert_eq!("c.x[t]", pretty(&x_at(TimeIndex::Shift(0))));
        assert_eq!("c.x[2]", pretty(&x_at(TimeIndex::Step(2))));
        assert_eq!(
            "c.x[t, s1]",
            pretty(&set_scenario(x_at(TimeIndex::Shift(0)), 1))
        );
        let sum = Expr2::Sum(vec![x_at(TimeIndex::Step(0)), x_at(TimeIndex::Step(1))]);
        assert_eq!("c.x[0] + c.x[1]", pretty(&sum));
        let avg = Expr2::Op2(BinaryOp::Div, Box::new(sum), Box::new(Expr2::Const(2.0)));
        assert_eq!("(c.x[0] + c.x[1]) / 2", pretty(&avg));
    }
}

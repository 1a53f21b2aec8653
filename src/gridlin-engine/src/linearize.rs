// Copyright 2025 The Gridlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use crate::ast::expr2::{pretty, Expr2};
use crate::common::Result;
use crate::comp_err;
use crate::linexpr::{LinearExpression, Term, EPS};

/// Folds a fully expanded tree into the sparse affine form.
///
/// The input must be port-free and operator-free (`Expr2` guarantees both),
/// and every parameter leaf must already have been bound to a literal;
/// a surviving parameter means the caller skipped the binding pass.
pub fn linearize(expr: &Expr2) -> Result<LinearExpression> {
    match expr {
        Expr2::Const(n) => Ok(LinearExpression::from_constant(*n)),
        Expr2::Var {
            component,
            name,
            time,
            scenario,
        } => Ok(LinearExpression::from_term(Term {
            coeff: 1.0,
            component: component.clone(),
            variable: name.clone(),
            time: *time,
            scenario: *scenario,
        })),
        Expr2::Param { .. } => comp_err!(
            UnsupportedNode,
            format!(
                "linearization: parameter must be bound to a literal first: {}",
                pretty(expr)
            )
        ),
        Expr2::Neg(r) => Ok(-linearize(r)?),
        Expr2::Op2(op, l, r) => {
            use crate::ast::BinaryOp::*;
            let l = linearize(l)?;
            let r = linearize(r)?;
            match op {
                Add => Ok(l + r),
                Sub => Ok(l - r),
                Mul => l.checked_mul(r),
                Div => {
                    if r.is_constant() && r.constant().abs() < EPS {
                        comp_err!(DivisionByZero, format!("{}", pretty(expr)))
                    } else {
                        l.checked_div(r)
                    }
                }
            }
        }
        // window expansions accumulate iteratively; recursion depth stays
        // proportional to expression nesting even for year-long windows
        Expr2::Sum(items) => {
            let mut acc = LinearExpression::new();
            for item in items {
                acc += linearize(item)?;
            }
            Ok(acc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr0::{comp_param, comp_var, literal};
    use crate::ast::expr1::resolve_ports;
    use crate::ast::expr2::{expand, LiteralEvaluator, ProblemDimensions, TimeIndex};
    use crate::common::ErrorCode;

    fn compile(expr: &crate::ast::Expr0, t: usize, s: usize) -> Result<LinearExpression> {
        let resolved = resolve_ports(expr, "test", &Default::default())?;
        let expanded = expand(&resolved, ProblemDimensions::new(t, s), &LiteralEvaluator)?;
        linearize(&expanded)
    }

    fn x(coeff: f64) -> Term {
        Term::new(coeff, "c", "x").at(TimeIndex::Shift(0))
    }

    #[test]
    fn test_literal_is_constant_only() {
        let e = compile(&literal(4.5), 1, 1).unwrap();
        assert!(e.is_constant());
        assert_eq!(4.5, e.constant());
    }

    #[test]
    fn test_variable_is_unit_term() {
        let e = compile(&comp_var("c", "x"), 1, 1).unwrap();
        assert_eq!(LinearExpression::from_term(x(1.0)), e);
    }

    #[test]
    fn test_scaling_and_merging() {
        let expr = literal(2.0) * comp_var("c", "x") + comp_var("c", "x") * literal(3.0);
        let e = compile(&expr, 1, 1).unwrap();
        assert_eq!(LinearExpression::from_term(x(5.0)), e);
    }

    #[test]
    fn test_negation_flips_everything() {
        let expr = -(comp_var("c", "x") + literal(1.0));
        let e = compile(&expr, 1, 1).unwrap();
        assert_eq!(
            LinearExpression::from_term(x(-1.0)) + LinearExpression::from_constant(-1.0),
            e
        );
    }

    #[test]
    fn test_product_of_variables_is_nonlinear_both_orders() {
        let err = compile(&(comp_var("c", "x") * comp_var("c", "y")), 1, 1).unwrap_err();
        assert_eq!(ErrorCode::NonLinearExpression, err.code);
        let err = compile(&(comp_var("c", "y") * comp_var("c", "x")), 1, 1).unwrap_err();
        assert_eq!(ErrorCode::NonLinearExpression, err.code);
    }

    #[test]
    fn test_division_rules() {
        let e = compile(&(comp_var("c", "x") / literal(4.0)), 1, 1).unwrap();
        assert_eq!(LinearExpression::from_term(x(0.25)), e);

        let err = compile(&(comp_var("c", "x") / literal(0.0)), 1, 1).unwrap_err();
        assert_eq!(ErrorCode::DivisionByZero, err.code);

        let err = compile(&(literal(1.0) / comp_var("c", "x")), 1, 1).unwrap_err();
        assert_eq!(ErrorCode::NonLinearExpression, err.code);
    }

    #[test]
    fn test_unbound_parameter_is_rejected() {
        let err = compile(&comp_param("c", "p"), 1, 1).unwrap_err();
        assert_eq!(ErrorCode::UnsupportedNode, err.code);
        assert!(err.get_details().unwrap().contains("c.p"));
    }

    #[test]
    fn test_window_sum_merges_distinct_instances() {
        let e = compile(&comp_var("c", "x").time_sum(-1, 0), 2, 1).unwrap();
        assert_eq!(2, e.len());
        assert_eq!(
            1.0,
            e.get(&Term::new(1.0, "c", "x").at(TimeIndex::Shift(-1)).key())
                .unwrap()
                .coeff
        );
        assert_eq!(
            1.0,
            e.get(&Term::new(1.0, "c", "x").at(TimeIndex::Shift(0)).key())
                .unwrap()
                .coeff
        );
    }

    #[test]
    fn test_overlapping_window_sums_accumulate() {
        // x[t] + x[t] collapses into one doubled term
        let expr = comp_var("c", "x").eval(1).time_sum_all();
        let e = compile(&expr, 2, 1).unwrap();
        assert_eq!(1, e.len());
        assert_eq!(
            2.0,
            e.get(&Term::new(1.0, "c", "x").at(TimeIndex::Step(1)).key())
                .unwrap()
                .coeff
        );
    }

    #[test]
    fn test_wide_window_stays_flat() {
        // a large all-time sum exercises the iterative accumulator; this
        // would overflow the stack if the expansion nested one level per
        // timestep
        let e = compile(&comp_var("c", "x").time_sum_all(), 10_000, 1).unwrap();
        assert_eq!(10_000, e.len());
    }

    #[test]
    fn test_empty_window_is_zero() {
        let e = compile(&comp_var("c", "x").time_sum(1, 0), 2, 1).unwrap();
        assert!(e.is_constant());
        assert_eq!(0.0, e.constant());
    }
}

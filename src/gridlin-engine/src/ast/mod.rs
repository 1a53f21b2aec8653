// Copyright 2025 The Gridlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

pub mod expr0;
pub mod expr1;
pub mod expr2;

pub use expr0::{comp_param, comp_var, literal, param, port_field, var, Expr0};
pub use expr1::{resolve_ports, Expr1, PortFieldKey, PortsExpressions};
pub use expr2::{
    expand, pretty, ConstEvaluator, Expr2, LiteralEvaluator, ProblemDimensions, TimeIndex,
};

use float_cmp::{approx_eq, F64Margin};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Leq,
    Geq,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Leq => "<=",
            CmpOp::Geq => ">=",
        }
    }
}

fn child_needs_parens(parent: &Expr0, child: &Expr0) -> bool {
    match parent {
        // no children, or children delimited by brackets/commas
        Expr0::Const(_)
        | Expr0::Param(_)
        | Expr0::Var(_)
        | Expr0::ComponentParam(_, _)
        | Expr0::ComponentVar(_, _)
        | Expr0::TimeSum(_, _, _)
        | Expr0::AllTimeSum(_)
        | Expr0::ScenarioOp(_, _)
        | Expr0::PortField(_, _)
        | Expr0::PortAgg(_, _) => false,
        // the operand of a time bracket reads ambiguously unless atomic
        Expr0::TimeShift(_, _) | Expr0::TimeEval(_, _) => {
            matches!(child, Expr0::Neg(_) | Expr0::Op2(_, _, _) | Expr0::Cmp(_, _, _))
        }
        Expr0::Neg(_) => matches!(child, Expr0::Op2(_, _, _) | Expr0::Cmp(_, _, _)),
        Expr0::Op2(parent_op, _, _) => match child {
            Expr0::Neg(_) | Expr0::Cmp(_, _, _) => true,
            // 3 * (2 + 1) needs parens, 3 * 2 + 1 does not
            Expr0::Op2(child_op, _, _) => parent_op.precedence() > child_op.precedence(),
            _ => false,
        },
        Expr0::Cmp(_, _, _) => false,
    }
}

fn paren_if_necessary(parent: &Expr0, child: &Expr0, eqn: String) -> String {
    if child_needs_parens(parent, child) {
        format!("({eqn})")
    } else {
        eqn
    }
}

/// Formats a constant time offset as it appears inside a shift bracket:
/// `t`, `t+4` or `t-1`.
fn fmt_time_offset(delta: &Expr0) -> String {
    if let Expr0::Const(n) = delta {
        if *n == 0.0 {
            "t".to_string()
        } else if *n < 0.0 {
            format!("t-{}", -n)
        } else {
            format!("t+{n}")
        }
    } else {
        format!("t+({})", print_expr(delta))
    }
}

/// Emits the canonical infix text for an expression, inserting parentheses
/// according to operator precedence.  This is the single formatting routine
/// shared by error messages and by the printed-text reference heuristic.
pub fn print_expr(expr: &Expr0) -> String {
    match expr {
        Expr0::Const(n) => format!("{n}"),
        Expr0::Param(id) | Expr0::Var(id) => id.clone(),
        Expr0::ComponentParam(c, id) | Expr0::ComponentVar(c, id) => format!("{c}.{id}"),
        Expr0::Neg(r) => {
            let r = paren_if_necessary(expr, r, print_expr(r));
            format!("-{r}")
        }
        Expr0::Op2(op, l, r) => {
            let l = paren_if_necessary(expr, l, print_expr(l));
            let r = paren_if_necessary(expr, r, print_expr(r));
            format!("{} {} {}", l, op.as_str(), r)
        }
        Expr0::Cmp(op, l, r) => {
            let l = paren_if_necessary(expr, l, print_expr(l));
            let r = paren_if_necessary(expr, r, print_expr(r));
            format!("{} {} {}", l, op.as_str(), r)
        }
        Expr0::TimeShift(operand, delta) => {
            let operand = paren_if_necessary(expr, operand, print_expr(operand));
            format!("{}[{}]", operand, fmt_time_offset(delta))
        }
        Expr0::TimeEval(operand, t) => {
            let operand = paren_if_necessary(expr, operand, print_expr(operand));
            format!("{}[{}]", operand, print_expr(t))
        }
        Expr0::TimeSum(operand, from, to) => {
            format!(
                "sum({} .. {}, {})",
                print_expr(from),
                print_expr(to),
                print_expr(operand)
            )
        }
        Expr0::AllTimeSum(operand) => format!("sum({})", print_expr(operand)),
        Expr0::ScenarioOp(operand, name) => format!("{}({})", name, print_expr(operand)),
        Expr0::PortField(port, field) => format!("{port}.{field}"),
        Expr0::PortAgg(operand, name) => format!("{}({})", name, print_expr(operand)),
    }
}

/// Structural equality with approximate comparison of constant leaves.
///
/// Shapes and identifiers must match exactly; `Const` leaves are compared
/// with the given float-cmp margin (absolute epsilon plus ulps).
pub fn approx_eq_expr(a: &Expr0, b: &Expr0, margin: F64Margin) -> bool {
    match (a, b) {
        (Expr0::Const(x), Expr0::Const(y)) => approx_eq!(f64, *x, *y, margin),
        (Expr0::Param(x), Expr0::Param(y)) => x == y,
        (Expr0::Var(x), Expr0::Var(y)) => x == y,
        (Expr0::ComponentParam(c1, x), Expr0::ComponentParam(c2, y)) => c1 == c2 && x == y,
        (Expr0::ComponentVar(c1, x), Expr0::ComponentVar(c2, y)) => c1 == c2 && x == y,
        (Expr0::Neg(x), Expr0::Neg(y)) => approx_eq_expr(x, y, margin),
        (Expr0::Op2(op1, l1, r1), Expr0::Op2(op2, l2, r2)) => {
            op1 == op2 && approx_eq_expr(l1, l2, margin) && approx_eq_expr(r1, r2, margin)
        }
        (Expr0::Cmp(op1, l1, r1), Expr0::Cmp(op2, l2, r2)) => {
            op1 == op2 && approx_eq_expr(l1, l2, margin) && approx_eq_expr(r1, r2, margin)
        }
        (Expr0::TimeShift(o1, d1), Expr0::TimeShift(o2, d2)) => {
            approx_eq_expr(o1, o2, margin) && approx_eq_expr(d1, d2, margin)
        }
        (Expr0::TimeEval(o1, t1), Expr0::TimeEval(o2, t2)) => {
            approx_eq_expr(o1, o2, margin) && approx_eq_expr(t1, t2, margin)
        }
        (Expr0::TimeSum(o1, f1, u1), Expr0::TimeSum(o2, f2, u2)) => {
            approx_eq_expr(o1, o2, margin)
                && approx_eq_expr(f1, f2, margin)
                && approx_eq_expr(u1, u2, margin)
        }
        (Expr0::AllTimeSum(o1), Expr0::AllTimeSum(o2)) => approx_eq_expr(o1, o2, margin),
        (Expr0::ScenarioOp(o1, n1), Expr0::ScenarioOp(o2, n2)) => {
            n1 == n2 && approx_eq_expr(o1, o2, margin)
        }
        (Expr0::PortField(p1, f1), Expr0::PortField(p2, f2)) => p1 == p2 && f1 == f2,
        (Expr0::PortAgg(o1, n1), Expr0::PortAgg(o2, n2)) => {
            n1 == n2 && approx_eq_expr(o1, o2, margin)
        }
        _ => false,
    }
}

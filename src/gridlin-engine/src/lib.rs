// Copyright 2025 The Gridlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! gridlin-engine compiles symbolic power-system model equations into the
//! sparse linear expressions an LP builder consumes.
//!
//! The pipeline, in order: port resolution substitutes network wiring into
//! each component's equations, operator expansion replays time and
//! scenario operators against a finite window, parameter binding replaces
//! parameter leaves with literals, and linearization folds the result into
//! a `LinearExpression`.  Indexing-structure inference and the degree
//! check validate templates before any of that runs.
//!
//! Everything here is pure, synchronous tree traversal over immutable
//! inputs; independent compilations can be fanned out by the caller.

#![forbid(unsafe_code)]

pub mod ast;
pub mod common;
pub mod indexing;
pub mod linearize;
pub mod linexpr;
pub mod model;

pub use self::ast::{
    comp_param, comp_var, expand, literal, param, port_field, print_expr, resolve_ports, var,
    ConstEvaluator, Expr0, Expr1, Expr2, LiteralEvaluator, PortFieldKey, PortsExpressions,
    ProblemDimensions, TimeIndex,
};
pub use self::common::{Error, ErrorCode, ErrorKind, Ident, Result};
pub use self::indexing::{
    compute_indexation, compute_indexation_resolved, degree, is_constant, is_linear,
    IndexingStructure, StructureProvider,
};
pub use self::linearize::linearize;
pub use self::linexpr::{LinearExpression, Term, TermKey, EPS};
pub use self::model::{
    bind_parameters, compile_constraint, compile_objective, scope_to_component, Component,
    CompiledConstraint, Constraint, ConstantParameterValues, Model, Network, ParameterDef,
    ParameterValues, VariableDef,
};

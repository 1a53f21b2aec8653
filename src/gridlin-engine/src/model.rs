// Copyright 2025 The Gridlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The thin datamodel the compilation pipeline hangs off of: reusable
//! models (named parameters, variables, constraints and an objective
//! contribution), components instantiating them inside a network, and the
//! driver that runs one constraint through
//! scope -> resolve -> expand -> bind -> linearize.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::ast::expr0::Expr0;
use crate::ast::expr1::{resolve_ports, PortsExpressions};
use crate::ast::expr2::{expand, ConstEvaluator, Expr2, ProblemDimensions, TimeIndex};
use crate::ast::{print_expr, CmpOp};
use crate::common::{Ident, Result};
use crate::indexing::{
    compute_indexation, degree, IndexingStructure, StructureProvider,
};
use crate::linearize::linearize;
use crate::linexpr::LinearExpression;
use crate::{comp_err, model_err};

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterDef {
    pub name: Ident,
    pub structure: IndexingStructure,
}

impl ParameterDef {
    pub fn new<S: Into<Ident>>(name: S, structure: IndexingStructure) -> Self {
        ParameterDef {
            name: name.into(),
            structure,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariableDef {
    pub name: Ident,
    pub structure: IndexingStructure,
    /// constant bound templates; instantiated per timestep/scenario by the
    /// LP builder
    pub lower_bound: Option<Expr0>,
    pub upper_bound: Option<Expr0>,
}

impl VariableDef {
    pub fn new<S: Into<Ident>>(name: S, structure: IndexingStructure) -> Self {
        VariableDef {
            name: name.into(),
            structure,
            lower_bound: None,
            upper_bound: None,
        }
    }

    pub fn with_lower_bound(mut self, bound: Expr0) -> Self {
        self.lower_bound = Some(bound);
        self
    }

    pub fn with_upper_bound(mut self, bound: Expr0) -> Self {
        self.upper_bound = Some(bound);
        self
    }
}

/// A named row template: `expression` compared against constant bounds.
/// Comparisons never survive into the compilation passes; they are split
/// here, at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub expression: Expr0,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl Constraint {
    /// Builds a constraint from a comparison: `2*x <= p` stores the
    /// expression `2*x - p` bounded above by zero.
    pub fn new<S: Into<String>>(name: S, comparison: Expr0) -> Result<Self> {
        let (op, l, r) = match comparison {
            Expr0::Cmp(op, l, r) => (op, l, r),
            other => {
                return comp_err!(
                    UnsupportedNode,
                    format!("constraint requires a comparison: {}", print_expr(&other))
                );
            }
        };
        let (lower_bound, upper_bound) = match op {
            CmpOp::Eq => (0.0, 0.0),
            CmpOp::Leq => (f64::NEG_INFINITY, 0.0),
            CmpOp::Geq => (0.0, f64::INFINITY),
        };
        Ok(Constraint {
            name: name.into(),
            expression: *l - *r,
            lower_bound,
            upper_bound,
        })
    }

    pub fn with_bounds<S: Into<String>>(
        name: S,
        expression: Expr0,
        lower_bound: f64,
        upper_bound: f64,
    ) -> Self {
        Constraint {
            name: name.into(),
            expression,
            lower_bound,
            upper_bound,
        }
    }

    /// Printed-text heuristic; see `Expr0::mentions` for the caveat on
    /// prefix matches.
    pub fn depends_on(&self, ident: &str) -> bool {
        self.expression.mentions(ident)
    }
}

/// A reusable description of one kind of component: generators, storages,
/// nodes and links are all models with different equations.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Model {
    pub id: Ident,
    pub parameters: BTreeMap<Ident, ParameterDef>,
    pub variables: BTreeMap<Ident, VariableDef>,
    pub constraints: Vec<Constraint>,
    pub objective: Option<Expr0>,
}

impl Model {
    pub fn new<S: Into<Ident>>(id: S) -> Self {
        Model {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, def: ParameterDef) -> Self {
        self.parameters.insert(def.name.clone(), def);
        self
    }

    pub fn with_variable(mut self, def: VariableDef) -> Self {
        self.variables.insert(def.name.clone(), def);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_objective(mut self, objective: Expr0) -> Self {
        self.objective = Some(objective);
        self
    }

    /// Rejects models that could not compile: a name used for both a
    /// parameter and a variable, a nonlinear constraint, or an objective
    /// contribution that is nonlinear or does not fold to a single scalar.
    pub fn validate(&self) -> Result<()> {
        for name in self.parameters.keys() {
            if self.variables.contains_key(name) {
                return model_err!(
                    DuplicateIdentifier,
                    format!("{}.{}", self.id, name)
                );
            }
        }
        for constraint in &self.constraints {
            // port references block the static degree check; linearization
            // still rejects nonlinearity after the network is wired up
            if constraint.expression.has_ports() {
                continue;
            }
            if degree(&constraint.expression)? > 1 {
                return model_err!(
                    NonLinearExpression,
                    format!(
                        "constraint {}: {}",
                        constraint.name,
                        print_expr(&constraint.expression)
                    )
                );
            }
        }
        if let Some(objective) = &self.objective {
            if objective.has_ports() {
                return Ok(());
            }
            if degree(objective)? > 1 {
                return model_err!(NonLinearExpression, print_expr(objective));
            }
            let structure = compute_indexation(objective, self)?;
            if !structure.is_scalar() {
                return model_err!(
                    InvalidObjective,
                    format!(
                        "objective must aggregate to a scalar but varies by {}: {}",
                        structure,
                        print_expr(objective)
                    )
                );
            }
        }
        Ok(())
    }
}

/// Inside a model template, names are bare; the model itself answers
/// structure lookups for them.  Component-scoped references have no
/// meaning until the model is instantiated in a network.
impl StructureProvider for Model {
    fn get_parameter_structure(&self, name: &str) -> Result<IndexingStructure> {
        match self.parameters.get(name) {
            Some(def) => Ok(def.structure),
            None => comp_err!(UnresolvedIdentifier, format!("{}.{}", self.id, name)),
        }
    }

    fn get_variable_structure(&self, name: &str) -> Result<IndexingStructure> {
        match self.variables.get(name) {
            Some(def) => Ok(def.structure),
            None => comp_err!(UnresolvedIdentifier, format!("{}.{}", self.id, name)),
        }
    }

    fn get_component_parameter_structure(
        &self,
        component: &str,
        name: &str,
    ) -> Result<IndexingStructure> {
        comp_err!(
            UnresolvedIdentifier,
            format!("model {} cannot resolve {component}.{name}", self.id)
        )
    }

    fn get_component_variable_structure(
        &self,
        component: &str,
        name: &str,
    ) -> Result<IndexingStructure> {
        comp_err!(
            UnresolvedIdentifier,
            format!("model {} cannot resolve {component}.{name}", self.id)
        )
    }
}

/// An instantiation of a model with a concrete id inside a network.
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    pub id: Ident,
    pub model: Rc<Model>,
}

impl Component {
    pub fn new<S: Into<Ident>>(id: S, model: Rc<Model>) -> Self {
        Component {
            id: id.into(),
            model,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Network {
    components: HashMap<Ident, Component>,
}

impl Network {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_component(&mut self, component: Component) -> Result<()> {
        if self.components.contains_key(&component.id) {
            return model_err!(DuplicateIdentifier, component.id.clone());
        }
        self.components.insert(component.id.clone(), component);
        Ok(())
    }

    pub fn get_component(&self, id: &str) -> Result<&Component> {
        match self.components.get(id) {
            Some(component) => Ok(component),
            None => comp_err!(UnresolvedIdentifier, id.to_string()),
        }
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }
}

impl StructureProvider for Network {
    fn get_parameter_structure(&self, name: &str) -> Result<IndexingStructure> {
        comp_err!(
            UnresolvedIdentifier,
            format!("bare reference at network scope: {name}")
        )
    }

    fn get_variable_structure(&self, name: &str) -> Result<IndexingStructure> {
        comp_err!(
            UnresolvedIdentifier,
            format!("bare reference at network scope: {name}")
        )
    }

    fn get_component_parameter_structure(
        &self,
        component: &str,
        name: &str,
    ) -> Result<IndexingStructure> {
        self.get_component(component)?
            .model
            .get_parameter_structure(name)
    }

    fn get_component_variable_structure(
        &self,
        component: &str,
        name: &str,
    ) -> Result<IndexingStructure> {
        self.get_component(component)?
            .model
            .get_variable_structure(name)
    }
}

/// Rewrites the bare names of a model template to component-scoped
/// references, leaving everything else (ports included) untouched.
pub fn scope_to_component(expr: &Expr0, component: &str) -> Expr0 {
    match expr {
        Expr0::Const(_)
        | Expr0::ComponentParam(_, _)
        | Expr0::ComponentVar(_, _)
        | Expr0::PortField(_, _) => expr.clone(),
        Expr0::Param(name) => Expr0::ComponentParam(component.to_string(), name.clone()),
        Expr0::Var(name) => Expr0::ComponentVar(component.to_string(), name.clone()),
        Expr0::Neg(r) => Expr0::Neg(Box::new(scope_to_component(r, component))),
        Expr0::Op2(op, l, r) => Expr0::Op2(
            *op,
            Box::new(scope_to_component(l, component)),
            Box::new(scope_to_component(r, component)),
        ),
        Expr0::Cmp(op, l, r) => Expr0::Cmp(
            *op,
            Box::new(scope_to_component(l, component)),
            Box::new(scope_to_component(r, component)),
        ),
        Expr0::TimeShift(operand, delta) => Expr0::TimeShift(
            Box::new(scope_to_component(operand, component)),
            Box::new(scope_to_component(delta, component)),
        ),
        Expr0::TimeEval(operand, step) => Expr0::TimeEval(
            Box::new(scope_to_component(operand, component)),
            Box::new(scope_to_component(step, component)),
        ),
        Expr0::TimeSum(operand, from, to) => Expr0::TimeSum(
            Box::new(scope_to_component(operand, component)),
            Box::new(scope_to_component(from, component)),
            Box::new(scope_to_component(to, component)),
        ),
        Expr0::AllTimeSum(operand) => {
            Expr0::AllTimeSum(Box::new(scope_to_component(operand, component)))
        }
        Expr0::ScenarioOp(operand, name) => Expr0::ScenarioOp(
            Box::new(scope_to_component(operand, component)),
            name.clone(),
        ),
        Expr0::PortAgg(operand, name) => Expr0::PortAgg(
            Box::new(scope_to_component(operand, component)),
            name.clone(),
        ),
    }
}

/// Supplies the numeric value of a parameter instance.  The time index of
/// a relative leaf is passed through as-is; the caller decides what row it
/// is anchored to.
pub trait ParameterValues {
    fn value(
        &self,
        component: &str,
        name: &str,
        time: Option<TimeIndex>,
        scenario: Option<usize>,
    ) -> Result<f64>;
}

/// Scalar parameter bindings keyed by `(component, name)`, the common case
/// for parameters that vary by neither time nor scenario.
#[derive(Clone, Debug, Default)]
pub struct ConstantParameterValues {
    values: HashMap<(Ident, Ident), f64>,
}

impl ConstantParameterValues {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn bind<C: Into<Ident>, N: Into<Ident>>(mut self, component: C, name: N, value: f64) -> Self {
        self.values.insert((component.into(), name.into()), value);
        self
    }
}

impl ParameterValues for ConstantParameterValues {
    fn value(
        &self,
        component: &str,
        name: &str,
        _time: Option<TimeIndex>,
        _scenario: Option<usize>,
    ) -> Result<f64> {
        match self.values.get(&(component.to_string(), name.to_string())) {
            Some(v) => Ok(*v),
            None => comp_err!(
                UnresolvedIdentifier,
                format!("no value bound for parameter {component}.{name}")
            ),
        }
    }
}

/// Replaces every parameter leaf of an expanded tree with its bound
/// literal; after this pass the tree is ready to linearize.
pub fn bind_parameters(expr: &Expr2, values: &dyn ParameterValues) -> Result<Expr2> {
    let bound = match expr {
        Expr2::Const(_) | Expr2::Var { .. } => expr.clone(),
        Expr2::Param {
            component,
            name,
            time,
            scenario,
        } => Expr2::Const(values.value(component, name, *time, *scenario)?),
        Expr2::Neg(r) => Expr2::Neg(Box::new(bind_parameters(r, values)?)),
        Expr2::Op2(op, l, r) => Expr2::Op2(
            *op,
            Box::new(bind_parameters(l, values)?),
            Box::new(bind_parameters(r, values)?),
        ),
        Expr2::Sum(items) => Expr2::Sum(
            items
                .iter()
                .map(|item| bind_parameters(item, values))
                .collect::<Result<Vec<_>>>()?,
        ),
    };
    Ok(bound)
}

/// One compiled row: the sparse expression plus its bounds, ready for the
/// LP builder to instantiate.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledConstraint {
    pub name: String,
    pub expression: LinearExpression,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Runs one constraint of one component through the whole pipeline.
pub fn compile_constraint(
    component_id: &str,
    constraint: &Constraint,
    ports: &PortsExpressions,
    dims: ProblemDimensions,
    evaluator: &dyn ConstEvaluator,
    values: &dyn ParameterValues,
) -> Result<CompiledConstraint> {
    let scoped = scope_to_component(&constraint.expression, component_id);
    let resolved = resolve_ports(&scoped, component_id, ports)?;
    let expanded = expand(&resolved, dims, evaluator)?;
    let bound = bind_parameters(&expanded, values)?;
    let expression = linearize(&bound)?;
    Ok(CompiledConstraint {
        name: constraint.name.clone(),
        expression,
        lower_bound: constraint.lower_bound,
        upper_bound: constraint.upper_bound,
    })
}

/// Compiles a component's objective contribution, if it declares one.
pub fn compile_objective(
    component_id: &str,
    model: &Model,
    ports: &PortsExpressions,
    dims: ProblemDimensions,
    evaluator: &dyn ConstEvaluator,
    values: &dyn ParameterValues,
) -> Result<Option<LinearExpression>> {
    let objective = match &model.objective {
        Some(objective) => objective,
        None => return Ok(None),
    };
    let scoped = scope_to_component(objective, component_id);
    let resolved = resolve_ports(&scoped, component_id, ports)?;
    let expanded = expand(&resolved, dims, evaluator)?;
    let bound = bind_parameters(&expanded, values)?;
    Ok(Some(linearize(&bound)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr0::{literal, param, var};
    use crate::ast::expr2::LiteralEvaluator;
    use crate::common::ErrorCode;
    use crate::linexpr::Term;

    fn thermal_model() -> Model {
        Model::new("thermal")
            .with_parameter(ParameterDef::new("cost", IndexingStructure::scalar()))
            .with_parameter(ParameterDef::new("p_max", IndexingStructure::scalar()))
            .with_variable(VariableDef::new(
                "generation",
                IndexingStructure::new(true, true),
            ))
            .with_constraint(
                Constraint::new("max_generation", var("generation").leq(param("p_max"))).unwrap(),
            )
            .with_objective((param("cost") * var("generation")).time_sum_all().expec())
    }

    #[test]
    fn test_constraint_from_leq_comparison() {
        let c = Constraint::new("cap", (literal(2.0) * var("x")).leq(param("p"))).unwrap();
        assert_eq!(literal(2.0) * var("x") - param("p"), c.expression);
        assert_eq!(f64::NEG_INFINITY, c.lower_bound);
        assert_eq!(0.0, c.upper_bound);
    }

    #[test]
    fn test_constraint_from_eq_and_geq() {
        let c = Constraint::new("bal", var("x").eq(param("p"))).unwrap();
        assert_eq!((0.0, 0.0), (c.lower_bound, c.upper_bound));

        let c = Constraint::new("floor", var("x").geq(literal(0.0))).unwrap();
        assert_eq!((0.0, f64::INFINITY), (c.lower_bound, c.upper_bound));
    }

    #[test]
    fn test_constraint_requires_a_comparison() {
        let err = Constraint::new("bad", var("x") + literal(1.0)).unwrap_err();
        assert_eq!(ErrorCode::UnsupportedNode, err.code);
    }

    #[test]
    fn test_constraint_depends_on() {
        let c = Constraint::new("cap", var("generation").leq(param("p_max"))).unwrap();
        assert!(c.depends_on("generation"));
        assert!(c.depends_on("p_max"));
        assert!(!c.depends_on("level"));
    }

    #[test]
    fn test_model_validates() {
        thermal_model().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let model = Model::new("m")
            .with_parameter(ParameterDef::new("x", IndexingStructure::scalar()))
            .with_variable(VariableDef::new("x", IndexingStructure::scalar()));
        let err = model.validate().unwrap_err();
        assert_eq!(ErrorCode::DuplicateIdentifier, err.code);
    }

    #[test]
    fn test_validate_rejects_nonlinear_constraint() {
        let model = Model::new("m")
            .with_variable(VariableDef::new("x", IndexingStructure::scalar()))
            .with_constraint(
                Constraint::new("sq", (var("x") * var("x")).leq(literal(1.0))).unwrap(),
            );
        let err = model.validate().unwrap_err();
        assert_eq!(ErrorCode::NonLinearExpression, err.code);
    }

    #[test]
    fn test_validate_rejects_unaggregated_objective() {
        let model = Model::new("m")
            .with_parameter(ParameterDef::new("cost", IndexingStructure::scalar()))
            .with_variable(VariableDef::new(
                "generation",
                IndexingStructure::new(true, false),
            ))
            .with_objective(param("cost") * var("generation"));
        let err = model.validate().unwrap_err();
        assert_eq!(ErrorCode::InvalidObjective, err.code);
        assert!(err.get_details().unwrap().contains("time"));
    }

    #[test]
    fn test_network_structure_lookups() {
        let mut network = Network::new();
        network
            .add_component(Component::new("gen", Rc::new(thermal_model())))
            .unwrap();

        assert_eq!(
            IndexingStructure::new(true, true),
            network
                .get_component_variable_structure("gen", "generation")
                .unwrap()
        );
        assert_eq!(
            IndexingStructure::scalar(),
            network
                .get_component_parameter_structure("gen", "cost")
                .unwrap()
        );
        let err = network
            .get_component_variable_structure("ghost", "generation")
            .unwrap_err();
        assert_eq!(ErrorCode::UnresolvedIdentifier, err.code);
        let err = network.get_variable_structure("generation").unwrap_err();
        assert_eq!(ErrorCode::UnresolvedIdentifier, err.code);
    }

    #[test]
    fn test_duplicate_component_rejected() {
        let mut network = Network::new();
        let model = Rc::new(thermal_model());
        network
            .add_component(Component::new("gen", model.clone()))
            .unwrap();
        let err = network
            .add_component(Component::new("gen", model))
            .unwrap_err();
        assert_eq!(ErrorCode::DuplicateIdentifier, err.code);
    }

    #[test]
    fn test_compile_constraint_end_to_end() {
        let model = thermal_model();
        let values = ConstantParameterValues::new().bind("gen", "p_max", 100.0);
        let compiled = compile_constraint(
            "gen",
            &model.constraints[0],
            &Default::default(),
            ProblemDimensions::new(2, 1),
            &LiteralEvaluator,
            &values,
        )
        .unwrap();

        let expected = LinearExpression::from_term(
            Term::new(1.0, "gen", "generation").at(TimeIndex::Shift(0)),
        ) + LinearExpression::from_constant(-100.0);
        assert_eq!(expected, compiled.expression);
        assert_eq!(f64::NEG_INFINITY, compiled.lower_bound);
        assert_eq!(0.0, compiled.upper_bound);
    }

    #[test]
    fn test_compile_objective_aggregates_window() {
        let model = thermal_model();
        let values = ConstantParameterValues::new().bind("gen", "cost", 2.5);
        let objective = compile_objective(
            "gen",
            &model,
            &Default::default(),
            ProblemDimensions::new(2, 2),
            &LiteralEvaluator,
            &values,
        )
        .unwrap()
        .unwrap();

        // (sum over 2 steps x 2 scenarios of cost * generation) / 2
        assert_eq!(4, objective.len());
        for term in objective.terms() {
            assert_eq!(1.25, term.coeff);
        }
        assert_eq!(0.0, objective.constant());
    }

    #[test]
    fn test_missing_parameter_value_fails() {
        let model = thermal_model();
        let values = ConstantParameterValues::new();
        let err = compile_constraint(
            "gen",
            &model.constraints[0],
            &Default::default(),
            ProblemDimensions::new(1, 1),
            &LiteralEvaluator,
            &values,
        )
        .unwrap_err();
        assert_eq!(ErrorCode::UnresolvedIdentifier, err.code);
    }
}

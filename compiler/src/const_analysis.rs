// const_analysis.rs — Which variables keep their initial value
//
// A variable is non-constant when some `SetVariable` actor writes it, or
// when its expression reads a non-constant variable. Everything else keeps
// the value computed at load time for the whole run.
//
// Preconditions: the model is loaded; expressions parse.
// Postconditions: `order` lists every variable after all variables its
//   expression reads.
// Failure modes: `SpecError::Inconsistency` when dependencies are cyclic
//   (loading already rejects self-dependent expressions, so this indicates a
//   broken model arena).
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{Result, SpecError};
use crate::id::ObjId;
use crate::library::ActorKind;
use crate::model::Model;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantInfo {
    pub non_constant: BTreeSet<ObjId>,
    /// Variable → variables its expression reads.
    pub deps: BTreeMap<ObjId, Vec<ObjId>>,
    /// Variable → variables whose expressions read it.
    pub dependents: BTreeMap<ObjId, Vec<ObjId>>,
    /// Every variable, dependencies first.
    pub order: Vec<ObjId>,
}

impl ConstantInfo {
    pub fn is_constant(&self, var: ObjId) -> bool {
        !self.non_constant.contains(&var)
    }

    /// Non-constant variables in dependency order.
    pub fn non_constant_order(&self) -> Vec<ObjId> {
        self.order
            .iter()
            .copied()
            .filter(|v| self.non_constant.contains(v))
            .collect()
    }

    /// Variables that must be recomputed when `var` changes, in dependency
    /// order, excluding `var` itself.
    pub fn affected_by(&self, var: ObjId) -> Vec<ObjId> {
        let mut reached = BTreeSet::new();
        let mut work = vec![var];
        while let Some(v) = work.pop() {
            for d in self.dependents.get(&v).into_iter().flatten() {
                if reached.insert(*d) {
                    work.push(*d);
                }
            }
        }
        self.order.iter().copied().filter(|v| reached.contains(v)).collect()
    }

    /// Constant variables owned by `container`.
    pub fn constant_attributes(&self, model: &Model, container: ObjId) -> Vec<ObjId> {
        model
            .object(container)
            .attributes
            .iter()
            .copied()
            .filter(|a| model.variable(*a).is_some() && self.is_constant(*a))
            .collect()
    }
}

pub fn analyze(model: &Model) -> Result<ConstantInfo> {
    let vars = model.variables();
    let mut info = ConstantInfo::default();
    for v in &vars {
        let mut deps = Vec::new();
        if let Some(expr) = model.parse(*v)? {
            for name in expr.free_identifiers() {
                if let Some(d) = model.resolve_identifier(*v, &name) {
                    if !deps.contains(&d) {
                        deps.push(d);
                    }
                }
            }
        }
        for d in &deps {
            info.dependents.entry(*d).or_default().push(*v);
        }
        info.deps.insert(*v, deps);
    }

    // Seeds: variables written at run time.
    for id in model.ids() {
        if model.actor_kind(id) == Some(ActorKind::SetVariable) {
            if let Some(target) = model.set_variable_target(id) {
                info.non_constant.insert(target);
            }
        }
    }
    let mut work: Vec<ObjId> = info.non_constant.iter().copied().collect();
    while let Some(v) = work.pop() {
        for d in info.dependents.get(&v).into_iter().flatten() {
            if info.non_constant.insert(*d) {
                work.push(*d);
            }
        }
    }

    // Kahn over the dependency graph; ties keep model order.
    let mut indegree: BTreeMap<ObjId, usize> =
        vars.iter().map(|v| (*v, info.deps[v].len())).collect();
    let mut ready: VecDeque<ObjId> = vars.iter().copied().filter(|v| indegree[v] == 0).collect();
    while let Some(v) = ready.pop_front() {
        info.order.push(v);
        for d in info.dependents.get(&v).into_iter().flatten() {
            if let Some(n) = indegree.get_mut(d) {
                *n -= 1;
                if *n == 0 {
                    ready.push_back(*d);
                }
            }
        }
    }
    if info.order.len() != vars.len() {
        return Err(SpecError::inconsistency(
            "constant analysis",
            "variable dependencies are cyclic",
        ));
    }
    tracing::debug!(
        variables = vars.len(),
        non_constant = info.non_constant.len(),
        "constant analysis"
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{
        "name": "M",
        "parameters": [
            {"name": "a", "expression": "1"},
            {"name": "b", "expression": "a + 1"},
            {"name": "c", "expression": "b * 2"},
            {"name": "d", "expression": "7"}
        ],
        "entities": [
            {"name": "src", "kind": "Const"},
            {"name": "set", "kind": "SetVariable", "parameters": [{"name": "variableName", "expression": "a"}]}
        ],
        "relations": [{"name": "r", "links": ["src.output", "set.input"]}]
    }"#;

    #[test]
    fn writes_propagate_to_dependents() {
        let model = Model::from_json(MODEL).unwrap();
        let info = analyze(&model).unwrap();
        let id = |n: &str| model.by_name(&format!("M.{n}")).unwrap();
        assert!(!info.is_constant(id("a")));
        assert!(!info.is_constant(id("b")));
        assert!(!info.is_constant(id("c")));
        assert!(info.is_constant(id("d")));
        assert_eq!(info.affected_by(id("a")), vec![id("b"), id("c")]);
        assert_eq!(info.non_constant_order(), vec![id("a"), id("b"), id("c")]);
    }

    #[test]
    fn without_writers_everything_is_constant() {
        let json = r#"{"name": "M", "parameters": [{"name": "x", "expression": "2+3"}]}"#;
        let model = Model::from_json(json).unwrap();
        let info = analyze(&model).unwrap();
        assert!(info.non_constant.is_empty());
    }
}

// model.rs — Model graph provider
//
// Loads a JSON model description into a read-only arena of model objects:
// composites, atomic actors, ports, relations, variables, settable string
// attributes and directors. Loading also
//
// * instantiates the declared ports and parameters of library actor kinds,
// * evaluates every variable's expression in container-chain scope,
// * resolves port and variable types to a fixed point over the links.
//
// Nothing after loading mutates the model.
//
// Preconditions: the JSON follows `EntitySpec`.
// Postconditions: every variable with a non-empty expression has a value;
//   every port has a resolved type (possibly `Unknown`).
// Failure modes: malformed structure → `SpecError::Model`; unparseable or
//   failing expressions → `SpecError::Expression`.
// Side effects: editor-only attributes are dropped with a W0302 diagnostic.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::ast::Expr;
use crate::diag::{codes, Diagnostic};
use crate::error::{Result, SpecError};
use crate::eval::{self, Scope, TypeScope};
use crate::id::ObjId;
use crate::library::{self, ActorKind};
use crate::parser::parse_expression;
use crate::token::Token;
use crate::types::TokenType;

// ── JSON description ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum AttributeKind {
    #[default]
    Parameter,
    StringAttribute,
    PortParameter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    #[serde(default)]
    pub expression: String,
    #[serde(default)]
    pub kind: AttributeKind,
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Input,
    Output,
    Inout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub multiport: bool,
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationSpec {
    pub name: String,
    /// Port paths relative to the composite: `"src.output"` for a child's
    /// port, `"input"` for the composite's own port.
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorSpec {
    #[serde(default = "default_director_name")]
    pub name: String,
    #[serde(default = "default_director_kind")]
    pub kind: String,
    #[serde(default)]
    pub parameters: Vec<AttributeSpec>,
}

fn default_director_name() -> String {
    "director".to_string()
}

fn default_director_kind() -> String {
    "SDF".to_string()
}

fn default_entity_kind() -> String {
    COMPOSITE_KIND.to_string()
}

pub const COMPOSITE_KIND: &str = "Composite";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpec {
    pub name: String,
    #[serde(default = "default_entity_kind")]
    pub kind: String,
    #[serde(default)]
    pub parameters: Vec<AttributeSpec>,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub entities: Vec<EntitySpec>,
    #[serde(default)]
    pub relations: Vec<RelationSpec>,
    #[serde(default)]
    pub director: Option<DirectorSpec>,
}

// ── Arena ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PortInfo {
    pub input: bool,
    pub output: bool,
    pub multiport: bool,
    pub declared: Option<TokenType>,
    pub resolved: TokenType,
    /// The port-parameter that created this port, if any.
    pub parameter: Option<ObjId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarInfo {
    pub expression: String,
    pub declared: Option<TokenType>,
    /// Value at load time. `None` for an empty expression.
    pub value: Option<Token>,
    /// Static type: declared, else the join of every value it can take.
    pub resolved: TokenType,
    pub port_parameter: bool,
    /// The port a port-parameter created.
    pub port: Option<ObjId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtomicInfo {
    /// Kind name as written in the description.
    pub kind_name: String,
    /// Catalogue entry, when the kind is supported.
    pub kind: Option<ActorKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjKind {
    Composite,
    Atomic(AtomicInfo),
    Port(PortInfo),
    Relation,
    Variable(VarInfo),
    Settable { expression: String },
    Director { kind: String },
}

#[derive(Debug, Clone)]
pub struct ModelObject {
    pub id: ObjId,
    pub name: String,
    /// Dotted name from the top-level composite, e.g. `Demo.src.output`.
    pub full_name: String,
    pub container: Option<ObjId>,
    pub kind: ObjKind,
    pub attributes: Vec<ObjId>,
    pub ports: Vec<ObjId>,
    pub entities: Vec<ObjId>,
    pub relations: Vec<ObjId>,
    /// Relations of a port, or ports of a relation.
    pub links: Vec<ObjId>,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub objects: Vec<ModelObject>,
    pub top: ObjId,
    /// Non-fatal findings from loading.
    pub diagnostics: Vec<Diagnostic>,
}

// ── Loading ─────────────────────────────────────────────────────────────────

impl Model {
    pub fn from_json(text: &str) -> Result<Model> {
        let spec: EntitySpec = serde_json::from_str(text)?;
        Model::from_spec(&spec)
    }

    pub fn from_spec(spec: &EntitySpec) -> Result<Model> {
        if spec.kind != COMPOSITE_KIND {
            return Err(SpecError::Model(format!(
                "top-level entity '{}' must be a {COMPOSITE_KIND}, found {}",
                spec.name, spec.kind
            )));
        }
        let mut model = Model {
            objects: Vec::new(),
            top: ObjId(0),
            diagnostics: Vec::new(),
        };
        model.top = model.add_entity(None, spec)?;
        if model.director_of(model.top).is_none() {
            let top = model.top;
            model.add_director(top, &DirectorSpec {
                name: default_director_name(),
                kind: default_director_kind(),
                parameters: Vec::new(),
            })?;
        }
        model.evaluate_variables()?;
        model.resolve_types()?;
        Ok(model)
    }

    fn push(&mut self, container: Option<ObjId>, name: &str, kind: ObjKind) -> Result<ObjId> {
        if name.is_empty() || name.contains('.') {
            return Err(SpecError::Model(format!("invalid object name '{name}'")));
        }
        let id = ObjId(self.objects.len() as u32);
        let full_name = match container {
            Some(c) => format!("{}.{}", self.objects[c.index()].full_name, name),
            None => name.to_string(),
        };
        // Ports and attributes live in separate namespaces.
        if let Some(c) = container {
            if self.lookup(c, Lookup::of(&kind), name).is_some() {
                return Err(SpecError::Model(format!("duplicate object '{full_name}'")));
            }
        }
        self.objects.push(ModelObject {
            id,
            name: name.to_string(),
            full_name,
            container,
            kind,
            attributes: Vec::new(),
            ports: Vec::new(),
            entities: Vec::new(),
            relations: Vec::new(),
            links: Vec::new(),
        });
        Ok(id)
    }

    fn add_entity(&mut self, container: Option<ObjId>, spec: &EntitySpec) -> Result<ObjId> {
        let kind = if spec.kind == COMPOSITE_KIND {
            ObjKind::Composite
        } else {
            ObjKind::Atomic(AtomicInfo {
                kind_name: spec.kind.clone(),
                kind: ActorKind::parse(&spec.kind),
            })
        };
        let id = self.push(container, &spec.name, kind)?;
        if let Some(c) = container {
            self.objects[c.index()].entities.push(id);
        }

        // Library-declared parameters first, overridden by the description.
        let library_kind = ActorKind::parse(&spec.kind);
        if let Some(kind) = library_kind {
            for decl in kind.decl().params {
                let given = spec.parameters.iter().find(|p| p.name == decl.name);
                let attr = AttributeSpec {
                    name: decl.name.to_string(),
                    expression: given
                        .map(|p| p.expression.clone())
                        .unwrap_or_else(|| decl.default.to_string()),
                    kind: decl.kind.clone(),
                    ty: given
                        .and_then(|p| p.ty.clone())
                        .or_else(|| decl.ty.map(str::to_string)),
                };
                self.add_attribute(id, &attr)?;
            }
        }
        for attr in &spec.parameters {
            let declared_by_library = library_kind
                .is_some_and(|k| k.decl().params.iter().any(|d| d.name == attr.name));
            if declared_by_library {
                continue;
            }
            if library::is_editor_attribute(&attr.name) {
                let full = format!("{}.{}", self.objects[id.index()].full_name, attr.name);
                tracing::debug!(attribute = %full, "ignoring editor attribute");
                self.diagnostics.push(
                    Diagnostic::warning(full, "editor-only attribute ignored")
                        .with_code(codes::W0302),
                );
                continue;
            }
            self.add_attribute(id, attr)?;
        }

        // Ports.
        if let Some(kind) = library_kind {
            for decl in kind.decl().ports {
                let given = spec.ports.iter().find(|p| p.name == decl.name);
                let declared = match given.and_then(|p| p.ty.as_deref()).or(decl.ty) {
                    Some(name) => Some(parse_type(name)?),
                    None => None,
                };
                self.add_port(id, decl.name, decl.input, decl.output, decl.multiport, declared, None)?;
            }
        }
        for port in &spec.ports {
            let declared_by_library = library_kind
                .is_some_and(|k| k.decl().ports.iter().any(|d| d.name == port.name));
            if declared_by_library {
                continue;
            }
            if library_kind.is_some_and(|k| !k.accepts_extra_ports()) {
                return Err(SpecError::Model(format!(
                    "{}: actor kind {} has no port '{}'",
                    self.objects[id.index()].full_name,
                    spec.kind,
                    port.name
                )));
            }
            let declared = match port.ty.as_deref() {
                Some(name) => Some(parse_type(name)?),
                None => None,
            };
            let (input, output) = match port.direction {
                Direction::Input => (true, false),
                Direction::Output => (false, true),
                Direction::Inout => (true, true),
            };
            self.add_port(id, &port.name, input, output, port.multiport, declared, None)?;
        }

        if let Some(director) = &spec.director {
            self.add_director(id, director)?;
        }
        for child in &spec.entities {
            self.add_entity(Some(id), child)?;
        }
        for relation in &spec.relations {
            self.add_relation(id, relation)?;
        }
        Ok(id)
    }

    fn add_attribute(&mut self, container: ObjId, spec: &AttributeSpec) -> Result<ObjId> {
        let declared = match spec.ty.as_deref() {
            Some(name) => Some(parse_type(name)?),
            None => None,
        };
        let kind = match spec.kind {
            AttributeKind::StringAttribute => ObjKind::Settable {
                expression: spec.expression.clone(),
            },
            AttributeKind::Parameter | AttributeKind::PortParameter => ObjKind::Variable(VarInfo {
                expression: spec.expression.clone(),
                declared: declared.clone(),
                value: None,
                resolved: TokenType::Unknown,
                port_parameter: spec.kind == AttributeKind::PortParameter,
                port: None,
            }),
        };
        let id = self.push(Some(container), &spec.name, kind)?;
        self.objects[container.index()].attributes.push(id);
        if spec.kind == AttributeKind::PortParameter {
            let port = self.add_port(container, &spec.name, true, false, false, declared, Some(id))?;
            if let ObjKind::Variable(var) = &mut self.objects[id.index()].kind {
                var.port = Some(port);
            }
        }
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_port(
        &mut self,
        entity: ObjId,
        name: &str,
        input: bool,
        output: bool,
        multiport: bool,
        declared: Option<TokenType>,
        parameter: Option<ObjId>,
    ) -> Result<ObjId> {
        let id = self.push(
            Some(entity),
            name,
            ObjKind::Port(PortInfo {
                input,
                output,
                multiport,
                resolved: declared.clone().unwrap_or(TokenType::Unknown),
                declared,
                parameter,
            }),
        )?;
        self.objects[entity.index()].ports.push(id);
        Ok(id)
    }

    fn add_director(&mut self, container: ObjId, spec: &DirectorSpec) -> Result<ObjId> {
        let id = self.push(
            Some(container),
            &spec.name,
            ObjKind::Director {
                kind: spec.kind.clone(),
            },
        )?;
        self.objects[container.index()].attributes.push(id);
        let given = spec.parameters.iter().find(|p| p.name == ITERATIONS);
        self.add_attribute(id, &AttributeSpec {
            name: ITERATIONS.to_string(),
            expression: given
                .map(|p| p.expression.clone())
                .unwrap_or_else(|| "1".to_string()),
            kind: AttributeKind::Parameter,
            ty: Some("int".to_string()),
        })?;
        for attr in spec.parameters.iter().filter(|p| p.name != ITERATIONS) {
            self.add_attribute(id, attr)?;
        }
        Ok(id)
    }

    fn add_relation(&mut self, container: ObjId, spec: &RelationSpec) -> Result<ObjId> {
        let id = self.push(Some(container), &spec.name, ObjKind::Relation)?;
        self.objects[container.index()].relations.push(id);
        for path in &spec.links {
            let port = self.port_by_path(container, path).ok_or_else(|| {
                SpecError::Model(format!(
                    "{}: link to unknown port '{}'",
                    self.objects[id.index()].full_name,
                    path
                ))
            })?;
            self.objects[id.index()].links.push(port);
            self.objects[port.index()].links.push(id);
        }
        Ok(id)
    }

    fn port_by_path(&self, composite: ObjId, path: &str) -> Option<ObjId> {
        let (entity, port) = match path.split_once('.') {
            Some((child, port)) => (self.child_entity(composite, child)?, port),
            None => (composite, path),
        };
        self.objects[entity.index()]
            .ports
            .iter()
            .copied()
            .find(|p| self.objects[p.index()].name == port)
    }
}

/// Name of the director parameter bounding the number of iterations.
pub const ITERATIONS: &str = "iterations";

fn parse_type(name: &str) -> Result<TokenType> {
    TokenType::parse_name(name).ok_or_else(|| SpecError::Model(format!("unknown type '{name}'")))
}

// ── Queries ─────────────────────────────────────────────────────────────────

impl Model {
    pub fn object(&self, id: ObjId) -> &ModelObject {
        &self.objects[id.index()]
    }

    /// First object with this dotted name. A port-parameter and its port
    /// share a name; the parameter comes first.
    pub fn by_name(&self, full_name: &str) -> Option<ObjId> {
        self.objects
            .iter()
            .find(|o| o.full_name == full_name)
            .map(|o| o.id)
    }

    pub fn name(&self, id: ObjId) -> &str {
        &self.objects[id.index()].full_name
    }

    pub fn container(&self, id: ObjId) -> Option<ObjId> {
        self.objects[id.index()].container
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjId> {
        (0..self.objects.len()).map(|i| ObjId(i as u32))
    }

    pub fn is_entity(&self, id: ObjId) -> bool {
        matches!(
            self.objects[id.index()].kind,
            ObjKind::Composite | ObjKind::Atomic(_)
        )
    }

    pub fn is_composite(&self, id: ObjId) -> bool {
        matches!(self.objects[id.index()].kind, ObjKind::Composite)
    }

    pub fn port(&self, id: ObjId) -> Option<&PortInfo> {
        match &self.objects[id.index()].kind {
            ObjKind::Port(p) => Some(p),
            _ => None,
        }
    }

    pub fn variable(&self, id: ObjId) -> Option<&VarInfo> {
        match &self.objects[id.index()].kind {
            ObjKind::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn actor_kind(&self, id: ObjId) -> Option<ActorKind> {
        match &self.objects[id.index()].kind {
            ObjKind::Atomic(info) => info.kind,
            _ => None,
        }
    }

    /// Expression text of a variable or settable attribute.
    pub fn expression(&self, id: ObjId) -> Option<&str> {
        match &self.objects[id.index()].kind {
            ObjKind::Variable(v) => Some(&v.expression),
            ObjKind::Settable { expression } => Some(expression),
            _ => None,
        }
    }

    /// Entities (atomic or composite) in creation order, top first.
    pub fn entities(&self) -> Vec<ObjId> {
        let mut out = Vec::new();
        let mut stack = vec![self.top];
        while let Some(e) = stack.pop() {
            out.push(e);
            for child in self.objects[e.index()].entities.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Every variable, in id order.
    pub fn variables(&self) -> Vec<ObjId> {
        self.ids().filter(|id| self.variable(*id).is_some()).collect()
    }

    pub fn director_of(&self, composite: ObjId) -> Option<ObjId> {
        self.objects[composite.index()]
            .attributes
            .iter()
            .copied()
            .find(|a| matches!(self.objects[a.index()].kind, ObjKind::Director { .. }))
    }

    pub fn child_entity(&self, composite: ObjId, name: &str) -> Option<ObjId> {
        self.objects[composite.index()]
            .entities
            .iter()
            .copied()
            .find(|e| self.objects[e.index()].name == name)
    }

    pub fn attribute(&self, container: ObjId, name: &str) -> Option<ObjId> {
        self.objects[container.index()]
            .attributes
            .iter()
            .copied()
            .find(|a| self.objects[a.index()].name == name)
    }

    pub fn port_named(&self, entity: ObjId, name: &str) -> Option<ObjId> {
        self.objects[entity.index()]
            .ports
            .iter()
            .copied()
            .find(|p| self.objects[p.index()].name == name)
    }

    pub fn relation_named(&self, composite: ObjId, name: &str) -> Option<ObjId> {
        self.objects[composite.index()]
            .relations
            .iter()
            .copied()
            .find(|r| self.objects[r.index()].name == name)
    }

    /// Child of `container` addressed by a lookup of the given kind.
    pub fn lookup(&self, container: ObjId, lookup: Lookup, name: &str) -> Option<ObjId> {
        match lookup {
            Lookup::Attribute => self.attribute(container, name),
            Lookup::Port => self.port_named(container, name),
            Lookup::Entity => self.child_entity(container, name),
            Lookup::Relation => self.relation_named(container, name),
        }
    }

    /// How `obj` is looked up from its container.
    pub fn lookup_kind(&self, obj: ObjId) -> Lookup {
        Lookup::of(&self.objects[obj.index()].kind)
    }

    /// True when `ancestor` contains `obj`, directly or transitively.
    pub fn is_ancestor(&self, ancestor: ObjId, obj: ObjId) -> bool {
        let mut current = self.container(obj);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.container(c);
        }
        false
    }

    /// Resolve an identifier in an expression owned by `owner`: the
    /// variables of the owner's container, then of each enclosing container.
    pub fn resolve_identifier(&self, owner: ObjId, name: &str) -> Option<ObjId> {
        let mut scope = if self.is_entity(owner) {
            Some(owner)
        } else {
            self.container(owner)
        };
        while let Some(s) = scope {
            if let Some(v) = self.attribute(s, name) {
                if v != owner && self.variable(v).is_some() {
                    return Some(v);
                }
            }
            scope = self.container(s);
        }
        None
    }

    /// The variable a `SetVariable` actor writes, if it names one.
    pub fn set_variable_target(&self, actor: ObjId) -> Option<ObjId> {
        let name_attr = self.attribute(actor, library::VARIABLE_NAME)?;
        let name = self.expression(name_attr)?.trim();
        let container = self.container(actor)?;
        self.resolve_identifier(container, name)
    }

    /// Declared static type of a port after resolution.
    pub fn port_type(&self, port: ObjId) -> TokenType {
        self.port(port)
            .map(|p| p.resolved.clone())
            .unwrap_or(TokenType::Unknown)
    }

    pub fn variable_type(&self, var: ObjId) -> TokenType {
        self.variable(var)
            .map(|v| v.resolved.clone())
            .unwrap_or(TokenType::Unknown)
    }

    pub fn parse(&self, owner: ObjId) -> Result<Option<Expr>> {
        let text = match self.expression(owner) {
            Some(t) if !t.trim().is_empty() => t,
            _ => return Ok(None),
        };
        parse_expression(text)
            .map(Some)
            .map_err(|e| SpecError::expression(self.name(owner), e))
    }
}

/// The four lookup-by-name calls of the runtime object model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    Attribute,
    Port,
    Entity,
    Relation,
}

impl Lookup {
    pub fn of(kind: &ObjKind) -> Lookup {
        match kind {
            ObjKind::Port(_) => Lookup::Port,
            ObjKind::Relation => Lookup::Relation,
            ObjKind::Composite | ObjKind::Atomic(_) => Lookup::Entity,
            _ => Lookup::Attribute,
        }
    }
}

// ── Variable evaluation ─────────────────────────────────────────────────────

struct VariableScope<'a> {
    model: &'a Model,
    owner: ObjId,
    values: &'a BTreeMap<ObjId, Token>,
}

impl Scope for VariableScope<'_> {
    fn value(&self, name: &str) -> Option<Token> {
        let var = self.model.resolve_identifier(self.owner, name)?;
        self.values.get(&var).cloned()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    Active,
    Done,
}

impl Model {
    fn evaluate_variables(&mut self) -> Result<()> {
        let mut values = BTreeMap::new();
        let mut state = HashMap::new();
        for var in self.variables() {
            self.evaluate_one(var, &mut values, &mut state)?;
        }
        for (var, value) in values {
            if let ObjKind::Variable(info) = &mut self.objects[var.index()].kind {
                info.resolved = info.declared.clone().unwrap_or_else(|| value.token_type());
                info.value = Some(value);
            }
        }
        for var in self.variables() {
            if let ObjKind::Variable(info) = &mut self.objects[var.index()].kind {
                if info.value.is_none() {
                    info.resolved = info.declared.clone().unwrap_or(TokenType::Unknown);
                }
            }
        }
        Ok(())
    }

    fn evaluate_one(
        &self,
        var: ObjId,
        values: &mut BTreeMap<ObjId, Token>,
        state: &mut HashMap<ObjId, Visit>,
    ) -> Result<()> {
        match state.get(&var) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::Active) => {
                return Err(SpecError::expression(
                    self.name(var),
                    "expression depends on itself",
                ))
            }
            None => {}
        }
        state.insert(var, Visit::Active);
        if let Some(expr) = self.parse(var)? {
            for name in expr.free_identifiers() {
                if let Some(dep) = self.resolve_identifier(var, &name) {
                    self.evaluate_one(dep, values, state)?;
                }
            }
            let scope = VariableScope {
                model: self,
                owner: var,
                values,
            };
            let value = eval::evaluate(&expr, &scope).map_err(|message| {
                if message.contains("interpreter") {
                    SpecError::unsupported(self.name(var), "expression", message)
                } else {
                    SpecError::expression(self.name(var), message)
                }
            })?;
            let value = match self.variable(var).and_then(|v| v.declared.as_ref()) {
                Some(t) => value
                    .convert(t)
                    .map_err(|e| SpecError::expression(self.name(var), e))?,
                None => value,
            };
            values.insert(var, value);
        }
        state.insert(var, Visit::Done);
        Ok(())
    }
}

// ── Type resolution ─────────────────────────────────────────────────────────

struct ExpressionTypes<'a> {
    model: &'a Model,
    actor: ObjId,
    ports: &'a HashMap<ObjId, TokenType>,
    vars: &'a HashMap<ObjId, TokenType>,
}

impl TypeScope for ExpressionTypes<'_> {
    fn type_of(&self, name: &str) -> Option<TokenType> {
        if let Some(port) = self.model.port_named(self.actor, name) {
            if self.model.port(port).is_some_and(|p| p.input) {
                return self.ports.get(&port).cloned();
            }
        }
        let var = self.model.resolve_identifier(self.actor, name)?;
        self.vars.get(&var).cloned()
    }
}

fn join(acc: Option<TokenType>, t: &TokenType) -> Option<TokenType> {
    Some(match acc {
        Some(a) => a.lub(t),
        None => t.clone(),
    })
}

impl Model {
    /// Does `port` feed relation `rel`, seen from the relation's container?
    fn drives(&self, port: ObjId, rel: ObjId) -> bool {
        let (Some(info), Some(entity)) = (self.port(port), self.container(port)) else {
            return false;
        };
        let inside = Some(entity) == self.container(rel);
        (info.output && !inside) || (info.input && inside)
    }

    fn receives(&self, port: ObjId, rel: ObjId) -> bool {
        let (Some(info), Some(entity)) = (self.port(port), self.container(port)) else {
            return false;
        };
        let inside = Some(entity) == self.container(rel);
        (info.input && !inside) || (info.output && inside)
    }

    /// Ports whose tokens reach `port` directly through one relation.
    pub fn sources(&self, port: ObjId) -> Vec<ObjId> {
        let mut out = Vec::new();
        for rel in &self.objects[port.index()].links {
            if !self.receives(port, *rel) {
                continue;
            }
            for other in &self.objects[rel.index()].links {
                if *other != port && self.drives(*other, *rel) && !out.contains(other) {
                    out.push(*other);
                }
            }
        }
        out
    }

    fn resolve_types(&mut self) -> Result<()> {
        let ports: Vec<ObjId> = self.ids().filter(|id| self.port(*id).is_some()).collect();
        let mut port_types: HashMap<ObjId, TokenType> = HashMap::new();
        let mut var_types: HashMap<ObjId, TokenType> = HashMap::new();
        for var in self.variables() {
            if let Some(v) = self.variable(var) {
                if v.declared.is_some() || v.value.is_some() {
                    var_types.insert(var, v.resolved.clone());
                }
            }
        }
        for port in &ports {
            if let Some(t) = self.port(*port).and_then(|p| p.declared.clone()) {
                port_types.insert(*port, t);
            }
        }
        let setters: Vec<(ObjId, ObjId)> = self
            .ids()
            .filter(|a| self.actor_kind(*a) == Some(ActorKind::SetVariable))
            .filter_map(|a| self.set_variable_target(a).map(|v| (a, v)))
            .collect();

        // Expression outputs whose inputs never resolve get a second phase
        // that treats the missing inputs as unknown.
        let bound = 4 * (ports.len() + var_types.len() + 4);
        let mut rounds = 0;
        for fallback in [false, true] {
            loop {
                rounds += 1;
                let mut changed = false;
                for port in &ports {
                    if self.port(*port).is_some_and(|p| p.declared.is_some()) {
                        continue;
                    }
                    if let Some(t) = self.infer_port(*port, &port_types, &var_types, fallback)? {
                        if port_types.get(port) != Some(&t) {
                            port_types.insert(*port, t);
                            changed = true;
                        }
                    }
                }
                for (actor, var) in &setters {
                    if self.variable(*var).is_some_and(|v| v.declared.is_some()) {
                        continue;
                    }
                    let Some(input) = self.port_named(*actor, library::INPUT) else {
                        continue;
                    };
                    if let Some(t) = port_types.get(&input) {
                        let joined = join(var_types.get(var).cloned(), t);
                        if joined.as_ref() != var_types.get(var) {
                            if let Some(j) = joined {
                                var_types.insert(*var, j);
                            }
                            changed = true;
                        }
                    }
                }
                if !changed {
                    break;
                }
                if rounds > bound {
                    return Err(SpecError::inconsistency(
                        "type resolution",
                        "port types did not converge",
                    ));
                }
            }
        }
        tracing::debug!(rounds, "port types resolved");

        for port in ports {
            let t = port_types.remove(&port).unwrap_or(TokenType::Unknown);
            if let ObjKind::Port(info) = &mut self.objects[port.index()].kind {
                info.resolved = t;
            }
        }
        for (var, t) in var_types {
            if let ObjKind::Variable(info) = &mut self.objects[var.index()].kind {
                info.resolved = t;
            }
        }
        Ok(())
    }

    fn infer_port(
        &self,
        port: ObjId,
        port_types: &HashMap<ObjId, TokenType>,
        var_types: &HashMap<ObjId, TokenType>,
        fallback: bool,
    ) -> Result<Option<TokenType>> {
        let Some(entity) = self.container(port) else {
            return Ok(None);
        };
        let Some(info) = self.port(port) else {
            return Ok(None);
        };
        let sources = self.sources(port);
        if !sources.is_empty() {
            let mut acc = None;
            for s in sources {
                if let Some(t) = port_types.get(&s) {
                    acc = join(acc, t);
                }
            }
            return Ok(acc);
        }
        if let Some(param) = info.parameter {
            return Ok(var_types.get(&param).cloned());
        }
        let Some(kind) = self.actor_kind(entity) else {
            return Ok(None);
        };
        if !info.output {
            return Ok(None);
        }
        if kind == ActorKind::Expression {
            return self.expression_output(entity, port_types, var_types, fallback);
        }
        let lookup = |name: &str| -> Option<TokenType> {
            if let Some(p) = self.port_named(entity, name) {
                return port_types.get(&p).cloned();
            }
            let v = self.attribute(entity, name)?;
            var_types.get(&v).cloned()
        };
        Ok(library::output_type(kind, &self.objects[port.index()].name, &lookup))
    }

    fn expression_output(
        &self,
        actor: ObjId,
        port_types: &HashMap<ObjId, TokenType>,
        var_types: &HashMap<ObjId, TokenType>,
        fallback: bool,
    ) -> Result<Option<TokenType>> {
        let Some(attr) = self.attribute(actor, library::EXPRESSION) else {
            return Ok(None);
        };
        let Some(expr) = self.parse(attr)? else {
            return Ok(None);
        };
        let filled;
        let ports = if fallback {
            let mut all = port_types.clone();
            for p in &self.objects[actor.index()].ports {
                all.entry(*p).or_insert(TokenType::Unknown);
            }
            filled = all;
            &filled
        } else {
            port_types
        };
        let scope = ExpressionTypes {
            model: self,
            actor,
            ports,
            vars: var_types,
        };
        match eval::infer_type(&expr, &scope) {
            Ok(t) => Ok(Some(t)),
            Err(e) if fallback => Err(SpecError::expression(self.name(attr), e)),
            Err(_) => Ok(None),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const DEMO: &str = r#"{
        "name": "Demo",
        "parameters": [{"name": "gain", "expression": "2+3"}],
        "entities": [
            {"name": "src", "kind": "Const", "parameters": [{"name": "value", "expression": "gain"}]},
            {"name": "scale", "kind": "Scale", "parameters": [{"name": "factor", "expression": "0.5"}]},
            {"name": "sink", "kind": "Recorder"}
        ],
        "relations": [
            {"name": "r1", "links": ["src.output", "scale.input"]},
            {"name": "r2", "links": ["scale.output", "sink.input"]}
        ]
    }"#;

    #[test]
    fn loads_structure_and_library_defaults() {
        let model = Model::from_json(DEMO).unwrap();
        let src = model.by_name("Demo.src").unwrap();
        assert!(model.by_name("Demo.src.output").is_some());
        assert!(model.by_name("Demo.director.iterations").is_some());
        assert_eq!(model.actor_kind(src), Some(ActorKind::Const));
        let rel = model.by_name("Demo.r1").unwrap();
        assert_eq!(model.object(rel).links.len(), 2);
    }

    #[test]
    fn variables_evaluate_through_container_scope() {
        let model = Model::from_json(DEMO).unwrap();
        let value = model.by_name("Demo.src.value").unwrap();
        assert_eq!(model.variable(value).unwrap().value, Some(Token::Int(5)));
    }

    #[test]
    fn port_types_follow_links_and_rules() {
        let model = Model::from_json(DEMO).unwrap();
        let src_out = model.by_name("Demo.src.output").unwrap();
        let scale_in = model.by_name("Demo.scale.input").unwrap();
        let scale_out = model.by_name("Demo.scale.output").unwrap();
        assert_eq!(model.port_type(src_out), TokenType::Int);
        assert_eq!(model.port_type(scale_in), TokenType::Int);
        assert_eq!(model.port_type(scale_out), TokenType::Double);
    }

    #[test]
    fn self_reference_is_an_error() {
        let json = r#"{"name": "M", "parameters": [
            {"name": "a", "expression": "b + 1"},
            {"name": "b", "expression": "a"}
        ]}"#;
        assert!(matches!(Model::from_json(json), Err(SpecError::Expression { .. })));
    }

    #[test]
    fn oversized_constant_is_an_expression_error() {
        for expression in ["zeroMatrix(65536, 65536)", "repeat(2000000000, 1)"] {
            let json = format!(
                r#"{{"name": "M", "parameters": [{{"name": "m", "expression": "{expression}"}}]}}"#
            );
            let err = Model::from_json(&json).unwrap_err();
            assert!(matches!(err, SpecError::Expression { .. }), "{err}");
            assert!(err.to_string().contains("M.m"), "{err}");
        }
    }

    #[test]
    fn editor_attributes_are_dropped() {
        let json = r#"{"name": "M", "parameters": [{"name": "_location", "expression": "[10, 20]"}]}"#;
        let model = Model::from_json(json).unwrap();
        assert!(model.by_name("M._location").is_none());
        assert_eq!(model.diagnostics.len(), 1);
    }

    #[test]
    fn unknown_link_is_a_model_error() {
        let json = r#"{"name": "M", "relations": [{"name": "r", "links": ["nobody.output"]}]}"#;
        assert!(matches!(Model::from_json(json), Err(SpecError::Model(_))));
    }

    #[test]
    fn port_parameter_creates_its_port() {
        let json = r#"{"name": "M", "entities": [{"name": "e", "kind": "Composite",
            "parameters": [{"name": "level", "expression": "3", "kind": "portParameter"}]}]}"#;
        let model = Model::from_json(json).unwrap();
        let var = model.by_name("M.e.level").unwrap();
        let port = model.variable(var).unwrap().port.unwrap();
        assert_eq!(model.name(port), "M.e.level");
        assert_eq!(model.port(port).unwrap().parameter, Some(var));
    }
}

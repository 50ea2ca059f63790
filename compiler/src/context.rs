// context.rs — Shared state threaded through every pass
//
// `PipelineContext` owns the loaded model, the generated program, the field
// tags and the correspondence between model objects and generated classes.
// Passes borrow it mutably one at a time; there is no global state.
//
// Preconditions: the model has been loaded and type-resolved.
// Postconditions: the object/class maps stay a bijection over actor and
//   attribute classes (checked by `register_class`).
// Failure modes: `SpecError::Inconsistency` on duplicate registration or
//   creation records, or on a missing creation site.
// Side effects: none beyond the owned state.

use std::collections::{BTreeMap, HashMap};

use crate::builder::Emitter;
use crate::config::PipelineOptions;
use crate::const_analysis::ConstantInfo;
use crate::diag::Diagnostic;
use crate::error::{Result, SpecError};
use crate::framework::kernel;
use crate::id::{ClassId, FieldId, LocalId, MethodId, ObjId, StmtId};
use crate::ir::{Body, ClassKind, Program, Type};
use crate::model::{Lookup, Model, ObjKind};
use crate::native::SignatureCache;
use crate::tags::TagStore;

/// Where an object reference first becomes available inside a class's
/// constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site {
    /// Statement whose defined local holds the reference.
    pub stmt: StmtId,
    /// True when the statement creates the object; false when it only
    /// acquires a reference to an object created elsewhere.
    pub created: bool,
}

pub struct PipelineContext {
    pub model: Model,
    pub program: Program,
    pub tags: TagStore,
    pub options: PipelineOptions,
    pub constants: ConstantInfo,
    pub signatures: SignatureCache,
    pub diagnostics: Vec<Diagnostic>,
    /// Object → the entity or director whose constructor creates it.
    pub ledger: BTreeMap<ObjId, ObjId>,
    pub sites: BTreeMap<(ClassId, ObjId), Site>,
    /// Reference fields: (owner object, referenced object) → field.
    pub ref_fields: HashMap<(ObjId, ObjId), FieldId>,
    /// Value-holder field of each variable.
    pub value_fields: BTreeMap<ObjId, FieldId>,
    /// Expression field of each non-variable settable attribute.
    pub expression_fields: BTreeMap<ObjId, FieldId>,
    /// Compute method of each non-constant variable.
    pub compute_methods: BTreeMap<ObjId, MethodId>,
    class_of: BTreeMap<ObjId, ClassId>,
    object_of: BTreeMap<ClassId, ObjId>,
    actor_classes: Vec<ClassId>,
    attribute_classes: Vec<ClassId>,
    closures: usize,
}

impl PipelineContext {
    pub fn new(model: Model, options: PipelineOptions) -> Self {
        let diagnostics = model.diagnostics.clone();
        Self {
            model,
            program: Program::new(),
            tags: TagStore::new(),
            options,
            constants: ConstantInfo::default(),
            signatures: SignatureCache::new(),
            diagnostics,
            ledger: BTreeMap::new(),
            sites: BTreeMap::new(),
            ref_fields: HashMap::new(),
            value_fields: BTreeMap::new(),
            expression_fields: BTreeMap::new(),
            compute_methods: BTreeMap::new(),
            class_of: BTreeMap::new(),
            object_of: BTreeMap::new(),
            actor_classes: Vec::new(),
            attribute_classes: Vec::new(),
            closures: 0,
        }
    }

    // ── Object/class correspondence ──

    pub fn register_class(&mut self, obj: ObjId, class: ClassId) -> Result<()> {
        if self.class_of.contains_key(&obj) || self.object_of.contains_key(&class) {
            return Err(SpecError::inconsistency(
                "class registry",
                format!("{} is already registered", self.model.object(obj).full_name),
            ));
        }
        self.class_of.insert(obj, class);
        self.object_of.insert(class, obj);
        match self.program.class(class).kind {
            ClassKind::Actor => self.actor_classes.push(class),
            ClassKind::Attribute => self.attribute_classes.push(class),
            ClassKind::Closure => {}
        }
        Ok(())
    }

    pub fn class_for_object(&self, obj: ObjId) -> Option<ClassId> {
        self.class_of.get(&obj).copied()
    }

    pub fn object_for_class(&self, class: ClassId) -> Option<ObjId> {
        self.object_of.get(&class).copied()
    }

    pub fn is_actor_class(&self, class: ClassId) -> bool {
        self.actor_classes.contains(&class)
    }

    pub fn actor_classes(&self) -> &[ClassId] {
        &self.actor_classes
    }

    pub fn attribute_classes(&self) -> &[ClassId] {
        &self.attribute_classes
    }

    /// Registered objects with their classes, in object order.
    pub fn registered(&self) -> impl Iterator<Item = (ObjId, ClassId)> + '_ {
        self.class_of.iter().map(|(o, c)| (*o, *c))
    }

    /// Model object standing behind the class that declares `method`.
    pub fn object_of_method(&self, method: MethodId) -> Option<ObjId> {
        self.object_for_class(self.program.method(method).class)
    }

    pub fn class_of_object(&self, obj: ObjId) -> Result<ClassId> {
        self.class_for_object(obj).ok_or_else(|| {
            SpecError::inconsistency(
                "class registry",
                format!("{} has no generated class", self.model.object(obj).full_name),
            )
        })
    }

    pub fn method_of(&self, class: ClassId, name: &str) -> Result<MethodId> {
        self.program.method_by_name(class, name).ok_or_else(|| {
            SpecError::inconsistency(
                "program",
                format!("{} has no method {name}", self.program.class(class).name),
            )
        })
    }

    // ── Creation records ──

    pub fn record_creation(&mut self, obj: ObjId, creator: ObjId) -> Result<()> {
        if let Some(prev) = self.ledger.insert(obj, creator) {
            return Err(SpecError::inconsistency(
                "creation ledger",
                format!(
                    "{} created by both {} and {}",
                    self.model.object(obj).full_name,
                    self.model.object(prev).full_name,
                    self.model.object(creator).full_name
                ),
            ));
        }
        Ok(())
    }

    pub fn record_site(&mut self, class: ClassId, obj: ObjId, stmt: StmtId, created: bool) {
        self.sites.entry((class, obj)).or_insert(Site { stmt, created });
    }

    /// Local holding `obj` right after its site in `class`'s constructor.
    pub fn site_local(&self, class: ClassId, obj: ObjId) -> Option<(StmtId, LocalId)> {
        let site = self.sites.get(&(class, obj))?;
        let init = self.program.method_by_name(class, "<init>")?;
        let stmt = self.program.method(init).body.stmt(site.stmt)?;
        Some((site.stmt, stmt.kind.def_local()?))
    }

    // ── Bodies ──

    pub fn take_body(&mut self, method: MethodId) -> Body {
        std::mem::take(&mut self.program.method_mut(method).body)
    }

    pub fn put_body(&mut self, method: MethodId, body: Body) {
        self.program.method_mut(method).body = body;
    }

    // ── Diagnostics ──

    /// Record a warning once; repeated rounds report the same finding.
    pub fn warn(&mut self, diag: Diagnostic) {
        let seen = self.diagnostics.iter().any(|d| {
            d.code == diag.code && d.subject == diag.subject && d.message == diag.message
        });
        if !seen {
            tracing::warn!(subject = %diag.subject, "{}", diag.message);
            self.diagnostics.push(diag);
        }
    }

    // ── Naming ──

    /// Generated class name of an entity or director.
    pub fn class_name(&self, obj: ObjId) -> String {
        let top = sanitize(&self.model.object(self.model.top).name);
        let pkg = &self.options.target_package;
        if obj == self.model.top {
            return format!("{pkg}.{top}");
        }
        let full = &self.model.object(obj).full_name;
        let rel = full.split_once('.').map_or(full.as_str(), |(_, r)| r);
        format!("{pkg}.{top}_{}", sanitize(rel))
    }

    /// Fresh closure class name derived from the class that creates it.
    pub fn closure_name(&mut self, owner: ClassId) -> String {
        self.closures += 1;
        format!("{}_CGfunction_{}", self.program.class(owner).name, self.closures)
    }

    /// Static type of a local holding a reference to `obj`.
    pub fn object_type(&self, obj: ObjId) -> Type {
        match &self.model.object(obj).kind {
            ObjKind::Composite | ObjKind::Atomic(_) | ObjKind::Director { .. } => {
                Type::object(&self.class_name(obj))
            }
            ObjKind::Port(info) if info.parameter.is_some() => Type::object(kernel::PARAMETER_PORT),
            ObjKind::Port(_) => Type::object(kernel::PORT),
            ObjKind::Relation => Type::object(kernel::RELATION),
            ObjKind::Variable(info) if info.port_parameter => Type::object(kernel::PORT_PARAMETER),
            ObjKind::Variable(_) => Type::object(kernel::PARAMETER),
            ObjKind::Settable { .. } => Type::object(kernel::STRING_ATTRIBUTE),
        }
    }

    /// Emit the structural navigation from the object `this` stands for to
    /// `to`: climb with `getContainer` to the nearest common ancestor, then
    /// descend with named lookups.
    pub fn reference_path(
        &self,
        em: &mut Emitter,
        this: LocalId,
        from: ObjId,
        to: ObjId,
    ) -> Result<LocalId> {
        let mut cur_obj = from;
        let mut cur = this;
        while cur_obj != to && !self.model.is_ancestor(cur_obj, to) {
            let parent = self.model.container(cur_obj).ok_or_else(|| {
                SpecError::inconsistency(
                    "reference path",
                    format!(
                        "no path from {} to {}",
                        self.model.object(from).full_name,
                        self.model.object(to).full_name
                    ),
                )
            })?;
            cur = em.container(cur, self.object_type(parent));
            cur_obj = parent;
        }
        let mut chain = Vec::new();
        let mut walk = to;
        while walk != cur_obj {
            chain.push(walk);
            walk = self.model.container(walk).ok_or_else(|| {
                SpecError::inconsistency("reference path", "descent left the model")
            })?;
        }
        for step in chain.into_iter().rev() {
            let kind = self.model.lookup_kind(step);
            let name = self.model.object(step).name.clone();
            cur = em.lookup(cur, kind, &name, self.object_type(step));
        }
        Ok(cur)
    }

    /// Lookup family used to reach `obj` from its container.
    pub fn lookup_kind(&self, obj: ObjId) -> Lookup {
        self.model.lookup_kind(obj)
    }
}

/// Keep identifier characters; everything else becomes `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::DEMO;

    fn ctx() -> PipelineContext {
        PipelineContext::new(Model::from_json(DEMO).unwrap(), PipelineOptions::default())
    }

    #[test]
    fn class_names_follow_the_containment_path() {
        let ctx = ctx();
        let top = ctx.model.top;
        assert_eq!(ctx.class_name(top), "dfsc.generated.Demo");
        let src = ctx.model.by_name("Demo.src").unwrap();
        assert_eq!(ctx.class_name(src), "dfsc.generated.Demo_src");
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut ctx = ctx();
        let top = ctx.model.top;
        let a = ctx.program.add_class("A", kernel::COMPOSITE_ACTOR, ClassKind::Actor);
        let b = ctx.program.add_class("B", kernel::COMPOSITE_ACTOR, ClassKind::Actor);
        ctx.register_class(top, a).unwrap();
        assert!(ctx.register_class(top, b).is_err());
        assert_eq!(ctx.object_for_class(a), Some(top));
        assert!(ctx.is_actor_class(a));
    }

    #[test]
    fn path_between_siblings_climbs_then_descends() {
        let ctx = ctx();
        let src = ctx.model.by_name("Demo.src").unwrap();
        let gain = ctx.model.by_name("Demo.gain").unwrap();
        let mut body = Body::new();
        let this = body.new_local("this", Type::object("X"));
        let mut em = Emitter::new(&mut body);
        let end = ctx.reference_path(&mut em, this, src, gain).unwrap();
        let stmts = em.finish();
        // getContainer + cast, getAttribute + cast
        assert_eq!(stmts.len(), 4);
        assert_eq!(body.local(end).ty, Type::object(kernel::PARAMETER));
    }

    #[test]
    fn sanitize_replaces_punctuation() {
        assert_eq!(sanitize("a b.c-d"), "a_b_c_d");
    }
}

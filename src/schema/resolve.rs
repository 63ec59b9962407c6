//! Declarations shared by both schema formats, and their resolution into a
//! [`Schema`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use itertools::Itertools;

use super::{ActionDef, AppliesTo, AttributeType, EntityTypeDef, RecordType, Schema, SchemaType};
use crate::ast::{EntityUid, Name};
use crate::diagnostics::{Diagnostic, Span, codes};

#[derive(Debug, Clone, Default)]
pub(super) struct Decls {
    pub entities: Vec<EntityDecl>,
    pub actions: Vec<ActionDecl>,
    pub common_types: Vec<CommonTypeDecl>,
}

#[derive(Debug, Clone)]
pub(super) struct TypeRef {
    pub path: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub(super) enum TypeExpr {
    /// A builtin, a common type or an entity type, in that lookup order
    /// within each candidate namespace.
    Named(TypeRef),
    /// Always an entity type.
    Entity(TypeRef),
    Set(Box<TypeExpr>),
    Record(Vec<AttrDecl>),
}

#[derive(Debug, Clone)]
pub(super) struct AttrDecl {
    pub name: String,
    pub required: bool,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub(super) struct EntityDecl {
    pub namespace: Vec<String>,
    pub name: String,
    pub parents: Vec<TypeRef>,
    pub attrs: Vec<AttrDecl>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub(super) struct ActionRef {
    /// Explicit action type, e.g. `NS::Action`. `None` means the `Action`
    /// type of the enclosing namespace.
    pub ty: Option<Vec<String>>,
    pub id: String,
    pub span: Span,
}

#[derive(Debug, Clone, Default)]
pub(super) struct AppliesToDecl {
    pub principals: Vec<TypeRef>,
    pub resources: Vec<TypeRef>,
    pub context: Option<TypeExpr>,
}

#[derive(Debug, Clone)]
pub(super) struct ActionDecl {
    pub namespace: Vec<String>,
    pub name: String,
    pub parents: Vec<ActionRef>,
    pub applies_to: Option<AppliesToDecl>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub(super) struct CommonTypeDecl {
    pub namespace: Vec<String>,
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

fn qualify(namespace: &[String], basename: &str) -> Name {
    let mut segments = namespace.to_vec();
    segments.push(basename.to_string());
    Name::from_segments(segments)
}

fn schema_error(message: impl Into<String>, span: Span) -> Diagnostic {
    Diagnostic::error(message, span).with_code(codes::SCHEMA)
}

struct Resolver<'a> {
    entity_types: BTreeSet<Name>,
    common_types: HashMap<Name, &'a CommonTypeDecl>,
    action_uids: BTreeSet<EntityUid>,
    diagnostics: Vec<Diagnostic>,
}

/// Resolve declarations into a schema, reporting every semantic error.
pub(super) fn resolve(decls: Decls) -> Result<Schema, Vec<Diagnostic>> {
    let mut resolver = Resolver {
        entity_types: BTreeSet::new(),
        common_types: HashMap::new(),
        action_uids: BTreeSet::new(),
        diagnostics: Vec::new(),
    };
    resolver.declare(&decls);

    let mut entity_types = BTreeMap::new();
    for decl in &decls.entities {
        let name = qualify(&decl.namespace, &decl.name);
        if entity_types.contains_key(&name) {
            continue;
        }
        let member_of = decl
            .parents
            .iter()
            .filter_map(|parent| resolver.entity_ref(&decl.namespace, parent))
            .collect();
        let attributes = resolver
            .record(&decl.namespace, &decl.attrs, &mut Vec::new())
            .unwrap_or_default();
        entity_types.insert(
            name.clone(),
            EntityTypeDef {
                name,
                member_of,
                attributes,
            },
        );
    }

    let mut actions: BTreeMap<EntityUid, ActionDef> = BTreeMap::new();
    for decl in &decls.actions {
        let uid = EntityUid::new(Name::action_in(&decl.namespace), decl.name.clone());
        if actions.contains_key(&uid) {
            continue;
        }
        let member_of = decl
            .parents
            .iter()
            .filter_map(|parent| resolver.action_ref(&decl.namespace, parent))
            .collect();
        let applies_to = decl
            .applies_to
            .as_ref()
            .map(|applies| resolver.applies_to(&decl.namespace, applies));
        actions.insert(
            uid.clone(),
            ActionDef {
                uid,
                member_of,
                ancestors: BTreeSet::new(),
                applies_to,
            },
        );
    }

    resolver.close_action_hierarchy(&mut actions, &decls.actions);

    if resolver.diagnostics.is_empty() {
        Ok(Schema {
            entity_types,
            actions,
        })
    } else {
        Err(resolver.diagnostics)
    }
}

impl<'a> Resolver<'a> {
    /// Register every declared name, reporting duplicates.
    fn declare(&mut self, decls: &'a Decls) {
        for decl in &decls.entities {
            let name = qualify(&decl.namespace, &decl.name);
            if !self.entity_types.insert(name.clone()) {
                self.diagnostics.push(schema_error(
                    format!("duplicate declaration of entity type `{name}`"),
                    decl.span,
                ));
            }
        }
        for decl in &decls.common_types {
            let name = qualify(&decl.namespace, &decl.name);
            if self.entity_types.contains(&name) || self.common_types.contains_key(&name) {
                self.diagnostics.push(schema_error(
                    format!("duplicate declaration of type `{name}`"),
                    decl.span,
                ));
                continue;
            }
            self.common_types.insert(name, decl);
        }
        for decl in &decls.actions {
            let uid = EntityUid::new(Name::action_in(&decl.namespace), decl.name.clone());
            if !self.action_uids.insert(uid.clone()) {
                self.diagnostics.push(schema_error(
                    format!("duplicate declaration of action `{uid}`"),
                    decl.span,
                ));
            }
        }
    }

    /// Names a path may refer to from inside `namespace`: the namespaced
    /// name first, then the path as written.
    fn candidates(namespace: &[String], path: &[String]) -> Vec<Name> {
        let as_written = Name::from_segments(path.to_vec());
        if namespace.is_empty() {
            return vec![as_written];
        }
        let mut segments = namespace.to_vec();
        segments.extend(path.iter().cloned());
        vec![Name::from_segments(segments), as_written]
    }

    fn entity_ref(&mut self, namespace: &[String], r: &TypeRef) -> Option<Name> {
        let found = Self::candidates(namespace, &r.path)
            .into_iter()
            .find(|name| self.entity_types.contains(name));
        if found.is_none() {
            self.diagnostics.push(
                Diagnostic::error(
                    format!("undeclared entity type `{}`", r.path.join("::")),
                    r.span,
                )
                .with_code(codes::UNDECLARED_ENTITY_TYPE),
            );
        }
        found
    }

    fn action_ref(&mut self, namespace: &[String], r: &ActionRef) -> Option<EntityUid> {
        let ty = match &r.ty {
            Some(path) if !(path.len() == 1 && path[0] == "Action") => {
                Name::from_segments(path.clone())
            }
            _ => Name::action_in(namespace),
        };
        let uid = EntityUid::new(ty, r.id.clone());
        if self.action_uids.contains(&uid) {
            return Some(uid);
        }
        self.diagnostics.push(
            Diagnostic::error(format!("undeclared action `{uid}`"), r.span)
                .with_code(codes::UNDECLARED_ACTION),
        );
        None
    }

    fn applies_to(&mut self, namespace: &[String], decl: &AppliesToDecl) -> AppliesTo {
        let principal_types = decl
            .principals
            .iter()
            .filter_map(|r| self.entity_ref(namespace, r))
            .collect();
        let resource_types = decl
            .resources
            .iter()
            .filter_map(|r| self.entity_ref(namespace, r))
            .collect();
        let context = match &decl.context {
            None => RecordType::default(),
            Some(expr) => match self.ty(namespace, expr, &mut Vec::new()) {
                Some(SchemaType::Record(record)) => record,
                Some(other) => {
                    self.diagnostics.push(schema_error(
                        format!("context must be a record type, found {other}"),
                        type_span(expr),
                    ));
                    RecordType::default()
                }
                None => RecordType::default(),
            },
        };
        AppliesTo {
            principal_types,
            resource_types,
            context,
        }
    }

    fn record(
        &mut self,
        namespace: &[String],
        attrs: &[AttrDecl],
        stack: &mut Vec<Name>,
    ) -> Option<RecordType> {
        let mut resolved = BTreeMap::new();
        let mut ok = true;
        for attr in attrs {
            if resolved.contains_key(&attr.name) {
                self.diagnostics.push(schema_error(
                    format!("duplicate attribute `{}`", attr.name),
                    attr.span,
                ));
                ok = false;
                continue;
            }
            match self.ty(namespace, &attr.ty, stack) {
                Some(ty) => {
                    resolved.insert(
                        attr.name.clone(),
                        AttributeType {
                            ty,
                            required: attr.required,
                        },
                    );
                }
                None => ok = false,
            }
        }
        ok.then(|| RecordType::new(resolved))
    }

    fn ty(&mut self, namespace: &[String], expr: &TypeExpr, stack: &mut Vec<Name>) -> Option<SchemaType> {
        match expr {
            TypeExpr::Set(elem) => self
                .ty(namespace, elem, stack)
                .map(|elem| SchemaType::Set(Box::new(elem))),
            TypeExpr::Record(attrs) => self.record(namespace, attrs, stack).map(SchemaType::Record),
            TypeExpr::Entity(r) => self.entity_ref(namespace, r).map(SchemaType::Entity),
            TypeExpr::Named(r) => self.named(namespace, r, stack),
        }
    }

    fn named(&mut self, namespace: &[String], r: &TypeRef, stack: &mut Vec<Name>) -> Option<SchemaType> {
        for candidate in Self::candidates(namespace, &r.path) {
            if let Some(decl) = self.common_types.get(&candidate).copied() {
                if stack.contains(&candidate) {
                    let cycle = stack.iter().chain([&candidate]).join(" -> ");
                    self.diagnostics.push(schema_error(
                        format!("common type `{candidate}` is defined in terms of itself ({cycle})"),
                        decl.span,
                    ));
                    return None;
                }
                stack.push(candidate);
                let resolved = self.ty(&decl.namespace, &decl.ty, stack);
                stack.pop();
                return resolved;
            }
            if self.entity_types.contains(&candidate) {
                return Some(SchemaType::Entity(candidate));
            }
        }

        if let [single] = r.path.as_slice() {
            match single.as_str() {
                "Long" => return Some(SchemaType::Long),
                "String" => return Some(SchemaType::String),
                "Bool" | "Boolean" => return Some(SchemaType::Bool),
                _ => {}
            }
        }

        self.diagnostics.push(
            Diagnostic::error(format!("undeclared type `{}`", r.path.join("::")), r.span)
                .with_code(codes::UNDECLARED_ENTITY_TYPE),
        );
        None
    }

    /// Compute each action's ancestors, reporting membership cycles.
    fn close_action_hierarchy(
        &mut self,
        actions: &mut BTreeMap<EntityUid, ActionDef>,
        decls: &[ActionDecl],
    ) {
        let parents: BTreeMap<EntityUid, BTreeSet<EntityUid>> = actions
            .iter()
            .map(|(uid, def)| (uid.clone(), def.member_of.clone()))
            .collect();

        let mut reported = BTreeSet::new();
        for (uid, def) in actions.iter_mut() {
            let mut ancestors = BTreeSet::new();
            let mut pending: Vec<&EntityUid> = parents[uid].iter().collect();
            while let Some(next) = pending.pop() {
                if !ancestors.insert(next.clone()) {
                    continue;
                }
                if let Some(grand) = parents.get(next) {
                    pending.extend(grand.iter());
                }
            }
            if ancestors.contains(uid) && reported.insert(uid.clone()) {
                let span = decls
                    .iter()
                    .find(|d| EntityUid::new(Name::action_in(&d.namespace), d.name.clone()) == *uid)
                    .map(|d| d.span)
                    .unwrap_or_default();
                self.diagnostics.push(schema_error(
                    format!("action `{uid}` is a member of itself"),
                    span,
                ));
            }
            def.ancestors = ancestors;
        }
    }
}

fn type_span(expr: &TypeExpr) -> Span {
    match expr {
        TypeExpr::Named(r) | TypeExpr::Entity(r) => r.span,
        TypeExpr::Set(elem) => type_span(elem),
        TypeExpr::Record(attrs) => attrs
            .iter()
            .map(|a| a.span)
            .reduce(|a, b| a.to(b))
            .unwrap_or_default(),
    }
}

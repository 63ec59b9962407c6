//! Human-readable schema syntax.

use super::resolve::{
    ActionDecl, ActionRef, AppliesToDecl, AttrDecl, CommonTypeDecl, Decls, EntityDecl, TypeExpr,
    TypeRef,
};
use crate::diagnostics::{Diagnostic, Span};
use crate::parser::{Failed, PResult, Parser, TokenKind};

/// Parse schema text into declarations, recovering after each broken one.
pub(super) fn parse(text: &str) -> (Decls, Vec<Diagnostic>) {
    let mut parser = Parser::new(text);
    let mut decls = Decls::default();
    parser.schema_items(&[], &mut decls, true);
    (decls, parser.diagnostics)
}

impl Parser {
    fn schema_items(&mut self, namespace: &[String], decls: &mut Decls, top_level: bool) {
        loop {
            if self.at_eof() || (!top_level && self.at(&TokenKind::RBrace)) {
                return;
            }
            let begin = self.position();
            if let Err(Failed) = self.schema_item(namespace, decls, top_level) {
                self.synchronize(begin, |p| p.at_schema_item_start());
            }
        }
    }

    fn at_schema_item_start(&self) -> bool {
        let keyword = ["entity", "action", "type", "namespace"]
            .iter()
            .any(|k| self.at_ident(k));
        (keyword && matches!(self.peek_at(1), TokenKind::Ident(_) | TokenKind::Str(_)))
            || self.at(&TokenKind::At)
    }

    fn schema_item(
        &mut self,
        namespace: &[String],
        decls: &mut Decls,
        top_level: bool,
    ) -> PResult<()> {
        self.skip_annotations()?;
        if self.at_ident("namespace") {
            let start = self.start();
            self.bump();
            if !top_level {
                let span = self.tok().span.to(Span::new(start, 0));
                return Err(self.error_at("namespaces cannot be nested", span));
            }
            let path = self.path()?;
            self.expect(TokenKind::LBrace)?;
            self.schema_items(path.segments(), decls, false);
            self.expect(TokenKind::RBrace)?;
            return Ok(());
        }
        if self.at_ident("entity") {
            return self.entity_decl(namespace, decls);
        }
        if self.at_ident("action") {
            return self.action_decl(namespace, decls);
        }
        if self.at_ident("type") {
            return self.common_type_decl(namespace, decls);
        }
        Err(self.unexpected("`entity`, `action`, `type` or `namespace`"))
    }

    fn skip_annotations(&mut self) -> PResult<()> {
        while self.eat(&TokenKind::At) {
            self.any_ident("annotation name")?;
            if self.eat(&TokenKind::LParen) {
                self.string_literal("annotation value string")?;
                self.expect(TokenKind::RParen)?;
            }
        }
        Ok(())
    }

    fn entity_decl(&mut self, namespace: &[String], decls: &mut Decls) -> PResult<()> {
        self.bump();
        let mut names = vec![self.path_segment()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.path_segment()?);
        }

        let parents = if self.eat_ident("in") {
            self.type_refs()?
        } else {
            Vec::new()
        };

        let has_equals = self.eat(&TokenKind::Assign);
        let attrs = if self.at(&TokenKind::LBrace) {
            self.record_type()?
        } else if has_equals {
            return Err(self.unexpected("`{`"));
        } else {
            Vec::new()
        };
        self.expect(TokenKind::Semi)?;

        for (name, span) in names {
            decls.entities.push(EntityDecl {
                namespace: namespace.to_vec(),
                name,
                parents: parents.clone(),
                attrs: attrs.clone(),
                span,
            });
        }
        Ok(())
    }

    fn action_decl(&mut self, namespace: &[String], decls: &mut Decls) -> PResult<()> {
        self.bump();
        let mut names = vec![self.action_name()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.action_name()?);
        }

        let mut parents = Vec::new();
        if self.eat_ident("in") {
            if self.eat(&TokenKind::LBracket) {
                while !self.at(&TokenKind::RBracket) {
                    parents.push(self.schema_action_ref()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
            } else {
                parents.push(self.schema_action_ref()?);
            }
        }

        let applies_to = if self.eat_ident("appliesTo") {
            Some(self.applies_to()?)
        } else {
            None
        };
        self.expect(TokenKind::Semi)?;

        for (name, span) in names {
            decls.actions.push(ActionDecl {
                namespace: namespace.to_vec(),
                name,
                parents: parents.clone(),
                applies_to: applies_to.clone(),
                span,
            });
        }
        Ok(())
    }

    fn action_name(&mut self) -> PResult<(String, Span)> {
        match self.peek() {
            TokenKind::Str(_) => self.string_literal("action name"),
            _ => self.any_ident("action name"),
        }
    }

    /// `"name"`, `name` or a full uid such as `NS::Action::"name"`.
    fn schema_action_ref(&mut self) -> PResult<ActionRef> {
        let qualified = matches!(self.peek(), TokenKind::Ident(_))
            && matches!(self.peek_at(1), TokenKind::DoubleColon);
        if qualified {
            let (uid, span) = self.entity_ref()?;
            return Ok(ActionRef {
                ty: Some(uid.entity_type().segments().to_vec()),
                id: uid.id().to_string(),
                span,
            });
        }
        let (id, span) = self.action_name()?;
        Ok(ActionRef { ty: None, id, span })
    }

    fn applies_to(&mut self) -> PResult<AppliesToDecl> {
        self.expect(TokenKind::LBrace)?;
        let mut decl = AppliesToDecl::default();
        while !self.at(&TokenKind::RBrace) {
            let (key, key_span) = self.any_ident("`principal`, `resource` or `context`")?;
            self.expect(TokenKind::Colon)?;
            match key.as_str() {
                "principal" => decl.principals = self.type_refs()?,
                "resource" => decl.resources = self.type_refs()?,
                "context" => decl.context = Some(self.type_expr()?),
                other => {
                    return Err(self.error_at(
                        format!("unknown `appliesTo` field `{other}`"),
                        key_span,
                    ));
                }
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(decl)
    }

    fn common_type_decl(&mut self, namespace: &[String], decls: &mut Decls) -> PResult<()> {
        self.bump();
        let (name, span) = self.path_segment()?;
        self.expect(TokenKind::Assign)?;
        let ty = self.type_expr()?;
        self.expect(TokenKind::Semi)?;
        decls.common_types.push(CommonTypeDecl {
            namespace: namespace.to_vec(),
            name,
            ty,
            span,
        });
        Ok(())
    }

    /// A single type path or a bracketed list of them.
    fn type_refs(&mut self) -> PResult<Vec<TypeRef>> {
        if !self.eat(&TokenKind::LBracket) {
            return Ok(vec![self.type_ref()?]);
        }
        let mut refs = Vec::new();
        while !self.at(&TokenKind::RBracket) {
            refs.push(self.type_ref()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(refs)
    }

    fn type_ref(&mut self) -> PResult<TypeRef> {
        let start = self.start();
        let path = self.path()?;
        Ok(TypeRef {
            path: path.segments().to_vec(),
            span: self.span_from(start),
        })
    }

    fn type_expr(&mut self) -> PResult<TypeExpr> {
        self.enter()?;
        let ty = self.nested_type_expr();
        self.leave(1);
        ty
    }

    fn nested_type_expr(&mut self) -> PResult<TypeExpr> {
        if self.at(&TokenKind::LBrace) {
            return Ok(TypeExpr::Record(self.record_type()?));
        }
        if self.at_ident("Set") && matches!(self.peek_at(1), TokenKind::Lt) {
            self.bump();
            self.bump();
            let elem = self.type_expr()?;
            self.expect(TokenKind::Gt)?;
            return Ok(TypeExpr::Set(Box::new(elem)));
        }
        Ok(TypeExpr::Named(self.type_ref()?))
    }

    fn record_type(&mut self) -> PResult<Vec<AttrDecl>> {
        self.expect(TokenKind::LBrace)?;
        let mut attrs = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            self.skip_annotations()?;
            let start = self.start();
            let (name, _) = match self.peek() {
                TokenKind::Str(_) => self.string_literal("attribute name")?,
                _ => self.any_ident("attribute name")?,
            };
            let required = !self.eat(&TokenKind::Question);
            self.expect(TokenKind::Colon)?;
            let ty = self.type_expr()?;
            attrs.push(AttrDecl {
                name,
                required,
                ty,
                span: self.span_from(start),
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{EntityUid, Name};
    use crate::diagnostics::{self, codes};
    use crate::schema::{Schema, SchemaType, parse_schema};
    use yare::parameterized;

    fn schema(text: &str) -> Schema {
        match parse_schema(text) {
            (Some(schema), _) => schema,
            (None, diags) => panic!("schema failed: {}", diagnostics::render(&diags)),
        }
    }

    fn error_messages(text: &str) -> Vec<String> {
        let (schema, diags) = parse_schema(text);
        assert!(schema.is_none());
        diags
            .iter()
            .filter(|d| d.is_error())
            .map(|d| d.message().to_string())
            .collect()
    }

    #[test]
    fn test_deep_type_nesting() {
        let nested = |depth: usize| {
            format!("entity E {{ a: {}String{} }};", "Set<".repeat(depth), ">".repeat(depth))
        };
        schema(&nested(50));
        let errors = error_messages(&nested(20_000));
        assert!(errors.iter().any(|m| m.contains("nested too deeply")), "{errors:?}");
    }

    #[test]
    fn test_namespaced_declarations() {
        let schema = schema(
            r#"
            namespace PhotoApp {
                type Address = { street: String, city?: String };
                @doc("a person")
                entity User = { home: Address, friends: Set<User> };
                entity Photo;
                action "view photo" appliesTo {
                    principal: User,
                    resource: Photo,
                    context: { "client ip": String }
                };
            }
            entity Global;
            "#,
        );
        let user: Name = "PhotoApp::User".parse().unwrap();
        let user_def = schema.entity_type(&user).unwrap();
        let SchemaType::Record(home) = &user_def.attributes.get("home").unwrap().ty else {
            panic!("common type not expanded");
        };
        assert!(!home.get("city").unwrap().required);
        assert_eq!(
            user_def.attributes.get("friends").unwrap().ty,
            SchemaType::Set(Box::new(SchemaType::Entity(user.clone())))
        );

        let view: EntityUid = r#"PhotoApp::Action::"view photo""#.parse().unwrap();
        let action = schema.action(&view).unwrap();
        assert!(action.context().unwrap().get("client ip").is_some());
        assert!(schema.entity_type(&"Global".parse().unwrap()).is_some());
    }

    #[test]
    fn test_qualified_action_parent() {
        let schema = schema(
            r#"
            namespace A { action read; }
            namespace B { action list in [A::Action::"read"]; }
            "#,
        );
        let list: EntityUid = r#"B::Action::"list""#.parse().unwrap();
        let read: EntityUid = r#"A::Action::"read""#.parse().unwrap();
        assert!(schema.is_action_in(&list, &read));
    }

    #[test]
    fn test_multiple_syntax_errors() {
        let errors = error_messages(
            r#"
            entity User { name: };
            entity Photo in Album
            action view;
            "#,
        );
        assert_eq!(errors.len(), 2, "{errors:?}");
    }

    #[parameterized(
        undeclared_parent = { "entity User in [Team];", "undeclared entity type `Team`" },
        undeclared_attr_type = { "entity User { boss: Manager };", "undeclared type `Manager`" },
        undeclared_applies = { "action view appliesTo { principal: User };", "undeclared entity type `User`" },
        undeclared_action_parent = { "action view in [read];", "undeclared action `Action::\"read\"`" },
        duplicate_entity = { "entity User; entity User;", "duplicate declaration of entity type `User`" },
        duplicate_action = { "action view; action view;", "duplicate declaration of action" },
        duplicate_attr = { "entity User { a: Long, a: String };", "duplicate attribute `a`" },
        action_cycle = { "action a in [b]; action b in [a];", "is a member of itself" },
        common_type_cycle = { "type A = B; type B = { x: A }; entity E { a: A };", "defined in terms of itself" },
        context_not_record = { "entity U; action v appliesTo { principal: U, context: Long };", "context must be a record" },
        nested_namespace = { "namespace A { namespace B { } }", "cannot be nested" },
    )]
    fn test_schema_errors(text: &str, expected: &str) {
        let errors = error_messages(text);
        assert!(
            errors.iter().any(|e| e.contains(expected)),
            "no error containing {expected:?} in {errors:?}"
        );
    }

    #[test]
    fn test_undeclared_type_code() {
        let (_, diags) = parse_schema("entity User in [Team];");
        assert_eq!(diags[0].code.as_deref(), Some(codes::UNDECLARED_ENTITY_TYPE));
    }
}

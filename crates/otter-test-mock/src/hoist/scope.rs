//! Scope-aware visitors used by the hoisting pass.
//!
//! All of them run after `swc_ecma_transforms_base::resolver`, so two
//! identifiers name the same binding exactly when their [`Id`]s match.
//! Shadowing declarations get a different syntax context and are left alone.

use std::collections::{HashMap, HashSet};

use swc_common::{Span, SyntaxContext};
use swc_ecma_ast::*;
use swc_ecma_visit::{Visit, VisitMut, VisitMutWith, VisitWith};

/// Collects bindings declared in the top-level scope.
pub(super) struct TopLevelBindings<'a> {
    pub ctxt: SyntaxContext,
    pub ids: &'a mut HashSet<Id>,
}

impl TopLevelBindings<'_> {
    fn add(&mut self, ident: &Ident) {
        if ident.ctxt == self.ctxt {
            self.ids.insert(ident.to_id());
        }
    }
}

impl Visit for TopLevelBindings<'_> {
    fn visit_binding_ident(&mut self, n: &BindingIdent) {
        self.add(&n.id);
    }

    fn visit_fn_decl(&mut self, n: &FnDecl) {
        self.add(&n.ident);
        n.visit_children_with(self);
    }

    fn visit_class_decl(&mut self, n: &ClassDecl) {
        self.add(&n.ident);
        n.visit_children_with(self);
    }
}

/// Finds the first read of a binding from `forbidden`.
pub(super) struct FirstReference<'a> {
    pub forbidden: &'a HashSet<Id>,
    pub found: Option<Ident>,
}

impl FirstReference<'_> {
    fn check(&mut self, ident: &Ident) {
        if self.found.is_none() && self.forbidden.contains(&ident.to_id()) {
            self.found = Some(ident.clone());
        }
    }
}

impl Visit for FirstReference<'_> {
    fn visit_expr(&mut self, n: &Expr) {
        match n {
            Expr::Ident(ident) => self.check(ident),
            _ => n.visit_children_with(self),
        }
    }

    fn visit_prop(&mut self, n: &Prop) {
        match n {
            Prop::Shorthand(ident) => self.check(ident),
            _ => n.visit_children_with(self),
        }
    }
}

/// Replaces reads of imported bindings with namespace member reads.
///
/// Only expression positions and shorthand properties are touched. Property
/// keys, method names and class members are `IdentName`s or `PropName`s, not
/// binding references, so they never match.
pub(super) struct ImportRewriter<'a> {
    pub replacements: &'a HashMap<Id, Expr>,
}

impl ImportRewriter<'_> {
    fn replacement(&self, ident: &Ident) -> Option<Expr> {
        let mut expr = self.replacements.get(&ident.to_id())?.clone();
        expr.visit_mut_with(&mut Respan(ident.span));
        Some(expr)
    }
}

impl VisitMut for ImportRewriter<'_> {
    fn visit_mut_expr(&mut self, n: &mut Expr) {
        if let Expr::Ident(ident) = n
            && let Some(target) = self.replacement(ident)
        {
            *n = target;
            return;
        }
        n.visit_mut_children_with(self);
    }

    fn visit_mut_prop(&mut self, n: &mut Prop) {
        if let Prop::Shorthand(ident) = n
            && let Some(target) = self.replacement(ident)
        {
            let key = IdentName {
                span: ident.span,
                sym: ident.sym.clone(),
            };
            *n = Prop::KeyValue(KeyValueProp {
                key: PropName::Ident(key),
                value: Box::new(target),
            });
            return;
        }
        n.visit_mut_children_with(self);
    }
}

/// Moves every span of a node onto one original location.
pub(super) struct Respan(pub Span);

impl VisitMut for Respan {
    fn visit_mut_span(&mut self, span: &mut Span) {
        *span = self.0;
    }
}

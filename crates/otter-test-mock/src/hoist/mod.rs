//! Mock hoisting pass
//!
//! Rewrites a test file so that module mock registrations run before any
//! import of the modules they target:
//!
//! 1. imports from the test framework itself stay static and move to the top,
//! 2. `vi.hoisted(...)` initializers follow, in source order,
//! 3. then every `vi.mock(...)` / `vi.unmock(...)` call, in source order,
//! 4. then the rest of the file, where each static import becomes
//!    `const __vi_import_N__ = await import("...")` and reads of its
//!    bindings are rewritten to member reads on that namespace.
//!
//! The source is parsed with SWC and scoped with its resolver, so a local
//! that shadows an imported name is never rewritten. Output is printed with
//! the SWC code generator together with a source map back to the original.
//!
//! Registrations and hoisted initializers run before anything else in the
//! file, so they may not reference imported bindings or other top-level
//! declarations. Such references are rejected with
//! [`HoistError::NonHoistedReference`].
//!
//! Only top-level statements are moved. `vi.doMock` / `vi.doUnmock` stay in
//! place.

mod scope;

use std::collections::{HashMap, HashSet};

use swc_common::{FileName, GLOBALS, Globals, Mark, SourceMap, Span, Spanned, SyntaxContext, sync::Lrc};
use swc_ecma_ast::*;
use swc_ecma_codegen::{Config as CodegenConfig, Emitter, text_writer::JsWriter};
use swc_ecma_parser::{Parser, StringInput, Syntax, TsSyntax, lexer::Lexer};
use swc_ecma_transforms_base::{fixer::fixer, resolver};
use swc_ecma_visit::{VisitMutWith, VisitWith};

use crate::error::{HoistError, MockUsageError};
use scope::{FirstReference, ImportRewriter, Respan, TopLevelBindings};

/// Hoisting settings
#[derive(Debug, Clone)]
pub struct HoistOptions {
    /// Identifiers that name the mocking helper object.
    pub helper_names: Vec<String>,
    /// Modules whose imports stay static and move to the top.
    pub framework_modules: Vec<String>,
    /// Name recorded in the source map.
    pub filename: String,
}

impl Default for HoistOptions {
    fn default() -> Self {
        Self {
            helper_names: vec!["vi".to_string(), "vitest".to_string()],
            framework_modules: vec!["vitest".to_string()],
            filename: "test.ts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoistedKind {
    Mock,
    Unmock,
    Hoisted,
}

/// A statically detected hoisted call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoistedCall {
    pub kind: HoistedKind,
    /// Literal module specifier, when the first argument is a string.
    pub specifier: Option<String>,
    /// 1-based line in the original source.
    pub line: usize,
}

/// Result of the pass.
#[derive(Debug, Clone)]
pub struct HoistOutput {
    pub code: String,
    pub hoisted: Vec<HoistedCall>,
    /// Original 1-based line for each line of `code`.
    pub line_map: Vec<usize>,
    /// Source map v3 JSON. `None` when the file was returned unchanged.
    pub source_map: Option<String>,
}

impl HoistOutput {
    /// Original line for a 1-based line of the rewritten code.
    pub fn original_line(&self, line: usize) -> Option<usize> {
        line.checked_sub(1).and_then(|i| self.line_map.get(i).copied())
    }
}

/// Where a top-level item goes in the output.
enum Slot {
    Framework,
    Hoisted,
    Registration(String),
    Body,
}

/// Run the hoisting pass over `source`.
///
/// Files without hoisted calls come back unchanged.
pub fn hoist_mocks(source: &str, options: &HoistOptions) -> Result<HoistOutput, HoistError> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(options.filename.clone())),
        source.to_string(),
    );

    let mut parser = Parser::new_from(Lexer::new(syntax(), EsVersion::Es2022, StringInput::from(&*fm), None));
    let mut module = parser.parse_module().map_err(|e| HoistError::Syntax {
        line: cm.lookup_char_pos(e.span().lo).line,
        message: format!("{:?}", e.kind()),
    })?;
    for _e in parser.take_errors() {}

    GLOBALS.set(&Globals::default(), || -> Result<HoistOutput, HoistError> {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();
        module.visit_mut_with(&mut resolver(unresolved_mark, top_level_mark, true));

        let hoister = Hoister {
            cm: &cm,
            options,
            top_level: SyntaxContext::empty().apply_mark(top_level_mark),
        };
        let Some(hoisted) = hoister.run(&mut module)? else {
            return Ok(HoistOutput {
                code: source.to_string(),
                hoisted: Vec::new(),
                line_map: (1..=source.lines().count()).collect(),
                source_map: None,
            });
        };

        module.visit_mut_with(&mut fixer(None));
        let (code, line_map, source_map) = hoister.print(&module, fm.start_pos, fm.end_pos)?;
        Ok(HoistOutput {
            code,
            hoisted,
            line_map,
            source_map,
        })
    })
}

fn syntax() -> Syntax {
    Syntax::Typescript(TsSyntax {
        tsx: false,
        decorators: true,
        ..Default::default()
    })
}

fn str_value(s: &Str) -> String {
    s.value.as_str().unwrap_or_default().to_string()
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c == '$' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c == '$' || c.is_alphanumeric())
}

struct Hoister<'a> {
    cm: &'a Lrc<SourceMap>,
    options: &'a HoistOptions,
    top_level: SyntaxContext,
}

impl Hoister<'_> {
    fn line(&self, span: Span) -> usize {
        self.cm.lookup_char_pos(span.lo).line
    }

    /// Reorder `module` in place. Returns `None` when there is nothing to hoist.
    fn run(&self, module: &mut Module) -> Result<Option<Vec<HoistedCall>>, HoistError> {
        let mut calls = Vec::new();
        let mut forbidden = HashSet::new();
        let mut replacements = HashMap::new();
        let mut slots = Vec::with_capacity(module.body.len());
        let mut import_index = 0;

        for item in module.body.drain(..) {
            if let ModuleItem::ModuleDecl(ModuleDecl::Import(import)) = &item {
                let src = str_value(&import.src);
                if self.options.framework_modules.contains(&src) {
                    slots.push((Slot::Framework, item));
                    continue;
                }
                let rewritten = self.rewrite_import(import, &mut import_index, &mut forbidden, &mut replacements)?;
                slots.push((Slot::Body, rewritten.unwrap_or(item)));
                continue;
            }

            match self.classify(&item) {
                Some(call) => {
                    let slot = match call.kind {
                        HoistedKind::Hoisted => Slot::Hoisted,
                        _ => Slot::Registration(call.specifier.clone().unwrap_or_default()),
                    };
                    calls.push(call);
                    slots.push((slot, item));
                }
                None => {
                    item.visit_with(&mut TopLevelBindings {
                        ctxt: self.top_level,
                        ids: &mut forbidden,
                    });
                    slots.push((Slot::Body, item));
                }
            }
        }

        if calls.is_empty() {
            module.body = slots.into_iter().map(|(_, item)| item).collect();
            return Ok(None);
        }

        let mut framework = Vec::new();
        let mut hoisted = Vec::new();
        let mut registrations = Vec::new();
        let mut body = Vec::new();
        for (slot, mut item) in slots {
            match slot {
                Slot::Framework => framework.push(item),
                Slot::Hoisted => {
                    self.check_references(&item, "vi.hoisted", &forbidden)?;
                    hoisted.push(item);
                }
                Slot::Registration(specifier) => {
                    self.check_references(&item, &specifier, &forbidden)?;
                    registrations.push(item);
                }
                Slot::Body => {
                    if !replacements.is_empty() {
                        item.visit_mut_with(&mut ImportRewriter {
                            replacements: &replacements,
                        });
                    }
                    body.push(item);
                }
            }
        }

        module.body = framework;
        module.body.append(&mut hoisted);
        module.body.append(&mut registrations);
        module.body.append(&mut body);
        Ok(Some(calls))
    }

    /// A top-level `vi.mock` / `vi.unmock` / `vi.hoisted` statement.
    fn classify(&self, item: &ModuleItem) -> Option<HoistedCall> {
        let ModuleItem::Stmt(stmt) = item else {
            return None;
        };
        let (method, call) = match stmt {
            Stmt::Expr(ExprStmt { expr, .. }) => self.helper_call(expr)?,
            Stmt::Decl(Decl::Var(var)) => {
                let [decl] = var.decls.as_slice() else {
                    return None;
                };
                let found = self.helper_call(decl.init.as_deref()?)?;
                if found.0 != "hoisted" {
                    return None;
                }
                found
            }
            _ => return None,
        };
        let kind = match method {
            "mock" => HoistedKind::Mock,
            "unmock" => HoistedKind::Unmock,
            "hoisted" => HoistedKind::Hoisted,
            _ => return None,
        };
        let specifier = match kind {
            HoistedKind::Hoisted => None,
            _ => call.args.first().and_then(|arg| specifier_of(&arg.expr)),
        };
        Some(HoistedCall {
            kind,
            specifier,
            line: self.line(stmt.span()),
        })
    }

    /// `helper.method(...)`, optionally awaited.
    fn helper_call<'e>(&self, expr: &'e Expr) -> Option<(&'e str, &'e CallExpr)> {
        let expr = match expr {
            Expr::Await(AwaitExpr { arg, .. }) => &**arg,
            other => other,
        };
        let Expr::Call(call) = expr else {
            return None;
        };
        let Callee::Expr(callee) = &call.callee else {
            return None;
        };
        let Expr::Member(member) = &**callee else {
            return None;
        };
        let (Expr::Ident(object), MemberProp::Ident(method)) = (&*member.obj, &member.prop) else {
            return None;
        };
        self.options
            .helper_names
            .iter()
            .any(|h| h == object.sym.as_str())
            .then(|| (method.sym.as_str(), call))
    }

    /// Replace a value import with `const __vi_import_N__ = await import(...)`.
    ///
    /// Type-only imports are kept as they are (`Ok(None)`).
    fn rewrite_import(
        &self,
        import: &ImportDecl,
        index: &mut usize,
        forbidden: &mut HashSet<Id>,
        replacements: &mut HashMap<Id, Expr>,
    ) -> Result<Option<ModuleItem>, HoistError> {
        let src = str_value(&import.src);
        if import.type_only {
            return Ok(None);
        }
        if import.specifiers.is_empty() {
            return self.parse_item(format!("await import({src:?});"), import.span).map(Some);
        }

        let values: Vec<&ImportSpecifier> = import
            .specifiers
            .iter()
            .filter(|s| !matches!(s, ImportSpecifier::Named(named) if named.is_type_only))
            .collect();
        if values.is_empty() {
            return Ok(None);
        }

        let var = format!("__vi_import_{index}__");
        *index += 1;
        for specifier in values {
            let (local, access) = match specifier {
                ImportSpecifier::Default(default) => (&default.local, format!("{var}.default")),
                ImportSpecifier::Namespace(ns) => (&ns.local, var.clone()),
                ImportSpecifier::Named(named) => {
                    let imported = match &named.imported {
                        Some(ModuleExportName::Ident(id)) => id.sym.as_str().to_string(),
                        Some(ModuleExportName::Str(s)) => str_value(s),
                        None => named.local.sym.as_str().to_string(),
                    };
                    let access = if is_identifier(&imported) {
                        format!("{var}.{imported}")
                    } else {
                        format!("{var}[{imported:?}]")
                    };
                    (&named.local, access)
                }
            };
            forbidden.insert(local.to_id());
            replacements.insert(local.to_id(), self.parse_expr(access)?);
        }
        self.parse_item(format!("const {var} = await import({src:?});"), import.span)
            .map(Some)
    }

    fn check_references(&self, item: &ModuleItem, specifier: &str, forbidden: &HashSet<Id>) -> Result<(), HoistError> {
        let mut finder = FirstReference {
            forbidden,
            found: None,
        };
        item.visit_with(&mut finder);
        match finder.found {
            Some(ident) => Err(HoistError::NonHoistedReference {
                line: self.line(ident.span),
                source: MockUsageError::NonHoistedReference {
                    specifier: specifier.to_string(),
                    name: ident.sym.as_str().to_string(),
                },
            }),
            None => Ok(()),
        }
    }

    /// Parse a generated statement and place it at `span` of the original.
    fn parse_item(&self, code: String, span: Span) -> Result<ModuleItem, HoistError> {
        let fm = self.cm.new_source_file(Lrc::new(FileName::Anon), code.clone());
        let mut parser = Parser::new_from(Lexer::new(syntax(), EsVersion::Es2022, StringInput::from(&*fm), None));
        let mut module = parser.parse_module().map_err(|e| generated_error(&code, e))?;
        module.visit_mut_with(&mut Respan(span));
        module.body.pop().ok_or_else(|| HoistError::Syntax {
            line: 0,
            message: format!("empty generated statement `{code}`"),
        })
    }

    fn parse_expr(&self, code: String) -> Result<Expr, HoistError> {
        let fm = self.cm.new_source_file(Lrc::new(FileName::Anon), code.clone());
        let mut parser = Parser::new_from(Lexer::new(syntax(), EsVersion::Es2022, StringInput::from(&*fm), None));
        parser
            .parse_expr()
            .map(|expr| *expr)
            .map_err(|e| generated_error(&code, e))
    }

    fn print(
        &self,
        module: &Module,
        start: swc_common::BytePos,
        end: swc_common::BytePos,
    ) -> Result<(String, Vec<usize>, Option<String>), HoistError> {
        let mut buf = vec![];
        let mut mappings = vec![];
        {
            let writer = JsWriter::new(self.cm.clone(), "\n", &mut buf, Some(&mut mappings));
            let mut emitter = Emitter {
                cfg: CodegenConfig::default()
                    .with_target(EsVersion::Es2022)
                    .with_ascii_only(false)
                    .with_minify(false)
                    .with_omit_last_semi(false),
                cm: self.cm.clone(),
                comments: None,
                wr: writer,
            };
            emitter
                .emit_module(module)
                .map_err(|e| HoistError::Codegen(e.to_string()))?;
        }
        let code = String::from_utf8(buf).map_err(|e| HoistError::Codegen(e.to_string()))?;

        // first mapped position on each output line wins
        let mut line_map = vec![0usize; code.lines().count()];
        for (pos, at) in &mappings {
            if *pos < start || *pos > end {
                continue;
            }
            if let Some(slot) = line_map.get_mut(at.line as usize)
                && *slot == 0
            {
                *slot = self.cm.lookup_char_pos(*pos).line;
            }
        }
        let mut last = 1;
        for slot in &mut line_map {
            if *slot == 0 {
                *slot = last;
            } else {
                last = *slot;
            }
        }

        let mut map_buf = vec![];
        let source_map = self
            .cm
            .build_source_map(&mappings, None, swc_common::source_map::DefaultSourceMapGenConfig)
            .to_writer(&mut map_buf)
            .ok()
            .and_then(|_| String::from_utf8(map_buf).ok());

        Ok((code, line_map, source_map))
    }
}

fn generated_error(code: &str, e: swc_ecma_parser::error::Error) -> HoistError {
    HoistError::Syntax {
        line: 0,
        message: format!("generated code `{code}` did not parse: {:?}", e.kind()),
    }
}

/// `'./dep'` or `import('./dep')` as the first argument of a registration.
fn specifier_of(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Lit(Lit::Str(s)) => Some(str_value(s)),
        Expr::Call(CallExpr {
            callee: Callee::Import(_),
            args,
            ..
        }) => match args.first().map(|arg| &*arg.expr) {
            Some(Expr::Lit(Lit::Str(s))) => Some(str_value(s)),
            _ => None,
        },
        _ => None,
    }
}

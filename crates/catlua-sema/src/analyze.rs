//! Scope and prefix resolution, alias tracking, and constant folding.
//!
//! Runs in two sub-phases: alias collection over top-level event statements,
//! then a full tree walk that resolves every variable reference to exactly
//! one of the `l!`/`g!`/`o!` scopes, folds constant arithmetic, and checks
//! the per-event action budget.

use catlua_common::diagnostics::Diagnostics;
use catlua_parser::ast::{
    BinOp, Call, CallStmt, Expr, NumberLit, Prefix, Program, Scope, Stmt, TableLit, VarRef,
};
use rustc_hash::{FxHashMap, FxHashSet};

/// Runtime-provided singletons. Assigning one to a variable creates an
/// alias; using the real name afterwards is an error.
pub const SERVICES: &[&str] = &["UserInputService", "LocalPlayer", "Camera"];

/// Names the runtime provides; calls to these never warn as undeclared.
pub const BUILTINS: &[&str] = &[
    "print", "warn", "error", "wait", "task",
    "string", "math", "table", "os", "server",
    "makeVisible", "makeInvisible", "redirect",
    "playAudio", "playLoopedAudio", "stopAllAudio",
    "getUrl", "getQuery", "getTimezone", "tick",
    "formatLocalTime", "formatUniversalTime",
    "hexToRGB", "hexToHSV", "RGBToHex", "HSVToHex", "lerpColor",
    "findFirstChild", "findFirstAncestor", "findFirstDescendant",
    "getChildren", "getDescendants", "getObjectsAtPosition",
    "setImage", "setHeadshot", "getAssetInfo", "tween",
    "clone", "destroy", "darkTheme", "keyDown",
    "leftMouseDown", "middleMouseDown", "rightMouseDown",
    "Camera", "LocalPlayer", "UserInputService", "page", "site", "crossSite",
    "protected", "bg", "background",
];

/// Library name prefixes that suppress undeclared-name warnings.
const LIBRARY_PREFIXES: &[&str] = &["string.", "math.", "table.", "os.", "cookie", "server."];

/// Facts later passes need: the declared user functions (name -> params).
#[derive(Debug, Default)]
pub struct Analysis {
    pub funcs: FxHashMap<String, Vec<String>>,
}

impl Analysis {
    pub fn is_user_func(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }
}

/// Analyze the program at the given optimization level (folding runs at
/// opt >= 1). Returns the settled tree, the collected facts, and every
/// diagnostic the walk produced.
pub fn analyze(mut program: Program, opt_level: u8) -> (Program, Analysis, Diagnostics) {
    let mut analyzer = Analyzer {
        opt_level,
        globals: FxHashSet::default(),
        objects: FxHashSet::default(),
        locals: FxHashSet::default(),
        funcs: FxHashMap::default(),
        aliases: FxHashMap::default(),
        alias_lines: FxHashMap::default(),
        in_loop: 0,
        action_count: 0,
        diagnostics: Diagnostics::new(),
    };
    analyzer.run(&mut program);

    let analysis = Analysis { funcs: analyzer.funcs };
    (program, analysis, analyzer.diagnostics)
}

struct Analyzer {
    opt_level: u8,
    globals: FxHashSet<String>,
    objects: FxHashSet<String>,
    locals: FxHashSet<String>,
    funcs: FxHashMap<String, Vec<String>>,
    /// Service name -> the variable it was aliased to.
    aliases: FxHashMap<String, String>,
    /// Service name -> the line the alias was declared on.
    alias_lines: FxHashMap<String, u32>,
    in_loop: u32,
    action_count: u32,
    diagnostics: Diagnostics,
}

impl Analyzer {
    fn run(&mut self, program: &mut Program) {
        self.collect_aliases(program);

        for shard in &program.shards {
            for func in &shard.func_defs {
                if self.funcs.contains_key(&func.name) {
                    self.diagnostics
                        .warning(func.line, format!("duplicate function '{}' declared", func.name));
                }
                if func.params.len() > 6 {
                    self.diagnostics.error(
                        func.line,
                        format!("function '{}' exceeds max 6 arguments", func.name),
                    );
                }
                self.funcs.insert(func.name.clone(), func.params.clone());
            }
        }

        for shard in &mut program.shards {
            for event in &mut shard.events {
                self.locals = hidden_event_locals(&event.event_type);
                self.action_count = 0;
                self.in_loop = 0;
                self.visit_block(&mut event.body);
            }
            for func in &mut shard.func_defs {
                self.locals = func.params.iter().cloned().collect();
                self.action_count = 0;
                self.in_loop = 0;
                self.visit_block(&mut func.body);
            }
        }
    }

    /// Record `target = Service` patterns at the top level of events.
    fn collect_aliases(&mut self, program: &Program) {
        for shard in &program.shards {
            for event in &shard.events {
                for stmt in &event.body {
                    let Stmt::Assign(assign) = stmt else { continue };
                    if assign.targets.len() != 1 {
                        continue;
                    }
                    let (Some(target), Expr::Var(value)) =
                        (assign.targets[0].as_var(), &assign.value)
                    else {
                        continue;
                    };
                    if !SERVICES.contains(&value.name.as_str()) {
                        continue;
                    }
                    if self.aliases.contains_key(&value.name) {
                        self.diagnostics.warning(
                            assign.line,
                            format!("'{}' remapped more than once", value.name),
                        );
                    }
                    self.aliases.insert(value.name.clone(), target.name.clone());
                    self.alias_lines.insert(value.name.clone(), assign.line);
                }
            }
        }
    }

    fn visit_block(&mut self, stmts: &mut [Stmt]) {
        for stmt in stmts {
            self.action_count += 1;
            if self.action_count == 121 {
                self.diagnostics.warning(
                    stmt.line(),
                    "action limit exceeded (120 per event). further actions may not compile or run correctly.",
                );
            }
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Assign(assign) => {
                if self.opt_level >= 1 {
                    assign.value = fold_constants(take_expr(&mut assign.value));
                }
                self.visit_expr(&mut assign.value);
                let scope = assign.scope;
                let line = assign.line;
                for target in &mut assign.targets {
                    self.resolve_target(target, scope, line);
                }
            }
            Stmt::If(if_stmt) => {
                self.visit_expr(&mut if_stmt.condition);
                self.visit_block(&mut if_stmt.true_body);
                for else_if in &mut if_stmt.else_ifs {
                    self.visit_expr(&mut else_if.condition);
                    self.visit_block(&mut else_if.body);
                }
                if let Some(false_body) = &mut if_stmt.false_body {
                    self.visit_block(false_body);
                }
            }
            Stmt::Repeat(repeat) => {
                if let Some(count) = &mut repeat.count {
                    self.visit_expr(count);
                }
                self.in_loop += 1;
                self.visit_block(&mut repeat.body);
                self.in_loop -= 1;
            }
            Stmt::For(for_stmt) => {
                self.visit_expr(&mut for_stmt.iterator);
                self.locals.insert(for_stmt.key.clone());
                self.locals.insert(for_stmt.value.clone());
                self.in_loop += 1;
                self.visit_block(&mut for_stmt.body);
                self.in_loop -= 1;
            }
            Stmt::Call(call) => self.visit_call_stmt(call),
            Stmt::Return(ret) => {
                if let Some(value) = &mut ret.value {
                    self.visit_expr(value);
                }
            }
            Stmt::Break(brk) => {
                if self.in_loop == 0 {
                    self.diagnostics
                        .warning(brk.line, "break statement used outside of a loop");
                }
            }
            Stmt::Delete(del) => self.visit_expr(&mut del.target),
            Stmt::Comment(_) => {}
        }
    }

    fn visit_call_stmt(&mut self, call: &mut CallStmt) {
        let scope = call.scope;
        let line = call.line;
        for target in &mut call.targets {
            self.resolve_target(target, scope, line);
        }
        self.visit_call_common(&mut call.call, line);
    }

    /// Shared call handling for statement- and expression-position calls.
    fn visit_call_common(&mut self, call: &mut Call, line: u32) {
        let func_name = call_func_name(&call.func);

        let is_known = func_name.as_deref().is_some_and(|name| {
            self.funcs.contains_key(name)
                || BUILTINS.contains(&name)
                || SERVICES.contains(&name)
        });

        match (&func_name, is_known) {
            (Some(_), false) => self.visit_expr(&mut call.func),
            (None, _) => {
                // e.g. `(get_stuff()).method()` -- visit the receiver.
                if let Expr::Prop(prop) = &mut call.func {
                    self.visit_expr(&mut prop.obj);
                }
            }
            _ => {}
        }

        if let Some(name) = &func_name {
            if let Some(params) = self.funcs.get(name.as_str()) {
                if call.args.len() > params.len() {
                    self.diagnostics
                        .warning(line, format!("too many arguments passed to '{name}'"));
                }
            }
        }

        for arg in &mut call.args {
            if self.opt_level >= 1 {
                *arg = fold_constants(take_expr(arg));
            }
            self.visit_expr(arg);
        }
    }

    fn visit_expr(&mut self, expr: &mut Expr) {
        match expr {
            Expr::Var(var) => self.visit_var_read(var),
            Expr::Prop(prop) => {
                if let Some(obj) = prop.obj.as_var() {
                    let name = obj.name.as_str();
                    let known = BUILTINS.contains(&name)
                        || SERVICES.contains(&name)
                        || LIBRARY_PREFIXES.iter().any(|p| name.starts_with(p));
                    if known {
                        return;
                    }
                }
                self.visit_expr(&mut prop.obj);
            }
            Expr::Index(index) => {
                self.visit_expr(&mut index.table);
                self.visit_expr(&mut index.index);
            }
            Expr::Binary(bin) => {
                self.visit_expr(&mut bin.left);
                self.visit_expr(&mut bin.right);
            }
            Expr::Unary(unary) => self.visit_expr(&mut unary.right),
            Expr::Call(call) => {
                let line = call.line;
                self.visit_call_common(call, line);
            }
            Expr::Number(_) | Expr::Str(_) | Expr::InterpStr(_) | Expr::Table(_) => {}
        }
    }

    /// Resolve a variable *read*, assigning a prefix if it has none.
    fn visit_var_read(&mut self, var: &mut VarRef) {
        if var.is_nil() {
            return;
        }
        if let Some(alias) = self.aliases.get(&var.name) {
            if self.alias_lines.get(&var.name) != Some(&var.line) {
                self.diagnostics.error(
                    var.line,
                    format!(
                        "'{}' has been remapped to '{alias}', use '{alias}' instead",
                        var.name
                    ),
                );
            }
            return;
        }

        match var.prefix {
            None => {
                let in_globals = self.globals.contains(&var.name);
                let in_locals = self.locals.contains(&var.name);
                let in_objects = self.objects.contains(&var.name);

                if !in_globals && !in_locals && !in_objects {
                    self.diagnostics
                        .warning(var.line, format!("'{}' not declared, assuming global", var.name));
                    var.prefix = Some(Prefix::Global);
                } else if in_globals {
                    var.prefix = Some(Prefix::Global);
                } else if in_locals {
                    var.prefix = Some(Prefix::Local);
                } else {
                    var.prefix = Some(Prefix::Object);
                }
            }
            Some(Prefix::Local) if !self.locals.contains(&var.name) => {
                self.diagnostics
                    .warning(var.line, format!("l!{} not declared in local scope", var.name));
            }
            Some(Prefix::Object) if !self.objects.contains(&var.name) => {
                self.diagnostics
                    .warning(var.line, format!("o!{} not declared in object scope", var.name));
            }
            Some(_) => {}
        }
    }

    /// Resolve an assignment *target*: merge the scope keyword with the
    /// explicit prefix, register the name in the winning scope set, and
    /// write the final prefix back.
    fn resolve_target(&mut self, target: &mut Expr, scope: Option<Scope>, line: u32) {
        let Expr::Var(var) = target else {
            self.visit_expr(target);
            return;
        };

        if let (Some(scope), Some(prefix)) = (scope, var.prefix) {
            if prefix != scope.prefix() {
                self.diagnostics.warning(
                    line,
                    format!(
                        "prefix '{}' conflicts with scope keyword '{}', stripping prefix",
                        prefix.as_str(),
                        scope.keyword()
                    ),
                );
            }
            var.prefix = None;
        }

        let active_scope = scope.or_else(|| {
            var.prefix.map(|p| match p {
                Prefix::Local => Scope::Local,
                Prefix::Global => Scope::Global,
                Prefix::Object => Scope::Object,
            })
        });

        let name = var.name.clone();
        match active_scope {
            Some(Scope::Local) => {
                if self.locals.contains(&name) && scope == Some(Scope::Local) {
                    self.diagnostics.error(
                        line,
                        format!("'{name}' already declared as local, use l!{name} = ... to reassign"),
                    );
                }
                self.locals.insert(name);
                var.prefix = Some(Prefix::Local);
            }
            Some(Scope::Object) => {
                if self.objects.contains(&name) && scope == Some(Scope::Object) {
                    self.diagnostics.error(
                        line,
                        format!("'{name}' already declared as object, use o!{name} = ... to reassign"),
                    );
                }
                self.objects.insert(name);
                var.prefix = Some(Prefix::Object);
            }
            Some(Scope::Global) => {
                self.globals.insert(name);
                var.prefix = Some(Prefix::Global);
            }
            None => {
                if self.globals.contains(&name) {
                    // Re-assignment of a known global.
                } else if self.locals.contains(&name) || self.objects.contains(&name) {
                    self.diagnostics.warning(
                        line,
                        format!("bare assignment to '{name}', did you mean l!{name} or o!{name}?"),
                    );
                } else {
                    self.globals.insert(name);
                }
                var.prefix = Some(Prefix::Global);
            }
        }
    }
}

/// Move an expression out of its slot, leaving an inert placeholder the
/// caller immediately overwrites.
fn take_expr(slot: &mut Expr) -> Expr {
    std::mem::replace(slot, Expr::Table(TableLit { line: 0 }))
}

/// The name a call resolves through: a bare function name, or the library
/// object of a `lib.func` form.
fn call_func_name(func: &Expr) -> Option<String> {
    match func {
        Expr::Var(var) => Some(var.name.clone()),
        Expr::Prop(prop) => prop.obj.as_var().map(|v| v.name.clone()),
        _ => None,
    }
}

/// Hidden locals the runtime injects for certain event types.
fn hidden_event_locals(event_type: &str) -> FxHashSet<String> {
    let names: &[&str] = if event_type == "OnMessageReceived" {
        &["messageContent", "messageSenderId", "messageSenderName"]
    } else if event_type == "OnCrossSiteMessageReceived" {
        &["sourceDomain", "messageContent", "messageSenderId", "messageSenderName"]
    } else if event_type.contains("GetPropertyChangedSignal") {
        &["propertyChanged"]
    } else {
        &[]
    };
    names.iter().map(|s| s.to_string()).collect()
}

/// Fold constant arithmetic bottom-up. Division and modulo by zero leave
/// the expression unfolded, as does any non-finite result.
pub fn fold_constants(expr: Expr) -> Expr {
    let Expr::Binary(mut bin) = expr else { return expr };

    bin.left = fold_constants(bin.left);
    bin.right = fold_constants(bin.right);

    if let (Expr::Number(left), Expr::Number(right)) = (&bin.left, &bin.right) {
        if let (Some(a), Some(b)) = (left.value(), right.value()) {
            let result = match bin.op {
                BinOp::Add => Some(a + b),
                BinOp::Sub => Some(a - b),
                BinOp::Mul => Some(a * b),
                BinOp::Div if b != 0.0 => Some(a / b),
                BinOp::Pow => Some(a.powf(b)),
                // Floored modulo, matching the source language's semantics.
                BinOp::Mod if b != 0.0 => Some(a - b * (a / b).floor()),
                _ => None,
            };
            if let Some(value) = result {
                if value.is_finite() {
                    return Expr::Number(NumberLit::new(bin.line, format_number(value)));
                }
            }
        }
    }

    Expr::Binary(bin)
}

/// Integral results print without a decimal point; everything else uses the
/// host float formatting.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 9e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catlua_lexer::Lexer;
    use catlua_parser::parse;

    fn analyzed(source: &str, opt_level: u8) -> (Program, Analysis, Diagnostics) {
        let outcome = parse(Lexer::tokenize(source).unwrap());
        analyze(outcome.program.unwrap(), opt_level)
    }

    fn event_source(stmts: &str) -> String {
        format!("OnWebsiteLoaded\n{stmts}\nend")
    }

    #[test]
    fn folds_constant_arithmetic() {
        let (program, _, _) = analyzed(&event_source("local x = 1 + 2 * 3"), 1);
        let Stmt::Assign(assign) = &program.shards[0].events[0].body[0] else { panic!() };
        let Expr::Number(n) = &assign.value else { panic!("expected folded literal") };
        assert_eq!(n.text, "7");
    }

    #[test]
    fn division_by_zero_stays_unfolded() {
        let (program, _, _) = analyzed(&event_source("local x = 1 / 0"), 1);
        let Stmt::Assign(assign) = &program.shards[0].events[0].body[0] else { panic!() };
        assert!(matches!(&assign.value, Expr::Binary(_)));
    }

    #[test]
    fn no_folding_at_opt_zero() {
        let (program, _, _) = analyzed(&event_source("local x = 1 + 2"), 0);
        let Stmt::Assign(assign) = &program.shards[0].events[0].body[0] else { panic!() };
        assert!(matches!(&assign.value, Expr::Binary(_)));
    }

    #[test]
    fn fold_renders_floats_with_decimal() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[test]
    fn local_redeclaration_is_fatal() {
        let (_, _, diags) = analyzed(&event_source("local x = 1\nlocal x = 2"), 1);
        assert!(diags.has_errors());
        assert!(diags
            .errors()
            .any(|d| d.message.contains("already declared as local")));
    }

    #[test]
    fn prefix_reassignment_is_allowed() {
        let (_, _, diags) = analyzed(&event_source("local x = 1\nl!x = 2"), 1);
        assert!(!diags.has_errors());
    }

    #[test]
    fn prefix_conflicting_with_scope_warns_and_strips() {
        let (program, _, diags) = analyzed(&event_source("local g!x = 1"), 1);
        assert!(diags.warnings().any(|d| d.message.contains("conflicts with scope keyword")));
        let Stmt::Assign(assign) = &program.shards[0].events[0].body[0] else { panic!() };
        let var = assign.targets[0].as_var().unwrap();
        assert_eq!(var.prefix, Some(Prefix::Local));
    }

    #[test]
    fn bare_assignment_to_local_warns() {
        let (_, _, diags) = analyzed(&event_source("local x = 1\nx = 2"), 1);
        assert!(diags.warnings().any(|d| d.message.contains("bare assignment to 'x'")));
    }

    #[test]
    fn unknown_read_warns_and_defaults_global() {
        let (program, _, diags) = analyzed(&event_source("x = y"), 1);
        assert!(diags
            .warnings()
            .any(|d| d.message.contains("'y' not declared, assuming global")));
        let Stmt::Assign(assign) = &program.shards[0].events[0].body[0] else { panic!() };
        assert_eq!(assign.value.as_var().unwrap().prefix, Some(Prefix::Global));
    }

    #[test]
    fn prefix_totality_after_analysis() {
        let (program, _, _) = analyzed(
            &event_source("local a = 1\nobject b = Frame\nc = a\nd = b"),
            1,
        );
        for stmt in &program.shards[0].events[0].body {
            let Stmt::Assign(assign) = stmt else { continue };
            for target in &assign.targets {
                assert!(target.as_var().unwrap().prefix.is_some());
            }
        }
    }

    #[test]
    fn alias_use_after_remap_is_fatal() {
        let source = "OnWebsiteLoaded\ninput = UserInputService\nend\n\
                      Button.MouseButton1Click\nprint(UserInputService)\nend";
        let (_, _, diags) = analyzed(source, 1);
        assert!(diags.errors().any(|d| {
            d.message.contains("remapped to 'input'") && d.message.contains("use 'input' instead")
        }));
    }

    #[test]
    fn duplicate_alias_warns() {
        let source = "OnWebsiteLoaded\na = Camera\nend\nOnWebsiteLoaded\nb = Camera\nend";
        let (_, _, diags) = analyzed(source, 1);
        assert!(diags
            .warnings()
            .any(|d| d.message.contains("'Camera' remapped more than once")));
    }

    #[test]
    fn too_many_function_params_is_fatal() {
        let source = "function f(a, b, c, d, e, f, g)\nend";
        let (_, _, diags) = analyzed(source, 1);
        assert!(diags.errors().any(|d| d.message.contains("exceeds max 6 arguments")));
    }

    #[test]
    fn duplicate_function_warns() {
        let source = "function f()\nend\nfunction f()\nend";
        let (_, _, diags) = analyzed(source, 1);
        assert!(diags.warnings().any(|d| d.message.contains("duplicate function 'f'")));
    }

    #[test]
    fn action_limit_warns_at_121() {
        let stmts: Vec<String> = (0..121).map(|i| format!("g{i} = {i}")).collect();
        let (_, _, diags) = analyzed(&event_source(&stmts.join("\n")), 1);
        assert_eq!(
            diags.warnings().filter(|d| d.message.contains("action limit")).count(),
            1
        );

        let stmts: Vec<String> = (0..120).map(|i| format!("g{i} = {i}")).collect();
        let (_, _, diags) = analyzed(&event_source(&stmts.join("\n")), 1);
        assert_eq!(
            diags.warnings().filter(|d| d.message.contains("action limit")).count(),
            0
        );
    }

    #[test]
    fn break_outside_loop_warns() {
        let (_, _, diags) = analyzed(&event_source("break"), 1);
        assert!(diags
            .warnings()
            .any(|d| d.message.contains("break statement used outside of a loop")));
    }

    #[test]
    fn hidden_event_locals_suppress_warnings() {
        let source = "OnMessageReceived\nprint(messageContent)\nend";
        let (_, _, diags) = analyzed(source, 1);
        assert!(!diags.warnings().any(|d| d.message.contains("messageContent")));
    }

    #[test]
    fn builtin_calls_do_not_warn() {
        let (_, _, diags) = analyzed(&event_source("print(\"hi\")\nwait(1)"), 1);
        assert!(diags.is_empty());
    }

    #[test]
    fn user_func_arity_overflow_warns() {
        let source = "function f(a)\nend\nOnWebsiteLoaded\nf(1, 2)\nend";
        let (_, _, diags) = analyzed(source, 1);
        assert!(diags
            .warnings()
            .any(|d| d.message.contains("too many arguments passed to 'f'")));
    }
}

//! Dead-code elimination (optimization level 2).
//!
//! Two steps: a read-counting walk over the whole tree, then a block walk
//! that drops unread call-free local assignments and everything after a
//! `return` or `break`. Each removal is reported as a warning so both
//! compile and lint modes surface what was dropped.

use catlua_common::diagnostics::Diagnostics;
use catlua_parser::ast::{Expr, Program, Scope, Stmt};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;

/// Variable occurrences inside string literals: `{name}` with an optional
/// scope prefix, as produced by the runtime's interpolation.
static LITERAL_READ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{(?:[lgo]!)?([a-zA-Z_]\w*)").expect("literal-read pattern is valid")
});

/// Run dead-code elimination over the program, reporting removals into
/// `diagnostics`.
pub fn optimize(mut program: Program, diagnostics: &mut Diagnostics) -> Program {
    let mut counts = FxHashMap::default();
    for shard in &program.shards {
        for func in &shard.func_defs {
            count_block(&func.body, &mut counts);
        }
        for event in &shard.events {
            count_block(&event.body, &mut counts);
        }
    }

    for shard in &mut program.shards {
        for func in &mut shard.func_defs {
            func.body = eliminate_block(std::mem::take(&mut func.body), &counts, diagnostics);
        }
        for event in &mut shard.events {
            event.body = eliminate_block(std::mem::take(&mut event.body), &counts, diagnostics);
        }
    }
    program
}

// ── Read counting ──────────────────────────────────────────────────────

fn count_block(stmts: &[Stmt], counts: &mut FxHashMap<String, u32>) {
    for stmt in stmts {
        count_stmt(stmt, counts);
    }
}

fn count_stmt(stmt: &Stmt, counts: &mut FxHashMap<String, u32>) {
    match stmt {
        Stmt::Assign(assign) => {
            // Targets are writes, not reads.
            count_expr(&assign.value, counts);
        }
        Stmt::If(if_stmt) => {
            count_expr(&if_stmt.condition, counts);
            count_block(&if_stmt.true_body, counts);
            for else_if in &if_stmt.else_ifs {
                count_expr(&else_if.condition, counts);
                count_block(&else_if.body, counts);
            }
            if let Some(false_body) = &if_stmt.false_body {
                count_block(false_body, counts);
            }
        }
        Stmt::Repeat(repeat) => {
            if let Some(count) = &repeat.count {
                count_expr(count, counts);
            }
            count_block(&repeat.body, counts);
        }
        Stmt::For(for_stmt) => {
            count_expr(&for_stmt.iterator, counts);
            count_block(&for_stmt.body, counts);
        }
        Stmt::Call(call) => {
            // Call outputs still count as reads of the named variables.
            for target in &call.targets {
                count_expr(target, counts);
            }
            count_expr(&call.call.func, counts);
            for arg in &call.call.args {
                count_expr(arg, counts);
            }
        }
        Stmt::Return(ret) => {
            if let Some(value) = &ret.value {
                count_expr(value, counts);
            }
        }
        Stmt::Delete(del) => count_expr(&del.target, counts),
        Stmt::Break(_) | Stmt::Comment(_) => {}
    }
}

fn count_expr(expr: &Expr, counts: &mut FxHashMap<String, u32>) {
    match expr {
        Expr::Var(var) => {
            *counts.entry(var.name.clone()).or_insert(0) += 1;
        }
        Expr::Str(lit) => count_literal_reads(&lit.value, counts),
        Expr::InterpStr(lit) => count_literal_reads(&lit.value, counts),
        Expr::Prop(prop) => count_expr(&prop.obj, counts),
        Expr::Index(index) => {
            count_expr(&index.table, counts);
            count_expr(&index.index, counts);
        }
        Expr::Binary(bin) => {
            count_expr(&bin.left, counts);
            count_expr(&bin.right, counts);
        }
        Expr::Unary(unary) => count_expr(&unary.right, counts),
        Expr::Call(call) => {
            count_expr(&call.func, counts);
            for arg in &call.args {
                count_expr(arg, counts);
            }
        }
        Expr::Number(_) | Expr::Table(_) => {}
    }
}

fn count_literal_reads(text: &str, counts: &mut FxHashMap<String, u32>) {
    for capture in LITERAL_READ.captures_iter(text) {
        if let Some(name) = capture.get(1) {
            *counts.entry(name.as_str().to_string()).or_insert(0) += 1;
        }
    }
}

// ── Elimination ────────────────────────────────────────────────────────

fn eliminate_block(
    block: Vec<Stmt>,
    counts: &FxHashMap<String, u32>,
    diagnostics: &mut Diagnostics,
) -> Vec<Stmt> {
    let total = block.len();
    let mut out = Vec::with_capacity(total);

    for (index, stmt) in block.into_iter().enumerate() {
        if let Stmt::Assign(assign) = &stmt {
            if assign.scope == Some(Scope::Local) && assign.targets.len() == 1 {
                if let Some(var) = assign.targets[0].as_var() {
                    let reads = counts.get(&var.name).copied().unwrap_or(0);
                    if reads == 0 && !has_call(&assign.value) {
                        diagnostics.warning(
                            assign.line,
                            format!("eliminated dead variable '{}'", var.name),
                        );
                        continue;
                    }
                }
            }
        }

        let terminator = match &stmt {
            Stmt::Return(_) => Some("return"),
            Stmt::Break(_) => Some("break"),
            _ => None,
        };
        let line = stmt.line();

        out.push(eliminate_stmt(stmt, counts, diagnostics));

        if let Some(kind) = terminator {
            let dropped = total - index - 1;
            if dropped > 0 {
                diagnostics.warning(
                    line,
                    format!("eliminated {dropped} unreachable statement(s) after {kind} statement"),
                );
            }
            break;
        }
    }

    out
}

fn eliminate_stmt(
    stmt: Stmt,
    counts: &FxHashMap<String, u32>,
    diagnostics: &mut Diagnostics,
) -> Stmt {
    match stmt {
        Stmt::If(mut if_stmt) => {
            if_stmt.true_body =
                eliminate_block(std::mem::take(&mut if_stmt.true_body), counts, diagnostics);
            for else_if in &mut if_stmt.else_ifs {
                else_if.body =
                    eliminate_block(std::mem::take(&mut else_if.body), counts, diagnostics);
            }
            if_stmt.false_body = if_stmt
                .false_body
                .take()
                .map(|body| eliminate_block(body, counts, diagnostics));
            Stmt::If(if_stmt)
        }
        Stmt::Repeat(mut repeat) => {
            repeat.body = eliminate_block(std::mem::take(&mut repeat.body), counts, diagnostics);
            Stmt::Repeat(repeat)
        }
        Stmt::For(mut for_stmt) => {
            for_stmt.body =
                eliminate_block(std::mem::take(&mut for_stmt.body), counts, diagnostics);
            Stmt::For(for_stmt)
        }
        other => other,
    }
}

/// Whether an expression contains a call anywhere: such right-hand sides
/// may have side effects, so their assignments are never dropped.
fn has_call(expr: &Expr) -> bool {
    match expr {
        Expr::Call(_) => true,
        Expr::Prop(prop) => has_call(&prop.obj),
        Expr::Index(index) => has_call(&index.table) || has_call(&index.index),
        Expr::Binary(bin) => has_call(&bin.left) || has_call(&bin.right),
        Expr::Unary(unary) => has_call(&unary.right),
        Expr::Number(_) | Expr::Str(_) | Expr::InterpStr(_) | Expr::Table(_) | Expr::Var(_) => {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catlua_lexer::Lexer;
    use catlua_parser::parse;

    fn optimized(source: &str) -> (Program, Diagnostics) {
        let outcome = parse(Lexer::tokenize(source).unwrap());
        let (program, _, _) = crate::analyze(outcome.program.unwrap(), 2);
        let mut diags = Diagnostics::new();
        let program = optimize(program, &mut diags);
        (program, diags)
    }

    fn body(program: &Program) -> &[Stmt] {
        &program.shards[0].events[0].body
    }

    #[test]
    fn unread_local_is_dropped() {
        let (program, diags) = optimized("OnWebsiteLoaded\nlocal u = 5\nend");
        assert!(body(&program).is_empty());
        assert!(diags
            .warnings()
            .any(|d| d.message.contains("eliminated dead variable 'u'")));
    }

    #[test]
    fn read_local_survives() {
        let (program, diags) = optimized("OnWebsiteLoaded\nlocal u = 5\nlocal v = u\nend");
        // `u` is read by `v`; `v` is unread and dropped.
        assert_eq!(body(&program).len(), 1);
        assert!(diags
            .warnings()
            .any(|d| d.message.contains("eliminated dead variable 'v'")));
        assert!(!diags
            .warnings()
            .any(|d| d.message.contains("eliminated dead variable 'u'")));
    }

    #[test]
    fn call_rhs_is_never_dropped() {
        let (program, diags) = optimized("OnWebsiteLoaded\nlocal u = 1 + tick()\nend");
        assert_eq!(body(&program).len(), 1);
        assert!(diags.warnings().all(|d| !d.message.contains("dead variable")));
    }

    #[test]
    fn string_interpolation_counts_as_read() {
        let (program, _) = optimized("OnWebsiteLoaded\nlocal u = 5\nprint(`u is {l!u}`)\nend");
        assert_eq!(body(&program).len(), 2);
    }

    #[test]
    fn statements_after_return_are_dropped() {
        let (program, diags) =
            optimized("function f()\nreturn 1\ng = 2\ng = 3\nend\nOnWebsiteLoaded\nend");
        let func_body = &program.shards[0].func_defs[0].body;
        assert_eq!(func_body.len(), 1);
        assert!(diags
            .warnings()
            .any(|d| d.message.contains("eliminated 2 unreachable statement(s)")));
    }

    #[test]
    fn statements_after_break_are_dropped_inside_loop() {
        let (program, diags) =
            optimized("OnWebsiteLoaded\nrepeat 3\nbreak\ng = 1\nend\nend");
        let Stmt::Repeat(repeat) = &body(&program)[0] else { panic!("expected repeat") };
        assert_eq!(repeat.body.len(), 1);
        assert!(diags
            .warnings()
            .any(|d| d.message.contains("unreachable statement(s) after break")));
    }
}

//! The desugar pass.
//!
//! One rewrite: the `or`-default idiom. `x = a or b` becomes
//!
//! ```text
//! x = a
//! if not x then x = b end
//! ```
//!
//! applied recursively through every statement block so later passes only
//! ever see primitive assignments.

use catlua_parser::ast::{
    Annotations, AssignOp, AssignStmt, BinOp, Expr, IfStmt, Program, Stmt, UnOp, UnaryExpr,
};

/// Expand sugar across the whole program.
pub fn desugar(mut program: Program) -> Program {
    for shard in &mut program.shards {
        for func in &mut shard.func_defs {
            func.body = desugar_block(std::mem::take(&mut func.body));
        }
        for event in &mut shard.events {
            event.body = desugar_block(std::mem::take(&mut event.body));
        }
    }
    program
}

fn desugar_block(block: Vec<Stmt>) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(block.len());
    for stmt in block {
        desugar_stmt(stmt, &mut out);
    }
    out
}

fn desugar_stmt(stmt: Stmt, out: &mut Vec<Stmt>) {
    // Recurse into nested blocks first, then rewrite this statement.
    let stmt = match stmt {
        Stmt::If(mut if_stmt) => {
            if_stmt.true_body = desugar_block(std::mem::take(&mut if_stmt.true_body));
            for else_if in &mut if_stmt.else_ifs {
                else_if.body = desugar_block(std::mem::take(&mut else_if.body));
            }
            if_stmt.false_body = if_stmt.false_body.take().map(desugar_block);
            Stmt::If(if_stmt)
        }
        Stmt::Repeat(mut repeat) => {
            repeat.body = desugar_block(std::mem::take(&mut repeat.body));
            Stmt::Repeat(repeat)
        }
        Stmt::For(mut for_stmt) => {
            for_stmt.body = desugar_block(std::mem::take(&mut for_stmt.body));
            Stmt::For(for_stmt)
        }
        other => other,
    };

    match stmt {
        Stmt::Assign(AssignStmt {
            line,
            scope,
            targets,
            value: Expr::Binary(bin),
            op: AssignOp::Set,
            annotations,
        }) if bin.op == BinOp::Or && !targets.is_empty() => {
            let target_var = targets[0].clone();

            out.push(Stmt::Assign(AssignStmt {
                line,
                scope,
                targets: targets.clone(),
                value: bin.left,
                op: AssignOp::Set,
                annotations,
            }));

            let fallback = Stmt::Assign(AssignStmt {
                line,
                scope: None,
                targets,
                value: bin.right,
                op: AssignOp::Set,
                annotations: Annotations::default(),
            });
            let condition = Expr::Unary(Box::new(UnaryExpr {
                line,
                op: UnOp::Not,
                right: target_var,
            }));
            out.push(Stmt::If(IfStmt {
                line,
                condition,
                true_body: vec![fallback],
                else_ifs: Vec::new(),
                false_body: None,
            }));
        }
        other => out.push(other),
    }
}

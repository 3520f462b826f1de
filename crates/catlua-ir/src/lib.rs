// catlua-ir -- lowers the analyzed AST to the textual CWIR opcode stream.
//
// Every shard becomes a SCRIPT block, functions and events become EVENT
// blocks, and statements lower to opcode lines. Expressions with no direct
// operand form are scaffolded through `__tmp<N>` locals; the temporary
// counter resets at every function and event boundary so names stay short
// and predictable.

mod calls;
mod value;

use catlua_parser::ast::{
    AssignOp, AssignStmt, BinOp, Event, Expr, ForStmt, FuncDef, IfStmt, ObjectClass, Prefix,
    Program, RepeatStmt, Stmt, UnOp, VarRef,
};
use catlua_sema::{Analysis, SERVICES};

use calls::{pair_targets, CallCtx};
use value::{format_obj, format_val, format_val_opt, format_var_name, Operand};

/// Properties that route reads/writes through the audio variable opcodes.
const AUDIO_PROPS: &[&str] = &[
    "Volume", "PlaybackSpeed", "TimePosition", "IsLoaded", "IsPlaying", "IsPaused",
];

/// Properties that route reads through the input opcodes.
const INPUT_PROPS: &[&str] = &["Text", "PlaceholderText", "CursorPosition", "SelectionStart"];

/// Lower a settled program to CWIR text.
pub fn emit(program: &Program, analysis: &Analysis) -> String {
    let mut emitter = Emitter {
        analysis,
        lines: Vec::new(),
        tmp_counter: 0,
    };
    emitter.emit_program(program);
    emitter.lines.join("\n")
}

pub(crate) struct Emitter<'a> {
    pub(crate) analysis: &'a Analysis,
    lines: Vec<String>,
    tmp_counter: u32,
}

impl Emitter<'_> {
    pub(crate) fn add(&mut self, line: String) {
        self.lines.push(line);
    }

    /// Mint a fresh scaffolding temporary in the local scope.
    fn new_tmp(&mut self) -> VarRef {
        self.tmp_counter += 1;
        VarRef::new(0, format!("__tmp{}", self.tmp_counter), Some(Prefix::Local))
    }

    // ── Program framing ────────────────────────────────────────────────

    fn emit_program(&mut self, program: &Program) {
        self.add("CWIR_VERSION 1.0\n".to_string());

        for shard in &program.shards {
            self.add("SCRIPT".to_string());
            if !shard.alias.is_empty() {
                self.add(format!("SCRIPT_ALIAS \"{}\"\n", shard.alias));
            }
            for func in &shard.func_defs {
                self.emit_function(func);
            }
            for event in &shard.events {
                self.emit_event(event);
            }
            self.add("END_SCRIPT\n".to_string());
        }
    }

    fn emit_function(&mut self, func: &FuncDef) {
        self.tmp_counter = 0;
        let params: Vec<String> = func.params.iter().map(|p| format!("\"{p}\"")).collect();
        self.add(format!("EVENT FUNC_DEF \"{}\" [{}]", func.name, params.join(" ")));
        self.emit_block(&func.body, "    ");
        self.add("END_EVENT\n".to_string());
    }

    fn emit_event(&mut self, event: &Event) {
        self.tmp_counter = 0;
        self.add(event_header(event));
        self.emit_block(&event.body, "    ");
        self.add("END_EVENT\n".to_string());
    }

    // ── Statements ─────────────────────────────────────────────────────

    fn emit_block(&mut self, stmts: &[Stmt], ind: &str) {
        for stmt in stmts {
            self.emit_stmt(stmt, ind);
        }
    }

    fn emit_stmt(&mut self, stmt: &Stmt, ind: &str) {
        match stmt {
            Stmt::Assign(assign) => self.emit_assign(assign, ind),
            Stmt::Comment(comment) => self.add(format!("{ind}COMMENT \"{}\"", comment.text)),
            Stmt::Call(call) => {
                let ctx = CallCtx::from_stmt(call);
                self.emit_call(&call.call, &ctx, ind, None);
            }
            Stmt::If(if_stmt) => self.emit_if(if_stmt, ind),
            Stmt::Repeat(repeat) => self.emit_repeat(repeat, ind),
            Stmt::For(for_stmt) => self.emit_for(for_stmt, ind),
            Stmt::Break(_) => self.add(format!("{ind}BREAK")),
            Stmt::Return(ret) => {
                let value = match &ret.value {
                    Some(expr @ (Expr::Binary(_) | Expr::Call(_) | Expr::Unary(_))) => {
                        self.scaffold(expr, ind).val()
                    }
                    Some(expr) => format_val(expr),
                    None => "EMPTY".to_string(),
                };
                self.add(format!("{ind}RETURN {value}"));
            }
            Stmt::Delete(del) => match &del.target {
                Expr::Var(var) => {
                    if var.name.chars().next().is_some_and(char::is_uppercase) {
                        self.add(format!("{ind}LOOK_DELETE {}", format_obj(&del.target)));
                    } else {
                        self.add(format!("{ind}VAR_DEL {}", format_var_name(&del.target)));
                    }
                }
                Expr::Prop(prop) => {
                    let table = format_var_name(&prop.obj);
                    self.add(format!("{ind}TABLE_DEL \"{}\" {table}", prop.prop));
                }
                Expr::Index(index) => {
                    let table = format_var_name(&index.table);
                    let entry = format_val(&index.index);
                    self.add(format!("{ind}TABLE_DEL {entry} {table}"));
                }
                _ => {}
            },
        }
    }

    // ── Assignment lowering ────────────────────────────────────────────

    fn emit_assign(&mut self, stmt: &AssignStmt, ind: &str) {
        let Some(first_target) = stmt.targets.first() else { return };

        // Service aliases exist only in the analyzer; nothing to emit.
        if first_target.as_var().is_some() {
            if let Expr::Var(value) = &stmt.value {
                if SERVICES.contains(&value.name.as_str()) {
                    return;
                }
            }
        }

        // Multi-output input queries. The call forms usually arrive as call
        // statements (handled in `emit_call`); they reappear here as plain
        // assignments only through desugared fallback branches.
        if let Expr::Call(call) = &stmt.value {
            if let Expr::Prop(prop) = &call.func {
                if prop.prop == "GetMouseLocation" {
                    let (x, y) = pair_targets(&stmt.targets);
                    self.add(format!("{ind}INPUT_GET_CURSOR {x} {y}"));
                    return;
                }
                if prop.prop == "GetMousePosition"
                    && prop.obj.as_var().is_some_and(|v| v.name == "UserInputService")
                {
                    let (x, y) = pair_targets(&stmt.targets);
                    self.add(format!("{ind}INPUT_GET_VIEWPORT {x} {y}"));
                    return;
                }
            }
        }
        if let Expr::Prop(prop) = &stmt.value {
            if prop.prop == "ViewportSize" && prop.obj.as_var().is_some_and(|v| v.name == "Camera")
            {
                let (x, y) = pair_targets(&stmt.targets);
                self.add(format!("{ind}INPUT_GET_VIEWPORT {x} {y}"));
                return;
            }
        }

        // In-place rounding with an explicit output.
        if let Expr::Call(call) = &stmt.value {
            if let Expr::Prop(prop) = &call.func {
                if prop.obj.as_var().is_some_and(|v| v.name == "math") {
                    let opcode = match prop.prop.as_str() {
                        "round" => Some("VAR_ROUND"),
                        "floor" => Some("VAR_FLOOR"),
                        "ceil" => Some("VAR_CEIL"),
                        _ => None,
                    };
                    if let Some(opcode) = opcode {
                        let out = format_var_name(first_target);
                        if let Some(arg) = call.args.first() {
                            self.add(format!("{ind}VAR_SET {out} {}", format_val(arg)));
                        }
                        self.add(format!("{ind}{opcode} {out}"));
                        return;
                    }
                }
            }
        }

        // `#arr` length.
        if let Expr::Unary(unary) = &stmt.value {
            if unary.op == UnOp::Len {
                let array = match unary.right.as_var() {
                    Some(var) => format!(
                        "{}{}",
                        var.prefix.map(|p| p.as_str()).unwrap_or(""),
                        var.name
                    ),
                    None => "temp".to_string(),
                };
                let out = format_var_name(first_target);
                self.add(format!("{ind}TABLE_LEN \"{array}\" {out}"));
                return;
            }
        }

        // Direct concatenation.
        if let Expr::Binary(bin) = &stmt.value {
            if bin.op == BinOp::Concat {
                let out = format_var_name(first_target);
                let left = format_val(&bin.left);
                let right = format_val(&bin.right);
                self.add(format!("{ind}STR_CONCAT {left} {right} {out}"));
                return;
            }
        }

        let value = match &stmt.value {
            expr @ (Expr::Binary(_) | Expr::Call(_) | Expr::Unary(_)) => self.scaffold(expr, ind),
            other => Operand::Ref(other),
        };

        if let Operand::Ref(Expr::Table(_)) = value {
            self.add(format!("{ind}TABLE_CREATE {}", format_var_name(first_target)));
            return;
        }

        let is_object_assign = stmt.annotations.ty == Some(ObjectClass::Object);
        let value_is_element = matches!(
            &value,
            Operand::Ref(Expr::Var(v)) if v.name.chars().next().is_some_and(char::is_uppercase)
        );
        let val_str = if is_object_assign || value_is_element {
            value.obj()
        } else {
            value.val()
        };

        // Property and table reads.
        if let Operand::Ref(node @ (Expr::Prop(_) | Expr::Index(_))) = value {
            self.emit_member_read(node, stmt, first_target, ind);
            return;
        }

        // Property and table writes.
        if matches!(first_target, Expr::Prop(_) | Expr::Index(_)) {
            self.emit_member_write(first_target, stmt, &val_str, ind);
            return;
        }

        let out = format_var_name(first_target);
        let opcode = match stmt.op {
            AssignOp::Set => "VAR_SET",
            AssignOp::Add => "VAR_INC",
            AssignOp::Sub => "VAR_DEC",
            AssignOp::Mul => "VAR_MUL",
            AssignOp::Div => "VAR_DIV",
            AssignOp::Pow => "VAR_POW",
            AssignOp::Mod => "VAR_MOD",
        };
        self.add(format!("{ind}{opcode} {out} {val_str}"));
    }

    fn emit_member_read(&mut self, node: &Expr, stmt: &AssignStmt, target: &Expr, ind: &str) {
        let Some((prop, obj_node, index_expr)) = member_parts(node) else { return };

        let is_prop = is_property_name(&prop);
        let obj_name = obj_node.as_var().map(|v| v.name.as_str()).unwrap_or("");
        let out = format_var_name(target);

        let is_audio =
            stmt.annotations.ty == Some(ObjectClass::Audio) || AUDIO_PROPS.contains(&prop.as_str());
        let is_input =
            stmt.annotations.ty == Some(ObjectClass::Input) || INPUT_PROPS.contains(&prop.as_str());

        if is_audio {
            let obj_ref = format_var_name(obj_node);
            self.add(format!("{ind}AVAR_GET \"{prop}\" {obj_ref} {out}"));
            return;
        }

        if is_input && prop == "Text" {
            let obj_ref = format_obj(obj_node);
            self.add(format!("{ind}INPUT_GET_TEXT {obj_ref} {out}"));
            return;
        }

        if obj_name == "LocalPlayer" {
            match prop.as_str() {
                "Name" => self.add(format!("{ind}USER_GET_NAME {out}")),
                "UserId" => self.add(format!("{ind}USER_GET_ID {out}")),
                "DisplayName" => self.add(format!("{ind}USER_GET_DISPLAY {out}")),
                _ => {}
            }
            return;
        }

        if is_prop {
            let obj_ref = format_obj(obj_node);
            if prop == "Parent" {
                self.add(format!("{ind}HIER_GET_PARENT {obj_ref} {out}"));
            } else {
                self.add(format!("{ind}LOOK_GET_PROP \"{prop}\" {obj_ref} {out}"));
            }
        } else {
            let table = format_var_name(obj_node);
            let entry = if prop.is_empty() {
                format_val_opt(index_expr)
            } else {
                format!("\"{prop}\"")
            };
            self.add(format!("{ind}TABLE_GET {entry} {table} {out}"));
        }
    }

    fn emit_member_write(&mut self, target: &Expr, stmt: &AssignStmt, val_str: &str, ind: &str) {
        let Some((prop, obj_node, index_expr)) = member_parts(target) else { return };

        let is_prop = is_property_name(&prop);
        let is_audio =
            stmt.annotations.ty == Some(ObjectClass::Audio) || AUDIO_PROPS.contains(&prop.as_str());
        let is_object_table = stmt.annotations.ty == Some(ObjectClass::Object)
            || val_str.starts_with('(')
            || val_str.starts_with("\"{o!");

        if is_audio {
            let obj_ref = format_var_name(obj_node);
            self.add(format!("{ind}AVAR_SET \"{prop}\" {obj_ref} {val_str}"));
            return;
        }

        if is_prop {
            let obj_ref = format_obj(obj_node);
            match prop.as_str() {
                "Parent" => self.add(format!("{ind}HIER_PARENT {obj_ref} {val_str}")),
                "Text" => self.add(format!("{ind}LOOK_SET_TEXT {obj_ref} {val_str}")),
                _ => self.add(format!("{ind}LOOK_SET_PROP \"{prop}\" {obj_ref} {val_str}")),
            }
        } else {
            let table = format_var_name(obj_node);
            let entry = if prop.is_empty() {
                format_val_opt(index_expr)
            } else {
                format!("\"{prop}\"")
            };
            let opcode = if is_object_table { "TABLE_SET_OBJ" } else { "TABLE_SET" };
            self.add(format!("{ind}{opcode} {entry} {table} {val_str}"));
        }
    }

    // ── Control flow ───────────────────────────────────────────────────

    fn emit_if(&mut self, stmt: &IfStmt, ind: &str) {
        self.emit_condition(&stmt.condition, ind);
        self.emit_block(&stmt.true_body, &format!("{ind}    "));

        let mut closing = 1;
        let mut curr = ind.to_string();

        for else_if in &stmt.else_ifs {
            self.add(format!("{curr}ELSE"));
            curr.push_str("    ");
            self.emit_condition(&else_if.condition, &curr);
            self.emit_block(&else_if.body, &format!("{curr}    "));
            closing += 1;
        }

        if let Some(false_body) = &stmt.false_body {
            self.add(format!("{curr}ELSE"));
            self.emit_block(false_body, &format!("{curr}    "));
        }

        for _ in 0..closing {
            self.add(format!("{curr}END_IF"));
            let len = curr.len().saturating_sub(4);
            curr.truncate(len);
        }
    }

    /// Lower an `if` condition to its `IF_*` opcode.
    fn emit_condition(&mut self, cond: &Expr, ind: &str) {
        if let Expr::Call(call) = cond {
            if let Expr::Prop(prop) = &call.func {
                if prop.prop == "find" && prop.obj.as_var().is_some_and(|v| v.name == "string") {
                    let a = format_val_opt(call.args.first());
                    let b = format_val_opt(call.args.get(1));
                    self.add(format!("{ind}IF_CONTAINS {a} {b}"));
                    return;
                }
            }

            let func_name = call.func.as_var().map(|v| v.name.as_str()).unwrap_or("");
            match func_name {
                "IsAncestorOf" => {
                    let ancestor = obj_arg(call.args.first());
                    let child = obj_arg(call.args.get(1));
                    self.add(format!("{ind}IF_IS_ANCESTOR {ancestor} {child}"));
                    return;
                }
                "IsDescendantOf" => {
                    let child = obj_arg(call.args.first());
                    let ancestor = obj_arg(call.args.get(1));
                    self.add(format!("{ind}IF_IS_DESCENDANT {child} {ancestor}"));
                    return;
                }
                "keyDown" => {
                    let key = call
                        .args
                        .first()
                        .map(format_val)
                        .unwrap_or_else(|| "\"\"".to_string());
                    self.add(format!("{ind}IF_KEY_DOWN {key}"));
                    return;
                }
                "leftMouseDown" => {
                    self.add(format!("{ind}IF_MOUSE_LEFT"));
                    return;
                }
                "rightMouseDown" => {
                    self.add(format!("{ind}IF_MOUSE_RIGHT"));
                    return;
                }
                "middleMouseDown" => {
                    self.add(format!("{ind}IF_MOUSE_MIDDLE"));
                    return;
                }
                _ => {}
            }
        }

        if let Expr::Binary(bin) = cond {
            // Existence tests: `x == nil` / `x ~= nil`.
            if matches!(bin.op, BinOp::Eq | BinOp::Neq) {
                if bin.right.as_var().is_some_and(VarRef::is_nil) {
                    let opcode = if bin.op == BinOp::Eq { "IF_NOT_EXISTS" } else { "IF_EXISTS" };
                    self.add(format!("{ind}{opcode} {}", format_var_name(&bin.left)));
                    return;
                }
            }

            let relational = match bin.op {
                BinOp::Eq => Some("IF_EQ"),
                BinOp::Neq => Some("IF_NEQ"),
                BinOp::Gt => Some("IF_GT"),
                BinOp::Ge => Some("IF_GTE"),
                BinOp::Lt => Some("IF_LT"),
                BinOp::Le => Some("IF_LTE"),
                BinOp::Contains => Some("IF_CONTAINS"),
                BinOp::NotContains => Some("IF_NOT_CONTAINS"),
                _ => None,
            };
            if let Some(opcode) = relational {
                let left = format_val(&bin.left);
                let right = format_val(&bin.right);
                self.add(format!("{ind}{opcode} {left} {right}"));
                return;
            }

            let logical = match bin.op {
                BinOp::And => Some("IF_AND"),
                BinOp::Or => Some("IF_OR"),
                BinOp::Nor => Some("IF_NOR"),
                BinOp::Xor => Some("IF_XOR"),
                _ => None,
            };
            if let Some(opcode) = logical {
                let left = format_var_name(&bin.left);
                let right = format_var_name(&bin.right);
                self.add(format!("{ind}{opcode} {left} {right}"));
            }
            return;
        }

        self.add(format!("{ind}IF_NEQ {} EMPTY", format_val(cond)));
    }

    fn emit_repeat(&mut self, stmt: &RepeatStmt, ind: &str) {
        match &stmt.count {
            Some(count) => self.add(format!("{ind}REPEAT {}", format_val(count))),
            None => self.add(format!("{ind}REPEAT_FOREVER")),
        }
        self.emit_block(&stmt.body, &format!("{ind}    "));
        self.add(format!("{ind}END_REPEAT"));
    }

    fn emit_for(&mut self, stmt: &ForStmt, ind: &str) {
        let table = match &stmt.iterator {
            Expr::Var(_) => format_var_name(&stmt.iterator),
            _ => "\"temp\"".to_string(),
        };
        self.add(format!("{ind}TABLE_ITER {table}"));

        // Loop variables are replaced by the runtime's magic iteration names
        // inside the lowered body.
        let start = self.lines.len();
        self.emit_block(&stmt.body, &format!("{ind}    "));
        for line in &mut self.lines[start..] {
            *line = line
                .replace(&format!("{{{}}}", stmt.key), "{l!index}")
                .replace(&format!("{{l!{}}}", stmt.key), "{l!index}")
                .replace(&format!("{{{}}}", stmt.value), "{l!value}")
                .replace(&format!("{{l!{}}}", stmt.value), "{l!value}");
        }

        self.add(format!("{ind}END_ITER"));
    }

    // ── Expression scaffolding ─────────────────────────────────────────

    /// Lower a complex expression into opcode lines, returning the operand
    /// that holds its result.
    pub(crate) fn scaffold<'e>(&mut self, node: &'e Expr, ind: &str) -> Operand<'e> {
        match node {
            Expr::Number(_) | Expr::Str(_) => {
                let tmp = self.new_tmp();
                self.add(format!("{ind}VAR_SET {} {}", value::var_name(&tmp), format_val(node)));
                Operand::Tmp(tmp)
            }
            Expr::Binary(bin) => {
                let left = self.scaffold(&bin.left, ind);
                let right = self.scaffold(&bin.right, ind);

                if bin.op == BinOp::Concat {
                    let tmp = self.new_tmp();
                    self.add(format!(
                        "{ind}STR_CONCAT {} {} {}",
                        left.val(),
                        right.val(),
                        value::var_name(&tmp)
                    ));
                    return Operand::Tmp(tmp);
                }

                let right_str = right.val();

                // Reuse the left operand's temporary when it has one;
                // otherwise seed a fresh one with the left value.
                let tmp = match left {
                    Operand::Tmp(var) => var,
                    other => {
                        let tmp = self.new_tmp();
                        self.add(format!(
                            "{ind}VAR_SET {} {}",
                            value::var_name(&tmp),
                            other.val()
                        ));
                        tmp
                    }
                };
                let tmp_name = value::var_name(&tmp);

                let opcode = match bin.op {
                    BinOp::Add => Some("VAR_INC"),
                    BinOp::Sub => Some("VAR_DEC"),
                    BinOp::Mul => Some("VAR_MUL"),
                    BinOp::Div => Some("VAR_DIV"),
                    BinOp::Pow => Some("VAR_POW"),
                    BinOp::Mod => Some("VAR_MOD"),
                    _ => None,
                };
                if let Some(opcode) = opcode {
                    self.add(format!("{ind}{opcode} {tmp_name} {right_str}"));
                }
                Operand::Tmp(tmp)
            }
            Expr::Call(call) => {
                let tmp = self.new_tmp();
                let tmp_name = value::var_name(&tmp);
                let ctx = CallCtx::bare();
                match self.emit_call(call, &ctx, ind, Some(tmp_name.as_str())) {
                    Some(result) => result,
                    None => Operand::Tmp(tmp),
                }
            }
            Expr::Unary(unary) if unary.op == UnOp::Neg => {
                // Negated literals already have a direct value form.
                if matches!(unary.right, Expr::Number(_)) {
                    return Operand::Ref(node);
                }
                let val = self.scaffold(&unary.right, ind).val();
                let tmp = self.new_tmp();
                let tmp_name = value::var_name(&tmp);
                self.add(format!("{ind}VAR_SET {tmp_name} \"0\""));
                self.add(format!("{ind}VAR_DEC {tmp_name} {val}"));
                Operand::Tmp(tmp)
            }
            other => Operand::Ref(other),
        }
    }
}

/// Decompose a property or index node into (member name, container, index).
/// The member name is empty for non-string indexing.
fn member_parts(node: &Expr) -> Option<(String, &Expr, Option<&Expr>)> {
    match node {
        Expr::Prop(prop) => Some((prop.prop.clone(), &prop.obj, None)),
        Expr::Index(index) => {
            let name = match &index.index {
                Expr::Str(s) => s.value.clone(),
                _ => String::new(),
            };
            Some((name, &index.table, Some(&index.index)))
        }
        _ => None,
    }
}

/// An uppercase initial (or the `Text`/`Parent` members) marks an element
/// property rather than a table entry.
fn is_property_name(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase) || name == "Text" || name == "Parent"
}

fn obj_arg(arg: Option<&Expr>) -> String {
    arg.map(format_obj).unwrap_or_else(|| "EMPTY".to_string())
}

/// The `EVENT` header line for an event declaration.
fn event_header(event: &Event) -> String {
    let name = event.event_type.as_str();
    let obj = |n: &str| n.split('.').next().unwrap_or(n).to_string();

    let (ev_type, args_out) = match name {
        "OnWebsiteLoaded" => ("LOADED", String::new()),
        "OnMessageReceived" => ("MSG_RECEIVED", String::new()),
        "OnCrossSiteMessageReceived" => ("CROSSSITE_MSG", String::new()),
        _ if name.ends_with(".MouseButton1Click") => ("PRESSED", format!("({})", obj(name))),
        _ if name.ends_with(".MouseEnter") => ("MOUSE_ENTER", format!("({})", obj(name))),
        _ if name.ends_with(".MouseLeave") => ("MOUSE_LEAVE", format!("({})", obj(name))),
        _ if name.ends_with(".FocusLost") => ("INPUT_SUBMIT", format!("({})", obj(name))),
        _ if name.ends_with(".InputBegan") => (
            "KEY_PRESSED",
            format!("\"{}\"", event.args.first().map(String::as_str).unwrap_or("Unknown")),
        ),
        _ if name.ends_with(".OnDonationPurchase") => ("DONATION", format!("({})", obj(name))),
        _ if name.ends_with(".MouseButton2Click") => ("RIGHT_CLICKED", format!("({})", obj(name))),
        _ if name.ends_with(".MouseButton1Down") => ("MOUSE_DOWN", format!("({})", obj(name))),
        _ if name.ends_with(".MouseButton1Up") => ("MOUSE_UP", format!("({})", obj(name))),
        _ => ("CHANGED", format!("({})", obj(name))),
    };

    if args_out.is_empty() {
        format!("EVENT {ev_type}")
    } else {
        format!("EVENT {ev_type} {args_out}")
    }
}

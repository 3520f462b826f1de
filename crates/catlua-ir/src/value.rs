//! CWIR operand formatting.
//!
//! Three positions exist in a CWIR action line, each with its own rendering:
//!
//! - *value*: a quoted literal or a `"{prefix!name}"` variable read
//! - *variable name*: a quoted `"prefix!name"` (a write slot)
//! - *object*: `(Name)` for static elements (uppercase initial), the value
//!   form for runtime object variables
//!
//! Scope prefixes are kept for all three scopes, so `"{g!score}"` and
//! `"l!__tmp1"` both round-trip through the schema emitter unchanged.

use catlua_parser::ast::{Expr, UnOp, VarRef};

/// A lowered operand: either a borrowed AST node or a freshly minted
/// scaffolding temporary.
pub(crate) enum Operand<'e> {
    Ref(&'e Expr),
    Tmp(VarRef),
}

impl Operand<'_> {
    pub(crate) fn val(&self) -> String {
        match self {
            Operand::Ref(expr) => format_val(expr),
            Operand::Tmp(var) => var_value(var),
        }
    }

    pub(crate) fn var_name(&self) -> String {
        match self {
            Operand::Ref(expr) => format_var_name(expr),
            Operand::Tmp(var) => var_name(var),
        }
    }

    pub(crate) fn obj(&self) -> String {
        match self {
            Operand::Ref(expr) => format_obj(expr),
            Operand::Tmp(var) => var_value(var),
        }
    }
}

fn prefix_str(var: &VarRef) -> &'static str {
    var.prefix.map(|p| p.as_str()).unwrap_or("")
}

/// `"{prefix!name}"`, or `EMPTY` for `nil`.
pub(crate) fn var_value(var: &VarRef) -> String {
    if var.is_nil() {
        return "EMPTY".to_string();
    }
    format!("\"{{{}{}}}\"", prefix_str(var), var.name)
}

/// `"prefix!name"` -- the write-slot form.
pub(crate) fn var_name(var: &VarRef) -> String {
    format!("\"{}{}\"", prefix_str(var), var.name)
}

/// Render an expression in value position. Anything without a direct value
/// form (tables, calls, unresolved unaries) renders as `EMPTY`.
pub(crate) fn format_val(expr: &Expr) -> String {
    match expr {
        Expr::Number(n) => format!("\"{}\"", n.text),
        Expr::Str(s) => format!("\"{}\"", s.value),
        Expr::InterpStr(s) => format!("\"{}\"", s.value),
        Expr::Unary(unary) if unary.op == UnOp::Neg => match &unary.right {
            Expr::Number(n) => format!("\"-{}\"", n.text),
            _ => "EMPTY".to_string(),
        },
        Expr::Var(var) => var_value(var),
        Expr::Prop(prop) => {
            let obj_name = prop.obj.as_var().map(|v| v.name.as_str()).unwrap_or("obj");
            format!("\"{{{}.{}}}\"", obj_name, prop.prop)
        }
        _ => "EMPTY".to_string(),
    }
}

pub(crate) fn format_val_opt(expr: Option<&Expr>) -> String {
    expr.map(format_val).unwrap_or_else(|| "EMPTY".to_string())
}

/// Render an expression in variable-name (write) position.
pub(crate) fn format_var_name(expr: &Expr) -> String {
    match expr {
        Expr::Var(var) => var_name(var),
        _ => "\"temp\"".to_string(),
    }
}

/// Render an expression in object position. An uppercase initial marks a
/// static UI element; everything else is a runtime object variable.
pub(crate) fn format_obj(expr: &Expr) -> String {
    match expr {
        Expr::Var(var) => {
            if var.name.chars().next().is_some_and(char::is_uppercase) {
                format!("({})", var.name)
            } else {
                var_value(var)
            }
        }
        _ => format_val(expr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catlua_parser::ast::{NumberLit, Prefix, StringLit};

    #[test]
    fn value_forms() {
        let local = VarRef::new(1, "x", Some(Prefix::Local));
        assert_eq!(var_value(&local), "\"{l!x}\"");
        assert_eq!(var_name(&local), "\"l!x\"");

        let global = VarRef::new(1, "score", Some(Prefix::Global));
        assert_eq!(var_value(&global), "\"{g!score}\"");

        let nil = VarRef::new(1, "nil", None);
        assert_eq!(var_value(&nil), "EMPTY");
    }

    #[test]
    fn object_form_splits_on_case() {
        let element = Expr::Var(VarRef::new(1, "Frame", None));
        assert_eq!(format_obj(&element), "(Frame)");

        let runtime = Expr::Var(VarRef::new(1, "clone", Some(Prefix::Object)));
        assert_eq!(format_obj(&runtime), "\"{o!clone}\"");
    }

    #[test]
    fn literals_quote_their_text() {
        assert_eq!(format_val(&Expr::Number(NumberLit::new(1, "7"))), "\"7\"");
        assert_eq!(
            format_val(&Expr::Str(StringLit { line: 1, value: "hi".into() })),
            "\"hi\""
        );
    }
}

//! Call lowering: builtins, library functions, and user functions.
//!
//! Resolution order: user functions (unless `builtin` forces otherwise),
//! the simple-calls table, then the library-specific lowerings. A call that
//! matches nothing emits no opcode.

use catlua_parser::ast::{Annotations, Call, CallStmt, Expr};

use crate::value::{format_var_name, Operand};
use crate::Emitter;

/// Statement-position context for a call. Expression-position calls use
/// [`CallCtx::bare`].
pub(crate) struct CallCtx<'e> {
    pub(crate) targets: &'e [Expr],
    pub(crate) is_bg: bool,
    pub(crate) is_protected: bool,
    pub(crate) annotations: Annotations,
}

impl<'e> CallCtx<'e> {
    pub(crate) fn from_stmt(stmt: &'e CallStmt) -> Self {
        Self {
            targets: &stmt.targets,
            is_bg: stmt.is_bg,
            is_protected: stmt.is_protected,
            annotations: stmt.annotations,
        }
    }

    pub(crate) fn bare() -> Self {
        Self {
            targets: &[],
            is_bg: false,
            is_protected: false,
            annotations: Annotations::default(),
        }
    }
}

/// The builtin table: name -> (opcode, argument count, has output slot).
fn simple_call(name: &str) -> Option<(&'static str, usize, bool)> {
    Some(match name {
        "print" => ("LOG", 1, false),
        "warn" => ("WARN", 1, false),
        "error" => ("ERROR", 1, false),
        "wait" | "task.wait" => ("WAIT", 1, false),
        "string.len" => ("STR_LEN", 1, true),
        "string.lower" => ("STR_LOWER", 1, true),
        "string.upper" => ("STR_UPPER", 1, true),
        "string.split" => ("STR_SPLIT", 2, true),
        "table.concat" => ("TABLE_JOIN", 2, true),
        "makeVisible" => ("LOOK_SHOW", 1, false),
        "makeInvisible" => ("LOOK_HIDE", 1, false),
        "os.time" => ("TIME_GET_UNIX", 0, true),
        "tick" => ("TIME_GET_TICK", 0, true),
        "formatLocalTime" => ("TIME_FORMAT_NOW", 1, true),
        "formatUniversalTime" => ("TIME_FORMAT_UNIX", 2, true),
        "getTimezone" => ("TIME_GET_TIMEZONE", 0, true),
        "server.os.time" => ("TIME_GET_SERVER_UNIX", 0, true),
        "getUrl" => ("NAV_GET_URL", 0, true),
        "getQuery" => ("NAV_GET_QUERY", 1, true),
        "redirect" => ("NAV_REDIRECT", 1, false),
        "hexToRGB" => ("COLOR_HEX_TO_RGB", 1, true),
        "RGBToHex" => ("COLOR_RGB_TO_HEX", 1, true),
        "hexToHSV" => ("COLOR_HEX_TO_HSV", 1, true),
        "HSVToHex" => ("COLOR_HSV_TO_HEX", 1, true),
        "lerpColor" => ("COLOR_LERP", 3, true),
        "clone" => ("LOOK_DUPLICATE", 1, true),
        "destroy" => ("LOOK_DELETE", 1, false),
        "playAudio" => ("AUDIO_PLAY", 1, true),
        "playLoopedAudio" => ("AUDIO_PLAY_LOOP", 1, true),
        "stopAllAudio" => ("AUDIO_STOP_ALL", 0, false),
        "setImage" => ("LOOK_SET_IMG", 2, false),
        "setHeadshot" => ("LOOK_SET_AVATAR", 3, false),
        "getAssetInfo" => ("LOOK_GET_ASSET_INFO", 2, true),
        "getObjectsAtPosition" => ("LOOK_GET_AT_POS", 2, true),
        "findFirstAncestor" => ("HIER_FIND_ANCESTOR", 2, true),
        "findFirstDescendant" => ("HIER_FIND_DESCENDANT", 2, true),
        "getDescendants" => ("HIER_GET_DESCENDANTS", 1, true),
        "Stop" => ("AUDIO_STOP", 1, false),
        "Pause" => ("AUDIO_PAUSE", 1, false),
        "Resume" => ("AUDIO_RESUME", 1, false),
        "cookie.set" => ("COOKIE_SET", 2, false),
        "cookie.get" => ("COOKIE_GET", 1, true),
        "cookie.inc" => ("COOKIE_INC", 2, false),
        "cookie.del" => ("COOKIE_DEL", 1, false),
        _ => return None,
    })
}

/// Methods callable directly on an audio object (`track.Stop()`).
fn audio_method(prop: &str) -> Option<&'static str> {
    match prop {
        "Stop" => Some("AUDIO_STOP"),
        "Pause" => Some("AUDIO_PAUSE"),
        "Resume" => Some("AUDIO_RESUME"),
        _ => None,
    }
}

impl Emitter<'_> {
    /// Lower one call. `target_override` names an explicit output slot (a
    /// scaffolding temporary). A `Some` return hands the caller a different
    /// result operand (the in-place rounding path returns its argument).
    pub(crate) fn emit_call<'e>(
        &mut self,
        call: &'e Call,
        ctx: &CallCtx<'e>,
        ind: &str,
        target_override: Option<&str>,
    ) -> Option<Operand<'e>> {
        let func_name = match &call.func {
            Expr::Var(var) => var.name.clone(),
            Expr::Prop(prop) => {
                if let Some(opcode) = audio_method(&prop.prop) {
                    let obj_ref = match prop.obj.as_var() {
                        Some(_) => format_var_name(&prop.obj),
                        None => "EMPTY".to_string(),
                    };
                    self.add(format!("{ind}{opcode} {obj_ref}"));
                    return None;
                }
                // Multi-output input queries write both targets at once.
                if prop.prop == "GetMouseLocation" {
                    let (x, y) = pair_targets(ctx.targets);
                    self.add(format!("{ind}INPUT_GET_CURSOR {x} {y}"));
                    return None;
                }
                if prop.prop == "GetMousePosition"
                    && prop.obj.as_var().is_some_and(|v| v.name == "UserInputService")
                {
                    let (x, y) = pair_targets(ctx.targets);
                    self.add(format!("{ind}INPUT_GET_VIEWPORT {x} {y}"));
                    return None;
                }
                let obj_name = prop.obj.as_var().map(|v| v.name.as_str()).unwrap_or("obj");
                format!("{}.{}", obj_name, prop.prop)
            }
            _ => String::new(),
        };

        // Complex arguments are scaffolded into temporaries first.
        let args: Vec<Operand<'e>> = call
            .args
            .iter()
            .map(|arg| match arg {
                Expr::Binary(_) | Expr::Unary(_) => self.scaffold(arg, ind),
                other => Operand::Ref(other),
            })
            .collect();

        let out_var = match target_override {
            Some(name) => name.to_string(),
            None => ctx
                .targets
                .first()
                .map(format_var_name)
                .unwrap_or_else(|| "EMPTY".to_string()),
        };

        // User functions win unless the `builtin` annotation overrides.
        let is_user = ctx.annotations.force_custom || self.analysis.is_user_func(&func_name);
        if is_user && !ctx.annotations.force_builtin {
            let args_fmt: Vec<String> = args.iter().map(Operand::val).collect();
            let args_arr = format!("[{}]", args_fmt.join(" "));

            if ctx.is_protected {
                let success = ctx
                    .targets
                    .first()
                    .map(format_var_name)
                    .unwrap_or_else(|| "EMPTY".to_string());
                let result = ctx
                    .targets
                    .get(1)
                    .map(format_var_name)
                    .unwrap_or_else(|| "EMPTY".to_string());
                self.add(format!(
                    "{ind}FUNC_RUN_PROTECTED \"{func_name}\" {args_arr} {success} {result}"
                ));
            } else if ctx.is_bg {
                self.add(format!("{ind}FUNC_RUN_BG \"{func_name}\" {args_arr}"));
            } else {
                self.add(format!("{ind}FUNC_RUN \"{func_name}\" {args_arr} {out_var}"));
            }
            return None;
        }

        if let Some((opcode, expected_args, yields_output)) = simple_call(&func_name) {
            let mut parts = Vec::with_capacity(expected_args + 1);
            for i in 0..expected_args {
                let part = match args.get(i) {
                    Some(arg) => {
                        if opcode == "TABLE_JOIN" && i == 0 {
                            arg.var_name()
                        } else if opcode.contains("LOOK_") {
                            arg.obj()
                        } else {
                            arg.val()
                        }
                    }
                    None => match opcode {
                        "WAIT" => "\"0\"".to_string(),
                        "TABLE_JOIN" => "\"\"".to_string(),
                        _ => "EMPTY".to_string(),
                    },
                };
                parts.push(part);
            }
            if yields_output {
                parts.push(out_var);
            }
            self.add(format!("{ind}{opcode} {}", parts.join(" ")));
            return None;
        }

        if let Some(math_func) = func_name.strip_prefix("math.") {
            return self.emit_math_call(math_func, &args, &out_var, ind);
        }

        match func_name.as_str() {
            "string.sub" => {
                let value = arg_var_name(&args, 0);
                let start = arg_val(&args, 1);
                let end = arg_val(&args, 2);
                self.add(format!("{ind}STR_SUB {value} {start} {end}"));
                return None;
            }
            "string.gsub" => {
                let value = arg_var_name(&args, 0);
                let find = arg_val(&args, 1);
                let replacement = arg_val(&args, 2);
                self.add(format!("{ind}STR_REPLACE {find} {value} {replacement}"));
                return None;
            }
            "page.broadcast" => {
                self.add(format!("{ind}NET_BROADCAST_PAGE {}", arg_val(&args, 0)));
                return None;
            }
            "site.broadcast" => {
                self.add(format!("{ind}NET_BROADCAST_SITE {}", arg_val(&args, 0)));
                return None;
            }
            "crossSite.broadcast" => {
                let message = arg_val(&args, 0);
                let target = arg_val(&args, 1);
                self.add(format!("{ind}NET_BROADCAST_CROSSSITE {message} {target}"));
                return None;
            }
            "getChildren" => {
                let obj = arg_obj(&args, 0);
                self.add(format!("{ind}HIER_GET_CHILDREN {obj} {out_var}"));
                return None;
            }
            "findFirstChild" => {
                let obj = arg_obj(&args, 0);
                let child_name = arg_val(&args, 1);
                self.add(format!("{ind}HIER_FIND_CHILD {child_name} {obj} {out_var}"));
                return None;
            }
            "tween" => {
                let obj = arg_obj(&args, 0);
                let prop = arg_val(&args, 1);
                let value = arg_val(&args, 2);
                let time = arg_val(&args, 3);
                let style = arg_val(&args, 4);
                let direction = arg_val(&args, 5);
                self.add(format!("{ind}LOOK_TWEEN {prop} {obj} {value} {time} {style} {direction}"));
                return None;
            }
            _ => {}
        }

        // Table mutation through a dotted member: `list.insert(v, pos)`.
        if let Expr::Prop(prop) = &call.func {
            match prop.prop.as_str() {
                "insert" => {
                    let arr = member_table_name(&prop.obj);
                    let value = arg_val(&args, 0);
                    let pos = arg_val(&args, 1);
                    self.add(format!("{ind}TABLE_INSERT {value} {pos} {arr}"));
                    return None;
                }
                "remove" => {
                    let arr = member_table_name(&prop.obj);
                    let pos = arg_val(&args, 0);
                    self.add(format!("{ind}TABLE_REMOVE {pos} {arr}"));
                    return None;
                }
                _ => {}
            }
        }

        None
    }

    /// `math.*` lowering: `random` has its own opcode, round/floor/ceil
    /// mutate a variable in place, anything else goes through `MATH_RUN`.
    fn emit_math_call<'e>(
        &mut self,
        math_func: &str,
        args: &[Operand<'e>],
        out_var: &str,
        ind: &str,
    ) -> Option<Operand<'e>> {
        match math_func {
            "random" => {
                let min = args.first().map(Operand::val).unwrap_or_else(|| "\"0\"".to_string());
                let max = args.get(1).map(Operand::val).unwrap_or_else(|| "\"1\"".to_string());
                self.add(format!("{ind}VAR_RANDOM {out_var} {min} {max}"));
                None
            }
            "round" | "floor" | "ceil" => {
                let opcode = match math_func {
                    "round" => "VAR_ROUND",
                    "floor" => "VAR_FLOOR",
                    _ => "VAR_CEIL",
                };
                let Some(arg) = args.first() else { return None };

                if out_var != "EMPTY" {
                    self.add(format!("{ind}VAR_SET {out_var} {}", arg.val()));
                    self.add(format!("{ind}{opcode} {out_var}"));
                    None
                } else {
                    // No output slot: round the argument's own variable,
                    // scaffolding non-variable arguments into one first.
                    let operand = match *arg {
                        Operand::Ref(expr) if !matches!(expr, Expr::Var(_)) => {
                            self.scaffold(expr, ind)
                        }
                        Operand::Ref(expr) => Operand::Ref(expr),
                        Operand::Tmp(ref var) => Operand::Tmp(var.clone()),
                    };
                    self.add(format!("{ind}{opcode} {}", operand.var_name()));
                    Some(operand)
                }
            }
            _ => {
                let args_fmt: Vec<String> = args.iter().map(Operand::val).collect();
                let args_arr = format!("[{}]", args_fmt.join(" "));
                self.add(format!("{ind}MATH_RUN \"{math_func}\" {args_arr} {out_var}"));
                None
            }
        }
    }
}

fn arg_val(args: &[Operand<'_>], index: usize) -> String {
    args.get(index).map(Operand::val).unwrap_or_else(|| "EMPTY".to_string())
}

fn arg_var_name(args: &[Operand<'_>], index: usize) -> String {
    args.get(index).map(Operand::var_name).unwrap_or_else(|| "EMPTY".to_string())
}

fn arg_obj(args: &[Operand<'_>], index: usize) -> String {
    args.get(index).map(Operand::obj).unwrap_or_else(|| "EMPTY".to_string())
}

/// The two output slots of a cursor/viewport query.
pub(crate) fn pair_targets(targets: &[Expr]) -> (String, String) {
    let x = targets
        .first()
        .map(format_var_name)
        .unwrap_or_else(|| "EMPTY".to_string());
    let y = targets
        .get(1)
        .map(format_var_name)
        .unwrap_or_else(|| "EMPTY".to_string());
    (x, y)
}

/// The quoted table name for `.insert`/`.remove` receivers.
fn member_table_name(obj: &Expr) -> String {
    match obj.as_var() {
        Some(var) => format!("\"{}{}\"", var.prefix.map(|p| p.as_str()).unwrap_or(""), var.name),
        None => format_var_name(obj),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_call_table_lookups() {
        assert_eq!(simple_call("print"), Some(("LOG", 1, false)));
        assert_eq!(simple_call("task.wait"), Some(("WAIT", 1, false)));
        assert_eq!(simple_call("string.split"), Some(("STR_SPLIT", 2, true)));
        assert_eq!(simple_call("unknown"), None);
    }

    #[test]
    fn audio_methods_cover_transport_controls() {
        assert_eq!(audio_method("Stop"), Some("AUDIO_STOP"));
        assert_eq!(audio_method("Play"), None);
    }
}

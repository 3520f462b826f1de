// catlua-emit -- parses the CWIR stream and materializes the runtime's JSON
// script document.
//
// The CWIR line grammar is tiny: an opcode word followed by quoted strings,
// `(Object)` references, `[tuple]` groups, and bare words. SCRIPT and EVENT
// blocks frame the document, control-flow opcodes must nest correctly, and
// every emitted object gets a fresh 2-character global ID.

mod idgen;
mod schema;

use std::fmt;

use rustc_hash::FxHashSet;
use serde::Serialize;
use serde_json::{json, Map, Value};

use idgen::GlobalIdGen;
use schema::{Schema, TextSlot};

/// The CWIR revision this emitter understands.
pub const CWIR_VERSION: &str = "1.0";

/// A fatal emission error, optionally located at a CWIR line.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitError {
    pub message: String,
    pub line: Option<u32>,
}

impl EmitError {
    fn new(message: impl Into<String>, line: Option<u32>) -> Self {
        Self { message: message.into(), line }
    }

    /// Attach a line number if the error does not already carry one.
    fn at(mut self, lineno: u32) -> Self {
        if self.line.is_none() {
            self.line = Some(lineno);
        }
        self
    }
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for EmitError {}

// ── Line tokenizer ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum LineToken {
    Str(String),
    Object(String),
    Tuple(Vec<LineToken>),
    Word(String),
}

impl LineToken {
    fn kind(&self) -> &'static str {
        match self {
            LineToken::Str(_) => "STRING",
            LineToken::Object(_) => "OBJECT",
            LineToken::Tuple(_) => "TUPLE",
            LineToken::Word(_) => "WORD",
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            LineToken::Str(s) | LineToken::Object(s) | LineToken::Word(s) => Some(s),
            LineToken::Tuple(_) => None,
        }
    }
}

fn tokenize_line(line: &str, lineno: Option<u32>) -> Result<Vec<LineToken>, EmitError> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b' ' => i += 1,
            b'"' => {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j] != b'"' {
                    if bytes[j] == b'\\' {
                        j += 1;
                    }
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(EmitError::new(format!("unterminated string: {line}"), lineno));
                }
                tokens.push(LineToken::Str(line[i + 1..j].to_string()));
                i = j + 1;
            }
            b'(' => {
                let Some(close) = line[i..].find(')') else {
                    return Err(EmitError::new(format!("unterminated object: {line}"), lineno));
                };
                let j = i + close;
                tokens.push(LineToken::Object(line[i + 1..j].to_string()));
                i = j + 1;
            }
            b'[' => {
                let Some(close) = line[i..].find(']') else {
                    return Err(EmitError::new(format!("unterminated tuple: {line}"), lineno));
                };
                let j = i + close;
                let inner = line[i + 1..j].trim();
                let sub = if inner.is_empty() {
                    Vec::new()
                } else {
                    tokenize_line(inner, lineno)?
                };
                tokens.push(LineToken::Tuple(sub));
                i = j + 1;
            }
            _ => {
                let mut j = i;
                while j < bytes.len() && !matches!(bytes[j], b' ' | b'"' | b'(' | b'[') {
                    j += 1;
                }
                tokens.push(LineToken::Word(line[i..j].to_string()));
                i = j;
            }
        }
    }

    Ok(tokens)
}

/// Split a raw line into opcode and arguments. Blank lines and `;;` comments
/// yield `None`.
fn parse_line(raw: &str, lineno: u32) -> Result<Option<(String, Vec<LineToken>)>, EmitError> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with(";;") {
        return Ok(None);
    }
    let mut tokens = tokenize_line(line, Some(lineno))?;
    if tokens.is_empty() {
        return Ok(None);
    }
    let first = tokens.remove(0);
    match first {
        LineToken::Word(opcode) => Ok(Some((opcode, tokens))),
        other => Err(EmitError::new(
            format!("expected opcode, got {:?}", other.text().unwrap_or("")),
            Some(lineno),
        )),
    }
}

/// The value an argument carries, or `None` for the literal word `EMPTY`.
fn resolve_value(token: &LineToken) -> Result<Option<String>, EmitError> {
    match token {
        LineToken::Word(w) if w == "EMPTY" => Ok(None),
        LineToken::Str(s) | LineToken::Object(s) | LineToken::Word(s) => Ok(Some(s.clone())),
        LineToken::Tuple(_) => Err(EmitError::new(
            "unexpected tuple argument in scalar slot",
            None,
        )),
    }
}

// ── Block nesting ──────────────────────────────────────────────────────

const IF_OPENERS: &[&str] = &[
    "IF_EQ", "IF_NEQ", "IF_GT", "IF_GTE", "IF_LT", "IF_LTE",
    "IF_CONTAINS", "IF_NOT_CONTAINS", "IF_EXISTS", "IF_NOT_EXISTS",
    "IF_AND", "IF_OR", "IF_NOR", "IF_XOR",
    "IF_DARK_THEME", "IF_MOUSE_LEFT", "IF_MOUSE_MIDDLE", "IF_MOUSE_RIGHT",
    "IF_KEY_DOWN", "IF_IS_ANCESTOR", "IF_IS_CHILD", "IF_IS_DESCENDANT",
];

const BLOCK_CLOSERS: &[&str] = &["END_IF", "END_REPEAT", "END_ITER"];

fn is_block_opener(opcode: &str) -> bool {
    IF_OPENERS.contains(&opcode)
        || matches!(opcode, "REPEAT" | "REPEAT_FOREVER" | "TABLE_ITER")
}

/// The openers each closer is allowed to match.
fn allowed_openers(closer: &str) -> &'static [&'static str] {
    match closer {
        "END_IF" => IF_OPENERS,
        "END_REPEAT" => &["REPEAT", "REPEAT_FOREVER"],
        "END_ITER" => &["TABLE_ITER"],
        _ => &[],
    }
}

// ── Output document ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OutSlot {
    Literal(String),
    Param(Map<String, Value>),
}

#[derive(Debug, Serialize)]
struct ActionOut {
    id: String,
    text: Vec<OutSlot>,
    globalid: String,
}

#[derive(Debug, Serialize)]
struct EventOut {
    id: String,
    text: Vec<OutSlot>,
    x: String,
    y: String,
    width: String,
    globalid: String,
    actions: Vec<ActionOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    variable_overrides: Option<Vec<Value>>,
}

#[derive(Debug, Serialize)]
struct ScriptOut {
    class: String,
    globalid: String,
    content: Vec<EventOut>,
    enabled: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
}

fn fixed_action(id: &str, label: &str, gid: String) -> ActionOut {
    ActionOut {
        id: id.to_string(),
        text: vec![OutSlot::Literal(label.to_string())],
        globalid: gid,
    }
}

/// Fill one schema entry's slots from a tokenized argument list.
fn build_action(
    opcode: &str,
    args: &[LineToken],
    gid: String,
    lineno: u32,
    schema: &Schema,
) -> Result<ActionOut, EmitError> {
    if BLOCK_CLOSERS.contains(&opcode) {
        return Ok(fixed_action("25", "end", gid));
    }
    if opcode == "ELSE" {
        return Ok(fixed_action("112", "else", gid));
    }
    if opcode == "BREAK" {
        return Ok(fixed_action("24", "Break", gid));
    }

    let Some(entry) = schema.actions.get(opcode) else {
        return Err(EmitError::new(format!("unknown opcode '{opcode}'"), Some(lineno)));
    };

    let mut text_out = Vec::with_capacity(entry.text.len());
    let mut arg_idx = 0;

    for slot in &entry.text {
        let TextSlot::Param(map) = slot else {
            if let TextSlot::Literal(s) = slot {
                text_out.push(OutSlot::Literal(s.clone()));
            }
            continue;
        };

        let mut param = map.clone();
        if slot.is_tuple() {
            let Some(arg) = args.get(arg_idx) else {
                return Err(EmitError::new(format!("{opcode}: missing tuple arg"), Some(lineno)));
            };
            arg_idx += 1;
            let LineToken::Tuple(items) = arg else {
                return Err(EmitError::new(
                    format!("{opcode}: expected tuple [...], got {}", arg.kind()),
                    Some(lineno),
                ));
            };
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                let value = resolve_value(item).map_err(|e| e.at(lineno))?;
                values.push(match value {
                    Some(v) => json!({"t": "string", "l": "any", "value": v}),
                    None => json!({"t": "string", "l": "any"}),
                });
            }
            param.insert("value".to_string(), Value::Array(values));
        } else {
            let Some(arg) = args.get(arg_idx) else {
                return Err(EmitError::new(
                    format!("{opcode}: not enough args (slot {arg_idx})"),
                    Some(lineno),
                ));
            };
            arg_idx += 1;
            if let Some(value) = resolve_value(arg).map_err(|e| e.at(lineno))? {
                param.insert("value".to_string(), Value::String(value));
            }
        }
        text_out.push(OutSlot::Param(param));
    }

    if arg_idx < args.len() {
        return Err(EmitError::new(format!("{opcode}: too many args"), Some(lineno)));
    }

    Ok(ActionOut { id: entry.id.clone(), text: text_out, globalid: gid })
}

fn build_event(
    event_type: &str,
    event_args: &[LineToken],
    actions: Vec<ActionOut>,
    gid: String,
    x: i64,
    y: i64,
    lineno: u32,
    schema: &Schema,
) -> Result<EventOut, EmitError> {
    let Some(entry) = schema.events.get(event_type) else {
        return Err(EmitError::new(
            format!("unknown event type '{event_type}'"),
            Some(lineno),
        ));
    };

    let mut text_out = Vec::with_capacity(entry.text.len());
    let mut arg_idx = 0;

    for slot in &entry.text {
        match slot {
            TextSlot::Literal(s) => text_out.push(OutSlot::Literal(s.clone())),
            TextSlot::Param(map) => {
                let mut param = map.clone();
                if let Some(arg) = event_args.get(arg_idx) {
                    arg_idx += 1;
                    if let Some(value) = resolve_value(arg).map_err(|e| e.at(lineno))? {
                        param.insert("value".to_string(), Value::String(value));
                    }
                }
                text_out.push(OutSlot::Param(param));
            }
        }
    }

    // Function definitions carry their parameter defaults as an extra tuple.
    let variable_overrides = if event_type == "FUNC_DEF" {
        let mut overrides = Vec::new();
        if let Some(LineToken::Tuple(items)) = event_args.get(arg_idx) {
            for item in items {
                let value = resolve_value(item).map_err(|e| e.at(lineno))?;
                overrides.push(json!({"value": value.unwrap_or_default()}));
            }
        }
        Some(overrides)
    } else {
        None
    };

    Ok(EventOut {
        id: entry.id.clone(),
        text: text_out,
        x: x.to_string(),
        y: y.to_string(),
        width: "350".to_string(),
        globalid: gid,
        actions,
        variable_overrides,
    })
}

/// Compare the document's declared version against [`CWIR_VERSION`]: a major
/// bump is fatal, a minor bump warns.
fn check_version(file_version: &str) -> Result<(), EmitError> {
    let parse = |v: &str| -> Option<(u32, u32)> {
        let (major, minor) = v.split_once('.')?;
        Some((major.parse().ok()?, minor.parse().ok()?))
    };

    let Some((file_major, file_minor)) = parse(file_version) else {
        eprintln!("warning: could not parse version '{file_version}', proceeding anyway");
        return Ok(());
    };
    let Some((own_major, own_minor)) = parse(CWIR_VERSION) else {
        return Ok(());
    };

    if file_major > own_major {
        return Err(EmitError::new(
            format!(
                "version mismatch: file is CWIR {file_version}, emitter supports {CWIR_VERSION} - major bump, aborting"
            ),
            None,
        ));
    }
    if file_major == own_major && file_minor > own_minor {
        eprintln!(
            "warning: file is CWIR {file_version}, emitter is {CWIR_VERSION} - some opcodes may not be recognized"
        );
    }
    Ok(())
}

// ── Emission ───────────────────────────────────────────────────────────

/// Emit the JSON document for a CWIR stream.
pub fn emit(source: &str) -> Result<String, EmitError> {
    emit_with(source, GlobalIdGen::new())
}

/// Deterministic variant for tests: global IDs come from a seeded generator.
pub fn emit_seeded(source: &str, seed: u64) -> Result<String, EmitError> {
    emit_with(source, GlobalIdGen::with_seed(seed))
}

struct CurrentEvent {
    event_type: String,
    args: Vec<LineToken>,
    lineno: u32,
    gid: String,
}

fn emit_with(source: &str, mut ids: GlobalIdGen) -> Result<String, EmitError> {
    let schema = Schema::load()
        .map_err(|e| EmitError::new(format!("invalid opcode schema: {e}"), None))?;

    let mut lines = source.lines();
    let Some(first) = lines.next() else {
        return Err(EmitError::new("empty source", None));
    };
    let first = first.trim();
    if !first.starts_with("CWIR_VERSION") {
        return Err(EmitError::new(
            "missing CWIR_VERSION declaration on first line",
            Some(1),
        ));
    }
    let version_tokens = tokenize_line(first, Some(1))?;
    if let Some(version) = version_tokens.get(1).and_then(LineToken::text) {
        check_version(version)?;
    }

    let mut scripts: Vec<ScriptOut> = Vec::new();
    let mut flags: FxHashSet<String> = FxHashSet::default();
    let mut current_alias: Option<String> = None;
    let mut current_events: Vec<EventOut> = Vec::new();
    let mut in_script = false;
    let mut current_event: Option<CurrentEvent> = None;
    let mut current_actions: Vec<ActionOut> = Vec::new();
    let mut block_stack: Vec<String> = Vec::new();
    let mut x_cursor: i64 = 5000;
    let y_cursor: i64 = 5000;

    for (offset, raw) in lines.enumerate() {
        let lineno = offset as u32 + 2;
        let Some((opcode, args)) = parse_line(raw, lineno)? else {
            continue;
        };

        match opcode.as_str() {
            "CWIR_VERSION" => {
                return Err(EmitError::new(
                    "CWIR_VERSION must only appear on line 1",
                    Some(lineno),
                ));
            }
            "FLAG" => {
                let Some(name) = args.first().and_then(LineToken::text) else {
                    return Err(EmitError::new("FLAG requires a name", Some(lineno)));
                };
                if name == "SINGLE_SCRIPT" && in_script {
                    return Err(EmitError::new(
                        "FLAG SINGLE_SCRIPT cannot be used inside a SCRIPT block",
                        Some(lineno),
                    ));
                }
                flags.insert(name.to_string());
            }
            "SCRIPT" => {
                if flags.contains("SINGLE_SCRIPT") {
                    return Err(EmitError::new(
                        "SCRIPT block not allowed when FLAG SINGLE_SCRIPT is set",
                        Some(lineno),
                    ));
                }
                if in_script {
                    return Err(EmitError::new(
                        "nested SCRIPT blocks are not allowed",
                        Some(lineno),
                    ));
                }
                if current_event.is_some() {
                    return Err(EmitError::new(
                        "SCRIPT declared inside an EVENT block",
                        Some(lineno),
                    ));
                }
                in_script = true;
                x_cursor = 5000;
            }
            "END_SCRIPT" => {
                if !in_script {
                    return Err(EmitError::new("END_SCRIPT without SCRIPT", Some(lineno)));
                }
                if current_event.is_some() {
                    return Err(EmitError::new(
                        "END_SCRIPT inside an unclosed EVENT block",
                        Some(lineno),
                    ));
                }
                scripts.push(ScriptOut {
                    class: "script".to_string(),
                    globalid: ids.next_id(),
                    content: std::mem::take(&mut current_events),
                    enabled: "true".to_string(),
                    alias: current_alias.take(),
                });
                x_cursor = 5000;
                in_script = false;
            }
            "SCRIPT_ALIAS" => {
                let Some(arg) = args.first() else {
                    return Err(EmitError::new(
                        "SCRIPT_ALIAS requires a string argument",
                        Some(lineno),
                    ));
                };
                current_alias = resolve_value(arg).map_err(|e| e.at(lineno))?;
            }
            "EVENT" => {
                if current_event.is_some() {
                    return Err(EmitError::new("EVENT inside EVENT", Some(lineno)));
                }
                let Some(event_type) = args.first().and_then(LineToken::text) else {
                    return Err(EmitError::new("EVENT requires a type", Some(lineno)));
                };
                current_event = Some(CurrentEvent {
                    event_type: event_type.to_string(),
                    args: args[1..].to_vec(),
                    lineno,
                    gid: ids.next_id(),
                });
            }
            "END_EVENT" => {
                let Some(event) = current_event.take() else {
                    return Err(EmitError::new("END_EVENT without EVENT", Some(lineno)));
                };
                if let Some(open) = block_stack.last() {
                    return Err(EmitError::new(
                        format!("unclosed block '{open}' at end of event"),
                        Some(event.lineno),
                    ));
                }
                let built = build_event(
                    &event.event_type,
                    &event.args,
                    std::mem::take(&mut current_actions),
                    event.gid,
                    x_cursor,
                    y_cursor,
                    event.lineno,
                    &schema,
                )?;
                current_events.push(built);
                x_cursor += 400;
            }
            _ => {
                if current_event.is_none() {
                    return Err(EmitError::new(
                        format!("opcode '{opcode}' outside of EVENT block"),
                        Some(lineno),
                    ));
                }

                if is_block_opener(&opcode) {
                    block_stack.push(opcode.clone());
                }
                if BLOCK_CLOSERS.contains(&opcode.as_str()) {
                    let Some(opener) = block_stack.last() else {
                        return Err(EmitError::new(
                            format!("{opcode} with no open block"),
                            Some(lineno),
                        ));
                    };
                    let allowed = allowed_openers(&opcode);
                    if !allowed.contains(&opener.as_str()) {
                        return Err(EmitError::new(
                            format!(
                                "{opcode} closes '{opener}' but expected one of [{}]",
                                allowed.join(", ")
                            ),
                            Some(lineno),
                        ));
                    }
                    block_stack.pop();
                }
                if opcode == "ELSE" && block_stack.is_empty() {
                    return Err(EmitError::new("ELSE with no open block", Some(lineno)));
                }

                let gid = ids.next_id();
                current_actions.push(build_action(&opcode, &args, gid, lineno, &schema)?);
            }
        }
    }

    if current_event.is_some() {
        return Err(EmitError::new("unclosed EVENT block at end of file", None));
    }
    if in_script {
        return Err(EmitError::new("unclosed SCRIPT block at end of file", None));
    }

    // Events outside any SCRIPT block collect into one implicit script, and
    // an empty document still emits a single empty script.
    if !current_events.is_empty() || scripts.is_empty() {
        scripts.push(ScriptOut {
            class: "script".to_string(),
            globalid: ids.next_id(),
            content: current_events,
            enabled: "true".to_string(),
            alias: current_alias.take(),
        });
    }

    serde_json::to_string_pretty(&scripts)
        .map_err(|e| EmitError::new(format!("serialization failed: {e}"), None))
}

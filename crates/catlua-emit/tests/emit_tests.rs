//! Schema-emitter tests: block validation, ID uniqueness, canvas layout,
//! and the output document shape. All use the seeded generator so runs are
//! reproducible.

use catlua_emit::{emit_seeded, EmitError};
use serde_json::Value;

fn emit_ok(source: &str) -> Value {
    let json = emit_seeded(source, 7).expect("emission should succeed");
    serde_json::from_str(&json).expect("output is valid JSON")
}

fn emit_err(source: &str) -> EmitError {
    emit_seeded(source, 7).expect_err("emission should fail")
}

const SIMPLE: &str = "CWIR_VERSION 1.0\n\
    SCRIPT\n\
    EVENT LOADED\n\
    VAR_SET \"g!x\" \"1\"\n\
    LOG \"hello\"\n\
    END_EVENT\n\
    END_SCRIPT\n";

#[test]
fn simple_document_shape() {
    let doc = emit_ok(SIMPLE);
    let scripts = doc.as_array().unwrap();
    assert_eq!(scripts.len(), 1);

    let script = &scripts[0];
    assert_eq!(script["class"], "script");
    assert_eq!(script["enabled"], "true");
    assert_eq!(script["globalid"].as_str().unwrap().len(), 2);
    assert!(script.get("alias").is_none());

    let events = script["content"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event["x"], "5000");
    assert_eq!(event["y"], "5000");
    assert_eq!(event["width"], "350");
    assert_eq!(event["actions"].as_array().unwrap().len(), 2);
}

#[test]
fn action_slots_carry_values() {
    let doc = emit_ok(SIMPLE);
    let action = &doc[0]["content"][0]["actions"][0];
    // VAR_SET: "set" <variable> "to" <value>
    let text = action["text"].as_array().unwrap();
    assert_eq!(text[0], "set");
    assert_eq!(text[1]["value"], "g!x");
    assert_eq!(text[2], "to");
    assert_eq!(text[3]["value"], "1");
}

#[test]
fn empty_slot_omits_value() {
    let source = "CWIR_VERSION 1.0\nEVENT LOADED\nRETURN EMPTY\nEND_EVENT\n";
    let doc = emit_ok(source);
    let text = doc[0]["content"][0]["actions"][0]["text"].as_array().unwrap();
    assert!(text[1].get("value").is_none());
}

#[test]
fn events_advance_on_the_canvas_and_reset_per_script() {
    let source = "CWIR_VERSION 1.0\n\
        SCRIPT\nEVENT LOADED\nEND_EVENT\nEVENT LOADED\nEND_EVENT\nEND_SCRIPT\n\
        SCRIPT\nEVENT LOADED\nEND_EVENT\nEND_SCRIPT\n";
    let doc = emit_ok(source);
    let first = doc[0]["content"].as_array().unwrap();
    assert_eq!(first[0]["x"], "5000");
    assert_eq!(first[1]["x"], "5400");
    let second = doc[1]["content"].as_array().unwrap();
    assert_eq!(second[0]["x"], "5000");
}

#[test]
fn global_ids_are_unique_across_the_document() {
    let mut source = String::from("CWIR_VERSION 1.0\nSCRIPT\n");
    for _ in 0..40 {
        source.push_str("EVENT LOADED\nLOG \"a\"\nLOG \"b\"\nEND_EVENT\n");
    }
    source.push_str("END_SCRIPT\n");

    let doc = emit_ok(&source);
    let mut ids = Vec::new();
    collect_ids(&doc, &mut ids);
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total, "duplicate globalid in output");
    assert!(total > 100);
}

fn collect_ids(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_ids(v, out)),
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("globalid") {
                out.push(id.clone());
            }
            map.values().for_each(|v| collect_ids(v, out));
        }
        _ => {}
    }
}

#[test]
fn mismatched_closer_names_both_opcodes() {
    let source = "CWIR_VERSION 1.0\nEVENT LOADED\nREPEAT 3\nEND_IF\nEND_EVENT\n";
    let err = emit_err(source);
    assert!(err.message.contains("END_IF"), "message: {}", err.message);
    assert!(err.message.contains("REPEAT"), "message: {}", err.message);
}

#[test]
fn balanced_blocks_are_accepted() {
    let source = "CWIR_VERSION 1.0\nEVENT LOADED\n\
        REPEAT \"3\"\nIF_EQ \"{g!x}\" \"1\"\nLOG \"hi\"\nEND_IF\nEND_REPEAT\nEND_EVENT\n";
    let doc = emit_ok(source);
    // repeat + if + log + 2 closers
    assert_eq!(doc[0]["content"][0]["actions"].as_array().unwrap().len(), 5);
}

#[test]
fn unclosed_block_at_end_of_event_is_fatal() {
    let source = "CWIR_VERSION 1.0\nEVENT LOADED\nREPEAT \"3\"\nEND_EVENT\n";
    let err = emit_err(source);
    assert!(err.message.contains("unclosed block"), "message: {}", err.message);
}

#[test]
fn closer_with_no_open_block_is_fatal() {
    let err = emit_err("CWIR_VERSION 1.0\nEVENT LOADED\nEND_IF\nEND_EVENT\n");
    assert!(err.message.contains("no open block"));
}

#[test]
fn nested_script_is_fatal() {
    let err = emit_err("CWIR_VERSION 1.0\nSCRIPT\nSCRIPT\n");
    assert!(err.message.contains("nested SCRIPT"));
}

#[test]
fn opcode_outside_event_is_fatal() {
    let err = emit_err("CWIR_VERSION 1.0\nSCRIPT\nLOG \"x\"\n");
    assert!(err.message.contains("outside of EVENT block"));
}

#[test]
fn unknown_opcode_is_fatal() {
    let err = emit_err("CWIR_VERSION 1.0\nEVENT LOADED\nFROBNICATE \"x\"\nEND_EVENT\n");
    assert!(err.message.contains("unknown opcode 'FROBNICATE'"));
    assert_eq!(err.line, Some(3));
}

#[test]
fn argument_arity_is_checked() {
    let missing = emit_err("CWIR_VERSION 1.0\nEVENT LOADED\nVAR_SET \"g!x\"\nEND_EVENT\n");
    assert!(missing.message.contains("not enough args"));

    let excess = emit_err("CWIR_VERSION 1.0\nEVENT LOADED\nLOG \"a\" \"b\"\nEND_EVENT\n");
    assert!(excess.message.contains("too many args"));
}

#[test]
fn version_handshake() {
    let err = emit_err("CWIR_VERSION 2.0\nEVENT LOADED\nEND_EVENT\n");
    assert!(err.message.contains("version mismatch"));

    let err = emit_err("LOG \"x\"\n");
    assert!(err.message.contains("missing CWIR_VERSION"));

    let err = emit_err("CWIR_VERSION 1.0\nCWIR_VERSION 1.0\n");
    assert!(err.message.contains("only appear on line 1"));

    // A newer minor is accepted (with a warning on stderr).
    assert!(emit_seeded("CWIR_VERSION 1.5\nEVENT LOADED\nEND_EVENT\n", 7).is_ok());
}

#[test]
fn implicit_script_collects_loose_events() {
    let doc = emit_ok("CWIR_VERSION 1.0\nEVENT LOADED\nEND_EVENT\n");
    assert_eq!(doc.as_array().unwrap().len(), 1);
    assert_eq!(doc[0]["content"].as_array().unwrap().len(), 1);
}

#[test]
fn empty_document_emits_one_empty_script() {
    let doc = emit_ok("CWIR_VERSION 1.0\n");
    assert_eq!(doc.as_array().unwrap().len(), 1);
    assert!(doc[0]["content"].as_array().unwrap().is_empty());
}

#[test]
fn script_alias_lands_on_the_script() {
    let source = "CWIR_VERSION 1.0\nSCRIPT\nSCRIPT_ALIAS \"menu\"\nEVENT LOADED\nEND_EVENT\nEND_SCRIPT\n";
    let doc = emit_ok(source);
    assert_eq!(doc[0]["alias"], "menu");
}

#[test]
fn single_script_flag_forbids_script_blocks() {
    let err = emit_err("CWIR_VERSION 1.0\nFLAG SINGLE_SCRIPT\nSCRIPT\n");
    assert!(err.message.contains("SCRIPT block not allowed"));

    let err = emit_err("CWIR_VERSION 1.0\nSCRIPT\nFLAG SINGLE_SCRIPT\n");
    assert!(err.message.contains("cannot be used inside a SCRIPT block"));
}

#[test]
fn func_def_extracts_variable_overrides() {
    let source = "CWIR_VERSION 1.0\nEVENT FUNC_DEF \"greet\" [\"who\" \"how\"]\nEND_EVENT\n";
    let doc = emit_ok(source);
    let overrides = doc[0]["content"][0]["variable_overrides"].as_array().unwrap();
    assert_eq!(overrides.len(), 2);
    assert_eq!(overrides[0]["value"], "who");
    assert_eq!(overrides[1]["value"], "how");
}

#[test]
fn func_run_tuple_slot() {
    let source = "CWIR_VERSION 1.0\nEVENT LOADED\nFUNC_RUN \"greet\" [\"cat\" EMPTY] EMPTY\nEND_EVENT\n";
    let doc = emit_ok(source);
    let text = doc[0]["content"][0]["actions"][0]["text"].as_array().unwrap();
    let tuple_slot = text
        .iter()
        .find(|slot| slot.get("t") == Some(&Value::String("tuple".into())))
        .expect("tuple slot present");
    let values = tuple_slot["value"].as_array().unwrap();
    assert_eq!(values[0]["value"], "cat");
    assert!(values[1].get("value").is_none());
}

#[test]
fn unclosed_event_at_eof_is_fatal() {
    let err = emit_err("CWIR_VERSION 1.0\nEVENT LOADED\nLOG \"x\"\n");
    assert!(err.message.contains("unclosed EVENT block"));
}

#[test]
fn unclosed_script_at_eof_is_fatal() {
    let err = emit_err("CWIR_VERSION 1.0\nSCRIPT\nEVENT LOADED\nEND_EVENT\n");
    assert!(err.message.contains("unclosed SCRIPT block"));
}

#[test]
fn comments_and_blank_lines_are_skipped() {
    let source = "CWIR_VERSION 1.0\n;; header comment\n\nEVENT LOADED\n;; inner\nEND_EVENT\n";
    let doc = emit_ok(source);
    assert!(doc[0]["content"][0]["actions"].as_array().unwrap().is_empty());
}

#[test]
fn seeded_runs_are_deterministic() {
    let a = emit_seeded(SIMPLE, 99).unwrap();
    let b = emit_seeded(SIMPLE, 99).unwrap();
    assert_eq!(a, b);
}

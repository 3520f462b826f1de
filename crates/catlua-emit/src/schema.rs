//! The opcode catalog.
//!
//! An external data table (embedded `schema.json`) mapping opcodes and event
//! types to their runtime block IDs and display-text templates. A template
//! is a list of slots: literal strings pass through to the output, parameter
//! objects each consume one argument from the CWIR line.

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::{Map, Value};

static SCHEMA_JSON: &str = include_str!("../schema.json");

/// One slot of a schema entry's display text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextSlot {
    Literal(String),
    Param(Map<String, Value>),
}

impl TextSlot {
    /// Whether this parameter slot expects a `[...]` tuple argument.
    pub fn is_tuple(&self) -> bool {
        match self {
            TextSlot::Literal(_) => false,
            TextSlot::Param(map) => map.get("t").and_then(Value::as_str) == Some("tuple"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaEntry {
    pub id: String,
    pub text: Vec<TextSlot>,
}

#[derive(Debug, Deserialize)]
pub struct Schema {
    pub actions: FxHashMap<String, SchemaEntry>,
    pub events: FxHashMap<String, SchemaEntry>,
}

impl Schema {
    pub fn load() -> Result<Schema, serde_json::Error> {
        serde_json::from_str(SCHEMA_JSON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_schema_parses() {
        let schema = Schema::load().unwrap();
        assert!(schema.actions.contains_key("VAR_SET"));
        assert!(schema.events.contains_key("FUNC_DEF"));
    }

    #[test]
    fn slot_kinds() {
        let schema = Schema::load().unwrap();
        let func_run = &schema.actions["FUNC_RUN"];
        assert!(func_run.text.iter().any(TextSlot::is_tuple));
        let log = &schema.actions["LOG"];
        assert!(!log.text.iter().any(TextSlot::is_tuple));
    }

    #[test]
    fn every_opener_and_relational_opcode_is_catalogued() {
        let schema = Schema::load().unwrap();
        for opcode in [
            "IF_EQ", "IF_NEQ", "IF_EXISTS", "IF_NOT_EXISTS", "IF_AND", "IF_KEY_DOWN",
            "REPEAT", "REPEAT_FOREVER", "TABLE_ITER",
        ] {
            assert!(schema.actions.contains_key(opcode), "missing {opcode}");
        }
    }
}

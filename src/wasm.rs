use crate::codegen::GeneratorOptions;
use wasm_bindgen::prelude::*;

/// Whole-program code for a JSON or XML workspace snapshot, without highlight hooks.
#[wasm_bindgen]
pub fn generate_code(snapshot: &str) -> Result<String, JsValue> {
    let options = GeneratorOptions {
        statement_prefix: None,
        ..GeneratorOptions::default()
    };
    generate(snapshot, options)
}

/// Like [`generate_code`], with a `highlightBlock("<id>");` line before every statement.
#[wasm_bindgen]
pub fn generate_code_with_hooks(snapshot: &str) -> Result<String, JsValue> {
    generate(snapshot, GeneratorOptions::default())
}

fn generate(snapshot: &str, options: GeneratorOptions) -> Result<String, JsValue> {
    crate::generate_from_snapshot(snapshot, options)
        .map(|program| program.code())
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

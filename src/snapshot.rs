use crate::block::{Block, BlockKind, BlockRegistry, FieldValue, Input};
use crate::graph::{BlockGraph, VariableDecl};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Cursor;
use xmltree::{Element, XMLNode};

#[derive(Debug, Clone)]
pub struct SnapshotError {
    pub message: String,
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for SnapshotError {}

fn snapshot_error<T>(message: impl Into<String>) -> Result<T, SnapshotError> {
    Err(SnapshotError {
        message: message.into(),
    })
}

/// Loads a workspace snapshot, picking the format from the first non-blank character.
pub fn load_workspace(text: &str, registry: &BlockRegistry) -> Result<BlockGraph, SnapshotError> {
    match text.trim_start().chars().next() {
        Some('<') => load_xml(text, registry),
        Some('{') => load_json(text, registry),
        _ => snapshot_error("Workspace snapshot is neither JSON nor XML."),
    }
}

/// Deepest `{`/`[` nesting accepted in a JSON snapshot. Every chained statement adds two levels.
pub const MAX_JSON_DEPTH: usize = 2_048;

/// Blockly JSON serialization (`{"blocks": {"blocks": [...]}, "variables": [...]}`).
pub fn load_json(text: &str, registry: &BlockRegistry) -> Result<BlockGraph, SnapshotError> {
    let depth = json_depth(text);
    if depth > MAX_JSON_DEPTH {
        return snapshot_error(format!(
            "Invalid workspace JSON: nesting depth {} exceeds {}.",
            depth, MAX_JSON_DEPTH
        ));
    }
    let mut deserializer = serde_json::Deserializer::from_str(text);
    deserializer.disable_recursion_limit();
    let root = Value::deserialize(&mut deserializer)
        .and_then(|root| deserializer.end().map(|_| root))
        .map_err(|e| SnapshotError {
            message: format!("Invalid workspace JSON: {}", e),
        })?;
    let variables = read_json_variables(root.get("variables"));
    let mut builder = GraphBuilder::new(registry, &variables);

    let top_blocks = root
        .get("blocks")
        .and_then(|b| b.get("blocks"))
        .and_then(Value::as_array);
    let Some(top_blocks) = top_blocks else {
        return snapshot_error("Invalid workspace JSON: missing 'blocks.blocks' array.");
    };
    for block in top_blocks {
        builder.json_block(block, true, false)?;
    }
    builder.finish(variables)
}

/// Maximum bracket nesting outside string literals.
fn json_depth(text: &str) -> usize {
    let (mut depth, mut max) = (0usize, 0usize);
    let mut in_string = false;
    let mut escaped = false;
    for b in text.bytes() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                max = max.max(depth);
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}

fn read_json_variables(node: Option<&Value>) -> Vec<VariableDecl> {
    let mut out = Vec::new();
    let Some(arr) = node.and_then(Value::as_array) else {
        return out;
    };
    for var in arr {
        let name = var.get("name").and_then(Value::as_str);
        let id = var.get("id").and_then(Value::as_str);
        if let (Some(name), Some(id)) = (name, id) {
            out.push(VariableDecl {
                id: id.to_string(),
                name: name.to_string(),
            });
        }
    }
    out
}

/// Blockly XML serialization (`<xml><block type=".." id="..">...</block></xml>`).
pub fn load_xml(text: &str, registry: &BlockRegistry) -> Result<BlockGraph, SnapshotError> {
    let root = Element::parse(Cursor::new(text.as_bytes())).map_err(|e| SnapshotError {
        message: format!("Invalid workspace XML: {}", e),
    })?;
    let variables = root
        .get_child("variables")
        .map(|vars| {
            child_elements(vars)
                .filter(|e| e.name == "variable")
                .filter_map(|e| {
                    let id = e.attributes.get("id")?.clone();
                    let name = e.get_text()?.to_string();
                    Some(VariableDecl { id, name })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let mut builder = GraphBuilder::new(registry, &variables);
    for element in child_elements(&root) {
        if element.name == "block" {
            builder.xml_block(element, true, false)?;
        }
    }
    builder.finish(variables)
}

fn child_elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(e) => Some(e),
        _ => None,
    })
}

struct GraphBuilder<'a> {
    registry: &'a BlockRegistry,
    variable_names: HashMap<String, String>,
    blocks: Vec<Block>,
    id_counter: usize,
}

impl<'a> GraphBuilder<'a> {
    fn new(registry: &'a BlockRegistry, variables: &[VariableDecl]) -> Self {
        Self {
            registry,
            variable_names: variables
                .iter()
                .map(|v| (v.id.clone(), v.name.clone()))
                .collect(),
            blocks: Vec::new(),
            id_counter: 0,
        }
    }

    fn finish(self, variables: Vec<VariableDecl>) -> Result<BlockGraph, SnapshotError> {
        BlockGraph::from_blocks(self.blocks, variables)
    }

    fn new_id(&mut self, type_name: &str) -> String {
        self.id_counter += 1;
        format!("{}#{}", type_name, self.id_counter)
    }

    fn push_block(&mut self, block: Block) -> String {
        let id = block.id.clone();
        self.blocks.push(block);
        id
    }

    /// Loads `node` and every block chained after it through `next`, iteratively.
    fn json_block(&mut self, node: &Value, top_level: bool, shadow: bool) -> Result<String, SnapshotError> {
        let (first_slot, first_id, mut next) = self.json_single(node, top_level, shadow)?;
        let mut previous = first_slot;
        while let Some(node) = next {
            let (slot, id, following) = self.json_single(node, false, false)?;
            self.blocks[previous].next = Some(id);
            previous = slot;
            next = following;
        }
        Ok(first_id)
    }

    /// Loads one block with its inputs. Returns its slot, its id and the unloaded `next` node.
    fn json_single<'v>(
        &mut self,
        node: &'v Value,
        top_level: bool,
        shadow: bool,
    ) -> Result<(usize, String, Option<&'v Value>), SnapshotError> {
        let Some(obj) = node.as_object() else {
            return snapshot_error("Block entry is not a JSON object.");
        };
        let type_name = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SnapshotError {
                message: "Block is missing 'type'.".to_string(),
            })?
            .to_string();
        let id = match obj.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => self.new_id(&type_name),
        };
        let kind = self.registry.resolve(&type_name);
        let enabled = obj.get("enabled").and_then(Value::as_bool).unwrap_or(true)
            && !obj.get("disabled").and_then(Value::as_bool).unwrap_or(false);
        let position = match (
            obj.get("x").and_then(Value::as_f64),
            obj.get("y").and_then(Value::as_f64),
        ) {
            (Some(x), Some(y)) => Some((x as i64, y as i64)),
            _ => None,
        };
        let fields = self.json_fields(obj.get("fields"));

        // Reserve the slot first so parents precede their children in document order.
        let slot = self.blocks.len();
        self.push_block(Block {
            id: id.clone(),
            type_name,
            kind: kind.clone(),
            fields,
            inputs: BTreeMap::new(),
            next: None,
            enabled,
            shadow,
            top_level,
            position,
        });

        let mut inputs = BTreeMap::new();
        if let Some(input_map) = obj.get("inputs").and_then(Value::as_object) {
            for (name, input) in input_map {
                let child = self.json_input(input)?;
                inputs.insert(name.clone(), classify_input(&kind, name, child));
            }
        }
        self.blocks[slot].inputs = inputs;
        Ok((slot, id, obj.get("next").and_then(|n| n.get("block"))))
    }

    fn json_input(&mut self, input: &Value) -> Result<Option<String>, SnapshotError> {
        if let Some(real) = input.get("block") {
            return self.json_block(real, false, false).map(Some);
        }
        if let Some(shadow) = input.get("shadow") {
            return self.json_block(shadow, false, true).map(Some);
        }
        Ok(None)
    }

    fn json_fields(&self, node: Option<&Value>) -> BTreeMap<String, FieldValue> {
        let mut out = BTreeMap::new();
        let Some(map) = node.and_then(Value::as_object) else {
            return out;
        };
        for (name, value) in map {
            if let Some(field) = self.json_field(value) {
                out.insert(name.clone(), field);
            }
        }
        out
    }

    fn json_field(&self, value: &Value) -> Option<FieldValue> {
        match value {
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Number(n) => n.as_f64().map(FieldValue::Number),
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::Object(obj) => self.variable_field(obj),
            _ => None,
        }
    }

    fn variable_field(&self, obj: &Map<String, Value>) -> Option<FieldValue> {
        let id = obj.get("id").and_then(Value::as_str).map(ToString::to_string);
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .or_else(|| id.as_ref().and_then(|id| self.variable_names.get(id).cloned()))?;
        Some(FieldValue::Variable { id, name })
    }

    fn xml_block(&mut self, element: &Element, top_level: bool, shadow: bool) -> Result<String, SnapshotError> {
        let type_name = element
            .attributes
            .get("type")
            .cloned()
            .ok_or_else(|| SnapshotError {
                message: format!("<{}> element is missing 'type'.", element.name),
            })?;
        let id = match element.attributes.get("id") {
            Some(id) => id.clone(),
            None => self.new_id(&type_name),
        };
        let kind = self.registry.resolve(&type_name);
        let enabled = element
            .attributes
            .get("disabled")
            .map(|v| v != "true")
            .unwrap_or(true);
        let position = match (
            element.attributes.get("x").and_then(|v| v.parse::<f64>().ok()),
            element.attributes.get("y").and_then(|v| v.parse::<f64>().ok()),
        ) {
            (Some(x), Some(y)) => Some((x as i64, y as i64)),
            _ => None,
        };

        let slot = self.blocks.len();
        self.push_block(Block {
            id: id.clone(),
            type_name,
            kind: kind.clone(),
            fields: BTreeMap::new(),
            inputs: BTreeMap::new(),
            next: None,
            enabled,
            shadow,
            top_level,
            position,
        });

        let mut fields = BTreeMap::new();
        let mut inputs = BTreeMap::new();
        let mut next = None;
        for child in child_elements(element) {
            match child.name.as_str() {
                "field" => {
                    let Some(name) = child.attributes.get("name") else {
                        continue;
                    };
                    fields.insert(name.clone(), self.xml_field(child));
                }
                "value" | "statement" => {
                    let Some(name) = child.attributes.get("name") else {
                        continue;
                    };
                    let target = self.xml_input(child)?;
                    inputs.insert(name.clone(), classify_input(&kind, name, target));
                }
                "next" => {
                    if let Some(next_block) = child_elements(child).find(|e| e.name == "block") {
                        next = Some(self.xml_block(next_block, false, false)?);
                    }
                }
                _ => {}
            }
        }
        let block = &mut self.blocks[slot];
        block.fields = fields;
        block.inputs = inputs;
        block.next = next;
        Ok(id)
    }

    fn xml_input(&mut self, element: &Element) -> Result<Option<String>, SnapshotError> {
        let real = child_elements(element).find(|e| e.name == "block");
        if let Some(real) = real {
            return self.xml_block(real, false, false).map(Some);
        }
        let shadow = child_elements(element).find(|e| e.name == "shadow");
        if let Some(shadow) = shadow {
            return self.xml_block(shadow, false, true).map(Some);
        }
        Ok(None)
    }

    fn xml_field(&self, element: &Element) -> FieldValue {
        let text = element
            .get_text()
            .map(|t| t.to_string())
            .unwrap_or_default();
        if let Some(var_id) = element.attributes.get("id") {
            let name = self.variable_names.get(var_id).cloned().unwrap_or(text);
            return FieldValue::Variable {
                id: Some(var_id.clone()),
                name,
            };
        }
        FieldValue::Text(text)
    }
}

fn classify_input(kind: &BlockKind, name: &str, child: Option<String>) -> Input {
    match child {
        Some(id) if kind.is_statement_socket(name) => Input::Statement(id),
        Some(id) => Input::Value(id),
        None => Input::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Direction;

    const JSON_WORKSPACE: &str = r#"{
      "blocks": {
        "languageVersion": 0,
        "blocks": [
          {
            "type": "start", "id": "root", "x": 10, "y": 10,
            "next": { "block": {
              "type": "variables_set", "id": "set",
              "fields": { "VAR": { "id": "v1" } },
              "inputs": { "VALUE": { "shadow": { "type": "math_number", "id": "num", "fields": { "NUM": 4 } } } },
              "next": { "block": {
                "type": "controls_repeat_ext", "id": "rep",
                "inputs": {
                  "TIMES": { "block": { "type": "math_number", "id": "three", "fields": { "NUM": 3 } } },
                  "DO": { "block": { "type": "move_up", "id": "up", "fields": { "REPEAT_NUMBER": 1 } } }
                }
              } }
            } }
          },
          { "type": "move_left", "id": "stray", "x": 300, "y": 10, "enabled": false }
        ]
      },
      "variables": [ { "name": "steps", "id": "v1" } ]
    }"#;

    #[test]
    fn loads_blockly_json() {
        let graph = load_workspace(JSON_WORKSPACE, &BlockRegistry::standard()).unwrap();
        assert_eq!(graph.len(), 7);
        assert_eq!(graph.root().unwrap().id, "root");
        let set = graph.get("set").unwrap();
        assert_eq!(set.field("VAR").unwrap().as_text(), "steps");
        assert_eq!(set.inputs.get("VALUE"), Some(&Input::Value("num".to_string())));
        assert!(graph.get("num").unwrap().shadow);
        let rep = graph.get("rep").unwrap();
        assert_eq!(rep.inputs.get("DO"), Some(&Input::Statement("up".to_string())));
        assert_eq!(graph.get("up").unwrap().kind, BlockKind::Move(Direction::Up));
        assert!(!graph.get("stray").unwrap().enabled);
        assert_eq!(graph.get("stray").unwrap().position, Some((300, 10)));
    }

    #[test]
    fn loads_blockly_xml() {
        let xml = r#"<xml xmlns="https://developers.google.com/blockly/xml">
          <variables><variable id="v1">count</variable></variables>
          <block type="start" id="root" x="20" y="20">
            <next>
              <block type="controls_if" id="if">
                <value name="IF0">
                  <block type="logic_boolean" id="yes"><field name="BOOL">TRUE</field></block>
                </value>
                <statement name="DO0">
                  <block type="math_change" id="chg">
                    <field name="VAR" id="v1">count</field>
                    <value name="DELTA"><shadow type="math_number" id="one"><field name="NUM">1</field></shadow></value>
                  </block>
                </statement>
              </block>
            </next>
          </block>
        </xml>"#;
        let graph = load_workspace(xml, &BlockRegistry::standard()).unwrap();
        assert_eq!(graph.statements().unwrap().len(), 1);
        let if_block = graph.get("if").unwrap();
        assert_eq!(if_block.inputs.get("DO0"), Some(&Input::Statement("chg".to_string())));
        assert_eq!(if_block.inputs.get("IF0"), Some(&Input::Value("yes".to_string())));
        assert_eq!(
            graph.get("chg").unwrap().field("VAR"),
            Some(&FieldValue::Variable {
                id: Some("v1".to_string()),
                name: "count".to_string()
            })
        );
    }

    #[test]
    fn rejects_unknown_format() {
        let err = load_workspace("start -> move", &BlockRegistry::standard()).unwrap_err();
        assert!(err.message.contains("neither JSON nor XML"));
    }

    #[test]
    fn blocks_without_ids_get_generated_ones() {
        let json = r#"{"blocks":{"blocks":[{"type":"start","next":{"block":{"type":"rest"}}}]}}"#;
        let graph = load_workspace(json, &BlockRegistry::standard()).unwrap();
        assert_eq!(graph.statements().unwrap()[0].id, "rest#2");
    }

    fn move_chain(length: usize) -> String {
        let mut chain = String::new();
        for i in 0..length {
            chain.push_str(&format!(
                r#"{{"type":"move_up","id":"m{}","fields":{{"REPEAT_NUMBER":1}},"next":{{"block":"#,
                i
            ));
        }
        chain.push_str(r#"{"type":"rest","id":"end"}"#);
        chain.push_str(&"}}".repeat(length));
        format!(r#"{{"blocks":{{"blocks":[{{"type":"start","id":"s","next":{{"block":{}}}}}]}}}}"#, chain)
    }

    #[test]
    fn long_json_chains_load_in_order() {
        let graph = load_workspace(&move_chain(300), &BlockRegistry::standard()).unwrap();
        let statements = graph.statements().unwrap();
        assert_eq!(statements.len(), 301);
        assert_eq!(statements[0].id, "m0");
        assert_eq!(statements[299].id, "m299");
        assert_eq!(statements[300].id, "end");
    }

    #[test]
    fn absurd_nesting_is_rejected_cleanly() {
        let err = load_workspace(&move_chain(MAX_JSON_DEPTH), &BlockRegistry::standard()).unwrap_err();
        assert!(err.message.contains("nesting depth"));
        assert_eq!(json_depth(r#"{"a":"[[[{"}"#), 1);
    }
}

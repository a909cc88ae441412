//! The tool-and-parameter model (component D): converts a `tools/list`
//! entry's `inputSchema` (a JSON Schema fragment, possibly loose or
//! incomplete) into a host-neutral, recursive [`Parameter`] tree, and emits
//! that tree back out as provider-specific function-call schemas.
//!
//! The sanitization pass mirrors the one the orchestration layer this crate
//! was extracted from applies to MCP-sourced schemas before handing them to
//! a model: servers routinely omit `type` or use `integer` where this
//! client's [`ParameterType`] only knows `number`, and a parser that rejects
//! those schemas outright would make a whole tool unusable over one missing
//! keyword.

use std::collections::HashMap;

use mcp_types::Tool;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::error::McpClientError;
use crate::error::Result;

/// The JSON Schema primitive types this client's parameter model
/// understands. `"integer"` is accepted on input as an alias of `Number`
/// (§4.D) but never produced by the sanitizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "string" => Some(Self::String),
            "number" | "integer" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One node of a tool's parameter tree (§3 Parameter). `items` carries the
/// raw JSON Schema fragment for an array's element type as-is, unparsed;
/// `properties` is populated only for `Object` and recurses into this same
/// type.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub r#type: ParameterType,
    pub description: Option<String>,
    pub required: bool,
    pub items: Option<Value>,
    pub properties: Option<HashMap<String, Parameter>>,
}

impl Parameter {
    /// Build a [`Parameter`] from a single property's schema fragment,
    /// after [`sanitize`] has already normalized it.
    fn from_schema(schema: &Value, required: bool) -> Self {
        let object = schema.as_object();
        let r#type = object
            .and_then(|o| o.get("type"))
            .and_then(Value::as_str)
            .and_then(ParameterType::parse)
            .unwrap_or(ParameterType::String);
        let description = object
            .and_then(|o| o.get("description"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let items = if r#type == ParameterType::Array {
            object.and_then(|o| o.get("items")).cloned()
        } else {
            None
        };

        let properties = if r#type == ParameterType::Object {
            object
                .and_then(|o| o.get("properties"))
                .and_then(Value::as_object)
                .map(|props| properties_from_schema(props, object))
        } else {
            None
        };

        Self {
            r#type,
            description,
            required,
            items,
            properties,
        }
    }

    /// Emit this node as an OpenAI-style function-parameter schema fragment
    /// (§4.D). Null fields are dropped rather than serialized as `null`.
    pub fn to_openai_schema(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String(self.r#type.as_str().to_string()));
        if let Some(description) = &self.description {
            map.insert("description".to_string(), Value::String(description.clone()));
        }
        if let Some(items) = &self.items {
            map.insert("items".to_string(), items.clone());
        }
        if let Some(properties) = &self.properties {
            let (emitted, required) = emit_properties_and_required(properties);
            map.insert("properties".to_string(), Value::Object(emitted));
            if !required.is_empty() {
                map.insert("required".to_string(), Value::Array(required));
            }
        }
        Value::Object(map)
    }
}

fn properties_from_schema(
    props: &Map<String, Value>,
    parent: Option<&Map<String, Value>>,
) -> HashMap<String, Parameter> {
    let required: Vec<&str> = parent
        .and_then(|o| o.get("required"))
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    props
        .iter()
        .map(|(key, schema)| {
            let is_required = required.contains(&key.as_str());
            (key.clone(), Parameter::from_schema(schema, is_required))
        })
        .collect()
}

/// A single tool's host-neutral descriptor (§3 Tool descriptor): name,
/// description, and the parameter tree built from its `inputSchema`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: HashMap<String, Parameter>,
}

impl ToolDescriptor {
    /// Build a descriptor from one `tools/list` entry, sanitizing its
    /// `inputSchema` first so servers with loose or incomplete JSON Schema
    /// still produce a usable parameter tree (§4.D).
    pub fn from_mcp_tool(tool: &Tool) -> Result<Self> {
        let mut schema = tool.input_schema.clone();
        sanitize(&mut schema);

        let object = schema.as_object().ok_or_else(|| {
            McpClientError::ProtocolError(format!(
                "tool `{}` has a non-object inputSchema after sanitization",
                tool.name
            ))
        })?;
        let properties = object
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| properties_from_schema(props, Some(object)))
            .unwrap_or_default();

        Ok(Self {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            parameters: properties,
        })
    }

    /// Emit the whole parameter map as an OpenAI-style `parameters` object:
    /// `{type: "object", properties: {...}, required: [...]}`.
    pub fn to_openai_parameters(&self) -> Value {
        emit_openai_object(&self.parameters)
    }

    /// Emit the whole parameter map as an Anthropic-style `input_schema`
    /// object. Identical shape to the OpenAI emission (§4.D): the two
    /// providers differ only in where the host places this value in its own
    /// tool-definition envelope, not in the schema fragment itself.
    pub fn to_anthropic_input_schema(&self) -> Value {
        emit_openai_object(&self.parameters)
    }
}

/// Build the `properties` map and sorted `required` array shared by every
/// object-shaped schema emission, whether it's the top-level parameter map
/// or a nested [`Parameter`] of type `Object` (§8 round-trip law: a
/// property's own `required` flag must survive emission at any depth).
fn emit_properties_and_required(parameters: &HashMap<String, Parameter>) -> (Map<String, Value>, Vec<Value>) {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for (name, param) in parameters {
        if param.required {
            required.push(Value::String(name.clone()));
        }
        properties.insert(name.clone(), param.to_openai_schema());
    }
    required.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    (properties, required)
}

fn emit_openai_object(parameters: &HashMap<String, Parameter>) -> Value {
    let (properties, required) = emit_properties_and_required(parameters);

    let mut object = Map::new();
    object.insert("type".to_string(), Value::String("object".to_string()));
    object.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        object.insert("required".to_string(), Value::Array(required));
    }
    Value::Object(object)
}

/// Normalize a server-supplied JSON Schema fragment in place so every
/// object node ends up with an explicit, supported `type` keyword (§4.D).
/// Recurses into `properties`, `items`, and the `anyOf`/`oneOf`/`allOf`
/// combinators so a nested fragment missing `type` doesn't sink the whole
/// tool.
fn sanitize(value: &mut Value) {
    match value {
        Value::Bool(_) => {
            // The JSON Schema boolean form (`true`/`false` as a whole
            // schema); coerce to the most permissive concrete type.
            *value = serde_json::json!({"type": "string"});
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                sanitize(item);
            }
        }
        Value::Object(map) => {
            if let Some(props) = map.get_mut("properties").and_then(Value::as_object_mut) {
                for (_, prop) in props.iter_mut() {
                    sanitize(prop);
                }
            }
            if let Some(items) = map.get_mut("items") {
                sanitize(items);
            }
            for combinator in ["anyOf", "oneOf", "allOf"] {
                if let Some(variants) = map.get_mut(combinator) {
                    sanitize(variants);
                }
            }

            let declared = map.get("type").and_then(Value::as_str);
            let normalized = match declared {
                Some("integer") => Some("number"),
                Some(other) if ParameterType::parse(other).is_some() => Some(other),
                _ => None,
            };

            let inferred = normalized.map(str::to_string).unwrap_or_else(|| {
                if map.contains_key("properties") || map.contains_key("required") {
                    "object".to_string()
                } else if map.contains_key("items") {
                    "array".to_string()
                } else if map.contains_key("enum")
                    || map.contains_key("const")
                    || map.contains_key("minimum")
                    || map.contains_key("maximum")
                {
                    "string".to_string()
                } else {
                    "string".to_string()
                }
            });

            map.insert("type".to_string(), Value::String(inferred.clone()));
            if inferred == "array" && !map.contains_key("items") {
                map.insert("items".to_string(), serde_json::json!({"type": "string"}));
            }
            if inferred == "object" && !map.contains_key("properties") {
                map.insert("properties".to_string(), Value::Object(Map::new()));
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tool(input_schema: Value) -> Tool {
        Tool {
            name: "echo".to_string(),
            title: None,
            description: Some("d".to_string()),
            input_schema,
            output_schema: None,
            annotations: None,
        }
    }

    #[test]
    fn flat_schema_builds_primitive_parameters() {
        let descriptor = ToolDescriptor::from_mcp_tool(&tool(serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string", "description": "t"}},
            "required": ["text"],
        })))
        .expect("valid schema");

        assert_eq!(descriptor.name, "echo");
        assert_eq!(descriptor.description, "d");
        let text = &descriptor.parameters["text"];
        assert_eq!(text.r#type, ParameterType::String);
        assert_eq!(text.description.as_deref(), Some("t"));
        assert!(text.required);
    }

    #[test]
    fn missing_type_is_inferred_from_properties() {
        let descriptor = ToolDescriptor::from_mcp_tool(&tool(serde_json::json!({
            "type": "object",
            "properties": {
                "user": {"properties": {"id": {"type": "integer"}}},
            },
        })))
        .expect("valid schema");

        let user = &descriptor.parameters["user"];
        assert_eq!(user.r#type, ParameterType::Object);
        let id = &user.properties.as_ref().expect("nested properties")["id"];
        assert_eq!(id.r#type, ParameterType::Number);
    }

    #[test]
    fn array_without_items_gets_a_permissive_default() {
        let descriptor = ToolDescriptor::from_mcp_tool(&tool(serde_json::json!({
            "type": "object",
            "properties": {"tags": {"type": "array"}},
        })))
        .expect("valid schema");

        let tags = &descriptor.parameters["tags"];
        assert_eq!(tags.r#type, ParameterType::Array);
        assert_eq!(tags.items, Some(serde_json::json!({"type": "string"})));
    }

    #[test]
    fn nested_object_round_trips_through_the_openai_emitter() {
        let descriptor = ToolDescriptor::from_mcp_tool(&tool(serde_json::json!({
            "type": "object",
            "properties": {
                "user": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "integer"},
                        "name": {"type": "string"},
                    },
                },
            },
        })))
        .expect("valid schema");

        let emitted = descriptor.to_openai_parameters();
        let user = &emitted["properties"]["user"];
        assert_eq!(user["type"], "object");
        assert_eq!(user["properties"]["id"]["type"], "number");
        assert_eq!(user["properties"]["name"]["type"], "string");
    }

    #[test]
    fn nested_required_survives_emission() {
        let descriptor = ToolDescriptor::from_mcp_tool(&tool(serde_json::json!({
            "type": "object",
            "properties": {
                "user": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "name": {"type": "string"},
                    },
                    "required": ["id"],
                },
            },
        })))
        .expect("valid schema");

        let emitted = descriptor.to_openai_parameters();
        let user = &emitted["properties"]["user"];
        assert_eq!(user["required"], serde_json::json!(["id"]));
    }

    #[test]
    fn openai_and_anthropic_emitters_agree_on_shape() {
        let descriptor = ToolDescriptor::from_mcp_tool(&tool(serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"],
        })))
        .expect("valid schema");

        assert_eq!(
            descriptor.to_openai_parameters(),
            descriptor.to_anthropic_input_schema()
        );
    }

    #[test]
    fn required_omitted_when_no_property_is_required() {
        let descriptor = ToolDescriptor::from_mcp_tool(&tool(serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
        })))
        .expect("valid schema");

        let emitted = descriptor.to_openai_parameters();
        assert!(emitted.as_object().expect("object").get("required").is_none());
    }

    #[test]
    fn boolean_schema_form_coerces_to_a_permissive_string() {
        let descriptor = ToolDescriptor::from_mcp_tool(&tool(serde_json::json!({
            "type": "object",
            "properties": {"anything": true},
        })))
        .expect("valid schema");

        assert_eq!(descriptor.parameters["anything"].r#type, ParameterType::String);
    }
}

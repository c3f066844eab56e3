//! Reduction of client-supplied JSON Schema to the subset the Gemini API
//! accepts.
//!
//! Clients hand over OpenAPI-style schemas full of keywords the upstream
//! rejects (`$schema`, `$ref`, `additionalProperties`, combinators with null
//! branches). Sanitization is one-way and lossy but idempotent, and it never
//! fails: a rule that cannot be applied leaves the node in its last valid
//! state.

use serde_json::{Map, Value, json};

/// Nesting depth past which nodes collapse to an empty schema.
const MAX_DEPTH: usize = 20;

/// Types the upstream accepts.
const ALLOWED_TYPES: &[&str] = &["string", "number", "integer", "boolean", "object", "array"];

/// Numeric constraint keywords that must hold numbers.
const NUMERIC_KEYS: &[&str] = &[
    "minimum",
    "maximum",
    "multipleOf",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
];

/// Options controlling the sanitizer's drop set.
#[derive(Debug, Clone)]
pub(crate) struct SanitizeOptions {
    /// Keys removed from every object node.
    pub drop_keys: Vec<&'static str>,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            drop_keys: vec![
                "$schema",
                "$defs",
                "definitions",
                "additionalProperties",
                "patternProperties",
                "examples",
                "deprecated",
                "readOnly",
                "writeOnly",
                "title",
            ],
        }
    }
}

impl SanitizeOptions {
    fn drops(&self, key: &str) -> bool {
        self.drop_keys.contains(&key)
    }
}

/// Sanitize a schema with the default drop set.
///
/// Never mutates the input and never fails; for any input `x`,
/// `sanitize(&sanitize(x)) == sanitize(x)`.
pub(crate) fn sanitize(schema: &Value) -> Value {
    sanitize_with(schema, &SanitizeOptions::default())
}

/// Sanitize a schema with a custom drop set.
pub(crate) fn sanitize_with(schema: &Value, options: &SanitizeOptions) -> Value {
    let mut ctx = Context {
        options,
        scopes: Vec::new(),
        active_refs: Vec::new(),
    };

    sanitize_node(schema, 0, &mut ctx)
}

struct Context<'a> {
    options: &'a SanitizeOptions,
    /// Lexical stack of `$defs`/`definitions` tables for `$ref` resolution;
    /// the innermost table wins.
    scopes: Vec<&'a Map<String, Value>>,
    /// Identity set of `$ref` targets currently being expanded. A repeat
    /// means a reference cycle; the cycle is cut with an empty schema.
    active_refs: Vec<*const Value>,
}

fn sanitize_node<'a>(node: &'a Value, depth: usize, ctx: &mut Context<'a>) -> Value {
    if depth > MAX_DEPTH {
        return json!({});
    }

    let Some(obj) = node.as_object() else {
        // Boolean and other non-object schemas are outside the accepted
        // subset.
        return json!({});
    };

    let mut pushed_scopes = 0;

    for table in ["$defs", "definitions"] {
        if let Some(defs) = obj.get(table).and_then(Value::as_object) {
            ctx.scopes.push(defs);
            pushed_scopes += 1;
        }
    }

    let result = sanitize_object(obj, depth, ctx);

    for _ in 0..pushed_scopes {
        ctx.scopes.pop();
    }

    result
}

fn sanitize_object<'a>(obj: &'a Map<String, Value>, depth: usize, ctx: &mut Context<'a>) -> Value {
    // An inline reference replaces the node entirely.
    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        return resolve_reference(reference, depth, ctx);
    }

    // A combinator collapses the node to a single branch.
    for key in ["anyOf", "any_of", "oneOf", "one_of", "allOf", "all_of"] {
        if let Some(branches) = obj.get(key).and_then(Value::as_array) {
            return collapse_combinator(branches, depth, ctx);
        }
    }

    let mut out = Map::new();

    for (key, value) in obj {
        if ctx.options.drops(key) && key != "additionalProperties" {
            continue;
        }

        match key.as_str() {
            // Handled above; unreachable here but kept out of the output.
            "$ref" | "anyOf" | "any_of" | "oneOf" | "one_of" | "allOf" | "all_of" => {}
            "const" => {
                out.insert("enum".to_string(), Value::Array(vec![value.clone()]));
            }
            "enum" => {
                out.insert(key.clone(), value.clone());
            }
            "type" => match value {
                Value::String(name) if ALLOWED_TYPES.contains(&name.as_str()) => {
                    out.insert(key.clone(), value.clone());
                }
                // A single unsupported type is dropped.
                Value::String(_) => {}
                // A union of types becomes a combinator, which collapses and
                // replaces the node entirely.
                Value::Array(names) => return collapse_type_union(names),
                _ => {}
            },
            "exclusiveMinimum" | "exclusiveMaximum" => {}
            "additionalProperties" => {
                if ctx.options.drops(key) {
                    continue;
                }

                let value = match value {
                    Value::Bool(_) => value.clone(),
                    Value::Object(_) => sanitize_node(value, depth + 1, ctx),
                    _ => Value::Bool(false),
                };
                out.insert(key.clone(), value);
            }
            "properties" => {
                let Some(props) = value.as_object() else {
                    continue;
                };

                let sanitized: Map<String, Value> = props
                    .iter()
                    .map(|(name, prop)| (name.clone(), sanitize_node(prop, depth + 1, ctx)))
                    .collect();

                out.insert(key.clone(), Value::Object(sanitized));
            }
            "items" => {
                let value = match value {
                    Value::Array(items) => Value::Array(
                        items.iter().map(|item| sanitize_node(item, depth + 1, ctx)).collect(),
                    ),
                    other => sanitize_node(other, depth + 1, ctx),
                };
                out.insert(key.clone(), value);
            }
            "prefixItems" => {
                let Some(items) = value.as_array() else {
                    continue;
                };

                let sanitized: Vec<Value> =
                    items.iter().map(|item| sanitize_node(item, depth + 1, ctx)).collect();
                out.insert(key.clone(), Value::Array(sanitized));
            }
            key if NUMERIC_KEYS.contains(&key) => {
                if let Some(number) = coerce_number(value) {
                    out.insert(key.to_string(), number);
                }
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    // Infer a type when the shape makes it obvious.
    if !out.contains_key("type") {
        if out.contains_key("properties") || out.contains_key("required") {
            out.insert("type".to_string(), Value::String("object".to_string()));
        } else if out.contains_key("items") || out.contains_key("prefixItems") {
            out.insert("type".to_string(), Value::String("array".to_string()));
        }
    }

    // Enum values are only meaningful to the upstream on string scalars.
    // Untyped enums stay: the const rewrite above produces them and a second
    // pass must not undo it.
    if out.contains_key("enum")
        && let Some(ty) = out.get("type").and_then(Value::as_str)
        && ty != "string"
    {
        out.remove("enum");
    }

    Value::Object(out)
}

/// Resolves `#/$defs/NAME` and `#/definitions/NAME` against the nearest
/// enclosing definitions table. Anything else collapses to an empty schema.
fn resolve_reference(reference: &str, depth: usize, ctx: &mut Context<'_>) -> Value {
    let name = match reference
        .strip_prefix("#/$defs/")
        .or_else(|| reference.strip_prefix("#/definitions/"))
    {
        Some(name) => name,
        None => {
            log::debug!("dropping non-local schema reference: {reference}");
            return json!({});
        }
    };

    let Some(target) = ctx.scopes.iter().rev().find_map(|scope| scope.get(name)) else {
        log::debug!("dropping unresolvable schema reference: {reference}");
        return json!({});
    };

    let identity = target as *const Value;

    if ctx.active_refs.contains(&identity) {
        log::debug!("cutting schema reference cycle at: {reference}");
        return json!({});
    }

    ctx.active_refs.push(identity);
    let result = sanitize_node(target, depth + 1, ctx);
    ctx.active_refs.pop();

    result
}

/// Collapses an `anyOf`/`oneOf`/`allOf` to a single preferred branch which
/// replaces the enclosing node.
fn collapse_combinator<'a>(branches: &'a [Value], depth: usize, ctx: &mut Context<'a>) -> Value {
    let mut sanitized = Vec::new();

    for branch in branches {
        if is_null_branch(branch) {
            continue;
        }

        if branch.as_object().is_some_and(Map::is_empty) {
            sanitized.push(json!({"type": "object"}));
            continue;
        }

        sanitized.push(sanitize_node(branch, depth + 1, ctx));
    }

    let preferred = sanitized
        .iter()
        .position(|branch| branch.get("type").and_then(Value::as_str) == Some("object"));

    match preferred {
        Some(index) => sanitized.swap_remove(index),
        None => sanitized.into_iter().next().unwrap_or_else(|| json!({"type": "object"})),
    }
}

fn is_null_branch(branch: &Value) -> bool {
    let Some(obj) = branch.as_object() else {
        return false;
    };

    if obj.get("type").and_then(Value::as_str) == Some("null") {
        return true;
    }

    obj.get("enum")
        .and_then(Value::as_array)
        .is_some_and(|values| values.len() == 1 && values[0].is_null())
}

/// Collapses a list of types the way an `anyOf` of single-type branches
/// collapses: null branches removed, unsupported types dropped, the object
/// branch preferred.
fn collapse_type_union(names: &[Value]) -> Value {
    let mut branches: Vec<Value> = names
        .iter()
        .filter_map(Value::as_str)
        .filter(|name| *name != "null" && ALLOWED_TYPES.contains(name))
        .map(|name| json!({"type": name}))
        .collect();

    let preferred = branches
        .iter()
        .position(|branch| branch.get("type").and_then(Value::as_str) == Some("object"));

    match preferred {
        Some(index) => branches.swap_remove(index),
        None => branches.into_iter().next().unwrap_or_else(|| json!({"type": "object"})),
    }
}

/// Coerces a numeric constraint to a JSON number, dropping anything that
/// cannot be read as one.
fn coerce_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(text) => {
            let parsed: f64 = text.trim().parse().ok()?;
            serde_json::Number::from_f64(parsed).map(Value::Number)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_banned_keywords_at_every_depth() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": "root",
            "type": "object",
            "properties": {
                "nested": {
                    "type": "object",
                    "examples": ["a"],
                    "readOnly": true,
                    "properties": {
                        "leaf": { "type": "string", "deprecated": true }
                    },
                    "additionalProperties": false
                },
                "list": {
                    "type": "array",
                    "items": { "type": "object", "patternProperties": {"^x": {}} }
                }
            },
            "additionalProperties": false
        });

        let cleaned = sanitize(&schema);

        insta::assert_json_snapshot!(cleaned, @r#"
        {
          "properties": {
            "list": {
              "items": {
                "type": "object"
              },
              "type": "array"
            },
            "nested": {
              "properties": {
                "leaf": {
                  "type": "string"
                }
              },
              "type": "object"
            }
          },
          "type": "object"
        }
        "#);
    }

    #[test]
    fn collapses_nullable_union_to_object_branch() {
        // Literal scenario from the tool-calling clients that emit
        // `anyOf: [{type: null}, {...}]` wrappers.
        let schema = json!({
            "$schema": "…",
            "anyOf": [
                { "type": "null" },
                { "properties": { "x": { "const": 3 } } }
            ]
        });

        let cleaned = sanitize(&schema);

        assert_eq!(
            cleaned,
            json!({
                "type": "object",
                "properties": { "x": { "enum": [3] } }
            })
        );
    }

    #[test]
    fn snake_case_combinators_are_recognized() {
        let schema = json!({
            "any_of": [
                { "enum": [null] },
                { "type": "string" }
            ]
        });

        assert_eq!(sanitize(&schema), json!({"type": "string"}));
    }

    #[test]
    fn empty_object_branches_coerce_to_object() {
        let schema = json!({"oneOf": [{}, {"type": "string"}]});
        assert_eq!(sanitize(&schema), json!({"type": "object"}));
    }

    #[test]
    fn all_null_branches_fall_back_to_object() {
        let schema = json!({"allOf": [{"type": "null"}, {"enum": [null]}]});
        assert_eq!(sanitize(&schema), json!({"type": "object"}));
    }

    #[test]
    fn enum_survives_on_strings_and_dies_on_other_scalars() {
        let string_enum = json!({"type": "string", "enum": ["a", "b"]});
        assert_eq!(sanitize(&string_enum), string_enum);

        let integer_enum = json!({"type": "integer", "enum": [1, 2]});
        assert_eq!(sanitize(&integer_enum), json!({"type": "integer"}));
    }

    #[test]
    fn type_arrays_become_a_collapsed_union() {
        let schema = json!({"type": ["string", "null"], "minLength": 2});
        assert_eq!(sanitize(&schema), json!({"type": "string"}));

        let object_first = json!({"type": ["object", "string"]});
        assert_eq!(sanitize(&object_first), json!({"type": "object"}));
    }

    #[test]
    fn unsupported_single_type_is_dropped() {
        let schema = json!({"type": "date", "description": "when"});
        assert_eq!(sanitize(&schema), json!({"description": "when"}));
    }

    #[test]
    fn type_is_inferred_from_shape() {
        let object_shaped = json!({"properties": {"a": {"type": "string"}}});
        assert_eq!(
            sanitize(&object_shaped),
            json!({"type": "object", "properties": {"a": {"type": "string"}}})
        );

        let array_shaped = json!({"items": {"type": "number"}});
        assert_eq!(
            sanitize(&array_shaped),
            json!({"type": "array", "items": {"type": "number"}})
        );
    }

    #[test]
    fn numeric_constraints_are_coerced_or_dropped() {
        let schema = json!({
            "type": "number",
            "minimum": "3.5",
            "maximum": 10,
            "exclusiveMinimum": 0,
            "multipleOf": "not-a-number"
        });

        assert_eq!(
            sanitize(&schema),
            json!({"type": "number", "minimum": 3.5, "maximum": 10})
        );
    }

    #[test]
    fn local_references_are_inlined() {
        let schema = json!({
            "$defs": {
                "name": { "type": "string", "title": "drop me" }
            },
            "type": "object",
            "properties": {
                "first": { "$ref": "#/$defs/name" },
                "unknown": { "$ref": "#/$defs/missing" },
                "remote": { "$ref": "https://example.com/schema.json" }
            }
        });

        let cleaned = sanitize(&schema);

        assert_eq!(
            cleaned,
            json!({
                "type": "object",
                "properties": {
                    "first": { "type": "string" },
                    "unknown": {},
                    "remote": {}
                }
            })
        );
    }

    #[test]
    fn reference_cycles_are_cut() {
        let schema = json!({
            "definitions": {
                "node": {
                    "type": "object",
                    "properties": {
                        "next": { "$ref": "#/definitions/node" }
                    }
                }
            },
            "$ref": "#/definitions/node"
        });

        let cleaned = sanitize(&schema);

        // The first expansion of the cycle is kept; the second is cut.
        assert_eq!(
            cleaned,
            json!({
                "type": "object",
                "properties": { "next": {} }
            })
        );
    }

    #[test]
    fn depth_bound_collapses_deep_nodes() {
        let mut schema = json!({"type": "string"});

        for _ in 0..30 {
            schema = json!({"type": "object", "properties": {"inner": schema}});
        }

        let cleaned = sanitize(&schema);

        // The tree is cut to an empty schema right past the depth bound.
        let mut node = &cleaned;
        let mut depth = 0;

        while let Some(inner) = node.get("properties").and_then(|p| p.get("inner")) {
            node = inner;
            depth += 1;
        }

        assert_eq!(depth, MAX_DEPTH + 1);
        assert_eq!(node, &json!({}));
    }

    #[test]
    fn sanitization_is_idempotent() {
        let fixtures = [
            json!({"const": 3}),
            json!({"anyOf": [{"type": "null"}, {"properties": {"x": {"const": 3}}}]}),
            json!({"type": ["string", "null"]}),
            json!({"properties": {"a": {"enum": [1]}}, "required": ["a"]}),
            json!({
                "$defs": {"s": {"type": "string"}},
                "type": "object",
                "properties": {"name": {"$ref": "#/$defs/s"}}
            }),
            json!({"type": "integer", "minimum": "7", "exclusiveMaximum": 10}),
        ];

        for fixture in fixtures {
            let once = sanitize(&fixture);
            let twice = sanitize(&once);
            assert_eq!(once, twice, "sanitize not idempotent for {fixture}");
        }
    }
}

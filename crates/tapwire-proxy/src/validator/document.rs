//! Serde model of the OpenAPI 3.x subset the validator consumes.
//!
//! Schemas stay as raw JSON values; they are compiled by the validator
//! with the document's `components` attached so in-document `$ref`
//! pointers resolve. Unknown fields are ignored throughout, and objects
//! that do not fit the model (for example `$ref` parameters) deserialize
//! to inert defaults rather than failing the whole document.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct OpenApiDocument {
    #[serde(default)]
    pub openapi: Option<String>,
    #[serde(default)]
    pub info: Option<Info>,
    #[serde(default)]
    pub paths: BTreeMap<String, PathItem>,
}

#[derive(Debug, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PathItem {
    #[serde(default)]
    pub get: Option<Operation>,
    #[serde(default)]
    pub put: Option<Operation>,
    #[serde(default)]
    pub post: Option<Operation>,
    #[serde(default)]
    pub delete: Option<Operation>,
    #[serde(default)]
    pub patch: Option<Operation>,
    #[serde(default)]
    pub head: Option<Operation>,
    #[serde(default)]
    pub options: Option<Operation>,
    /// Parameters shared by every operation under this path.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl PathItem {
    /// Declared operations paired with their uppercase HTTP method.
    pub fn operations(&self) -> Vec<(&'static str, &Operation)> {
        let mut ops = Vec::new();
        if let Some(op) = &self.get {
            ops.push(("GET", op));
        }
        if let Some(op) = &self.put {
            ops.push(("PUT", op));
        }
        if let Some(op) = &self.post {
            ops.push(("POST", op));
        }
        if let Some(op) = &self.delete {
            ops.push(("DELETE", op));
        }
        if let Some(op) = &self.patch {
            ops.push(("PATCH", op));
        }
        if let Some(op) = &self.head {
            ops.push(("HEAD", op));
        }
        if let Some(op) = &self.options {
            ops.push(("OPTIONS", op));
        }
        ops
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, rename = "requestBody")]
    pub request_body: Option<RequestBodySpec>,
    #[serde(default)]
    pub responses: BTreeMap<String, ResponseSpec>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Parameter {
    #[serde(default)]
    pub name: String,
    /// `path`, `query`, `header`, or `cookie`.
    #[serde(default, rename = "in")]
    pub location: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub schema: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestBodySpec {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub content: BTreeMap<String, MediaTypeSpec>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MediaTypeSpec {
    #[serde(default)]
    pub schema: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseSpec {
    #[serde(default)]
    pub content: BTreeMap<String, MediaTypeSpec>,
}

/// Pick the JSON media type from a content map, if declared.
pub fn json_media_type(content: &BTreeMap<String, MediaTypeSpec>) -> Option<&MediaTypeSpec> {
    content
        .get("application/json")
        .or_else(|| content.iter().find(|(k, _)| k.contains("json")).map(|(_, v)| v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_document() {
        let yaml = r#"
openapi: "3.0.3"
info:
  title: Orders
  version: "1.0"
paths:
  /orders:
    get:
      responses:
        "200":
          description: list
  /orders/{id}:
    get:
      parameters:
        - name: id
          in: path
          required: true
          schema:
            type: string
      responses:
        "200":
          description: one
"#;
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        let doc: OpenApiDocument = serde_json::from_value(value).unwrap();
        assert_eq!(doc.openapi.as_deref(), Some("3.0.3"));
        assert_eq!(doc.paths.len(), 2);

        let item = &doc.paths["/orders/{id}"];
        let ops = item.operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].0, "GET");
        assert_eq!(ops[0].1.parameters[0].name, "id");
        assert_eq!(ops[0].1.parameters[0].location, "path");
    }

    #[test]
    fn test_json_media_type_lookup() {
        let yaml = r#"
required: true
content:
  application/json:
    schema:
      type: object
"#;
        let body: RequestBodySpec = serde_yaml::from_str(yaml).unwrap();
        assert!(json_media_type(&body.content).is_some());
        assert!(body.required);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let yaml = r#"
openapi: "3.1.0"
x-custom: whatever
paths:
  /p:
    summary: extra
    post:
      operationId: create
      responses: {}
"#;
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        let doc: OpenApiDocument = serde_json::from_value(value).unwrap();
        assert!(doc.paths["/p"].post.is_some());
    }
}

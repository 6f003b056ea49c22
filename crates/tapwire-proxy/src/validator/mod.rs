//! OpenAPI contract validation for requests and responses.
//!
//! The document is loaded and compiled once at startup into a path index
//! of `{template -> operations}` with prebuilt JSON schemas; per-exchange
//! validation is read-only over that index. A document that fails to load
//! disables validation with a warning instead of aborting the process.

pub mod document;
pub mod paths;

use crate::config::ApiValidationConfig;
use document::{json_media_type, OpenApiDocument};
use hyper::{HeaderMap, Method};
use jsonschema::JSONSchema;
use paths::{param_count, parse_template, segments_match, Segment};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Validation behavior knobs, copied out of the configuration.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorOptions {
    pub validate_requests: bool,
    pub validate_responses: bool,
    pub strict: bool,
    pub continue_on_fail: bool,
}

impl From<&ApiValidationConfig> for ValidatorOptions {
    fn from(cfg: &ApiValidationConfig) -> Self {
        Self {
            validate_requests: cfg.validate_requests,
            validate_responses: cfg.validate_responses,
            strict: cfg.strict,
            continue_on_fail: cfg.continue_on_fail,
        }
    }
}

enum ResponseKey {
    Exact(u16),
    /// Status class wildcard like `2XX`; holds the leading digit.
    Class(u16),
    Default,
}

struct CompiledResponse {
    key: ResponseKey,
    schema: Option<JSONSchema>,
}

struct RequiredParam {
    name: String,
    schema: Option<Value>,
}

struct CompiledOperation {
    required_query: Vec<RequiredParam>,
    required_headers: Vec<String>,
    request_body_required: bool,
    request_schema: Option<JSONSchema>,
    responses: Vec<CompiledResponse>,
}

struct CompiledPath {
    template: String,
    segments: Vec<Segment>,
    operations: HashMap<&'static str, CompiledOperation>,
}

pub struct ApiValidator {
    paths: Vec<CompiledPath>,
    options: ValidatorOptions,
}

impl ApiValidator {
    /// Load and compile the document named by the configuration.
    pub fn load(config: &ApiValidationConfig) -> Result<Self, anyhow::Error> {
        let raw = std::fs::read_to_string(&config.spec_path)?;
        let value: Value = if config.spec_path.ends_with(".json") {
            serde_json::from_str(&raw)?
        } else {
            serde_yaml::from_str(&raw)?
        };
        let validator = Self::from_value(value, config.into())?;

        Ok(validator)
    }

    /// Compile an in-memory document. Structural problems (missing
    /// `paths`, no recognizable version field) are load errors.
    pub fn from_value(document: Value, options: ValidatorOptions) -> Result<Self, anyhow::Error> {
        if document.get("openapi").and_then(Value::as_str).is_none() {
            anyhow::bail!("document has no 'openapi' version field");
        }
        if !document.get("paths").map(Value::is_object).unwrap_or(false) {
            anyhow::bail!("document has no 'paths' object");
        }

        let components = document.get("components").cloned();
        let doc: OpenApiDocument = serde_json::from_value(document)?;

        let mut compiled = Vec::with_capacity(doc.paths.len());
        for (template, item) in &doc.paths {
            let mut operations = HashMap::new();
            for (method, op) in item.operations() {
                operations.insert(
                    method,
                    compile_operation(op, &item.parameters, components.as_ref(), template),
                );
            }
            compiled.push(CompiledPath {
                template: template.clone(),
                segments: parse_template(template),
                operations,
            });
        }

        // Templates with fewer parameters are more specific; try them first
        // so /users/profile wins over /users/{id}.
        compiled.sort_by_key(|p| param_count(&p.segments));

        Ok(Self {
            paths: compiled,
            options,
        })
    }

    pub fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    /// Number of path templates in the index.
    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    /// Resolve a concrete path to its matching template, for diagnostics.
    pub fn match_template(&self, path: &str) -> Option<&str> {
        self.match_path(path).map(|p| p.template.as_str())
    }

    fn match_path(&self, path: &str) -> Option<&CompiledPath> {
        self.paths.iter().find(|p| segments_match(&p.segments, path))
    }

    /// Validate an inbound request before forwarding. The body, when
    /// given, has already been captured into memory.
    pub fn validate_request(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<(), String> {
        let Some(compiled) = self.match_path(path) else {
            if self.options.strict {
                return Err(format!("path not found in API specification: {path}"));
            }
            debug!(path, "path not in API specification, skipping validation");
            return Ok(());
        };

        let Some(op) = compiled.operations.get(method.as_str()) else {
            return Err(format!("method {method} not allowed for path {path}"));
        };

        let present: HashMap<String, String> =
            url::form_urlencoded::parse(query.unwrap_or("").as_bytes())
                .into_owned()
                .collect();

        for param in &op.required_query {
            match present.get(&param.name) {
                None => {
                    return Err(format!("missing required query parameter '{}'", param.name));
                }
                Some(value) => {
                    if let Some(schema) = &param.schema {
                        if !primitive_matches(value, schema) {
                            return Err(format!(
                                "query parameter '{}' does not match its declared type",
                                param.name
                            ));
                        }
                    }
                }
            }
        }

        for name in &op.required_headers {
            if headers.get(name.as_str()).is_none() {
                return Err(format!("missing required header '{name}'"));
            }
        }

        let body = body.filter(|b| !b.is_empty());
        if let Some(schema) = &op.request_schema {
            match body {
                Some(bytes) if is_json_body(headers) => {
                    let instance: Value = serde_json::from_slice(bytes)
                        .map_err(|_| "request body is not valid JSON".to_string())?;
                    if let Some(errors) = schema_errors(schema, &instance) {
                        return Err(format!("request body: {errors}"));
                    }
                }
                Some(_) => {
                    // Non-JSON payload against a JSON schema; nothing to check.
                }
                None if op.request_body_required => {
                    return Err("request body is required".to_string());
                }
                None => {}
            }
        } else if op.request_body_required && body.is_none() {
            return Err("request body is required".to_string());
        }

        Ok(())
    }

    /// Validate a captured response against the operation's declared
    /// responses. Runs after the client has started receiving bytes, so
    /// failures surface as markers, never as a different response.
    pub fn validate_response(
        &self,
        method: &Method,
        path: &str,
        status: u16,
        body: Option<&[u8]>,
    ) -> Result<(), String> {
        let Some(compiled) = self.match_path(path) else {
            if self.options.strict {
                return Err(format!("path not found in API specification: {path}"));
            }
            return Ok(());
        };

        // Method mismatches are reported by the request phase.
        let Some(op) = compiled.operations.get(method.as_str()) else {
            return Ok(());
        };

        if op.responses.is_empty() {
            return Ok(());
        }

        let matched = op
            .responses
            .iter()
            .find(|r| matches!(r.key, ResponseKey::Exact(s) if s == status))
            .or_else(|| {
                op.responses
                    .iter()
                    .find(|r| matches!(r.key, ResponseKey::Class(d) if d == status / 100))
            })
            .or_else(|| {
                op.responses
                    .iter()
                    .find(|r| matches!(r.key, ResponseKey::Default))
            });

        let Some(response) = matched else {
            return Err(format!(
                "response status {status} is not declared for {method} {path}"
            ));
        };

        if let (Some(schema), Some(bytes)) = (&response.schema, body.filter(|b| !b.is_empty())) {
            let instance: Value = serde_json::from_slice(bytes)
                .map_err(|_| "response body is not valid JSON".to_string())?;
            if let Some(errors) = schema_errors(schema, &instance) {
                return Err(format!("response body: {errors}"));
            }
        }

        Ok(())
    }
}

fn compile_operation(
    op: &document::Operation,
    path_params: &[document::Parameter],
    components: Option<&Value>,
    template: &str,
) -> CompiledOperation {
    let mut required_query = Vec::new();
    let mut required_headers = Vec::new();

    for param in path_params.iter().chain(op.parameters.iter()) {
        if !param.required || param.name.is_empty() {
            continue;
        }
        match param.location.as_str() {
            "query" => required_query.push(RequiredParam {
                name: param.name.clone(),
                schema: param.schema.clone(),
            }),
            "header" => required_headers.push(param.name.clone()),
            // Path parameters are satisfied by the template match itself.
            _ => {}
        }
    }

    let (request_body_required, request_schema) = match &op.request_body {
        Some(body) => {
            let schema = json_media_type(&body.content)
                .and_then(|media| media.schema.as_ref())
                .and_then(|schema| compile_schema(schema, components, template));
            (body.required, schema)
        }
        None => (false, None),
    };

    let mut responses = Vec::new();
    for (key, spec) in &op.responses {
        let Some(key) = parse_response_key(key) else {
            warn!(template, key, "unrecognized response status key, ignoring");
            continue;
        };
        let schema = json_media_type(&spec.content)
            .and_then(|media| media.schema.as_ref())
            .and_then(|schema| compile_schema(schema, components, template));
        responses.push(CompiledResponse { key, schema });
    }

    CompiledOperation {
        required_query,
        required_headers,
        request_body_required,
        request_schema,
        responses,
    }
}

/// Compile a schema with the document's `components` attached to the
/// root so `#/components/...` references resolve.
fn compile_schema(
    schema: &Value,
    components: Option<&Value>,
    template: &str,
) -> Option<JSONSchema> {
    let root = match (schema, components) {
        (Value::Object(obj), Some(comps)) => {
            let mut merged = obj.clone();
            merged
                .entry("components".to_string())
                .or_insert_with(|| comps.clone());
            Value::Object(merged)
        }
        _ => schema.clone(),
    };

    match JSONSchema::compile(&root) {
        Ok(compiled) => Some(compiled),
        Err(e) => {
            warn!(template, error = %e, "schema failed to compile, skipping body validation");
            None
        }
    }
}

fn parse_response_key(key: &str) -> Option<ResponseKey> {
    if key.eq_ignore_ascii_case("default") {
        return Some(ResponseKey::Default);
    }
    if let Ok(status) = key.parse::<u16>() {
        if (100..=599).contains(&status) {
            return Some(ResponseKey::Exact(status));
        }
        return None;
    }
    let upper = key.to_ascii_uppercase();
    if upper.len() == 3 && upper.ends_with("XX") {
        if let Some(digit) = upper.chars().next().and_then(|c| c.to_digit(10)) {
            return Some(ResponseKey::Class(digit as u16));
        }
    }
    None
}

fn schema_errors(schema: &JSONSchema, instance: &Value) -> Option<String> {
    match schema.validate(instance) {
        Ok(()) => None,
        Err(errors) => {
            let messages: Vec<String> = errors.take(5).map(|e| e.to_string()).collect();
            Some(messages.join("; "))
        }
    }
}

fn is_json_body(headers: &HeaderMap) -> bool {
    match headers.get(hyper::header::CONTENT_TYPE) {
        Some(value) => value
            .to_str()
            .map(|ct| ct.contains("json"))
            .unwrap_or(false),
        // No declared content type: attempt JSON validation anyway.
        None => true,
    }
}

/// Minimal primitive type check for query parameter schemas.
fn primitive_matches(value: &str, schema: &Value) -> bool {
    match schema.get("type").and_then(Value::as_str) {
        Some("integer") => value.parse::<i64>().is_ok(),
        Some("number") => value.parse::<f64>().is_ok(),
        Some("boolean") => matches!(value, "true" | "false"),
        _ => true,
    }
}

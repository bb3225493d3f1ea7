// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Type conversions between clio's tool types and rmcp's MCP model types.
//!
//! These are pure, stateless functions — no allocation beyond what the output
//! types require.  The bridge sits at the seam between the existing
//! [`clio_tools`] crate and the MCP wire protocol so neither side needs to
//! know about the other.

use std::sync::Arc;

use rmcp::model::{CallToolResult, Content, JsonObject, Tool as McpTool};
use clio_tools::{ToolOutput, ToolOutputPart, ToolSchema};

/// Convert a [`ToolSchema`] (clio) into an rmcp [`Tool`] descriptor.
///
/// The JSON Schema stored in [`ToolSchema::parameters`] is already valid
/// JSON Schema produced by each tool's [`clio_tools::Tool::parameters_schema`]
/// implementation, so we pass it through as the `input_schema` without
/// further processing.
pub fn schema_to_mcp_tool(schema: ToolSchema) -> McpTool {
    let input_schema: JsonObject = value_to_object(schema.parameters);
    McpTool::new(
        std::borrow::Cow::Owned(schema.name),
        std::borrow::Cow::Owned(schema.description),
        Arc::new(input_schema),
    )
}

/// Build a [`JsonObject`] (serde_json::Map) from a raw JSON Schema value.
///
/// MCP requires the schema to be a JSON object; if the provided value is
/// already an object we use it directly, otherwise we wrap it in a minimal
/// `{"type":"object"}` envelope.
fn value_to_object(v: serde_json::Value) -> JsonObject {
    use serde_json::{Map, Value};
    match v {
        Value::Object(m) => m,
        other => {
            let mut m = Map::new();
            m.insert("type".to_string(), Value::String("object".to_string()));
            m.insert("value".to_string(), other);
            m
        }
    }
}

/// Convert a clio [`ToolOutput`] into an rmcp [`CallToolResult`].
///
/// Text parts become [`Content::text`]; image parts (base64 data URIs) become
/// [`Content::image`] with the MIME type extracted from the data URI.
/// The MCP `is_error` flag mirrors clio's [`ToolOutput::is_error`].
pub fn output_to_call_result(output: ToolOutput) -> CallToolResult {
    let content: Vec<Content> = output
        .parts
        .into_iter()
        .map(|part| match part {
            ToolOutputPart::Text(t) => Content::text(t),
            ToolOutputPart::Image(data_uri) => {
                // data URIs: `data:<mime>;base64,<b64>`
                let (mime, data) = parse_data_uri(&data_uri);
                Content::image(data.to_string(), mime.to_string())
            }
        })
        .collect();

    if output.is_error {
        CallToolResult {
            content,
            is_error: Some(true),
            structured_content: None,
            meta: None,
        }
    } else {
        CallToolResult::success(content)
    }
}

/// Split a data URI into its MIME type and base64 payload.
///
/// Falls back to `("application/octet-stream", whole_string)` when the URI
/// does not match the expected format so callers always receive a valid pair.
fn parse_data_uri(uri: &str) -> (&str, &str) {
    // Format: `data:<mime>;base64,<data>`
    if let Some(rest) = uri.strip_prefix("data:") {
        if let Some((mime_part, data)) = rest.split_once(';') {
            if let Some(b64) = data.strip_prefix("base64,") {
                return (mime_part, b64);
            }
        }
    }
    ("application/octet-stream", uri)
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

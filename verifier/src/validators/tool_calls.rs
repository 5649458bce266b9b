//! Tool-call schema conformance.

use super::{marked_records, to_fields, FieldMap, ValidationInput, Validator, ValidatorResult};
use crate::record::ResultRecord;
use jsonschema::JSONSchema;
use model::{ChatRequest, FinishReason, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

const NAME: &str = "tool_calls";
const PREFIX: &str = "tool_calls_";
const MARKER: &str = "tool_calls_finish_reason";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallIssueKind {
    /// The call names a tool the request never offered.
    UnknownTool,
    /// The offered tool declares no parameter schema.
    MissingSchema,
    /// The declared parameter schema does not compile.
    InvalidSchema,
    UnparsableArguments,
    SchemaViolation,
    /// Finish reason says tool calls, but none were emitted.
    NoToolCalls,
}

impl ToolCallIssueKind {
    /// Issues caused by the test case rather than by the model.
    pub fn is_misconfiguration(self) -> bool {
        matches!(
            self,
            Self::UnknownTool | Self::MissingSchema | Self::InvalidSchema
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallIssue {
    /// Position of the call within the response, absent for item-level issues.
    pub index: Option<usize>,
    pub kind: ToolCallIssueKind,
    pub tool: Option<String>,
    pub message: String,
}

/// Per-record fields. `tool_calls_finish_reason` is always written, even as
/// null, because its presence marks the record as checked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ToolCallsFields {
    #[serde(default)]
    tool_calls_finish_reason: Option<FinishReason>,
    #[serde(default)]
    tool_calls_valid: Option<bool>,
    #[serde(default)]
    tool_calls_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls_issues: Vec<ToolCallIssue>,
}

#[derive(Debug, Default, Serialize)]
struct ToolCallsSummary {
    tool_calls_finish_stop: u64,
    tool_calls_finish_tool_calls: u64,
    tool_calls_finish_others: u64,
    tool_calls_finish_others_detail: BTreeMap<String, u64>,
    tool_calls_schema_validation_error_count: u64,
    tool_calls_successful_count: u64,
    tool_calls_total_count: u64,
    tool_calls_count_distribution: BTreeMap<usize, u64>,
    tool_calls_misconfigured_count: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ToolCallsValidator;

impl ToolCallsValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check one emitted call against the tools offered by `request`.
    pub fn check_call(
        &self,
        index: usize,
        call: &ToolCall,
        request: &ChatRequest,
    ) -> Result<(), ToolCallIssue> {
        let name = call.function.name.as_str();
        let issue = |kind, message: String| ToolCallIssue {
            index: Some(index),
            kind,
            tool: Some(name.to_string()),
            message,
        };

        let Some(tool) = request.tool(name) else {
            return Err(issue(
                ToolCallIssueKind::UnknownTool,
                format!("No tool named '{}' was offered", name),
            ));
        };
        let schema = match tool.function.as_ref().and_then(|f| f.parameters.as_ref()) {
            Some(schema) if !is_blank_schema(schema) => schema,
            _ => {
                return Err(issue(
                    ToolCallIssueKind::MissingSchema,
                    format!("No schema for tool '{}'", name),
                ))
            }
        };
        let arguments = parse_arguments(&call.function.arguments)
            .map_err(|message| issue(ToolCallIssueKind::UnparsableArguments, message))?;

        let compiled = JSONSchema::compile(schema).map_err(|e| {
            issue(
                ToolCallIssueKind::InvalidSchema,
                format!("Invalid schema for tool '{}': {}", name, e),
            )
        })?;
        if let Err(errors) = compiled.validate(&arguments) {
            let message = errors
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(issue(ToolCallIssueKind::SchemaViolation, message));
        }
        Ok(())
    }
}

fn is_blank_schema(schema: &Value) -> bool {
    match schema {
        Value::Null | Value::Bool(false) => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Arguments usually arrive JSON-encoded; decoded objects are taken as-is.
fn parse_arguments(arguments: &Value) -> Result<Value, String> {
    match arguments {
        Value::String(text) => {
            serde_json::from_str(text).map_err(|e| format!("Arguments are not valid JSON: {}", e))
        }
        Value::Null => Err("Arguments are missing".to_string()),
        other => Ok(other.clone()),
    }
}

impl Validator for ToolCallsValidator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn field_prefix(&self) -> &'static str {
        PREFIX
    }

    fn marker_field(&self) -> &'static str {
        MARKER
    }

    fn validate(&self, input: &ValidationInput<'_>) -> ValidatorResult<FieldMap> {
        let mut fields = ToolCallsFields::default();

        let choice = input
            .response
            .completion()
            .and_then(|response| response.first_choice());
        let Some(choice) = choice.filter(|_| input.status.is_success()) else {
            return to_fields(NAME, &fields);
        };

        fields.tool_calls_finish_reason = choice.finish_reason.clone();
        if choice.finish_reason != Some(FinishReason::ToolCalls) {
            return to_fields(NAME, &fields);
        }

        let calls = choice.message.tool_calls.as_deref().unwrap_or_default();
        fields.tool_calls_count = calls.len();
        if calls.is_empty() {
            fields.tool_calls_valid = Some(false);
            fields.tool_calls_issues.push(ToolCallIssue {
                index: None,
                kind: ToolCallIssueKind::NoToolCalls,
                tool: None,
                message: "Finish reason is tool_calls but no tool calls were emitted".to_string(),
            });
            return to_fields(NAME, &fields);
        }

        for (index, call) in calls.iter().enumerate() {
            if let Err(issue) = self.check_call(index, call, input.request) {
                debug!(index, kind = ?issue.kind, message = %issue.message, "Tool call rejected");
                fields.tool_calls_issues.push(issue);
            }
        }
        fields.tool_calls_valid = Some(fields.tool_calls_issues.is_empty());

        to_fields(NAME, &fields)
    }

    fn compute_summary(&self, records: &[ResultRecord]) -> ValidatorResult<FieldMap> {
        let mut summary = ToolCallsSummary::default();

        for fields in marked_records::<ToolCallsFields>(records, NAME, PREFIX, MARKER) {
            summary.tool_calls_total_count += fields.tool_calls_count as u64;
            if fields
                .tool_calls_issues
                .iter()
                .any(|issue| issue.kind.is_misconfiguration())
            {
                summary.tool_calls_misconfigured_count += 1;
            }

            match fields.tool_calls_finish_reason {
                Some(FinishReason::Stop) => summary.tool_calls_finish_stop += 1,
                Some(FinishReason::ToolCalls) => {
                    summary.tool_calls_finish_tool_calls += 1;
                    if fields.tool_calls_valid == Some(true) {
                        summary.tool_calls_successful_count += 1;
                    } else {
                        summary.tool_calls_schema_validation_error_count += 1;
                    }
                    *summary
                        .tool_calls_count_distribution
                        .entry(fields.tool_calls_count)
                        .or_default() += 1;
                }
                Some(other) if !other.is_empty() => {
                    summary.tool_calls_finish_others += 1;
                    *summary
                        .tool_calls_finish_others_detail
                        .entry(other.to_string())
                        .or_default() += 1;
                }
                _ => {}
            }
        }

        to_fields(NAME, &summary)
    }
}

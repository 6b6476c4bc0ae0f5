//! MCP tool definitions and dispatch onto the usage pipeline

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::models::{GroupBy, UsageParams};
use crate::pipeline::UsagePipeline;
use crate::retriever::LogStore;

pub const GET_BEDROCK_LOGS: &str = "get_bedrock_logs";
/// Earlier name of [`GET_BEDROCK_LOGS`], still accepted by `tools/call`
pub const GET_BEDROCK_LOGS_DF: &str = "get_bedrock_logs_df";
pub const GET_MODEL_USAGE_STATS: &str = "get_model_usage_stats";
pub const GET_USER_USAGE_STATS: &str = "get_user_usage_stats";
pub const GET_DAILY_USAGE_STATS: &str = "get_daily_usage_stats";

// MCP Tool Types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: ToolInputSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    #[serde(rename = "type")]
    pub type_name: String,
    pub properties: HashMap<String, ToolInputSchemaProperty>,
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchemaProperty {
    #[serde(rename = "type")]
    pub type_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

impl CallToolResult {
    fn text(text: String, is_error: bool) -> Self {
        Self {
            content: vec![ToolContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self::text(message.into(), true)
    }
}

/// Schema shared by every tool: the window and filter arguments
fn window_schema(default_days: u32) -> ToolInputSchema {
    let mut properties = HashMap::new();

    properties.insert(
        "days".to_string(),
        ToolInputSchemaProperty {
            type_name: "integer".to_string(),
            description: format!(
                "Number of days to look back from end_time (or now). Used when start_time is \
                 absent; defaults to {default_days}."
            ),
            format: None,
            minimum: Some(0),
            default: Some(Value::from(default_days)),
        },
    );

    properties.insert(
        "start_time".to_string(),
        ToolInputSchemaProperty {
            type_name: "string".to_string(),
            description: "Inclusive window start, RFC 3339 (e.g. 2025-01-31T00:00:00Z). \
                          Cannot be combined with days."
                .to_string(),
            format: Some("date-time".to_string()),
            minimum: None,
            default: None,
        },
    );

    properties.insert(
        "end_time".to_string(),
        ToolInputSchemaProperty {
            type_name: "string".to_string(),
            description: "Inclusive window end, RFC 3339. Defaults to now.".to_string(),
            format: Some("date-time".to_string()),
            minimum: None,
            default: None,
        },
    );

    properties.insert(
        "filter_pattern".to_string(),
        ToolInputSchemaProperty {
            type_name: "string".to_string(),
            description: "Optional CloudWatch Logs filter pattern, e.g. \
                          { $.modelId = \"amazon.nova-lite-v1:0\" }"
                .to_string(),
            format: None,
            minimum: None,
            default: None,
        },
    );

    ToolInputSchema {
        type_name: "object".to_string(),
        properties,
        required: vec![],
    }
}

/// Every tool this server exposes
pub fn tools_list(default_days: u32) -> ListToolsResult {
    let tool = |name: &str, description: &str| Tool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: window_schema(default_days),
    };

    ListToolsResult {
        tools: vec![
            tool(
                GET_BEDROCK_LOGS,
                "Retrieve Bedrock model invocation logs from CloudWatch as normalized rows: \
                 timestamp, region, model id, caller ARN, input/output/total tokens, latency \
                 and the user prompt text.",
            ),
            tool(
                GET_MODEL_USAGE_STATS,
                "Usage statistics grouped by Bedrock model: invocation count, token sums and \
                 averages, average latency. Sorted by total tokens, highest first.",
            ),
            tool(
                GET_USER_USAGE_STATS,
                "Usage statistics grouped by calling IAM identity, including the models each \
                 identity used. Sorted by total tokens, highest first.",
            ),
            tool(
                GET_DAILY_USAGE_STATS,
                "Usage statistics grouped by UTC calendar day, including the models used each \
                 day. Sorted by total tokens, highest first.",
            ),
        ],
    }
}

/// Map a tool name onto the table it returns; `None` for the raw logs tool
fn tool_group(name: &str) -> Option<Option<GroupBy>> {
    match name {
        GET_BEDROCK_LOGS | GET_BEDROCK_LOGS_DF => Some(None),
        GET_MODEL_USAGE_STATS => Some(Some(GroupBy::Model)),
        GET_USER_USAGE_STATS => Some(Some(GroupBy::User)),
        GET_DAILY_USAGE_STATS => Some(Some(GroupBy::Day)),
        _ => None,
    }
}

/// Run one tool. Failures are reported in the result, not as protocol errors.
pub async fn tools_call<S: LogStore>(
    pipeline: &UsagePipeline<S>,
    request: CallToolRequest,
) -> CallToolResult {
    let Some(group_by) = tool_group(&request.name) else {
        return CallToolResult::error(format!("Unknown tool: {}", request.name));
    };

    let params: UsageParams = match request.arguments {
        None | Some(Value::Null) => UsageParams::default(),
        Some(arguments) => match serde_json::from_value(arguments) {
            Ok(params) => params,
            Err(e) => return CallToolResult::error(format!("Invalid arguments: {e}")),
        },
    };

    let query = match pipeline.resolve(params) {
        Ok(query) => query,
        Err(e) => return CallToolResult::error(e.to_string()),
    };

    info!(
        tool = %request.name,
        start = %query.start_time,
        end = %query.end_time,
        filter = ?query.filter(),
        "Tool call"
    );

    let rendered = match group_by {
        None => pipeline
            .get_raw_logs(&query)
            .await
            .and_then(|r| Ok(serde_json::to_string_pretty(&r)?)),
        Some(group_by) => pipeline
            .get_usage(&query, group_by)
            .await
            .and_then(|r| Ok(serde_json::to_string_pretty(&r)?)),
    };

    match rendered {
        Ok(text) => CallToolResult::text(text, false),
        Err(e) => {
            warn!(tool = %request.name, error = %e, "Tool call failed");
            CallToolResult::error(e.to_string())
        }
    }
}

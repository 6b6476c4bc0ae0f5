//! MCP server - JSON-RPC 2.0 over stdio
//!
//! One JSON message per line in each direction. stdout carries protocol
//! traffic only; logs go to stderr.

#[allow(missing_docs)]
pub mod protocol;
#[allow(missing_docs)]
pub mod tools;

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::pipeline::UsagePipeline;
use crate::retriever::LogStore;

use protocol::{
    error_response, response, RpcError, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use tools::{tools_call, tools_list, CallToolRequest};

/// Dispatches MCP requests onto a [`UsagePipeline`]
pub struct McpServer<S> {
    pipeline: Arc<UsagePipeline<S>>,
}

impl<S: LogStore> McpServer<S> {
    /// Create a server over a pipeline
    pub fn new(pipeline: UsagePipeline<S>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Serve stdin/stdout until EOF or Ctrl+C
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("MCP server listening on stdio");

        tokio::select! {
            result = self.serve(tokio::io::stdin(), tokio::io::stdout()) => {
                info!("stdin closed, shutting down");
                result
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                Ok(())
            }
        }
    }

    /// Serve line-delimited messages from `reader`, answering on `writer`
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(reply) = self.handle_line(&line).await {
                let mut bytes = serde_json::to_vec(&reply)?;
                bytes.push(b'\n');
                writer.write_all(&bytes).await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle one raw message. Notifications produce no reply.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Unparseable message");
                return Some(error_response(
                    Value::Null,
                    &RpcError::new(PARSE_ERROR, format!("Parse error: {e}")),
                ));
            }
        };

        if !message.is_object() {
            warn!("Rejecting non-object message");
            return Some(error_response(
                Value::Null,
                &RpcError::new(INVALID_REQUEST, "Batch requests are not supported"),
            ));
        }

        let id = message.get("id").cloned();
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return id.map(|id| {
                error_response(id, &RpcError::new(INVALID_REQUEST, "Missing method"))
            });
        };

        let Some(id) = id else {
            debug!(method, "Notification");
            return None;
        };

        debug!(method, %id, "Request");
        let params = message.get("params").cloned();

        Some(match self.dispatch(method, params).await {
            Ok(result) => response(id, result),
            Err(error) => {
                warn!(method, code = error.code, reason = %error.message, "Request failed");
                error_response(id, &error)
            }
        })
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, RpcError> {
        match method {
            "initialize" => {
                let request = params
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| RpcError::invalid_params(e.to_string()))?;
                Ok(serde_json::to_value(protocol::initialize(request))?)
            }
            "ping" => Ok(protocol::ping()),
            "tools/list" => Ok(serde_json::to_value(tools_list(self.pipeline.default_days()))?),
            "tools/call" => {
                let request: CallToolRequest = params
                    .ok_or_else(|| RpcError::invalid_params("tools/call requires params"))
                    .and_then(|p| {
                        serde_json::from_value(p)
                            .map_err(|e| RpcError::invalid_params(e.to_string()))
                    })?;
                Ok(serde_json::to_value(tools_call(&self.pipeline, request).await)?)
            }
            "resources/list" => Ok(protocol::resources_list()),
            "prompts/list" => Ok(protocol::prompts_list()),
            _ => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("Unknown method: {method}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::RawLogEvent;
    use crate::retriever::MemoryLogStore;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn server() -> McpServer<MemoryLogStore> {
        let ts = Utc::now() - Duration::minutes(5);
        let doc = json!({
            "timestamp": ts.to_rfc3339(),
            "modelId": "titan",
            "input": { "inputTokenCount": 5 },
            "output": { "outputTokenCount": 5 }
        });
        let store = MemoryLogStore::new(vec![RawLogEvent::new(ts.timestamp_millis(), doc.to_string())]);
        McpServer::new(UsagePipeline::new(store, &Config::default()))
    }

    #[tokio::test]
    async fn test_initialize() {
        let reply = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"test-client","version":"1.0.0"}}}"#)
            .await
            .unwrap();

        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["serverInfo"]["name"], "bedrock-usage");
        assert_eq!(reply["result"]["protocolVersion"], "2024-11-05");
        assert!(reply["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_notification_has_no_reply() {
        let reply = server()
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(reply.is_none());
    }

    #[rstest]
    #[case(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#, json!({}))]
    #[case(r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#, json!({"resources": []}))]
    #[case(r#"{"jsonrpc":"2.0","id":2,"method":"prompts/list"}"#, json!({"prompts": []}))]
    #[tokio::test]
    async fn test_simple_methods(#[case] line: &str, #[case] expected: Value) {
        let reply = server().handle_line(line).await.unwrap();
        assert_eq!(reply["result"], expected);
    }

    #[rstest]
    #[case("not json", -32700)]
    #[case(r#"{"jsonrpc":"2.0","id":3,"method":"sampling/createMessage"}"#, -32601)]
    #[case(r#"{"jsonrpc":"2.0","id":3,"method":"tools/call"}"#, -32602)]
    #[case(r#"{"jsonrpc":"2.0","id":3}"#, -32600)]
    #[case(r#"[{"jsonrpc":"2.0","id":4,"method":"ping"}]"#, -32600)]
    #[tokio::test]
    async fn test_error_codes(#[case] line: &str, #[case] code: i64) {
        let reply = server().handle_line(line).await.unwrap();
        assert_eq!(reply["error"]["code"], code);
    }

    #[tokio::test]
    async fn test_batch_answered_with_null_id() {
        let reply = server()
            .handle_line(r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"}]"#)
            .await
            .unwrap();

        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_tools_call_round_trip() {
        let reply = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":"abc","method":"tools/call","params":{"name":"get_model_usage_stats","arguments":{"days":1}}}"#)
            .await
            .unwrap();

        assert_eq!(reply["id"], "abc");
        assert_eq!(reply["result"]["isError"], false);
        let text = reply["result"]["content"][0]["text"].as_str().unwrap();
        let body: Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["rows"][0]["key"], "titan");
        assert_eq!(body["rows"][0]["total_tokens"], 10);
    }

    #[tokio::test]
    async fn test_serve_answers_each_request_line() {
        let input = [
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        ]
        .join("\n");
        let mut output = Vec::new();

        server().serve(input.as_bytes(), &mut output).await.unwrap();

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[1]["id"], 2);
        assert_eq!(replies[1]["result"]["tools"].as_array().unwrap().len(), 4);
    }
}

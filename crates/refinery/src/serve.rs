//! Tool server that exposes the critique-refine loop to MCP clients.
//!
//! Requests arrive as newline-delimited JSON-RPC on stdin and responses are
//! written to stdout, one per line. Events and diagnostics go to stderr so
//! they never interleave with the protocol stream.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use refinery_core::{CritiqueRefineLoop, RunLog, RunLogger};
use refinery_critic::RoleTemplateStore;
use refinery_logging::EventSink;
use refinery_model::ModelInvoker;

use crate::config::{ProjectConfig, RunOverrides};

pub const LOOP_TOOL: &str = "run_critique_refine_loop";

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Tool definition for the MCP `tools/list` response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Tool call result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct LoopArguments {
    content_to_improve: String,
    strategy_name: String,
    #[serde(default)]
    custom_roles: Option<Vec<String>>,
    #[serde(default)]
    iterations: Option<usize>,
}

/// Payload of a loop tool call, serialised into the text content
#[derive(Debug, Serialize)]
pub struct LoopToolOutput {
    pub final_content: String,
    pub run_log: Option<RunLog>,
    pub error: Option<String>,
}

impl LoopToolOutput {
    fn failed(error: String) -> Self {
        Self {
            final_content: String::new(),
            run_log: None,
            error: Some(error),
        }
    }
}

pub struct ToolServer<'a> {
    project: &'a ProjectConfig,
    invoker: &'a dyn ModelInvoker,
    templates: &'a dyn RoleTemplateStore,
    run_logger: &'a dyn RunLogger,
    events: Arc<dyn EventSink>,
    dry_run: bool,
}

impl<'a> ToolServer<'a> {
    pub fn new(
        project: &'a ProjectConfig,
        invoker: &'a dyn ModelInvoker,
        templates: &'a dyn RoleTemplateStore,
        run_logger: &'a dyn RunLogger,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            project,
            invoker,
            templates,
            run_logger,
            events,
            dry_run: false,
        }
    }

    /// Mock every model call made through this server
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn list_tools(&self) -> Vec<ToolDef> {
        vec![ToolDef {
            name: LOOP_TOOL.to_string(),
            description: "Executes a full critique-refine loop on a given piece of text or code using a specified strategy and optional custom roles.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content_to_improve": {
                        "type": "string",
                        "description": "Prompt or text the loop starts from"
                    },
                    "strategy_name": {
                        "type": "string",
                        "description": "Strategy from refinery.toml; empty for the configured defaults"
                    },
                    "custom_roles": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Critic roles to run together instead of the strategy's"
                    },
                    "iterations": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Maximum critique-refine rounds"
                    }
                },
                "required": ["content_to_improve", "strategy_name"]
            }),
        }]
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        if name != LOOP_TOOL {
            return text_result(format!("Unknown tool: {}", name), true);
        }

        let args: LoopArguments = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return text_result(format!("Invalid arguments: {}", e), true),
        };

        let output = self.run_loop(args).await;
        let is_error = output.error.is_some();
        match serde_json::to_string_pretty(&output) {
            Ok(text) => text_result(text, is_error),
            Err(e) => text_result(format!("Failed to serialize result: {}", e), true),
        }
    }

    async fn run_loop(&self, args: LoopArguments) -> LoopToolOutput {
        tracing::info!(strategy = %args.strategy_name, "Starting critique-refine loop");

        let overrides = RunOverrides {
            strategy: Some(args.strategy_name).filter(|name| !name.is_empty()),
            multi_critic_roles: args.custom_roles.filter(|roles| !roles.is_empty()),
            max_rounds: args.iterations,
            dry_run: self.dry_run,
            ..Default::default()
        };
        let config = match self.project.resolve_run(&overrides) {
            Ok(config) => config,
            Err(e) => return LoopToolOutput::failed(format!("{:#}", e)),
        };

        let engine = CritiqueRefineLoop::new(config, self.invoker, self.templates, self.run_logger)
            .with_events(self.events.clone())
            .with_metadata("entry_point", json!(LOOP_TOOL));

        match engine.run(&args.content_to_improve, None).await {
            Ok((final_content, log)) => LoopToolOutput {
                final_content,
                run_log: Some(log),
                error: None,
            },
            Err(e) => {
                tracing::error!("Critique-refine loop failed: {}", e);
                LoopToolOutput::failed(e.to_string())
            }
        }
    }

    /// Handle one JSON-RPC message; notifications get no response
    pub async fn handle_request(&self, request: Value) -> Option<Value> {
        let id = request.get("id").cloned()?;
        let method = request["method"].as_str().unwrap_or("");

        let result = match method {
            "initialize" => json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
            "ping" => json!({}),
            "tools/list" => json!({ "tools": self.list_tools() }),
            "tools/call" => {
                let name = request["params"]["name"].as_str().unwrap_or("");
                let arguments = request["params"]["arguments"].clone();
                let result = self.call_tool(name, arguments).await;
                serde_json::to_value(result).unwrap_or(Value::Null)
            }
            _ => {
                return Some(error_response(
                    id,
                    -32601,
                    format!("Method not found: {}", method),
                ));
            }
        };

        Some(json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": id
        }))
    }

    /// Answer requests line by line until the reader is exhausted
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<Value>(line) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => Some(error_response(
                    Value::Null,
                    -32700,
                    format!("Parse error: {}", e),
                )),
            };

            if let Some(response) = response {
                let mut out = serde_json::to_string(&response)?;
                out.push('\n');
                writer.write_all(out.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }
}

fn text_result(text: String, is_error: bool) -> ToolResult {
    ToolResult {
        content: vec![ToolContent::Text { text }],
        is_error,
    }
}

fn error_response(id: Value, code: i64, message: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": id
    })
}

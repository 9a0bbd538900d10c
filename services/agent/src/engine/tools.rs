//! Connects the engine's function calls to the session's MCP tool server.

use anyhow::{Context, Result};
use gemini_realtime::FunctionDeclaration;
use rmcp::{
    ServiceExt,
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tutor_core::tools::ToolRegistry;

const NO_RESULT: &str = "The tool finished without returning anything.";

/// An MCP client wired to a [`ToolRegistry`] served over an in-memory duplex pipe.
pub struct ToolBridge {
    client: RunningService<RoleClient, ()>,
    server: JoinHandle<()>,
}

impl ToolBridge {
    pub async fn start(registry: ToolRegistry) -> Result<Self> {
        let (server_transport, client_transport) = tokio::io::duplex(4096);

        let server = tokio::spawn(async move {
            if let Ok(service) = registry.serve(server_transport).await {
                let _ = service.waiting().await;
            }
        });
        let client = ().serve(client_transport).await?;

        Ok(Self { client, server })
    }

    /// Function declarations for every registered tool, in the schema dialect the
    /// Live API accepts.
    pub async fn declarations(&self) -> Result<Vec<FunctionDeclaration>> {
        self.client
            .list_all_tools()
            .await
            .context("Failed to list session tools")?
            .into_iter()
            .map(|t| {
                let schema = serde_json::to_value(&*t.input_schema)?;
                Ok(FunctionDeclaration {
                    name: t.name.to_string(),
                    description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                    parameters: declared_parameters(schema),
                })
            })
            .collect()
    }

    /// Calls a tool by name. Always yields a sentence the engine can speak.
    pub async fn call(&self, name: &str, args: Option<Value>) -> String {
        let arguments = match args {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        };
        info!(tool = %name, "Engine requested tool call");

        let result = match self
            .client
            .peer()
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool call failed");
                return format!("The {name} tool is not available right now.");
            }
        };

        result
            .content
            .and_then(|mut content| content.pop())
            .and_then(|annotated| match annotated.raw {
                RawContent::Text(text_content) => Some(text_content.text),
                _ => None,
            })
            .unwrap_or_else(|| NO_RESULT.to_string())
    }
}

impl Drop for ToolBridge {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Reduces a JSON Schema to the OpenAPI subset used for function declarations.
///
/// Returns `None` for tools without parameters.
fn declared_parameters(schema: Value) -> Option<Value> {
    let schema = sanitize_schema(schema);
    let has_properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|p| !p.is_empty());
    has_properties.then_some(schema)
}

fn sanitize_schema(schema: Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                match key.as_str() {
                    "$schema" | "title" | "definitions" | "$defs" | "additionalProperties" => {}
                    // `["string", "null"]` becomes `"string"` plus `nullable`.
                    "type" => match value {
                        Value::Array(types) => {
                            let mut concrete = types.into_iter().filter(|t| t != "null");
                            if let Some(first) = concrete.next() {
                                out.insert("type".to_string(), first);
                            }
                            out.insert("nullable".to_string(), Value::Bool(true));
                        }
                        other => {
                            out.insert(key, other);
                        }
                    },
                    "properties" => {
                        let properties = match value {
                            Value::Object(props) => props
                                .into_iter()
                                .map(|(name, prop)| (name, sanitize_schema(prop)))
                                .collect(),
                            _ => Map::new(),
                        };
                        out.insert(key, Value::Object(properties));
                    }
                    _ => {
                        out.insert(key, sanitize_schema(value));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_schema).collect()),
        other => other,
    }
}

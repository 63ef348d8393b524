use async_trait::async_trait;
use foreman_core::{ForemanError, Message, Result, Role, ToolCall, ToolCallDelta};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::provider::*;

/// OpenAI-compatible chat completions model (OpenAI, Azure, vLLM, etc.)
pub struct OpenAiModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    settings: ModelSettings,
}

impl OpenAiModel {
    pub fn new(api_key: String, settings: ModelSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            settings,
        }
    }

    /// Use a custom base URL (for Azure, vLLM, local gateways)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn body(&self, system: &str, messages: &[Message], tools: Vec<Value>) -> Value {
        let mut wire = vec![json!({ "role": "system", "content": system })];
        wire.extend(messages.iter().map(wire_message));

        let mut body = json!({
            "model": &self.settings.model,
            "temperature": self.settings.temperature,
            "messages": wire,
        });

        // Newer OpenAI models (o1, o3, gpt-5, …) require max_completion_tokens
        if uses_max_completion_tokens(&self.settings.model) {
            body["max_completion_tokens"] = json!(self.settings.max_tokens);
        } else {
            body["max_tokens"] = json!(self.settings.max_tokens);
        }

        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["parallel_tool_calls"] = json!(false);
        }
        body
    }

    fn decision_body(&self, request: &DecisionRequest) -> Value {
        let tool = &request.decision;
        let tools = if tool.routes.is_empty() {
            vec![]
        } else {
            vec![function(&tool.name, &tool.description, tool.parameters())]
        };
        self.body(&request.system, &request.messages, tools)
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| ForemanError::Model(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status.as_u16() == 429 {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ForemanError::RateLimited { retry_after_secs });
        }
        let text = resp.text().await.unwrap_or_default();
        Err(ForemanError::Model(format!("HTTP {status}: {text}")))
    }

    async fn complete(&self, body: &Value) -> Result<Message> {
        let data: Value = self
            .post(body)
            .await?
            .json()
            .await
            .map_err(|e| ForemanError::Model(e.to_string()))?;

        let choice = &data["choices"][0]["message"];
        let content = choice["content"].as_str().unwrap_or("").to_string();
        let tool_calls = choice["tool_calls"]
            .as_array()
            .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
            .unwrap_or_default();

        Ok(Message::ai(content).with_tool_calls(tool_calls))
    }
}

#[async_trait]
impl ModelCapability for OpenAiModel {
    fn name(&self) -> &str {
        "openai"
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Message> {
        debug!(model = %self.settings.model, tool = %request.decision.name, "requesting decision");
        self.complete(&self.decision_body(request)).await
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<Vec<Value>> {
        let target = &request.target;
        let mut body = self.body(
            &request.instruction,
            &request.messages,
            vec![function(&target.name, &target.description, target.schema.clone())],
        );
        body["tool_choice"] = json!({
            "type": "function",
            "function": { "name": target.name },
        });

        info!(model = %self.settings.model, kind = %target.name, "requesting extraction");
        let message = self.complete(&body).await?;
        Ok(message
            .tool_calls
            .into_iter()
            .filter(|c| c.name == target.name)
            .map(|c| c.args)
            .collect())
    }

    async fn stream_decide(&self, request: &DecisionRequest) -> Result<mpsc::Receiver<ModelChunk>> {
        let mut body = self.decision_body(request);
        body["stream"] = json!(true);

        let resp = self.post(&body).await?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = resp.bytes_stream();
            let mut lines = SseLines::default();
            let mut assembler = StreamAssembler::default();

            while let Some(chunk_result) = stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(ModelChunk::Error(e.to_string())).await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        let _ = tx.send(ModelChunk::Complete(assembler.finish())).await;
                        return;
                    }
                    let Ok(event) = serde_json::from_str::<Value>(data) else {
                        continue;
                    };
                    for chunk in assembler.push(&event["choices"][0]["delta"]) {
                        if tx.send(chunk).await.is_err() {
                            return;
                        }
                    }
                }
            }
            // Stream ended without [DONE]
            let _ = tx.send(ModelChunk::Complete(assembler.finish())).await;
        });

        Ok(rx)
    }
}

/// Splits a byte stream into complete lines. Bytes are decoded only once
/// their line is complete, so a character split across network chunks
/// survives intact.
#[derive(Default)]
struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = vec![];
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }
}

/// Accumulates SSE deltas into the final message while re-emitting them
/// as chunks.
#[derive(Default)]
struct StreamAssembler {
    content: String,
    /// index -> (id, name, arguments_json)
    tool_calls: BTreeMap<usize, (String, String, String)>,
}

impl StreamAssembler {
    fn push(&mut self, delta: &Value) -> Vec<ModelChunk> {
        let mut out = vec![];
        if let Some(text) = delta["content"].as_str()
            && !text.is_empty()
        {
            self.content.push_str(text);
            out.push(ModelChunk::TextDelta(text.to_string()));
        }
        if let Some(tcs) = delta["tool_calls"].as_array() {
            for tc in tcs {
                let index = tc["index"].as_u64().unwrap_or(0) as usize;
                let entry = self.tool_calls.entry(index).or_default();
                let id = tc["id"].as_str().map(str::to_string);
                let name = tc["function"]["name"].as_str().map(str::to_string);
                let args = tc["function"]["arguments"].as_str().unwrap_or("").to_string();
                if let Some(id) = &id {
                    entry.0 = id.clone();
                }
                if let Some(name) = &name {
                    entry.1.push_str(name);
                }
                entry.2.push_str(&args);
                out.push(ModelChunk::ToolCallDelta(ToolCallDelta {
                    index,
                    id,
                    name,
                    args,
                }));
            }
        }
        out
    }

    fn finish(self) -> Message {
        let tool_calls = self
            .tool_calls
            .into_values()
            .map(|(id, name, args)| ToolCall {
                id,
                name,
                args: serde_json::from_str(&args).unwrap_or_default(),
            })
            .collect();
        Message::ai(self.content).with_tool_calls(tool_calls)
    }
}

fn function(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

fn wire_message(msg: &Message) -> Value {
    match msg.role {
        Role::System => json!({ "role": "system", "content": msg.content }),
        Role::Human => json!({ "role": "user", "content": msg.content }),
        Role::Ai if msg.tool_calls.is_empty() => {
            json!({ "role": "assistant", "content": msg.content })
        }
        Role::Ai => {
            let tc: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.args.to_string(),
                        }
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                Value::Null
            } else {
                json!(msg.content)
            };
            json!({ "role": "assistant", "content": content, "tool_calls": tc })
        }
        Role::Tool => match &msg.tool_call_id {
            Some(id) => json!({ "role": "tool", "tool_call_id": id, "content": msg.content }),
            // Uncorrelated tool output would be rejected by the API
            None => json!({ "role": "user", "content": msg.content }),
        },
    }
}

fn parse_tool_call(c: &Value) -> Option<ToolCall> {
    Some(ToolCall {
        id: c["id"].as_str()?.to_string(),
        name: c["function"]["name"].as_str()?.to_string(),
        args: serde_json::from_str(c["function"]["arguments"].as_str().unwrap_or("{}"))
            .unwrap_or_default(),
    })
}

/// Returns true for models that require `max_completion_tokens` instead of `max_tokens`.
fn uses_max_completion_tokens(model: &str) -> bool {
    let m = model.to_lowercase();
    m.starts_with("o1")
        || m.starts_with("o3")
        || m.starts_with("o4")
        || m.contains("gpt-5")
        || m.contains("gpt5")
}

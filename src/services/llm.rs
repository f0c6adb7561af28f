use crate::config::LlmConfig;
use anyhow::{anyhow, Result};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessage,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestToolMessage, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionTool, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObject, Role,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

/// Provider-neutral chat transcript entry.
#[derive(Debug, Clone)]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One model turn. `content` stays a raw JSON value because providers
/// reply with either a plain string or a structured list of parts.
#[derive(Debug, Clone)]
pub struct ModelTurn {
    pub content: Value,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Injected model capability. Transport failures and malformed replies are
/// first-class outcomes for callers, never panics.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        temperature: f32,
    ) -> Result<ModelTurn>;
}

/// Chat-completions client for any OpenAI-compatible endpoint (Zhipu or a
/// custom HEALTH_LLM_API_BASE deployment).
pub struct OpenAiCompatModel {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompatModel {
    pub fn new(config: &LlmConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key.clone())
            .with_api_base(config.api_base.clone());
        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
        }
    }
}

#[allow(deprecated)]
fn map_message(message: &ChatMessage) -> ChatCompletionRequestMessage {
    match message {
        ChatMessage::System(content) => {
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                role: Role::System,
                content: content.clone(),
                name: None,
            })
        }
        ChatMessage::User(content) => {
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                role: Role::User,
                content: ChatCompletionRequestUserMessageContent::Text(content.clone()),
                name: None,
            })
        }
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
            role: Role::Assistant,
            content: content.clone(),
            name: None,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls.iter().map(map_tool_call).collect())
            },
            function_call: None,
        }),
        ChatMessage::Tool { call_id, content } => {
            ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
                role: Role::Tool,
                content: content.clone(),
                tool_call_id: call_id.clone(),
            })
        }
    }
}

fn map_tool_call(call: &ToolCallRequest) -> ChatCompletionMessageToolCall {
    ChatCompletionMessageToolCall {
        id: call.id.clone(),
        r#type: ChatCompletionToolType::Function,
        function: FunctionCall {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        },
    }
}

fn map_tool_spec(spec: &ToolSpec) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: spec.name.clone(),
            description: Some(spec.description.clone()),
            parameters: Some(spec.parameters.clone()),
        },
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatModel {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        temperature: f32,
    ) -> Result<ModelTurn> {
        let mapped: Vec<ChatCompletionRequestMessage> = messages.iter().map(map_message).collect();

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(mapped)
            .temperature(temperature);
        if !tools.is_empty() {
            builder.tools(tools.iter().map(map_tool_spec).collect::<Vec<_>>());
        }
        let request = builder.build()?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| anyhow!("chat completion failed: {e}"))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("chat completion returned no choices"))?;

        let content = choice
            .message
            .content
            .map(Value::String)
            .unwrap_or(Value::Null);
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCallRequest {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        Ok(ModelTurn {
            content,
            tool_calls,
        })
    }
}

//! Shared fixtures for orchestrator integration tests.

// Each test binary uses a different subset of these fixtures.
#![allow(dead_code)]

use async_trait::async_trait;
use genesis_graph::llm::{ChatModel, ChatRequest, ChatResponse};
use genesis_graph::{GraphError, Message};
use genesis_orchestrator::config::GenesisConfig;
use genesis_orchestrator::executor::isolation::IsolationMode;
use genesis_tools::{NativeTool, ParamType, ToolMetadata, ToolRegistry, WorkflowType};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

/// A [`ChatModel`] that replays a fixed queue of JSON replies.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Value>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Value>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, _request: ChatRequest) -> genesis_graph::Result<ChatResponse> {
        let reply = self
            .replies
            .lock()
            .expect("scripted model lock")
            .pop_front()
            .ok_or_else(|| GraphError::Llm("scripted model ran out of replies".to_string()))?;
        Ok(ChatResponse::new(Message::assistant(reply.to_string())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Config rooted at a temp dir with native (in-process) execution.
pub fn test_config(root: &Path) -> GenesisConfig {
    GenesisConfig {
        project_root: root.to_path_buf(),
        inputs_root: root.join("inputs"),
        outputs_root: root.join("outputs"),
        tools_dir: root.join("tools"),
        isolation_mode: IsolationMode::None,
        keep_workspace: true,
        tool_timeout: std::time::Duration::from_secs(30),
        python_bin: "python3".to_string(),
    }
}

pub fn tool_meta(
    name: &str,
    input_param: &str,
    input: WorkflowType,
    output: WorkflowType,
) -> ToolMetadata {
    let mut param_types = BTreeMap::new();
    param_types.insert(input_param.to_string(), ParamType::Workflow(input));
    param_types.insert("return".to_string(), ParamType::Workflow(output));
    ToolMetadata {
        name: name.to_string(),
        description: format!("Execute {name}"),
        input_key: input_param.to_string(),
        output_key: "return".to_string(),
        input_params: vec![input_param.to_string()],
        output_params: vec!["return".to_string()],
        param_types,
        required_inputs: BTreeMap::new(),
        default_params: BTreeMap::new(),
        module: None,
    }
}

/// Registry with the image-translation tool pair used across scenarios:
/// `image_ocr: ImageFile -> StructuredData` and
/// `translate: StructuredData -> StructuredData`.
pub fn image_registry(ocr: NativeTool, translate: NativeTool) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register_native(
            tool_meta(
                "image_ocr",
                "input_path",
                WorkflowType::ImageFile,
                WorkflowType::StructuredData,
            ),
            ocr,
        )
        .expect("register image_ocr");

    let mut translate_meta = tool_meta(
        "translate",
        "text_data",
        WorkflowType::StructuredData,
        WorkflowType::StructuredData,
    );
    translate_meta.input_params.push("model".to_string());
    translate_meta.input_params.push("target_language".to_string());
    translate_meta.param_types.insert(
        "model".to_string(),
        ParamType::Model("BaseChatModel".to_string()),
    );
    translate_meta
        .param_types
        .insert("target_language".to_string(), ParamType::Str);
    translate_meta
        .default_params
        .insert("target_language".to_string(), json!("english"));
    translate_meta
        .default_params
        .insert("model".to_string(), Value::Null);
    registry
        .register_native(translate_meta, translate)
        .expect("register translate");

    registry
}

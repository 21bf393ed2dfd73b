//! End-to-end orchestrator scenarios driven by a scripted model and
//! native tools, covering the full request lifecycle through the NDJSON
//! streaming boundary.

mod support;

use genesis_checkpoint::InMemorySaver;
use genesis_orchestrator::config::GenesisConfig;
use genesis_orchestrator::orchestrator::Orchestrator;
use genesis_orchestrator::repo::memory::{
    InMemoryMessageRepo, InMemoryStateRepo, InMemoryVectorStore,
};
use genesis_orchestrator::repo::{MessageKind, MessageRepo, Precedent, VectorStore};
use genesis_orchestrator::stream::{message_event_stream, RunRequest, StreamDeps};
use genesis_tools::{ToolRegistry, WorkflowType};
use futures::StreamExt;
use genesis_graph::Message;
use serde_json::{json, Value};
use std::sync::Arc;
use support::{image_registry, test_config, tool_meta, ScriptedModel};

struct Harness {
    orchestrator: Arc<Orchestrator>,
    messages: Arc<InMemoryMessageRepo>,
    states: Arc<InMemoryStateRepo>,
    config: GenesisConfig,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new(replies: Vec<Value>, registry: ToolRegistry) -> Self {
        Self::with_precedents(replies, registry, Vec::new())
    }

    fn with_precedents(
        replies: Vec<Value>,
        registry: ToolRegistry,
        precedents: Vec<Precedent>,
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());

        let vectors = Arc::new(InMemoryVectorStore::new());
        for precedent in precedents {
            let vectors = vectors.clone();
            futures::executor::block_on(async move {
                vectors.save(precedent).await.expect("seed precedent");
            });
        }

        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedModel::new(replies)),
            Arc::new(registry),
            vectors,
            Arc::new(InMemorySaver::new()),
            config.clone(),
        )
        .expect("orchestrator");

        Self {
            orchestrator: Arc::new(orchestrator),
            messages: Arc::new(InMemoryMessageRepo::new()),
            states: Arc::new(InMemoryStateRepo::new()),
            config,
            _dir: dir,
        }
    }

    /// Run one request through the streaming boundary; returns the
    /// decoded NDJSON events.
    async fn run(
        &self,
        chat_id: &str,
        text: &str,
        conversation: Vec<Message>,
        interrupted: bool,
    ) -> Vec<Value> {
        let user = self
            .messages
            .create_message(chat_id, "user", text, Vec::new(), MessageKind::Question)
            .await
            .unwrap();
        let assistant = self
            .messages
            .create_message(chat_id, "assistant", "", Vec::new(), MessageKind::Response)
            .await
            .unwrap();

        let stream = message_event_stream(
            self.orchestrator.clone(),
            StreamDeps {
                messages: self.messages.clone(),
                states: self.states.clone(),
            },
            self.config.clone(),
            RunRequest {
                chat_id: chat_id.to_string(),
                user_message_id: user.id,
                assistant_message_id: assistant.id.clone(),
                messages: conversation,
                interrupted,
                feedback: text.to_string(),
            },
        );

        let lines: Vec<String> = stream.collect().await;
        lines
            .iter()
            .map(|line| serde_json::from_str(line.trim()).expect("valid ndjson"))
            .collect()
    }

    async fn assistant_record(
        &self,
        events: &[Value],
    ) -> genesis_orchestrator::repo::MessageRecord {
        let persisted = events.last().expect("events");
        let id = persisted["data"]["assistant_message_id"]
            .as_str()
            .expect("assistant id");
        self.messages.get_message(id).await.unwrap().expect("record")
    }
}

fn updated_nodes(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .filter(|e| e["type"] == "updates")
        .filter_map(|e| {
            e["data"]
                .as_object()
                .and_then(|o| o.keys().next().cloned())
        })
        .collect()
}

fn node_update<'a>(events: &'a [Value], node: &str) -> Option<&'a Value> {
    events
        .iter()
        .filter(|e| e["type"] == "updates")
        .filter_map(|e| e["data"].get(node))
        .last()
}

#[tokio::test]
async fn scenario_trivial_text_round_trip() {
    let harness = Harness::new(
        vec![
            json!({
                "objective": "greet the user",
                "input_type": "text",
                "output_type": "text",
                "is_complex": false,
                "reasoning": "plain conversational request",
                "clarification_question": null
            }),
            json!({
                "is_complete": true,
                "response": "Hi",
                "reasoning": "greeting needs no tools"
            }),
        ],
        ToolRegistry::new(),
    );

    let events = harness
        .run("c1", "Say hi", vec![Message::human("Say hi")], false)
        .await;

    let nodes = updated_nodes(&events);
    assert_eq!(nodes, vec!["precedent", "classify", "finalize"]);
    assert!(!nodes.contains(&"find_path".to_string()));
    assert!(!nodes.contains(&"route".to_string()));
    assert!(!nodes.contains(&"execute".to_string()));

    let finalize = node_update(&events, "finalize").unwrap();
    assert_eq!(finalize["response"], "Hi");

    let persisted = events.last().unwrap();
    assert_eq!(persisted["type"], "persisted");
    assert_eq!(persisted["data"]["message_type"], "response");

    let record = harness.assistant_record(&events).await;
    assert_eq!(record.content, "Hi");
    assert_eq!(record.kind, MessageKind::Response);
}

#[tokio::test]
async fn scenario_clarification_round_trip() {
    let clarification = "Which file should I process, and into what?";
    let harness = Harness::new(
        vec![
            // First run: the classifier needs more information.
            json!({
                "objective": "process a file",
                "input_type": "text",
                "output_type": "text",
                "is_complex": true,
                "reasoning": "no file or goal specified",
                "clarification_question": clarification
            }),
            // Second run (after feedback): trivial completion.
            json!({
                "objective": "translate png to english",
                "input_type": "text",
                "output_type": "text",
                "is_complex": false,
                "reasoning": "feedback received",
                "clarification_question": null
            }),
            json!({
                "is_complete": true,
                "response": "Understood, translating your png.",
                "reasoning": "done"
            }),
        ],
        ToolRegistry::new(),
    );

    let conversation = Orchestrator::build_messages(Some("process my file"), Vec::new());
    let events = harness
        .run("c1", "process my file", conversation, false)
        .await;

    // The classify update routes to waiting_for_feedback, which fires
    // the interrupt.
    let classify = node_update(&events, "classify").unwrap();
    assert_eq!(classify["next_node"], "waiting_for_feedback");
    let waiting = node_update(&events, "waiting_for_feedback").unwrap();
    assert_eq!(waiting["__interrupt__"][0], clarification);

    // The suspended thread's checkpoint is inspectable.
    let frozen = harness
        .orchestrator
        .get_state(&genesis_graph::RunConfig::new("c1"))
        .await
        .unwrap()
        .expect("suspended state");
    assert_eq!(frozen["classify_clarification"], clarification);

    let persisted = events.last().unwrap();
    assert_eq!(persisted["data"]["message_type"], "question");
    let record = harness.assistant_record(&events).await;
    assert_eq!(record.content, clarification);
    assert_eq!(record.kind, MessageKind::Question);

    // Follow-up with interrupted=true resumes and completes normally.
    let events = harness
        .run(
            "c1",
            "translate the uploaded png to English",
            Vec::new(),
            true,
        )
        .await;
    let persisted = events.last().unwrap();
    assert_eq!(persisted["data"]["message_type"], "response");
    let record = harness.assistant_record(&events).await;
    assert_eq!(record.content, "Understood, translating your png.");
}

#[tokio::test]
async fn scenario_single_tool_pipeline() {
    // Registry with OCR alone, so exactly one candidate path exists.
    let mut registry = ToolRegistry::new();
    registry
        .register_native(
            tool_meta(
                "image_ocr",
                "input_path",
                WorkflowType::ImageFile,
                WorkflowType::StructuredData,
            ),
            Arc::new(|args| {
                let path = args["input_path"].as_str().unwrap_or_default();
                assert!(path.ends_with("foo.png"), "unresolved path: {path}");
                Ok(json!([{"text": "HELLO WORLD"}]))
            }),
        )
        .unwrap();

    let harness = Harness::new(
        vec![
            json!({
                "objective": "extract text from the uploaded image",
                "input_type": "imagefile",
                "output_type": "structureddata",
                "is_complex": true,
                "reasoning": "image input requires OCR tooling"
            }),
            json!({
                "path": [{"name": "image_ocr", "param_values": {"input_path": "foo.png"}}],
                "reasoning": "single OCR step suffices"
            }),
            json!({
                "is_complete": true,
                "response": "The image says: HELLO WORLD",
                "reasoning": "report extracted text"
            }),
        ],
        registry,
    );

    // Stage the upload so input resolution finds it.
    let inputs = harness.config.chat_inputs("c1");
    std::fs::create_dir_all(&inputs).unwrap();
    std::fs::write(inputs.join("foo.png"), b"fake-png").unwrap();

    let prompt = "extract text from my image\n\n<file>inputs/c1/foo.png</file>";
    let events = harness
        .run("c1", prompt, vec![Message::human(prompt)], false)
        .await;

    let find_path = node_update(&events, "find_path").unwrap();
    let all_paths = find_path["all_paths"].as_array().unwrap();
    assert_eq!(all_paths.len(), 1);
    assert_eq!(all_paths[0][0]["name"], "image_ocr");

    let route = node_update(&events, "route").unwrap();
    assert_eq!(route["chosen_path"][0]["name"], "image_ocr");
    assert!(route["chosen_path"][0]["param_values"]["input_path"]
        .as_str()
        .unwrap()
        .contains("foo.png"));

    // At least one custom event carries the tool's output line.
    let tool_lines: Vec<&Value> = events
        .iter()
        .filter(|e| e["type"] == "custom" && e["data"]["tool_name"] == "image_ocr")
        .filter(|e| e["data"].get("stdout").is_some())
        .collect();
    assert!(!tool_lines.is_empty());

    let execute = node_update(&events, "execute").unwrap();
    assert_eq!(execute["execution_results"]["success"], true);

    let record = harness.assistant_record(&events).await;
    assert!(record.content.contains("HELLO WORLD"));
}

#[tokio::test]
async fn scenario_chained_pipeline_with_reference() {
    let harness = Harness::new(
        vec![
            json!({
                "objective": "translate the japanese text in the image to english",
                "input_type": "imagefile",
                "output_type": "structureddata",
                "is_complex": true,
                "reasoning": "ocr then translate"
            }),
            json!({
                "path": [
                    {"name": "image_ocr", "param_values": {"input_path": "p.png"}},
                    {"name": "translate", "param_values": {
                        "text_data": "${image_ocr.return}",
                        "model": "llm"
                    }}
                ],
                "reasoning": "chain ocr into translation"
            }),
            json!({
                "is_complete": true,
                "response": "Translated: hello",
                "reasoning": "done"
            }),
        ],
        image_registry(
            Arc::new(|_| Ok(json!([{"text": "こんにちは"}]))),
            Arc::new(|args| {
                // The reference was resolved through the state store.
                assert_eq!(args["text_data"][0]["text"], "こんにちは");
                // The model client never crosses the boundary.
                assert!(args["model"].is_null());
                Ok(json!([{"text": "こんにちは", "translation": "hello"}]))
            }),
        ),
    );

    let inputs = harness.config.chat_inputs("c1");
    std::fs::create_dir_all(&inputs).unwrap();
    std::fs::write(inputs.join("p.png"), b"fake").unwrap();

    let prompt = "translate the japanese in the image to english\n\n<file>inputs/c1/p.png</file>";
    let events = harness
        .run("c1", prompt, vec![Message::human(prompt)], false)
        .await;

    let route = node_update(&events, "route").unwrap();
    assert_eq!(
        route["chosen_path"][1]["param_values"]["text_data"],
        "${image_ocr.return}"
    );

    let execute = node_update(&events, "execute").unwrap();
    let results = &execute["execution_results"];
    assert_eq!(results["success"], true);
    assert_eq!(results["execution_path"], json!(["image_ocr", "translate"]));

    // keep_workspace=true retains the run's state store for inspection.
    let instance = execute["execution_instance"].as_str().unwrap();
    let state_file = harness
        .config
        .tmp_root()
        .join(instance)
        .join("execution_state.json");
    let state: Value =
        serde_json::from_str(&std::fs::read_to_string(state_file).unwrap()).unwrap();
    assert!(state.get("image_ocr.return").is_some());
    assert!(state.get("translate.return").is_some());
    assert_eq!(state["execution_path"], json!(["image_ocr", "translate"]));
}

#[tokio::test]
async fn scenario_tool_failure() {
    let harness = Harness::new(
        vec![
            json!({
                "objective": "extract text",
                "input_type": "imagefile",
                "output_type": "structureddata",
                "is_complex": true,
                "reasoning": "needs ocr"
            }),
            json!({
                "path": [{"name": "image_ocr", "param_values": {"input_path": "broken.png"}}],
                "reasoning": "ocr"
            }),
            json!({
                "is_complete": true,
                "response": "OCR failed on your image; it may be corrupted.",
                "reasoning": "surface the failure"
            }),
        ],
        image_registry(
            Arc::new(|_| Err("decoder exploded".to_string())),
            Arc::new(|args| Ok(args["text_data"].clone())),
        ),
    );

    let events = harness
        .run(
            "c1",
            "extract text from my image",
            vec![Message::human("extract text from my image")],
            false,
        )
        .await;

    let execute = node_update(&events, "execute").unwrap();
    let results = &execute["execution_results"];
    assert_eq!(results["success"], false);
    assert_eq!(results["error_info"]["tool_name"], "image_ocr");
    assert_eq!(results["error_info"]["execution_failed"], true);

    // Failure lines still flow as custom events.
    assert!(events.iter().any(|e| {
        e["type"] == "custom"
            && e["data"]["stdout"]
                .as_str()
                .map(|s| s.starts_with("ERROR:"))
                .unwrap_or(false)
    }));

    // The run still finishes with a user-facing response and persists.
    let persisted = events.last().unwrap();
    assert_eq!(persisted["type"], "persisted");
    assert_eq!(persisted["data"]["message_type"], "response");
    let record = harness.assistant_record(&events).await;
    assert!(record.content.contains("failed"));
}

#[tokio::test]
async fn scenario_partial_plan_replanning() {
    // Registry: ocr (image -> data), translate (data -> data),
    // render (data -> image).
    let mut registry = image_registry(
        Arc::new(|_| Ok(json!([{"text": "abc"}]))),
        Arc::new(|args| Ok(args["text_data"].clone())),
    );
    registry
        .register_native(
            tool_meta(
                "render",
                "text_data",
                WorkflowType::StructuredData,
                WorkflowType::ImageFile,
            ),
            Arc::new(|_| Ok(json!("render-output"))),
        )
        .unwrap();

    let harness = Harness::new(
        vec![
            json!({
                "objective": "re-render the image with translated text",
                "input_type": "imagefile",
                "output_type": "imagefile",
                "is_complex": true,
                "reasoning": "multi-step image rewrite"
            }),
            // First routing attempt: step 2's required value is empty
            // and has no default, so the plan is partial.
            json!({
                "path": [
                    {"name": "image_ocr", "param_values": {"input_path": "p.png"}},
                    {"name": "translate", "param_values": {"text_data": ""}},
                    {"name": "render", "param_values": {"text_data": "${translate.return}"}}
                ],
                "reasoning": "full plan with a gap"
            }),
            // Second routing attempt over the re-planned candidates.
            json!({
                "path": [{"name": "image_ocr", "param_values": {"input_path": "p.png"}}],
                "reasoning": "execute the resolvable prefix"
            }),
            json!({
                "is_complete": true,
                "response": "Extracted the text as a first step.",
                "reasoning": "prefix executed"
            }),
        ],
        registry,
    );

    let events = harness
        .run(
            "c1",
            "rewrite my image in english",
            vec![Message::human("rewrite my image in english")],
            false,
        )
        .await;

    // Two routing rounds: partial first, complete second.
    let route_updates: Vec<&Value> = events
        .iter()
        .filter(|e| e["type"] == "updates")
        .filter_map(|e| e["data"].get("route"))
        .collect();
    assert_eq!(route_updates.len(), 2);

    let first = route_updates[0];
    assert_eq!(first["is_partial"], true);
    assert_eq!(first["next_node"], "find_path");
    assert_eq!(first["chosen_path"].as_array().unwrap().len(), 1);
    // The prefix's output type was appended for the next search.
    assert_eq!(
        first["type_savepoint"],
        json!(["imagefile", "structureddata"])
    );

    let second = route_updates[1];
    assert_eq!(second["is_partial"], false);
    assert_eq!(second["next_node"], "execute");

    let persisted = events.last().unwrap();
    assert_eq!(persisted["data"]["message_type"], "response");
}

#[tokio::test]
async fn precedent_match_skips_classify_and_find_path() {
    // A stored precedent whose pipeline is adopted directly.
    let precedent = Precedent {
        description: "translate japanese text in an image to english".to_string(),
        objective: "translate image text to english".to_string(),
        path: vec![tool_meta(
            "image_ocr",
            "input_path",
            WorkflowType::ImageFile,
            WorkflowType::StructuredData,
        )],
        input_type: Some(WorkflowType::ImageFile),
        type_savepoint: vec![WorkflowType::StructuredData],
        is_complex: true,
        ..Precedent::default()
    };

    let harness = Harness::with_precedents(
        vec![
            // Precedent agent picks candidate 0.
            json!({"index": 0, "reasoning": "same task shape"}),
            // Router plans from the precedent's tool metadata.
            json!({
                "path": [{"name": "image_ocr", "param_values": {"input_path": "p.png"}}],
                "reasoning": "reuse precedent pipeline"
            }),
            json!({
                "is_complete": true,
                "response": "Done, reused the known workflow.",
                "reasoning": "precedent applied"
            }),
        ],
        image_registry(
            Arc::new(|_| Ok(json!([{"text": "x"}]))),
            Arc::new(|args| Ok(args["text_data"].clone())),
        ),
        vec![precedent],
    );

    let prompt = "translate the japanese in this image to english";
    let events = harness
        .run("c1", prompt, vec![Message::human(prompt)], false)
        .await;

    let nodes = updated_nodes(&events);
    assert!(nodes.contains(&"precedent".to_string()));
    assert!(nodes.contains(&"route".to_string()));
    assert!(!nodes.contains(&"classify".to_string()));
    assert!(!nodes.contains(&"find_path".to_string()));

    let precedent_update = node_update(&events, "precedent").unwrap();
    assert_eq!(precedent_update["next_node"], "route");
    assert!(precedent_update["precedents_found"].as_array().unwrap().len() >= 1);

    let persisted = events.last().unwrap();
    assert_eq!(persisted["data"]["message_type"], "response");
}

//! Tool registry
//!
//! Holds every discovered [`ToolMetadata`], indexed by name and by input
//! workflow type (the index the path generator walks). Registration goes
//! through [`ToolRegistry::register`], which enforces the declaration
//! invariants; [`ToolRegistry::register_dir`] scans a directory of Python
//! sources and registers everything it finds.
//!
//! Execution bindings are resolved lazily: module-backed tools run in a
//! child process materialized by the executor, while tests (and the
//! `none` isolation mode) can attach native in-process callables with
//! [`ToolRegistry::register_native`].

use crate::error::{RegistryError, Result};
use crate::metadata::{ModuleRef, ToolMetadata, RETURN_KEY};
use crate::parse::{extract_tools, ParsedTool};
use crate::types::{ParamType, WorkflowType};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// In-process tool implementation used for tests and built-ins.
pub type NativeTool =
    Arc<dyn Fn(Map<String, Value>) -> std::result::Result<Value, String> + Send + Sync>;

/// How a tool can be invoked.
#[derive(Clone)]
pub enum ToolBinding {
    /// Run inside the server process.
    Native(NativeTool),
    /// Run in a child process via the referenced module.
    Module(ModuleRef),
}

/// Registry of all available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolMetadata>,
    /// Registration order, for stable iteration.
    order: Vec<String>,
    /// input workflow type -> tool names, in registration order.
    type_graph: HashMap<WorkflowType, Vec<String>>,
    native: HashMap<String, NativeTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Duplicate names and invariant violations are
    /// fatal.
    pub fn register(&mut self, tool: ToolMetadata) -> Result<()> {
        tool.validate()?;
        if self.tools.contains_key(&tool.name) {
            return Err(RegistryError::DuplicateTool(tool.name.clone()));
        }

        // Validation guarantees the input type resolves.
        let input_type = tool
            .input_type()
            .ok_or_else(|| RegistryError::InputTypeNotWorkflow {
                tool: tool.name.clone(),
                param: tool.input_key.clone(),
            })?;
        self.type_graph
            .entry(input_type)
            .or_default()
            .push(tool.name.clone());
        self.order.push(tool.name.clone());

        debug!(tool = %tool.name, input = %input_type, "registered tool");
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Register a tool together with a native in-process implementation.
    pub fn register_native(&mut self, tool: ToolMetadata, f: NativeTool) -> Result<()> {
        let name = tool.name.clone();
        self.register(tool)?;
        self.native.insert(name, f);
        Ok(())
    }

    /// Recursively scan `directory` for `*.py` tool sources and register
    /// every `@pathtool` declaration found. Files whose name starts with
    /// an underscore are skipped. Returns the number of tools added.
    ///
    /// Module paths are derived relative to the directory's parent, so a
    /// tools directory placed under the project root yields modules that
    /// are importable from the project root (where tool children run).
    pub fn register_dir(&mut self, directory: &Path) -> Result<usize> {
        let base = directory.parent().unwrap_or(directory).to_path_buf();
        let mut count = 0usize;
        let mut files = Vec::new();
        collect_py_files(directory, &mut files)?;
        files.sort();

        for file in files {
            let source = std::fs::read_to_string(&file).map_err(|source| RegistryError::Io {
                path: file.clone(),
                source,
            })?;
            let parsed = extract_tools(&source).map_err(|message| RegistryError::Parse {
                path: file.clone(),
                message,
            })?;
            for tool in parsed {
                let metadata = build_metadata(tool, &file, &base)?;
                info!(tool = %metadata.name, file = %file.display(), "discovered tool");
                self.register(metadata)?;
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<&ToolMetadata> {
        self.tools.get(name)
    }

    /// All tools whose primary input consumes `input_type`, in
    /// registration order.
    pub fn tools_for_input_type(&self, input_type: WorkflowType) -> Vec<&ToolMetadata> {
        self.type_graph
            .get(&input_type)
            .map(|names| names.iter().filter_map(|n| self.tools.get(n)).collect())
            .unwrap_or_default()
    }

    /// Resolve how to invoke a tool. Native bindings win over module
    /// references; a tool with neither is unexecutable.
    pub fn resolve_binding(&self, name: &str) -> Result<ToolBinding> {
        if !self.tools.contains_key(name) {
            return Err(RegistryError::UnknownTool(name.to_string()));
        }
        if let Some(native) = self.native.get(name) {
            return Ok(ToolBinding::Native(native.clone()));
        }
        if let Some(module) = self.tools[name].module.clone() {
            return Ok(ToolBinding::Module(module));
        }
        Err(RegistryError::NoBinding(name.to_string()))
    }

    /// Whether the tool has a native in-process implementation.
    pub fn has_native(&self, name: &str) -> bool {
        self.native.contains_key(name)
    }

    /// Registered tool names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn collect_py_files(directory: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(directory).map_err(|source| RegistryError::Io {
        path: directory.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| RegistryError::Io {
            path: directory.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() {
            collect_py_files(&path, out)?;
        } else if name.ends_with(".py") && !name.starts_with('_') {
            out.push(path);
        }
    }
    Ok(())
}

/// Turn a parsed declaration into validated metadata.
fn build_metadata(parsed: ParsedTool, file: &Path, base: &Path) -> Result<ToolMetadata> {
    let name = parsed.name.clone();

    // Primary input: explicit `input=` or the first parameter.
    let input_key = parsed
        .decorator
        .input
        .clone()
        .or_else(|| parsed.params.first().map(|p| p.name.clone()))
        .ok_or_else(|| RegistryError::InputKeyNotAParameter {
            tool: name.clone(),
            input_key: "<none>".to_string(),
        })?;

    let output_key = parsed
        .decorator
        .output
        .clone()
        .unwrap_or_else(|| RETURN_KEY.to_string());

    // Parameter order with the input key first.
    let mut input_params: Vec<String> = Vec::with_capacity(parsed.params.len());
    if parsed.params.iter().any(|p| p.name == input_key) {
        input_params.push(input_key.clone());
    }
    for param in &parsed.params {
        if param.name != input_key {
            input_params.push(param.name.clone());
        }
    }

    let mut param_types: BTreeMap<String, ParamType> = BTreeMap::new();
    let mut default_params: BTreeMap<String, Value> = BTreeMap::new();
    for param in &parsed.params {
        if let Some(annotation) = &param.annotation {
            param_types.insert(param.name.clone(), ParamType::from_symbol(annotation));
        } else if let Some(default) = &param.default {
            // Infer an optional parameter's type from its default.
            if let Some(inferred) = infer_from_default(default) {
                param_types.insert(param.name.clone(), inferred);
            }
        }
        if let Some(default) = &param.default {
            default_params.insert(param.name.clone(), default.clone());
        }
    }

    // Output type: the return annotation, or the declared key type.
    if output_key == RETURN_KEY {
        let annotation = parsed.return_annotation.as_ref().ok_or_else(|| {
            RegistryError::OutputTypeNotWorkflow {
                tool: name.clone(),
                output_key: output_key.clone(),
            }
        })?;
        param_types.insert(RETURN_KEY.to_string(), ParamType::from_symbol(annotation));
    } else {
        let symbol = parsed
            .decorator
            .output_key_types
            .get(&output_key)
            .ok_or_else(|| RegistryError::MissingOutputKeyType {
                tool: name.clone(),
                output_key: output_key.clone(),
            })?;
        param_types.insert(output_key.clone(), ParamType::from_symbol(symbol));
    }

    let mut required_inputs = BTreeMap::new();
    for (param, symbol) in &parsed.decorator.requires {
        required_inputs.insert(param.clone(), ParamType::from_symbol(symbol));
    }

    let module = ModuleRef {
        file: file.to_path_buf(),
        module: module_path(file, base),
        function: name.clone(),
    };

    let metadata = ToolMetadata {
        name,
        description: parsed.description,
        input_key,
        output_key: output_key.clone(),
        input_params,
        output_params: vec![output_key],
        param_types,
        required_inputs,
        default_params,
        module: Some(module),
    };
    Ok(metadata)
}

fn infer_from_default(default: &Value) -> Option<ParamType> {
    match default {
        Value::String(_) => Some(ParamType::Str),
        Value::Bool(_) => Some(ParamType::Bool),
        Value::Number(n) if n.is_i64() => Some(ParamType::Int),
        Value::Number(_) => Some(ParamType::Float),
        Value::Array(_) => Some(ParamType::List),
        Value::Object(_) => Some(ParamType::Dict),
        Value::Null => None,
    }
}

/// Dotted module path for a file, relative to `base`.
fn module_path(file: &Path, base: &Path) -> String {
    let relative = file.strip_prefix(base).unwrap_or(file);
    let mut parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if let Some(last) = parts.last_mut() {
        if let Some(stem) = last.strip_suffix(".py") {
            *last = stem.to_string();
        }
    }
    parts.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tool_file(dir: &Path, name: &str, source: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(source.as_bytes()).unwrap();
        path
    }

    const OCR: &str = r#"
@pathtool(input="input_path", output="return")
def image_ocr(input_path: ImageFile, config: Optional[Dict] = None) -> StructuredData:
    """Extract text regions from an image"""
    pass
"#;

    const TRANSLATE: &str = r#"
@pathtool(input="text_data", output="return")
def translate(text_data: StructuredData, model: ChatOllama, target_language: str = 'english') -> StructuredData:
    """Translate extracted text"""
    pass
"#;

    #[test]
    fn test_register_dir_discovers_tools() {
        let dir = tempfile::tempdir().unwrap();
        let tools_dir = dir.path().join("tools");
        write_tool_file(&tools_dir, "ocr.py", OCR);
        write_tool_file(&tools_dir, "nlp/translate.py", TRANSLATE);
        write_tool_file(&tools_dir, "_private.py", OCR.replace("image_ocr", "hidden").as_str());

        let mut registry = ToolRegistry::new();
        let count = registry.register_dir(&tools_dir).unwrap();
        assert_eq!(count, 2);
        assert!(registry.get("image_ocr").is_some());
        assert!(registry.get("translate").is_some());
        assert!(registry.get("hidden").is_none());

        let ocr = registry.get("image_ocr").unwrap();
        assert_eq!(ocr.input_type(), Some(WorkflowType::ImageFile));
        assert_eq!(ocr.output_type(), Some(WorkflowType::StructuredData));
        let module = ocr.module.as_ref().unwrap();
        assert_eq!(module.module, "tools.ocr");
        assert_eq!(module.function, "image_ocr");

        let translate = registry.get("translate").unwrap();
        assert_eq!(translate.module.as_ref().unwrap().module, "tools.nlp.translate");
        assert!(translate.is_model_param("model"));
        assert_eq!(translate.default_params["target_language"], "english");
    }

    #[test]
    fn test_type_graph_by_input() {
        let dir = tempfile::tempdir().unwrap();
        let tools_dir = dir.path().join("tools");
        write_tool_file(&tools_dir, "ocr.py", OCR);
        write_tool_file(&tools_dir, "translate.py", TRANSLATE);

        let mut registry = ToolRegistry::new();
        registry.register_dir(&tools_dir).unwrap();

        let image_tools = registry.tools_for_input_type(WorkflowType::ImageFile);
        assert_eq!(image_tools.len(), 1);
        assert_eq!(image_tools[0].name, "image_ocr");
        assert!(registry
            .tools_for_input_type(WorkflowType::AudioFile)
            .is_empty());
    }

    #[test]
    fn test_duplicate_name_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let tools_dir = dir.path().join("tools");
        write_tool_file(&tools_dir, "a.py", OCR);
        write_tool_file(&tools_dir, "b.py", OCR);

        let mut registry = ToolRegistry::new();
        assert!(matches!(
            registry.register_dir(&tools_dir),
            Err(RegistryError::DuplicateTool(_))
        ));
    }

    #[test]
    fn test_missing_return_annotation_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let tools_dir = dir.path().join("tools");
        write_tool_file(
            &tools_dir,
            "bad.py",
            r#"
@pathtool(input="x", output="return")
def bad(x: ImageFile):
    """No return annotation"""
    pass
"#,
        );

        let mut registry = ToolRegistry::new();
        assert!(matches!(
            registry.register_dir(&tools_dir),
            Err(RegistryError::OutputTypeNotWorkflow { .. })
        ));
    }

    #[test]
    fn test_named_output_requires_key_type() {
        let dir = tempfile::tempdir().unwrap();
        let tools_dir = dir.path().join("tools");
        write_tool_file(
            &tools_dir,
            "bad.py",
            r#"
@pathtool(input="x", output="clean")
def bad(x: AudioFile) -> dict:
    """Missing output_key_types"""
    pass
"#,
        );

        let mut registry = ToolRegistry::new();
        assert!(matches!(
            registry.register_dir(&tools_dir),
            Err(RegistryError::MissingOutputKeyType { .. })
        ));
    }

    #[test]
    fn test_requires_unknown_param_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let tools_dir = dir.path().join("tools");
        write_tool_file(
            &tools_dir,
            "bad.py",
            r#"
@pathtool(input="x", output="return", requires={"mask": ImageFile})
def bad(x: ImageFile) -> ImageFile:
    """Requires names a non-parameter"""
    pass
"#,
        );

        let mut registry = ToolRegistry::new();
        assert!(matches!(
            registry.register_dir(&tools_dir),
            Err(RegistryError::RequiredInputNotAParameter { .. })
        ));
    }

    #[test]
    fn test_resolve_binding_prefers_native() {
        use crate::metadata::tests_support::sample_native_tool;

        let mut registry = ToolRegistry::new();
        registry
            .register_native(
                sample_native_tool("upper", WorkflowType::Text, WorkflowType::Text),
                Arc::new(|args| {
                    Ok(Value::String(
                        args.get("text").and_then(|v| v.as_str()).unwrap_or("").to_uppercase(),
                    ))
                }),
            )
            .unwrap();

        match registry.resolve_binding("upper").unwrap() {
            ToolBinding::Native(f) => {
                let mut args = Map::new();
                args.insert("text".to_string(), Value::String("hi".to_string()));
                assert_eq!(f(args).unwrap(), Value::String("HI".to_string()));
            }
            ToolBinding::Module(_) => panic!("expected native binding"),
        }

        assert!(matches!(
            registry.resolve_binding("ghost"),
            Err(RegistryError::UnknownTool(_))
        ));
    }
}

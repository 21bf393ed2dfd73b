//! The closed workflow type system
//!
//! Every tool's primary input and output carry one of the
//! [`WorkflowType`] tags. The tags drive path chaining: a tool whose
//! input tag equals another tool's output tag can follow it in a
//! pipeline. Annotation symbols found in tool source (`ImageFile`,
//! `str`, `BaseChatModel`, ...) are resolved to [`ParamType`] through a
//! hard-coded lookup; unknown symbols are permitted for non-routing
//! parameters and degrade to [`ParamType::Any`].

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Semantic input/output tags for tool chaining. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkflowType {
    Text,
    AudioFile,
    ImageFile,
    VideoFile,
    TextFile,
    DocumentFile,
    StructuredData,
}

impl WorkflowType {
    /// All tags, in a stable order.
    pub const ALL: [WorkflowType; 7] = [
        WorkflowType::Text,
        WorkflowType::AudioFile,
        WorkflowType::ImageFile,
        WorkflowType::VideoFile,
        WorkflowType::TextFile,
        WorkflowType::DocumentFile,
        WorkflowType::StructuredData,
    ];

    /// The marker-class symbol used in tool signatures.
    pub fn symbol(&self) -> &'static str {
        match self {
            WorkflowType::Text => "Text",
            WorkflowType::AudioFile => "AudioFile",
            WorkflowType::ImageFile => "ImageFile",
            WorkflowType::VideoFile => "VideoFile",
            WorkflowType::TextFile => "TextFile",
            WorkflowType::DocumentFile => "DocumentFile",
            WorkflowType::StructuredData => "StructuredData",
        }
    }

    /// Lowercase wire label.
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowType::Text => "text",
            WorkflowType::AudioFile => "audiofile",
            WorkflowType::ImageFile => "imagefile",
            WorkflowType::VideoFile => "videofile",
            WorkflowType::TextFile => "textfile",
            WorkflowType::DocumentFile => "documentfile",
            WorkflowType::StructuredData => "structureddata",
        }
    }

    /// Resolve an annotation symbol (`ImageFile`) to a tag.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.symbol() == symbol)
    }

    /// Resolve a wire label (`imagefile`), case-insensitively. Symbol
    /// names are accepted too, so state deserialization is forgiving.
    pub fn from_label(label: &str) -> Option<Self> {
        let lower = label.to_ascii_lowercase();
        Self::ALL.iter().copied().find(|t| t.label() == lower)
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for WorkflowType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for WorkflowType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        WorkflowType::from_label(&raw)
            .or_else(|| WorkflowType::from_symbol(&raw))
            .ok_or_else(|| D::Error::custom(format!("unknown workflow type '{raw}'")))
    }
}

/// Annotation symbols naming rich client objects that cannot cross a
/// process boundary. Parameters of these types are passed as null to
/// isolated tools, which reconstruct their own defaults.
pub const NON_SERIALIZABLE_SYMBOLS: [&str; 6] = [
    "BaseChatModel",
    "BaseLanguageModel",
    "LLM",
    "ChatOpenAI",
    "ChatAnthropic",
    "ChatOllama",
];

/// Resolved type of one tool parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// A workflow tag; participates in path chaining.
    Workflow(WorkflowType),
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
    /// A known language-model client type; not serializable.
    Model(String),
    /// Unresolved symbol; allowed for non-routing parameters.
    Any(String),
}

impl ParamType {
    /// Resolve an annotation symbol through the closed lookup table.
    pub fn from_symbol(symbol: &str) -> Self {
        if let Some(tag) = WorkflowType::from_symbol(symbol) {
            return ParamType::Workflow(tag);
        }
        if NON_SERIALIZABLE_SYMBOLS.contains(&symbol) {
            return ParamType::Model(symbol.to_string());
        }
        match symbol {
            "str" => ParamType::Str,
            "int" => ParamType::Int,
            "float" => ParamType::Float,
            "bool" => ParamType::Bool,
            "list" | "List" => ParamType::List,
            "dict" | "Dict" => ParamType::Dict,
            other => ParamType::Any(other.to_string()),
        }
    }

    /// The symbol this type serializes as.
    pub fn symbol(&self) -> &str {
        match self {
            ParamType::Workflow(tag) => tag.symbol(),
            ParamType::Str => "str",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::List => "list",
            ParamType::Dict => "dict",
            ParamType::Model(name) => name,
            ParamType::Any(name) => name,
        }
    }

    pub fn as_workflow(&self) -> Option<WorkflowType> {
        match self {
            ParamType::Workflow(tag) => Some(*tag),
            _ => None,
        }
    }

    /// Whether values of this type can cross the process boundary as
    /// JSON.
    pub fn is_serializable(&self) -> bool {
        !matches!(self, ParamType::Model(_))
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Serialize for ParamType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.symbol())
    }
}

impl<'de> Deserialize<'de> for ParamType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ParamType::from_symbol(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_roundtrip() {
        for tag in WorkflowType::ALL {
            assert_eq!(WorkflowType::from_symbol(tag.symbol()), Some(tag));
            assert_eq!(WorkflowType::from_label(tag.label()), Some(tag));
        }
    }

    #[test]
    fn test_label_case_insensitive() {
        assert_eq!(
            WorkflowType::from_label("ImageFile"),
            Some(WorkflowType::ImageFile)
        );
        assert_eq!(
            WorkflowType::from_label("IMAGEFILE"),
            Some(WorkflowType::ImageFile)
        );
    }

    #[test]
    fn test_unknown_symbol_is_none() {
        assert_eq!(WorkflowType::from_symbol("Banana"), None);
    }

    #[test]
    fn test_param_type_resolution() {
        assert_eq!(
            ParamType::from_symbol("ImageFile"),
            ParamType::Workflow(WorkflowType::ImageFile)
        );
        assert_eq!(ParamType::from_symbol("str"), ParamType::Str);
        assert_eq!(
            ParamType::from_symbol("BaseChatModel"),
            ParamType::Model("BaseChatModel".to_string())
        );
        assert_eq!(
            ParamType::from_symbol("Optional[Dict]"),
            ParamType::Any("Optional[Dict]".to_string())
        );
    }

    #[test]
    fn test_model_types_not_serializable() {
        assert!(!ParamType::from_symbol("ChatOllama").is_serializable());
        assert!(ParamType::from_symbol("dict").is_serializable());
    }

    #[test]
    fn test_workflow_type_serde() {
        let tag: WorkflowType = serde_json::from_str("\"imagefile\"").unwrap();
        assert_eq!(tag, WorkflowType::ImageFile);
        assert_eq!(serde_json::to_string(&tag).unwrap(), "\"imagefile\"");

        // Symbol form is accepted on input.
        let tag: WorkflowType = serde_json::from_str("\"StructuredData\"").unwrap();
        assert_eq!(tag, WorkflowType::StructuredData);
    }
}

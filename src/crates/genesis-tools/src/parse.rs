//! Source-level discovery of `@pathtool` declarations
//!
//! Tool files are Python; importing them would drag their native
//! dependencies into the server process, so discovery works on the
//! source text alone: find functions carrying a `@pathtool` (or `@tool`)
//! decorator, read the decorator's keyword arguments and the function
//! signature, and hand the result to the registry for type resolution.
//!
//! The scanner understands exactly what tool declarations use — balanced
//! brackets, string literals, default values, `->` return annotations and
//! a leading docstring. It is not a general Python parser and does not
//! try to be one.

use serde_json::Value;
use std::collections::BTreeMap;

/// One parameter of a scanned function.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedParam {
    pub name: String,
    /// Annotation text, e.g. `ImageFile` or `Optional[Dict]`.
    pub annotation: Option<String>,
    /// Default literal, decoded where possible (`None` becomes JSON
    /// null); unparseable defaults are kept as their source text.
    pub default: Option<Value>,
}

/// Keyword arguments of the `@pathtool(...)` decorator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecoratorArgs {
    pub input: Option<String>,
    pub output: Option<String>,
    pub output_key_types: BTreeMap<String, String>,
    pub requires: BTreeMap<String, String>,
}

/// A decorated function as found in source.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTool {
    pub name: String,
    pub description: String,
    pub params: Vec<ParsedParam>,
    pub return_annotation: Option<String>,
    pub decorator: DecoratorArgs,
}

/// Extract every `@pathtool`/`@tool` decorated function from a source
/// file. Undecorated functions are ignored; malformed decorated ones
/// produce an error message naming the function.
pub fn extract_tools(source: &str) -> Result<Vec<ParsedTool>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tools = Vec::new();
    let mut pos = 0usize;

    while let Some(deco_start) = find_decorator(&chars, pos) {
        let (args_text, after_deco) = read_decorator_args(&chars, deco_start)?;
        let decorator = parse_decorator_args(&args_text)?;

        let Some((tool, after_def)) = read_function(&chars, after_deco)? else {
            pos = after_deco;
            continue;
        };

        tools.push(ParsedTool {
            decorator,
            ..tool
        });
        pos = after_def;
    }

    Ok(tools)
}

/// Find the next `@pathtool` / `@tool` marker at line start, skipping
/// other decorators. Returns the index just past the marker name.
fn find_decorator(chars: &[char], mut pos: usize) -> Option<usize> {
    while pos < chars.len() {
        // Seek line starts.
        let line_start = pos;
        let mut i = pos;
        while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
            i += 1;
        }
        if i < chars.len() && chars[i] == '@' {
            let name_start = i + 1;
            let mut j = name_start;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let name: String = chars[name_start..j].iter().collect();
            if name == "pathtool" || name == "tool" {
                return Some(j);
            }
        }
        // Advance to next line.
        pos = line_start;
        while pos < chars.len() && chars[pos] != '\n' {
            pos += 1;
        }
        pos += 1;
    }
    None
}

/// Read the decorator's argument text (may span lines). Returns the raw
/// text between the outer parens and the index past the decorator.
fn read_decorator_args(chars: &[char], after_name: usize) -> Result<(String, usize), String> {
    let mut i = after_name;
    while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
        i += 1;
    }
    if i >= chars.len() || chars[i] != '(' {
        // Bare decorator with no arguments.
        return Ok((String::new(), after_name));
    }
    let (inner, end) = read_balanced(chars, i)?;
    Ok((inner, end))
}

/// Read a balanced bracket group starting at `open`. Returns the inner
/// text and the index just past the closing bracket.
fn read_balanced(chars: &[char], open: usize) -> Result<(String, usize), String> {
    let close = match chars[open] {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        other => return Err(format!("expected bracket, found '{other}'")),
    };
    let mut depth = 0usize;
    let mut i = open;
    let mut in_string: Option<char> = None;
    let mut inner = String::new();

    while i < chars.len() {
        let c = chars[i];
        if let Some(quote) = in_string {
            if c == '\\' {
                inner.push(c);
                if i + 1 < chars.len() {
                    inner.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
            } else if c == quote {
                in_string = None;
            }
            inner.push(c);
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => {
                in_string = Some(c);
                inner.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                if depth > 1 {
                    inner.push(c);
                }
            }
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    if c != close {
                        return Err(format!("mismatched bracket '{c}'"));
                    }
                    return Ok((inner, i + 1));
                }
                inner.push(c);
            }
            _ => inner.push(c),
        }
        i += 1;
    }
    Err("unterminated bracket group".to_string())
}

/// Split on a separator at bracket depth zero, respecting strings.
fn split_top_level(text: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escape = false;

    for c in text.chars() {
        if let Some(quote) = in_string {
            current.push(c);
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                in_string = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c == separator && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn strip_quotes(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        Some(trimmed[1..trimmed.len() - 1].to_string())
    } else {
        None
    }
}

/// Decode a Python literal to JSON where the literal is simple; anything
/// else is kept as its source text.
fn parse_literal(text: &str) -> Value {
    let trimmed = text.trim();
    match trimmed {
        "None" => return Value::Null,
        "True" => return Value::Bool(true),
        "False" => return Value::Bool(false),
        _ => {}
    }
    if let Some(s) = strip_quotes(trimmed) {
        return Value::String(s);
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        // Containers of simple literals translate to JSON by swapping
        // quote style and constant names.
        let candidate = trimmed
            .replace('\'', "\"")
            .replace("None", "null")
            .replace("True", "true")
            .replace("False", "false");
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return value;
        }
    }
    Value::String(trimmed.to_string())
}

/// Parse a `{"key": Type, ...}` dict literal into name → symbol.
fn parse_symbol_dict(text: &str) -> Result<BTreeMap<String, String>, String> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| format!("expected dict literal, found '{trimmed}'"))?;

    let mut map = BTreeMap::new();
    for entry in split_top_level(inner, ',') {
        if entry.is_empty() {
            continue;
        }
        let mut pieces = split_top_level(&entry, ':');
        if pieces.len() != 2 {
            return Err(format!("malformed dict entry '{entry}'"));
        }
        let value = pieces.pop().unwrap();
        let key = pieces.pop().unwrap();
        let key = strip_quotes(&key).unwrap_or(key);
        map.insert(key, value.trim().to_string());
    }
    Ok(map)
}

fn parse_decorator_args(text: &str) -> Result<DecoratorArgs, String> {
    let mut args = DecoratorArgs::default();
    for part in split_top_level(text, ',') {
        let Some(eq) = find_top_level(&part, '=') else {
            continue;
        };
        let key = part[..eq].trim();
        let value = part[eq + 1..].trim();
        match key {
            "input" => args.input = strip_quotes(value).or(Some(value.to_string())),
            "output" => args.output = strip_quotes(value).or(Some(value.to_string())),
            "output_key_types" => args.output_key_types = parse_symbol_dict(value)?,
            "requires" => args.requires = parse_symbol_dict(value)?,
            _ => {}
        }
    }
    Ok(args)
}

/// Position of a separator at depth zero outside strings, or None.
fn find_top_level(text: &str, separator: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    for (i, c) in text.char_indices() {
        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => in_string = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// Read the `def name(...) -> Ret:` following a decorator, plus the
/// docstring. `Ok(None)` when no function follows (the decorator was on
/// something else).
fn read_function(
    chars: &[char],
    mut pos: usize,
) -> Result<Option<(ParsedTool, usize)>, String> {
    // Find "def " at a line start, skipping intervening decorators.
    let def_pos = loop {
        while pos < chars.len() && chars[pos] != '\n' {
            pos += 1;
        }
        pos += 1;
        if pos >= chars.len() {
            return Ok(None);
        }
        let mut i = pos;
        while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
            i += 1;
        }
        if chars.get(i) == Some(&'@') {
            continue;
        }
        if chars[i..].starts_with(&['d', 'e', 'f', ' ']) {
            break i + 4;
        }
        return Ok(None);
    };

    // Function name.
    let mut i = def_pos;
    while i < chars.len() && (chars[i] == ' ')
    {
        i += 1;
    }
    let name_start = i;
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    let name: String = chars[name_start..i].iter().collect();
    if name.is_empty() {
        return Err("decorated def has no name".to_string());
    }

    while i < chars.len() && chars[i] != '(' {
        i += 1;
    }
    if i >= chars.len() {
        return Err(format!("function '{name}' has no parameter list"));
    }
    let (signature, after_sig) = read_balanced(chars, i)?;

    // Optional return annotation up to the terminal colon.
    let mut j = after_sig;
    let mut return_text = String::new();
    while j < chars.len() && chars[j] != ':' {
        return_text.push(chars[j]);
        j += 1;
    }
    let return_annotation = return_text
        .trim()
        .strip_prefix("->")
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    let params = parse_params(&signature)?;
    let (description, end) = read_docstring(chars, j + 1, &name);

    Ok(Some((
        ParsedTool {
            name,
            description,
            params,
            return_annotation,
            decorator: DecoratorArgs::default(),
        },
        end,
    )))
}

fn parse_params(signature: &str) -> Result<Vec<ParsedParam>, String> {
    let mut params = Vec::new();
    for part in split_top_level(signature, ',') {
        if part.is_empty() || part.starts_with('*') || part == "self" {
            continue;
        }
        let (head, default) = match find_top_level(&part, '=') {
            Some(eq) => (
                part[..eq].trim().to_string(),
                Some(parse_literal(&part[eq + 1..])),
            ),
            None => (part.clone(), None),
        };
        let (name, annotation) = match find_top_level(&head, ':') {
            Some(colon) => (
                head[..colon].trim().to_string(),
                Some(head[colon + 1..].trim().to_string()).filter(|a| !a.is_empty()),
            ),
            None => (head.trim().to_string(), None),
        };
        if name.is_empty() {
            return Err(format!("malformed parameter '{part}'"));
        }
        params.push(ParsedParam {
            name,
            annotation,
            default,
        });
    }
    Ok(params)
}

/// Read the function's docstring (first statement, triple-quoted).
/// Returns the description (or a generated fallback) and the position
/// scanning should continue from.
fn read_docstring(chars: &[char], mut pos: usize, name: &str) -> (String, usize) {
    // Skip to the first non-blank line of the body.
    while pos < chars.len() && (chars[pos] == '\n' || chars[pos] == ' ' || chars[pos] == '\t') {
        pos += 1;
    }
    for quote in ["\"\"\"", "'''"] {
        let marker: Vec<char> = quote.chars().collect();
        if chars[pos..].starts_with(&marker) {
            let body_start = pos + 3;
            let mut k = body_start;
            while k + 3 <= chars.len() && !chars[k..].starts_with(&marker) {
                k += 1;
            }
            let text: String = chars[body_start..k.min(chars.len())].iter().collect();
            let description = text.trim().to_string();
            let end = (k + 3).min(chars.len());
            if !description.is_empty() {
                return (description, end);
            }
            return (format!("Execute {name}"), end);
        }
    }
    (format!("Execute {name}"), pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OCR_SOURCE: &str = r#"
from some.heavy.dependency import stuff

@pathtool(input="input_path", output="return")
def image_ocr(input_path: ImageFile, config: Optional[Dict] = None) -> StructuredData:
    """OCR function specifically for image files"""
    return stuff(input_path, config)
"#;

    #[test]
    fn test_extract_single_tool() {
        let tools = extract_tools(OCR_SOURCE).unwrap();
        assert_eq!(tools.len(), 1);
        let tool = &tools[0];
        assert_eq!(tool.name, "image_ocr");
        assert_eq!(tool.description, "OCR function specifically for image files");
        assert_eq!(tool.decorator.input.as_deref(), Some("input_path"));
        assert_eq!(tool.decorator.output.as_deref(), Some("return"));
        assert_eq!(tool.return_annotation.as_deref(), Some("StructuredData"));

        assert_eq!(tool.params.len(), 2);
        assert_eq!(tool.params[0].name, "input_path");
        assert_eq!(tool.params[0].annotation.as_deref(), Some("ImageFile"));
        assert_eq!(tool.params[1].name, "config");
        assert_eq!(tool.params[1].annotation.as_deref(), Some("Optional[Dict]"));
        assert_eq!(tool.params[1].default, Some(Value::Null));
    }

    #[test]
    fn test_requires_and_defaults() {
        let source = r#"
@pathtool(input="bbox_data", output="return", requires={"image_input": ImageFile})
def inpaint_text(image_input: ImageFile, bbox_data: StructuredData, output_path: ImageFile, min_font_size=20, device: str = 'cuda') -> ImageFile:
    """Fits text into bounding boxes"""
    pass
"#;
        let tools = extract_tools(source).unwrap();
        let tool = &tools[0];
        assert_eq!(
            tool.decorator.requires.get("image_input").map(String::as_str),
            Some("ImageFile")
        );
        let device = tool.params.iter().find(|p| p.name == "device").unwrap();
        assert_eq!(device.default, Some(json!("cuda")));
        let font = tool.params.iter().find(|p| p.name == "min_font_size").unwrap();
        assert_eq!(font.default, Some(json!(20)));
        assert!(font.annotation.is_none());
    }

    #[test]
    fn test_multiple_tools_in_one_file() {
        let source = r#"
@pathtool(input="input_path", output="return")
def pdf_ocr(input_path: DocumentFile) -> StructuredData:
    """PDF OCR"""
    pass


def helper(x):
    return x


@pathtool(input="text_data", output="return")
def translate(text_data: StructuredData, model: ChatOllama, target_language: str = 'english') -> StructuredData:
    """Translate extracted text"""
    pass
"#;
        let tools = extract_tools(source).unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["pdf_ocr", "translate"]);
    }

    #[test]
    fn test_named_output_key_with_types() {
        let source = r#"
@pathtool(input="audio_path", output="clean_path", output_key_types={"clean_path": AudioFile})
def denoise(audio_path: AudioFile, strength: float = 0.5) -> dict:
    """Remove noise"""
    pass
"#;
        let tools = extract_tools(source).unwrap();
        let tool = &tools[0];
        assert_eq!(tool.decorator.output.as_deref(), Some("clean_path"));
        assert_eq!(
            tool.decorator.output_key_types.get("clean_path").map(String::as_str),
            Some("AudioFile")
        );
    }

    #[test]
    fn test_multiline_signature() {
        let source = r#"
@pathtool(input="bbox_data", output="return")
def erase(
    bbox_data: StructuredData,
    input_path: ImageFile,
    padding: int = 10,
) -> ImageFile:
    """Remove regions"""
    pass
"#;
        let tools = extract_tools(source).unwrap();
        assert_eq!(tools[0].params.len(), 3);
        assert_eq!(tools[0].return_annotation.as_deref(), Some("ImageFile"));
    }

    #[test]
    fn test_undecorated_functions_ignored() {
        let source = "def plain(x):\n    return x\n";
        assert!(extract_tools(source).unwrap().is_empty());
    }

    #[test]
    fn test_bare_decorator_without_args() {
        let source = r#"
@pathtool
def echo(text: Text) -> Text:
    """Echo"""
    pass
"#;
        let tools = extract_tools(source).unwrap();
        assert_eq!(tools[0].name, "echo");
        assert!(tools[0].decorator.input.is_none());
    }

    #[test]
    fn test_missing_docstring_generates_description() {
        let source = r#"
@pathtool(input="text", output="return")
def shout(text: Text) -> Text:
    return text.upper()
"#;
        let tools = extract_tools(source).unwrap();
        assert_eq!(tools[0].description, "Execute shout");
    }

    #[test]
    fn test_parse_literal_containers() {
        assert_eq!(parse_literal("['en', 'ja']"), json!(["en", "ja"]));
        assert_eq!(parse_literal("{'a': 1}"), json!({"a": 1}));
        assert_eq!(parse_literal("None"), Value::Null);
        assert_eq!(parse_literal("3.5"), json!(3.5));
        // Unparseable expressions fall back to source text.
        assert_eq!(parse_literal("os.getcwd()"), json!("os.getcwd()"));
    }

    #[test]
    fn test_unterminated_decorator_is_error() {
        let source = "@pathtool(input=\"x\"\ndef broken(x: Text) -> Text:\n    pass\n";
        assert!(extract_tools(source).is_err());
    }
}

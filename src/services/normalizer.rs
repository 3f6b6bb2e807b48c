//! Normalization of raw agent output into an inspectable result.
//!
//! Agents answer with a JSON object, JSON buried in markdown fences or prose,
//! or plain text. Parsing tries, in order:
//! 1. the payload as a whole (already-structured or pure JSON text)
//! 2. fenced code blocks, `json` fences before bare ones
//! 3. balanced `{...}` spans anywhere in the text
//!
//! Malformed input is the expected case, so normalizing never fails: the
//! caller inspects `status` and decides what to fall back to.

use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Raw payload handed back by an agent call.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAgentOutput {
    Structured(Value),
    Text(String),
}

impl From<Value> for RawAgentOutput {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

impl From<String> for RawAgentOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RawAgentOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// A JSON object matching the expected shape was found.
    Success,
    /// A JSON object was found but it does not match the expected shape.
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMethod {
    StructuredJson,
    EmbeddedJsonBlock,
    FallbackDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedAgentResponse {
    pub status: ResponseStatus,
    pub data: Map<String, Value>,
    /// Original payload, kept verbatim for diagnostics.
    pub raw_text: String,
    pub parse_method: ParseMethod,
}

impl NormalizedAgentResponse {
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Deserialize `data` into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.data.clone()))
    }

    fn failed(raw_text: String) -> Self {
        Self {
            status: ResponseStatus::Failed,
            data: Map::new(),
            raw_text,
            parse_method: ParseMethod::FallbackDefault,
        }
    }
}

/// Keys a JSON object must carry to count as the expected response.
///
/// Each requirement is a set of alternative keys, any one of which satisfies it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseShape {
    requirements: Vec<Vec<String>>,
}

impl ResponseShape {
    /// Any JSON object matches.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn requires(mut self, key: &str) -> Self {
        self.requirements.push(vec![key.to_string()]);
        self
    }

    pub fn requires_one_of(mut self, keys: &[&str]) -> Self {
        self.requirements
            .push(keys.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        self.requirements
            .iter()
            .all(|alternatives| alternatives.iter().any(|key| data.contains_key(key)))
    }
}

impl<S: AsRef<str>> FromIterator<S> for ResponseShape {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            requirements: iter
                .into_iter()
                .map(|key| vec![key.as_ref().to_string()])
                .collect(),
        }
    }
}

fn json_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)```json\s*(.*?)\s*```").ok())
        .as_ref()
}

fn bare_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\s*```").ok())
        .as_ref()
}

fn trailing_comma() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",(\s*[}\]])").ok()).as_ref()
}

#[derive(Debug, Clone)]
pub struct AgentResponseNormalizer {
    repair: bool,
}

impl Default for AgentResponseNormalizer {
    fn default() -> Self {
        Self { repair: true }
    }
}

/// Best non-matching object seen so far, used for a `Partial` result.
type Candidate = Option<(Map<String, Value>, ParseMethod)>;

impl AgentResponseNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept JSON exactly as sent, without repairing common model mistakes.
    pub fn strict() -> Self {
        Self { repair: false }
    }

    pub fn normalize(&self, raw: impl Into<RawAgentOutput>, shape: &ResponseShape) -> NormalizedAgentResponse {
        let response = match raw.into() {
            RawAgentOutput::Structured(Value::Object(map)) => {
                let raw_text = Value::Object(map.clone()).to_string();
                let status = if shape.matches(&map) {
                    ResponseStatus::Success
                } else {
                    ResponseStatus::Partial
                };
                NormalizedAgentResponse {
                    status,
                    data: map,
                    raw_text,
                    parse_method: ParseMethod::StructuredJson,
                }
            }
            RawAgentOutput::Structured(Value::String(text)) => self.normalize_text(text, shape),
            RawAgentOutput::Structured(other) => self.normalize_text(other.to_string(), shape),
            RawAgentOutput::Text(text) => self.normalize_text(text, shape),
        };

        tracing::debug!(
            status = ?response.status,
            parse_method = ?response.parse_method,
            raw_len = response.raw_text.len(),
            "Agent response normalized"
        );

        response
    }

    fn normalize_text(&self, raw_text: String, shape: &ResponseShape) -> NormalizedAgentResponse {
        let mut candidate: Candidate = None;

        // 1. The whole payload, possibly a JSON string wrapping JSON.
        let whole = match self.parse(raw_text.trim()) {
            Some(Value::String(inner)) => self.parse(inner.trim()),
            other => other,
        };
        if let Some(Value::Object(map)) = whole {
            if shape.matches(&map) {
                return success(map, raw_text, ParseMethod::StructuredJson);
            }
            candidate = Some((map, ParseMethod::StructuredJson));
        }

        // 2. Fenced blocks, `json` fences first.
        for fence in [json_fence(), bare_fence()].into_iter().flatten() {
            for caps in fence.captures_iter(&raw_text) {
                let Some(body) = caps.get(1) else { continue };
                if let Some(Value::Object(map)) = self.parse(body.as_str()) {
                    if shape.matches(&map) {
                        return success(map, raw_text, ParseMethod::EmbeddedJsonBlock);
                    }
                    candidate.get_or_insert((map, ParseMethod::EmbeddedJsonBlock));
                }
            }
        }

        // 3. Balanced object spans surrounded by prose.
        for span in balanced_object_spans(&raw_text) {
            if let Some(Value::Object(map)) = self.parse(span) {
                if shape.matches(&map) {
                    return success(map, raw_text, ParseMethod::EmbeddedJsonBlock);
                }
                candidate.get_or_insert((map, ParseMethod::EmbeddedJsonBlock));
            }
        }

        match candidate {
            Some((data, parse_method)) => NormalizedAgentResponse {
                status: ResponseStatus::Partial,
                data,
                raw_text,
                parse_method,
            },
            None => NormalizedAgentResponse::failed(raw_text),
        }
    }

    fn parse(&self, text: &str) -> Option<Value> {
        if text.is_empty() {
            return None;
        }
        match serde_json::from_str(text) {
            Ok(value) => Some(value),
            Err(_) if self.repair => serde_json::from_str(&fix_json_issues(text)).ok(),
            Err(_) => None,
        }
    }
}

fn success(data: Map<String, Value>, raw_text: String, parse_method: ParseMethod) -> NormalizedAgentResponse {
    NormalizedAgentResponse {
        status: ResponseStatus::Success,
        data,
        raw_text,
        parse_method,
    }
}

/// Repair the mistakes models most often make in hand-written JSON.
fn fix_json_issues(json: &str) -> String {
    let fixed = json
        .replace(|c: char| c == '\u{201C}' || c == '\u{201D}', "\"")
        .replace(|c: char| c == '\u{2018}' || c == '\u{2019}', "'");

    match trailing_comma() {
        Some(re) => re.replace_all(&fixed, "$1").into_owned(),
        None => fixed,
    }
}

/// Balanced `{...}` spans ordered by their opening brace, nested ones
/// included, ignoring braces inside JSON string literals.
///
/// Every `{` is tried as a start, so a stray unmatched brace in the prose
/// does not hide an object that follows it.
fn balanced_object_spans(text: &str) -> Vec<&str> {
    text.char_indices()
        .filter(|&(_, c)| c == '{')
        .filter_map(|(start, _)| {
            let rest = &text[start..];
            balanced_len(rest).map(|len| &rest[..len])
        })
        .collect()
}

/// Byte length of the object opening at the start of `text`, if it closes.
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn materials_shape() -> ResponseShape {
        ResponseShape::any().requires("materials")
    }

    #[test]
    fn structured_input_is_returned_unchanged() {
        let input = json!({"materials": [{"material_type": "wood", "area_sqm": 14.0}]});
        let result = AgentResponseNormalizer::new().normalize(input.clone(), &materials_shape());

        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.parse_method, ParseMethod::StructuredJson);
        assert_eq!(Value::Object(result.data), input);
    }

    #[test]
    fn structured_input_missing_keys_is_partial() {
        let result = AgentResponseNormalizer::new()
            .normalize(json!({"error": "analysis failed"}), &materials_shape());
        assert_eq!(result.status, ResponseStatus::Partial);
        assert_eq!(result.parse_method, ParseMethod::StructuredJson);
        assert_eq!(result.data["error"], "analysis failed");
    }

    #[test]
    fn fenced_block_is_extracted() {
        let text = "Here is the result:\n```json\n{\"materials\": []}\n```\nThanks";
        let result = AgentResponseNormalizer::new().normalize(text, &materials_shape());

        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.parse_method, ParseMethod::EmbeddedJsonBlock);
        assert_eq!(Value::Object(result.data), json!({"materials": []}));
        assert_eq!(result.raw_text, text);
    }

    #[test]
    fn first_matching_fence_wins() {
        let text = "```json\n{\"note\": \"draft\"}\n```\nthen\n```json\n{\"materials\": [1]}\n```";
        let result = AgentResponseNormalizer::new().normalize(text, &materials_shape());
        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.data["materials"], json!([1]));
    }

    #[test]
    fn bare_fence_is_used_when_no_json_fence_matches() {
        let text = "Result:\n```\n{\"materials\": []}\n```";
        let result = AgentResponseNormalizer::new().normalize(text, &materials_shape());
        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.parse_method, ParseMethod::EmbeddedJsonBlock);
    }

    #[test]
    fn balanced_span_in_prose_is_extracted() {
        let text = r#"The analysis found {"materials": [{"material_type": "tile", "location": "floor {main}"}]} in the kitchen."#;
        let result = AgentResponseNormalizer::new().normalize(text, &materials_shape());

        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.parse_method, ParseMethod::EmbeddedJsonBlock);
        assert_eq!(result.data["materials"][0]["location"], "floor {main}");
    }

    #[test]
    fn later_span_is_tried_when_first_does_not_parse() {
        let text = r#"Using {placeholder} syntax. Output: {"materials": []}"#;
        let result = AgentResponseNormalizer::new().normalize(text, &materials_shape());
        assert_eq!(result.status, ResponseStatus::Success);
    }

    #[test]
    fn whole_json_text_counts_as_structured() {
        let text = r#"{"materials": [], "measurements": {}}"#;
        let result = AgentResponseNormalizer::new().normalize(text, &materials_shape());
        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.parse_method, ParseMethod::StructuredJson);
    }

    #[test]
    fn string_encoded_json_is_unwrapped() {
        let encoded = Value::String(r#"{"materials": []}"#.to_string());
        let result = AgentResponseNormalizer::new().normalize(encoded.to_string(), &materials_shape());
        assert_eq!(result.status, ResponseStatus::Success);

        let structured = AgentResponseNormalizer::new().normalize(encoded, &materials_shape());
        assert_eq!(structured.status, ResponseStatus::Success);
    }

    #[test]
    fn trailing_commas_and_smart_quotes_are_repaired() {
        let text = "```json\n{\u{201C}materials\u{201D}: [1, 2,],}\n```";
        let result = AgentResponseNormalizer::new().normalize(text, &materials_shape());
        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.data["materials"], json!([1, 2]));

        let strict = AgentResponseNormalizer::strict().normalize(text, &materials_shape());
        assert_eq!(strict.status, ResponseStatus::Failed);
    }

    #[test]
    fn plain_text_fails_and_keeps_raw_text() {
        let result = AgentResponseNormalizer::new().normalize("no json here at all", &materials_shape());

        assert_eq!(result.status, ResponseStatus::Failed);
        assert!(result.data.is_empty());
        assert_eq!(result.parse_method, ParseMethod::FallbackDefault);
        assert_eq!(result.raw_text, "no json here at all");
    }

    #[test]
    fn unmatched_object_in_text_is_partial() {
        let text = "Sorry: {\"error\": \"model timeout\"}";
        let result = AgentResponseNormalizer::new().normalize(text, &materials_shape());
        assert_eq!(result.status, ResponseStatus::Partial);
        assert_eq!(result.data["error"], "model timeout");
    }

    #[test]
    fn non_object_json_fails() {
        let result = AgentResponseNormalizer::new().normalize(json!([1, 2, 3]), &ResponseShape::any());
        assert_eq!(result.status, ResponseStatus::Failed);
        assert_eq!(result.raw_text, "[1,2,3]");
    }

    #[test]
    fn one_of_requirement() {
        let shape = ResponseShape::any().requires_one_of(&["materials", "materials_data"]);
        let result = AgentResponseNormalizer::new().normalize(json!({"materials_data": []}), &shape);
        assert!(result.is_success());
    }

    #[test]
    fn shape_from_field_names() {
        let shape: ResponseShape = ["total_cost", "grade"].into_iter().collect();
        let ok = AgentResponseNormalizer::new().normalize(json!({"total_cost": 1, "grade": "x"}), &shape);
        let partial = AgentResponseNormalizer::new().normalize(json!({"total_cost": 1}), &shape);
        assert!(ok.is_success());
        assert_eq!(partial.status, ResponseStatus::Partial);
    }

    #[test]
    fn decode_into_typed_value() {
        #[derive(Deserialize)]
        struct Costs {
            total: f64,
        }
        let result = AgentResponseNormalizer::new().normalize("cost: {\"total\": 12.5}", &ResponseShape::any());
        let costs: Costs = result.decode().unwrap();
        assert_eq!(costs.total, 12.5);
    }

    #[test]
    fn spans_ignore_braces_in_strings() {
        let spans = balanced_object_spans(r#"a {"k": "}"} b {"x": {"y": 1}} c }"#);
        assert_eq!(
            spans,
            vec![r#"{"k": "}"}"#, r#"{"x": {"y": 1}}"#, r#"{"y": 1}"#]
        );
    }

    #[test]
    fn unmatched_brace_in_prose_does_not_hide_later_object() {
        let text = r#"Costs use {grade} placeholders and a { note. Result: {"materials": []}"#;
        let result = AgentResponseNormalizer::new().normalize(text, &materials_shape());

        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.parse_method, ParseMethod::EmbeddedJsonBlock);
        assert_eq!(Value::Object(result.data), json!({"materials": []}));
    }

    #[test]
    fn unclosed_span_is_skipped() {
        assert_eq!(balanced_object_spans("a { b {\"c\": 1} d"), vec![r#"{"c": 1}"#]);
        assert!(balanced_object_spans("{ never closed").is_empty());
    }
}

//! Candidate keys are probed in order; the first non-null value wins.

use serde_json::{Map, Value};
use thiserror::Error;

const HEADLINE_KEYS: &[&str] = &["headline", "titular", "titulo", "title"];
const SUMMARY_KEYS: &[&str] = &["summary", "resumen", "body"];
const ACTION_KEYS: &[&str] = &[
    "actions",
    "acciones",
    "nextActions",
    "recommendations",
    "recomendaciones",
];
const CONTENT_KEYS: &[&str] = &["content", "contenido", "text", "texto"];
const RECOMMENDATION_KEYS: &[&str] = &[
    "recommendation",
    "recomendacion",
    "nextStep",
    "siguientePaso",
    "action",
    "accion",
];
const RATIONALE_KEYS: &[&str] = &["rationale", "justificacion", "reasons", "razones"];
const HIGHLIGHT_KEYS: &[&str] = &["highlights", "puntosClave", "destacados", "keyPoints"];

const ITEM_LABEL_KEYS: &[&str] = &["action", "accion", "title", "titulo", "label", "text"];
const ITEM_PRIORITY_KEYS: &[&str] = &["priority", "prioridad"];
const ITEM_DETAIL_KEYS: &[&str] = &["details", "detalles", "description", "descripcion"];

const MAX_SUMMARY_PARAGRAPHS: usize = 2;
const MAX_ACTIONS: usize = 5;
const MAX_LIST_ITEMS: usize = 5;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("model content is not valid JSON: {0}")]
    ContentParse(String),
    #[error("model content has no usable fields")]
    ContentEmpty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestFields {
    pub headline: Option<String>,
    pub summary: Option<Vec<String>>,
    pub actions: Option<Vec<String>>,
    pub content: Option<String>,
}

impl DigestFields {
    pub fn is_empty(&self) -> bool {
        self.headline.is_none()
            && self.summary.is_none()
            && self.actions.is_none()
            && self.content.is_none()
    }

    /// Headline, then summary paragraphs, then actions, newline-joined.
    pub fn flattened(&self) -> String {
        let mut lines: Vec<&str> = Vec::new();
        lines.extend(self.headline.as_deref());
        lines.extend(self.summary.iter().flatten().map(String::as_str));
        lines.extend(self.actions.iter().flatten().map(String::as_str));
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NextStepFields {
    pub recommendation: Option<String>,
    pub rationale: Option<Vec<String>>,
    pub content: Option<String>,
}

impl NextStepFields {
    pub fn is_empty(&self) -> bool {
        self.recommendation.is_none() && self.rationale.is_none() && self.content.is_none()
    }

    pub fn flattened(&self) -> String {
        let mut lines: Vec<&str> = Vec::new();
        lines.extend(self.recommendation.as_deref());
        lines.extend(self.rationale.iter().flatten().map(String::as_str));
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactSummaryFields {
    pub summary: Option<String>,
    pub highlights: Option<Vec<String>>,
    pub content: Option<String>,
}

impl ContactSummaryFields {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.highlights.is_none() && self.content.is_none()
    }

    pub fn flattened(&self) -> String {
        let mut lines: Vec<&str> = Vec::new();
        lines.extend(self.summary.as_deref());
        lines.extend(self.highlights.iter().flatten().map(String::as_str));
        lines.join("\n")
    }
}

pub fn parse_digest(raw: &str) -> Result<DigestFields, NormalizeError> {
    let obj = parse_object(raw)?;
    let fields = DigestFields {
        headline: pick(&obj, HEADLINE_KEYS).and_then(text),
        summary: pick(&obj, SUMMARY_KEYS).and_then(|v| text_list(v, MAX_SUMMARY_PARAGRAPHS)),
        actions: pick(&obj, ACTION_KEYS).and_then(|v| text_list(v, MAX_ACTIONS)),
        content: pick(&obj, CONTENT_KEYS).and_then(text),
    };
    if fields.is_empty() {
        return Err(NormalizeError::ContentEmpty);
    }
    Ok(fields)
}

pub fn parse_next_step(raw: &str) -> Result<NextStepFields, NormalizeError> {
    let obj = parse_object(raw)?;
    let fields = NextStepFields {
        recommendation: pick(&obj, RECOMMENDATION_KEYS).and_then(text),
        rationale: pick(&obj, RATIONALE_KEYS).and_then(|v| text_list(v, MAX_LIST_ITEMS)),
        content: pick(&obj, CONTENT_KEYS).and_then(text),
    };
    if fields.is_empty() {
        return Err(NormalizeError::ContentEmpty);
    }
    Ok(fields)
}

pub fn parse_contact_summary(raw: &str) -> Result<ContactSummaryFields, NormalizeError> {
    let obj = parse_object(raw)?;
    let fields = ContactSummaryFields {
        summary: pick(&obj, SUMMARY_KEYS).and_then(text),
        highlights: pick(&obj, HIGHLIGHT_KEYS).and_then(|v| text_list(v, MAX_LIST_ITEMS)),
        content: pick(&obj, CONTENT_KEYS).and_then(text),
    };
    if fields.is_empty() {
        return Err(NormalizeError::ContentEmpty);
    }
    Ok(fields)
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, NormalizeError> {
    let candidate = extract_json_block(raw).ok_or(NormalizeError::ContentEmpty)?;
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(other) => Err(NormalizeError::ContentParse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(err) => Err(NormalizeError::ContentParse(err.to_string())),
    }
}

/// Strips a markdown code fence or leading/trailing prose around the payload.
fn extract_json_block(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(body) = fenced_body(trimmed) {
        if body.is_empty() {
            return None;
        }
        return Some(embedded_object(body).unwrap_or(body));
    }
    if trimmed.starts_with('[') {
        return Some(trimmed);
    }
    Some(embedded_object(trimmed).unwrap_or(trimmed))
}

/// Text between the first fence (minus its language tag) and the next one.
fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")? + 3;
    let after_open = &text[open..];
    let tag_len = after_open
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after_open.len());
    let body = &after_open[tag_len..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// First brace-balanced object, ignoring braces inside string literals.
fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let candidate = &text[start..];
    let mut depth = 0u32;
    let mut in_string = false;
    let mut escape = false;
    for (i, ch) in candidate.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&candidate[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn pick<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| !value.is_null())
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(s),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(item_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        Value::Object(obj) => flatten_item(obj),
        _ => None,
    }
}

fn text_list(value: &Value, cap: usize) -> Option<Vec<String>> {
    let mut items: Vec<String> = match value {
        Value::String(s) => non_blank(s).into_iter().collect(),
        Value::Array(items) => items.iter().filter_map(item_text).collect(),
        _ => Vec::new(),
    };
    items.truncate(cap);
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn item_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(s),
        Value::Object(obj) => flatten_item(obj),
        _ => None,
    }
}

/// `label (Prioridad p): details`, skipping whichever parts are absent.
fn flatten_item(obj: &Map<String, Value>) -> Option<String> {
    let label = pick(obj, ITEM_LABEL_KEYS).and_then(scalar_text);
    let priority = pick(obj, ITEM_PRIORITY_KEYS).and_then(scalar_text);
    let details = pick(obj, ITEM_DETAIL_KEYS).and_then(scalar_text);

    let mut out = label.unwrap_or_default();
    if let Some(p) = priority {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&format!("(Prioridad {p})"));
    }
    if let Some(d) = details {
        if !out.is_empty() {
            out.push_str(": ");
        }
        out.push_str(&d);
    }
    non_blank(&out)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

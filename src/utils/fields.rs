use serde_json::Value;

/// What a JSON body asks for on an optional text column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextPatch {
    Omitted,
    Clear,
    Set(String),
}

/// Blank strings count as `Clear`; anything that is not a string or null is rejected.
pub fn classify_text(value: Option<&Value>) -> Result<TextPatch, String> {
    match value {
        None => Ok(TextPatch::Omitted),
        Some(Value::Null) => Ok(TextPatch::Clear),
        Some(Value::String(s)) => Ok(match s.trim() {
            "" => TextPatch::Clear,
            trimmed => TextPatch::Set(trimmed.to_owned()),
        }),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

pub fn trimmed_or_none(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Flattening of heterogeneous LLM JSON into plain strings.
///
/// Providers answer "list the domains" with a string, a list of strings, a list of objects
/// (`[{"name": "NLP", "details": "..."}]`) or a nested map, depending on the model and the day.
/// [`JsonText`] classifies a payload into one of those shapes in a single recursive-descent
/// pass; [`JsonText::strings`] then walks the tree and yields every string leaf in document
/// order. Leaves that are not text (numbers, booleans, null) are kept as
/// [`JsonText::Unrecognized`] so callers can count or log them instead of losing them silently.
use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum JsonText {
    Text(String),
    List(Vec<JsonText>),
    /// Object entries in document order.
    Map(Vec<(String, JsonText)>),
    Unrecognized(Value),
}

impl JsonText {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => JsonText::Text(s.clone()),
            Value::Array(items) => JsonText::List(items.iter().map(JsonText::from_value).collect()),
            Value::Object(map) => JsonText::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), JsonText::from_value(v)))
                    .collect(),
            ),
            other => JsonText::Unrecognized(other.clone()),
        }
    }

    /// Every non-blank string leaf, trimmed, in document order.
    pub fn strings(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_strings(&mut out);
        out
    }

    fn collect_strings(&self, out: &mut Vec<String>) {
        match self {
            JsonText::Text(s) => {
                let s = s.trim();
                if !s.is_empty() {
                    out.push(s.to_string());
                }
            }
            JsonText::List(items) => items.iter().for_each(|i| i.collect_strings(out)),
            JsonText::Map(entries) => entries.iter().for_each(|(_, v)| v.collect_strings(out)),
            JsonText::Unrecognized(_) => {}
        }
    }

    /// Leaves that could not be read as text.
    pub fn unrecognized(&self) -> Vec<&Value> {
        let mut out = Vec::new();
        self.collect_unrecognized(&mut out);
        out
    }

    fn collect_unrecognized<'a>(&'a self, out: &mut Vec<&'a Value>) {
        match self {
            JsonText::Unrecognized(v) => out.push(v),
            JsonText::List(items) => items.iter().for_each(|i| i.collect_unrecognized(out)),
            JsonText::Map(entries) => entries
                .iter()
                .for_each(|(_, v)| v.collect_unrecognized(out)),
            JsonText::Text(_) => {}
        }
    }
}

impl<'de> Deserialize<'de> for JsonText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(JsonText::from_value(&value))
    }
}

/// Strings found under `field` of an object payload; empty when the field is absent.
pub fn field_strings(payload: &Value, field: &str) -> Vec<String> {
    payload
        .get(field)
        .map(|v| {
            let text = JsonText::from_value(v);
            let skipped = text.unrecognized().len();
            if skipped > 0 {
                tracing::debug!(field, skipped, "ignored non-text values in LLM payload");
            }
            text.strings()
        })
        .unwrap_or_default()
}

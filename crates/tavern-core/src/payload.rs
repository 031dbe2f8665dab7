use serde_json::{Number, Value};

/// A message pushed to a session's connections.
///
/// The encoding to bytes is total: every variant has exactly one wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Plain text, sent as UTF-8.
    Text(String),
    /// A structured record, sent as compact JSON.
    Record(Value),
    /// A number, sent in its decimal form.
    Number(Number),
    /// A boolean, sent as `True` / `False`.
    Boolean(bool),
}

impl Payload {
    /// Encodes the payload for the push transport.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.as_bytes().to_vec(),
            Payload::Record(value) => value.to_string().into_bytes(),
            Payload::Number(number) => number.to_string().into_bytes(),
            Payload::Boolean(true) => b"True".to_vec(),
            Payload::Boolean(false) => b"False".to_vec(),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Payload::Boolean(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Payload::Number(Number::from(value))
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        // NaN and infinities have no JSON number form.
        match Number::from_f64(value) {
            Some(number) => Payload::Number(number),
            None => Payload::Text(value.to_string()),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Payload::Text(text),
            Value::Bool(flag) => Payload::Boolean(flag),
            Value::Number(number) => Payload::Number(number),
            other => Payload::Record(other),
        }
    }
}

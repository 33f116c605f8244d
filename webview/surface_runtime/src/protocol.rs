use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Success => 0,
            Status::Error => -1,
        }
    }
}

/// Encoded outcome of one binding call: the status plus a JSON text payload.
///
/// On success the payload is the JSON-encoded return value; on failure it is
/// the error message encoded as a JSON string, so the script side can always
/// `JSON.parse` it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub payload: String,
}

impl Reply {
    pub fn value<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(payload) => Reply {
                status: Status::Success,
                payload,
            },
            Err(err) => Reply::error(err),
        }
    }

    pub fn null() -> Self {
        Reply {
            status: Status::Success,
            payload: "null".to_string(),
        }
    }

    pub fn error(message: impl fmt::Display) -> Self {
        Reply {
            status: Status::Error,
            payload: encode_string(&message.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

pub fn decode_args(raw: &str) -> Result<Vec<Value>, serde_json::Error> {
    serde_json::from_str::<Vec<Value>>(raw)
}

pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

pub fn decode_value<T: DeserializeOwned>(raw: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(raw)
}

pub fn encode_string(text: &str) -> String {
    // A `str` always serializes.
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

/// Escapes the characters a `data:` URL decoder would otherwise eat (`+` and `%`).
pub fn escape_js(js: &str) -> String {
    let mut out = String::with_capacity(js.len());

    for ch in js.chars() {
        match ch {
            '+' => out.push_str("%2b"),
            '%' => out.push_str("%25"),
            other => out.push(other),
        }
    }

    out
}

pub fn html_data_url(html: &str) -> String {
    format!("data:text/html,{}", escape_js(html))
}

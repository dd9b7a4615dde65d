use serde_json::Value;

use crate::error::{ReconcileError, Result};

/// `orsuccess` value for an accepted request.
const SUCCESS_FLAG: &str = "1";
/// `orsuccess` value the platform uses for an invalid or expired token.
const AUTH_REJECTED_FLAG: &str = "-99";
/// `orsuccess` value paired with `NO_DATA_MESSAGE` for an empty listing.
const NO_DATA_FLAG: &str = "0";
const NO_DATA_MESSAGE: &str = "没有数据";

/// What one response body says about the requested page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Records(Vec<Value>),
    NoData,
}

impl PageOutcome {
    pub fn into_records(self) -> Vec<Value> {
        match self {
            PageOutcome::Records(records) => records,
            PageOutcome::NoData => Vec::new(),
        }
    }
}

fn flag_of(body: &Value) -> Option<String> {
    match body.get("orsuccess")? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn message_of(body: &Value) -> String {
    body.get("Msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string()
}

/// Interpret a listing response envelope.
///
/// A success flag with an absent or null data field is an empty page, not an
/// error. Authentication rejections surface as `ReconcileError::Auth`; any
/// other failure flag becomes a transient `ReconcileError::Remote`.
pub fn interpret(body: &Value, data_field: &str) -> Result<PageOutcome> {
    if !body.is_object() {
        return Err(ReconcileError::MalformedBody(format!(
            "expected a JSON object, got {}",
            kind_of(body)
        )));
    }

    let flag = flag_of(body).ok_or_else(|| {
        ReconcileError::MalformedBody("response has no orsuccess flag".to_string())
    })?;

    match flag.as_str() {
        SUCCESS_FLAG => match body.get(data_field) {
            None | Some(Value::Null) => Ok(PageOutcome::NoData),
            Some(Value::Array(records)) => Ok(PageOutcome::Records(records.clone())),
            Some(other) => Err(ReconcileError::MalformedBody(format!(
                "field '{}' is {}, expected an array",
                data_field,
                kind_of(other)
            ))),
        },
        AUTH_REJECTED_FLAG => Err(ReconcileError::Auth(message_of(body))),
        NO_DATA_FLAG if message_of(body) == NO_DATA_MESSAGE => Ok(PageOutcome::NoData),
        other => Err(ReconcileError::Remote(format!(
            "orsuccess={}: {}",
            other,
            message_of(body)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_with_records() {
        let body = json!({ "orsuccess": "1", "data": [{ "ID": "1" }, { "ID": "2" }] });
        let outcome = interpret(&body, "data").unwrap();
        assert_eq!(outcome.into_records().len(), 2);
    }

    #[test]
    fn test_numeric_success_flag() {
        let body = json!({ "orsuccess": 1, "listall": [] });
        assert_eq!(interpret(&body, "listall").unwrap(), PageOutcome::Records(vec![]));
    }

    #[test]
    fn test_success_without_data_is_empty() {
        let body = json!({ "orsuccess": "1" });
        assert_eq!(interpret(&body, "data").unwrap(), PageOutcome::NoData);
        let body = json!({ "orsuccess": "1", "data": null });
        assert_eq!(interpret(&body, "data").unwrap(), PageOutcome::NoData);
    }

    #[test]
    fn test_no_data_message() {
        let body = json!({ "orsuccess": "0", "Msg": "没有数据" });
        assert_eq!(interpret(&body, "data").unwrap(), PageOutcome::NoData);
    }

    #[test]
    fn test_auth_rejection_string_and_number() {
        let body = json!({ "orsuccess": "-99", "Msg": "token expired" });
        assert!(matches!(interpret(&body, "data"), Err(ReconcileError::Auth(_))));
        let body = json!({ "orsuccess": -99 });
        assert!(interpret(&body, "data").unwrap_err().is_auth());
    }

    #[test]
    fn test_other_failure_is_transient() {
        let body = json!({ "orsuccess": "0", "Msg": "server busy" });
        let err = interpret(&body, "data").unwrap_err();
        assert!(matches!(err, ReconcileError::Remote(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(matches!(
            interpret(&json!([1, 2]), "data"),
            Err(ReconcileError::MalformedBody(_))
        ));
        assert!(matches!(
            interpret(&json!({ "data": [] }), "data"),
            Err(ReconcileError::MalformedBody(_))
        ));
        assert!(matches!(
            interpret(&json!({ "orsuccess": "1", "data": "oops" }), "data"),
            Err(ReconcileError::MalformedBody(_))
        ));
    }
}

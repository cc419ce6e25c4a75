//! Redaction policy for logging third-party payloads
//!
//! Applied at the logging boundary before webhook bodies hit the log stream,
//! so individual call sites never have to remember which keys are sensitive.

use std::collections::HashSet;

use serde_json::Value;

const REDACTED: &str = "[redacted]";

const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "email",
    "customer_email",
    "name",
    "phone",
    "address",
    "billing_details",
    "payment_method",
    "card",
    "client_secret",
];

#[derive(Debug, Clone)]
pub struct RedactionPolicy {
    sensitive_keys: HashSet<String>,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self::with_keys(DEFAULT_SENSITIVE_KEYS.iter().map(|k| k.to_string()))
    }
}

impl RedactionPolicy {
    pub fn with_keys(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            sensitive_keys: keys.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Deep-copy `value` with every sensitive key's value replaced.
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, val)| {
                        if self.sensitive_keys.contains(&key.to_lowercase()) {
                            (key.clone(), Value::String(REDACTED.to_string()))
                        } else {
                            (key.clone(), self.redact(val))
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_sensitive_keys_at_any_depth() {
        let policy = RedactionPolicy::default();
        let payload = json!({
            "id": "cs_123",
            "customer_email": "person@example.com",
            "charges": [{"billing_details": {"name": "A Person"}, "amount": 100}]
        });

        let redacted = policy.redact(&payload);
        assert_eq!(redacted["id"], "cs_123");
        assert_eq!(redacted["customer_email"], "[redacted]");
        assert_eq!(redacted["charges"][0]["billing_details"], "[redacted]");
        assert_eq!(redacted["charges"][0]["amount"], 100);
    }

    #[test]
    fn key_matching_is_case_insensitive() {
        let policy = RedactionPolicy::with_keys(["secret".to_string()]);
        let redacted = policy.redact(&json!({"Secret": "hunter2", "ok": 1}));
        assert_eq!(redacted["Secret"], "[redacted]");
        assert_eq!(redacted["ok"], 1);
    }
}

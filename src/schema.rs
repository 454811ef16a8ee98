//! JSON schema validation of tool arguments.

use jsonschema::JSONSchema;
use serde_json::Value;

const MAX_REPORTED_ERRORS: usize = 3;

/// A tool's input schema, compiled once at registration.
pub(crate) struct ArgumentValidator {
    compiled: JSONSchema,
}

impl ArgumentValidator {
    /// Compile `schema`, or return `None` when there is nothing to enforce.
    ///
    /// A schema that fails to compile is logged and skipped so a single bad
    /// definition does not take the tool offline.
    pub(crate) fn compile(tool_name: &str, schema: &Value) -> Option<Self> {
        if !schema.is_object() {
            return None;
        }
        match JSONSchema::compile(schema) {
            Ok(compiled) => Some(Self { compiled }),
            Err(error) => {
                log::warn!(
                    "Invalid input schema for tool '{tool_name}', skipping validation: {error}"
                );
                None
            }
        }
    }

    /// Validate `arguments`, describing up to three violations on failure.
    pub(crate) fn validate(&self, arguments: &Value) -> Result<(), String> {
        let Err(errors) = self.compiled.validate(arguments) else {
            return Ok(());
        };

        let messages: Vec<String> = errors
            .take(MAX_REPORTED_ERRORS)
            .map(|error| {
                let path = error.instance_path.to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{error} at {path}")
                }
            })
            .collect();
        Err(messages.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quote_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["symbol"]
        })
    }

    #[test]
    fn test_valid_arguments_pass() {
        let validator = ArgumentValidator::compile("get_quote", &quote_schema()).unwrap();
        assert!(validator.validate(&json!({"symbol": "AAPL"})).is_ok());
        assert!(validator.validate(&json!({"symbol": "AAPL", "limit": 5})).is_ok());
    }

    #[test]
    fn test_missing_required_property_fails() {
        let validator = ArgumentValidator::compile("get_quote", &quote_schema()).unwrap();
        let err = validator.validate(&json!({})).unwrap_err();
        assert!(err.contains("symbol"), "unexpected message: {err}");
    }

    #[test]
    fn test_wrong_type_reports_path() {
        let validator = ArgumentValidator::compile("get_quote", &quote_schema()).unwrap();
        let err = validator
            .validate(&json!({"symbol": "AAPL", "limit": "five"}))
            .unwrap_err();
        assert!(err.contains("/limit"), "unexpected message: {err}");
    }

    #[test]
    fn test_non_object_schema_is_skipped() {
        assert!(ArgumentValidator::compile("raw", &json!(null)).is_none());
        assert!(ArgumentValidator::compile("raw", &json!(true)).is_none());
    }

    #[test]
    fn test_invalid_schema_is_skipped() {
        let schema = json!({"type": "no-such-type"});
        assert!(ArgumentValidator::compile("broken", &schema).is_none());
    }
}

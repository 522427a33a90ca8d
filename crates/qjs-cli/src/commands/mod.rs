//! CLI command implementations.

pub mod call;
pub mod eval;
pub mod run;

use serde_json::Value;

/// Text printed for a result; `None` for nothing to print
///
/// Strings print raw, everything else as pretty JSON.
pub fn render(value: &Value) -> anyhow::Result<Option<String>> {
    Ok(match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(serde_json::to_string_pretty(other)?),
    })
}

pub fn print_result(value: &Value) -> anyhow::Result<()> {
    if let Some(text) = render(value)? {
        println!("{}", text);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render() {
        assert_eq!(render(&Value::Null).unwrap(), None);
        assert_eq!(render(&json!("plain")).unwrap().as_deref(), Some("plain"));
        assert_eq!(render(&json!(49)).unwrap().as_deref(), Some("49"));
        assert_eq!(
            render(&json!({ "a": 1 })).unwrap().as_deref(),
            Some("{\n  \"a\": 1\n}")
        );
    }
}

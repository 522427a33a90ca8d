//! Integration tests for file based hosts

use std::time::Duration;

use qjs_host::{HostArg, HostConfig, HostError, JsHost, QjsError, ResultMode};
use serde_json::json;

#[test]
fn test_init_from_file_and_call() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("plugin.js");
    std::fs::write(
        &file,
        r#"
function main(n) {
    return { input: n, squares: [1, 2, 3].map(x => x * n) };
}
"#,
    )
    .unwrap();

    let mut host = JsHost::new(HostConfig::default());
    host.init(&file).unwrap();
    assert_eq!(
        host.call_global("main", &[HostArg::Int(2)]).unwrap(),
        json!({ "input": 2, "squares": [2, 4, 6] })
    );
}

#[test]
fn test_append_file_extends_context() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.js");
    let extra = dir.path().join("extra.js");
    std::fs::write(&base, "var prefix = 'hello';").unwrap();
    std::fs::write(&extra, "function greet(name) { return prefix + ', ' + name; }").unwrap();

    let mut host = JsHost::new(HostConfig::default());
    host.init(&base).unwrap();
    host.append_file(&extra).unwrap();
    assert_eq!(
        host.call_global("greet", &["world".into()]).unwrap(),
        json!("hello, world")
    );

    let err = host.append_file(dir.path().join("absent.js")).unwrap_err();
    assert!(matches!(err, HostError::Io { .. }));
    assert!(host.last_error().unwrap().contains("absent.js"));
}

#[test]
fn test_script_errors_carry_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("thrower.js");
    std::fs::write(&file, "function boom() {\n  throw new TypeError('bad thing');\n}\n").unwrap();

    let mut host = JsHost::new(HostConfig::default());
    host.init(&file).unwrap();
    match host.call_global("boom", &[]).unwrap_err() {
        HostError::Engine(err @ QjsError::Script { .. }) => {
            assert_eq!(err.error_type(), Some("TypeError"));
            assert!(err.stack_trace().unwrap_or_default().contains("thrower.js"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_config_file_drives_host() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("qjs.toml");
    std::fs::write(
        &config_path,
        "timeout_ms = 100\nresult_mode = \"as_json\"\n\n[runtime]\nmemory_limit = 67108864\n",
    )
    .unwrap();
    let config = HostConfig::load(&config_path).unwrap();
    assert_eq!(config.result_mode, ResultMode::AsJson);

    let mut host = JsHost::new(config);
    host.init_from_source("function list() { return [1, 'two']; } function hang() { while (true) {} }", None)
        .unwrap();
    assert_eq!(host.call_global("list", &[]).unwrap(), json!("[1,\"two\"]"));
    assert!(matches!(
        host.call_global("hang", &[]),
        Err(HostError::Timeout(limit)) if limit == Duration::from_millis(100)
    ));
}

#[test]
fn test_timeout_during_init() {
    let config = HostConfig::default().with_timeout(Duration::from_millis(30));
    let mut host = JsHost::new(config);
    let err = host.init_from_source("for (;;) {}", Some("spin.js")).unwrap_err();
    assert!(matches!(err, HostError::Timeout(_)));
    assert!(!host.is_initialized());
}

#[test]
fn test_text_arguments() {
    let mut host = JsHost::new(HostConfig::default());
    host.init_from_source("function kinds() { return Array.from(arguments, a => typeof a); }", None)
        .unwrap();
    let args: Vec<HostArg> = ["1", "2.5", "true", "null", "text"]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
    assert_eq!(
        host.call_global("kinds", &args).unwrap(),
        json!(["number", "number", "boolean", "object", "string"])
    );
}

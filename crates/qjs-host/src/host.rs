//! Script host: one runtime, one context, one loaded script

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use qjs_core::{
    EvalFlags, HostValue, InterruptAction, Intrinsic, QjsContext, QjsError, QjsRuntime,
};
use tracing::{debug, info, warn};

use crate::arg::HostArg;
use crate::config::{HostConfig, ResultMode};
use crate::error::{HostError, HostResult};

const DEFAULT_SCRIPT_NAME: &str = "<root>";

/// Engine state of an initialized host
struct Engine {
    context: QjsContext,
    runtime: QjsRuntime,
    deadline: Rc<Cell<Option<Instant>>>,
    timed_out: Rc<Cell<bool>>,
}

impl Engine {
    fn start(config: &HostConfig) -> HostResult<Self> {
        let runtime = QjsRuntime::with_config(config.runtime.clone())?;
        let context = if config.intrinsics {
            runtime.create_context()?
        } else {
            let context = runtime.create_raw_context()?;
            for intrinsic in [Intrinsic::BaseObjects, Intrinsic::Eval, Intrinsic::Json] {
                context.add_intrinsic(intrinsic)?;
            }
            context
        };

        let deadline = Rc::new(Cell::new(None::<Instant>));
        let timed_out = Rc::new(Cell::new(false));
        {
            let deadline = Rc::clone(&deadline);
            let timed_out = Rc::clone(&timed_out);
            runtime.on_interrupt(move || match deadline.get() {
                Some(limit) if Instant::now() >= limit => {
                    timed_out.set(true);
                    InterruptAction::Cancel
                }
                _ => InterruptAction::Continue,
            });
        }

        Ok(Self {
            context,
            runtime,
            deadline,
            timed_out,
        })
    }

    /// Run `f` under the wall-clock budget
    fn guarded<T>(
        &self,
        timeout: Option<Duration>,
        f: impl FnOnce(&Engine) -> HostResult<T>,
    ) -> HostResult<T> {
        self.timed_out.set(false);
        self.deadline.set(timeout.map(|t| Instant::now() + t));
        let result = f(self);
        self.deadline.set(None);

        match (result, timeout) {
            (Err(HostError::Engine(QjsError::Interrupted)), Some(limit)) if self.timed_out.get() => {
                Err(HostError::Timeout(limit))
            }
            (result, _) => result,
        }
    }

    fn eval(&self, timeout: Option<Duration>, code: &str, name: &str) -> HostResult<HostValue> {
        self.guarded(timeout, |engine| {
            Ok(engine.context.eval(code, name, EvalFlags::GLOBAL)?)
        })
    }

    fn run_jobs(&self, timeout: Option<Duration>) -> HostResult<()> {
        self.guarded(timeout, |engine| {
            engine.runtime.run_pending_jobs(false)?;
            Ok(())
        })
    }
}

fn read_source(path: &Path) -> HostResult<String> {
    std::fs::read_to_string(path).map_err(|source| HostError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads one script and calls its global functions
///
/// The host owns a runtime and a single context. Every failing operation
/// records its message, available from [`JsHost::last_error`] until the
/// next call.
///
/// ```no_run
/// use qjs_host::{HostArg, HostConfig, JsHost};
///
/// let mut host = JsHost::new(HostConfig::default());
/// host.init("plugin.js").unwrap();
/// let result = host.call_global("main", &[HostArg::Int(2)]).unwrap();
/// println!("{}", result);
/// ```
pub struct JsHost {
    config: HostConfig,
    engine: Option<Engine>,
    last_error: Option<String>,
}

impl JsHost {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            engine: None,
            last_error: None,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    /// Message of the most recent failure, cleared by the next call
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Start the engine, evaluate `file` and drain the jobs it queued
    ///
    /// On failure the engine is torn down again, so `init` may be retried.
    pub fn init(&mut self, file: impl AsRef<Path>) -> HostResult<()> {
        let path = file.as_ref();
        let result = self.start_with(|engine, timeout| {
            let source = read_source(path)?;
            engine.eval(timeout, &source, &path.display().to_string())?;
            Ok(())
        });
        if result.is_ok() {
            info!(file = %path.display(), "script host initialized");
        }
        result
    }

    /// Like [`JsHost::init`], from source text
    pub fn init_from_source(&mut self, code: &str, filename: Option<&str>) -> HostResult<()> {
        let name = filename.unwrap_or(DEFAULT_SCRIPT_NAME);
        let result = self.start_with(|engine, timeout| {
            engine.eval(timeout, code, name)?;
            Ok(())
        });
        if result.is_ok() {
            info!(script = name, "script host initialized");
        }
        result
    }

    /// Start the engine without loading a script
    pub fn start(&mut self) -> HostResult<()> {
        self.start_with(|_, _| Ok(()))
    }

    fn start_with(
        &mut self,
        load: impl FnOnce(&Engine, Option<Duration>) -> HostResult<()>,
    ) -> HostResult<()> {
        if self.engine.is_some() {
            return Err(HostError::AlreadyInitialized);
        }
        self.last_error = None;
        let timeout = self.config.timeout();
        let started = Engine::start(&self.config).and_then(|engine| {
            load(&engine, timeout)?;
            engine.run_jobs(timeout)?;
            Ok(engine)
        });
        match started {
            Ok(engine) => {
                self.engine = Some(engine);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "script host initialization failed");
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Evaluate more code in the loaded context
    pub fn append_code(&mut self, code: &str, name: &str) -> HostResult<()> {
        let timeout = self.config.timeout();
        self.record(|engine| engine.eval(timeout, code, name).map(drop))
    }

    pub fn append_file(&mut self, path: impl AsRef<Path>) -> HostResult<()> {
        let path = path.as_ref();
        let timeout = self.config.timeout();
        self.record(|engine| {
            let source = read_source(path)?;
            engine.eval(timeout, &source, &path.display().to_string())?;
            Ok(())
        })
    }

    /// Evaluate code and return its completion value, shaped like a call result
    pub fn eval(&mut self, code: &str, name: &str) -> HostResult<serde_json::Value> {
        let timeout = self.config.timeout();
        let mode = self.config.result_mode;
        self.record(|engine| shape_result(engine.eval(timeout, code, name)?, mode))
    }

    pub fn eval_file(&mut self, path: impl AsRef<Path>) -> HostResult<serde_json::Value> {
        let path = path.as_ref();
        let timeout = self.config.timeout();
        let mode = self.config.result_mode;
        self.record(|engine| {
            let source = read_source(path)?;
            let value = engine.eval(timeout, &source, &path.display().to_string())?;
            shape_result(value, mode)
        })
    }

    /// Drain pending jobs (promise reactions)
    pub fn run_init_loop(&mut self) -> HostResult<()> {
        let timeout = self.config.timeout();
        self.record(|engine| engine.run_jobs(timeout))
    }

    /// Call a global function with primitive arguments; the result is shaped per
    /// the configured [`ResultMode`]
    pub fn call_global(&mut self, name: &str, args: &[HostArg]) -> HostResult<serde_json::Value> {
        let timeout = self.config.timeout();
        let mode = self.config.result_mode;
        let collect = self.config.collect_after_call;
        self.record(|engine| {
            let result = engine.guarded(timeout, |engine| {
                let func = match engine.context.global()?.get(name)? {
                    HostValue::Handle(h) if h.is_function()? => h,
                    _ => return Err(HostError::NotAFunction(name.to_string())),
                };
                let argv: Vec<HostValue> = args.iter().map(HostArg::to_host_value).collect();
                let value = func.call(&argv)?;
                shape_result(value, mode)
            });
            if collect {
                engine.runtime.collect()?;
            }
            debug!(function = name, ok = result.is_ok(), "global called");
            result
        })
    }

    /// The loaded context, for registering host functions
    pub fn context(&self) -> HostResult<&QjsContext> {
        self.engine
            .as_ref()
            .map(|e| &e.context)
            .ok_or(HostError::NotInitialized)
    }

    pub fn runtime(&self) -> HostResult<&QjsRuntime> {
        self.engine
            .as_ref()
            .map(|e| &e.runtime)
            .ok_or(HostError::NotInitialized)
    }

    /// Tear the engine down; the host may be initialized again
    pub fn dispose(&mut self) {
        if self.engine.take().is_some() {
            debug!("script host disposed");
        }
    }

    fn record<T>(&mut self, f: impl FnOnce(&Engine) -> HostResult<T>) -> HostResult<T> {
        self.last_error = None;
        let result = match self.engine.as_ref() {
            Some(engine) => f(engine),
            None => Err(HostError::NotInitialized),
        };
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }
}

impl std::fmt::Debug for JsHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsHost")
            .field("initialized", &self.is_initialized())
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Turn a call result into JSON
fn shape_result(value: HostValue, mode: ResultMode) -> HostResult<serde_json::Value> {
    match mode {
        ResultMode::Value => Ok(value.to_json_value()?),
        ResultMode::JsonParse => match &value {
            HostValue::String(text) => Ok(serde_json::from_str(text)?),
            _ => Ok(value.to_json_value()?),
        },
        ResultMode::SingleValue => match &value {
            HostValue::Handle(h) => Err(HostError::UnsupportedResult(format!(
                "a {} is not a single value",
                h.tag()?
            ))),
            _ => Ok(value.to_json_value()?),
        },
        ResultMode::AsJson => {
            let text = match &value {
                HostValue::Handle(h) => h.try_to_json(None)?,
                other => Some(serde_json::to_string(&other.to_json_value()?)?),
            };
            Ok(text.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with(code: &str) -> JsHost {
        let mut host = JsHost::new(HostConfig::default());
        host.init_from_source(code, None).unwrap();
        host
    }

    #[test]
    fn test_not_initialized() {
        let mut host = JsHost::new(HostConfig::default());
        assert!(matches!(
            host.call_global("main", &[]),
            Err(HostError::NotInitialized)
        ));
        assert_eq!(
            host.last_error(),
            Some("The script host is not initialized")
        );
        assert!(host.context().is_err());
    }

    #[test]
    fn test_init_twice_fails() {
        let mut host = host_with("var x = 1;");
        assert!(matches!(
            host.init_from_source("var y = 2;", None),
            Err(HostError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_call_with_primitives() {
        let mut host = host_with("function main(n, s, b) { return [n * n, s + '!', !b, typeof arguments[3]]; }");
        let result = host
            .call_global(
                "main",
                &[HostArg::Int(3), HostArg::from("hi"), HostArg::Bool(true), HostArg::Null],
            )
            .unwrap();
        assert_eq!(result, serde_json::json!([9, "hi!", false, "object"]));
        assert_eq!(host.last_error(), None);
    }

    #[test]
    fn test_missing_function() {
        let mut host = host_with("var notFn = 5;");
        assert!(matches!(
            host.call_global("notFn", &[]),
            Err(HostError::NotAFunction(name)) if name == "notFn"
        ));
        assert!(matches!(
            host.call_global("absent", &[]),
            Err(HostError::NotAFunction(_))
        ));
        assert!(host.last_error().is_some());
    }

    #[test]
    fn test_script_error_recorded() {
        let mut host = host_with("function fail() { throw new RangeError('too far'); }");
        let err = host.call_global("fail", &[]).unwrap_err();
        assert!(err.is_script_error());
        assert_eq!(host.last_error(), Some("RangeError: too far"));

        // The next successful operation clears it
        host.append_code("function ok() { return 1; }", "extra.js").unwrap();
        assert_eq!(host.last_error(), None);
        assert_eq!(host.call_global("ok", &[]).unwrap(), serde_json::json!(1));
    }

    #[test]
    fn test_failed_init_tears_down() {
        let mut host = JsHost::new(HostConfig::default());
        let err = host.init_from_source("function (", Some("broken.js")).unwrap_err();
        assert!(matches!(err, HostError::Engine(QjsError::Syntax { .. })));
        assert!(!host.is_initialized());
        assert!(host.last_error().is_some());

        host.init_from_source("function main() { return 'retry'; }", None)
            .unwrap();
        assert_eq!(host.call_global("main", &[]).unwrap(), serde_json::json!("retry"));
    }

    #[test]
    fn test_init_drains_jobs() {
        let mut host = host_with("var state = 'pending'; Promise.resolve().then(() => { state = 'done'; });");
        host.append_code("function state_of() { return state; }", "probe.js")
            .unwrap();
        assert_eq!(host.call_global("state_of", &[]).unwrap(), serde_json::json!("done"));

        host.append_code("Promise.resolve().then(() => { state = 'again'; });", "more.js")
            .unwrap();
        host.run_init_loop().unwrap();
        assert_eq!(host.call_global("state_of", &[]).unwrap(), serde_json::json!("again"));
    }

    #[test]
    fn test_timeout() {
        let config = HostConfig::default().with_timeout(Duration::from_millis(50));
        let mut host = JsHost::new(config);
        host.init_from_source("function spin() { for (;;) {} } function quick() { return 1; }", None)
            .unwrap();

        let started = Instant::now();
        let err = host.call_global("spin", &[]).unwrap_err();
        assert!(matches!(err, HostError::Timeout(limit) if limit == Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(5));

        // The budget is re-armed per call
        assert_eq!(host.call_global("quick", &[]).unwrap(), serde_json::json!(1));
    }

    #[test]
    fn test_minimal_intrinsics() {
        let config = HostConfig {
            intrinsics: false,
            ..HostConfig::default()
        };
        let mut host = JsHost::new(config);
        host.init_from_source(
            "function probe() { return [typeof JSON, typeof Promise, typeof Map]; }",
            None,
        )
        .unwrap();
        assert_eq!(
            host.call_global("probe", &[]).unwrap(),
            serde_json::json!(["object", "undefined", "undefined"])
        );
    }

    #[test]
    fn test_result_modes() {
        let code = "function obj() { return { a: [1, 2] }; } function text() { return '{\"b\":true}'; } function num() { return 4.5; }";

        let mut host = host_with(code);
        assert_eq!(host.call_global("obj", &[]).unwrap(), serde_json::json!({ "a": [1, 2] }));
        assert_eq!(host.call_global("text", &[]).unwrap(), serde_json::json!("{\"b\":true}"));

        let mut host = JsHost::new(HostConfig::default().with_result_mode(ResultMode::JsonParse));
        host.init_from_source(code, None).unwrap();
        assert_eq!(host.call_global("text", &[]).unwrap(), serde_json::json!({ "b": true }));
        assert_eq!(host.call_global("num", &[]).unwrap(), serde_json::json!(4.5));

        let mut host = JsHost::new(HostConfig::default().with_result_mode(ResultMode::SingleValue));
        host.init_from_source(code, None).unwrap();
        assert_eq!(host.call_global("num", &[]).unwrap(), serde_json::json!(4.5));
        assert!(matches!(
            host.call_global("obj", &[]),
            Err(HostError::UnsupportedResult(_))
        ));

        let mut host = JsHost::new(HostConfig::default().with_result_mode(ResultMode::AsJson));
        host.init_from_source(code, None).unwrap();
        assert_eq!(host.call_global("obj", &[]).unwrap(), serde_json::json!("{\"a\":[1,2]}"));
        assert_eq!(host.call_global("num", &[]).unwrap(), serde_json::json!("4.5"));
    }

    #[test]
    fn test_collect_after_call() {
        let config = HostConfig {
            collect_after_call: true,
            ..HostConfig::default()
        };
        let mut host = JsHost::new(config);
        host.init_from_source("function make() { return { big: 'x'.repeat(1 << 16) }.big.length; }", None)
            .unwrap();
        assert_eq!(host.call_global("make", &[]).unwrap(), serde_json::json!(65536));
        assert_eq!(host.context().unwrap().live_value_count().unwrap(), 0);
    }

    #[test]
    fn test_host_functions_on_context() {
        let mut host = host_with("function main(n) { return twice(n) + 1; }");
        host.context()
            .unwrap()
            .global()
            .unwrap()
            .define_function("twice", 1, |_, args| Ok(HostValue::Int(args.get(0)?.to_i32()? * 2)))
            .unwrap();
        assert_eq!(host.call_global("main", &[HostArg::Int(20)]).unwrap(), serde_json::json!(41));
    }

    #[test]
    fn test_start_then_eval() {
        let mut host = JsHost::new(HostConfig::default());
        host.start().unwrap();
        assert_eq!(host.eval("[1, 2].concat([3])", "<eval>").unwrap(), serde_json::json!([1, 2, 3]));
        assert_eq!(host.eval("undefined", "<eval>").unwrap(), serde_json::Value::Null);
        assert!(matches!(host.start(), Err(HostError::AlreadyInitialized)));
    }

    #[test]
    fn test_dispose_and_reinit() {
        let mut host = host_with("function v() { return 1; }");
        host.dispose();
        assert!(!host.is_initialized());
        host.init_from_source("function v() { return 2; }", None).unwrap();
        assert_eq!(host.call_global("v", &[]).unwrap(), serde_json::json!(2));
    }
}

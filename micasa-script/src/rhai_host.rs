//! A [`ScriptHost`] backed by `rhai`.
//!
//! Every call to [`RhaiEngine::run`] gets a fresh [`rhai::Scope`] with
//! `userdata` and the event/timer payload bound as globals, and four host
//! functions registered against the callbacks for this particular run. The
//! engine itself is built once and reused — `rhai`'s `sync` feature is what
//! makes that safe to share across the worker threads the scheduler runs
//! scripts on.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rhai::{Dynamic, Engine, EvalAltResult, NativeCallContext, Scope};
use serde_json::Value;

use crate::host::{HostCallbacks, RunOutcome, RunResult, ScriptHost};

const USERDATA_VAR: &str = "userdata";

pub struct RhaiEngine {
    engine: Engine,
    /// Scripts run one at a time (spec: "single-threaded through a mutex").
    /// Callers already serialize through the rule engine's worker chain;
    /// this is a second line of defense against a future caller that
    /// doesn't.
    run_lock: Mutex<()>,
}

impl Default for RhaiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_expr_depths(64, 32);
        engine.set_max_operations(2_000_000);
        RhaiEngine {
            engine,
            run_lock: Mutex::new(()),
        }
    }
}

fn json_to_dynamic(value: &Value) -> Dynamic {
    rhai::serde::to_dynamic(value).unwrap_or(Dynamic::UNIT)
}

fn dynamic_to_json(value: Dynamic) -> Value {
    rhai::serde::from_dynamic(&value).unwrap_or(Value::Null)
}

fn classify_error(err: &EvalAltResult) -> RunOutcome {
    match err {
        // `throw "message"` inside a script: a user-level exception, logged
        // but the script stays enabled.
        EvalAltResult::ErrorRuntime(value, _) => {
            RunOutcome::UserError(value.clone().into_string().unwrap_or_else(|_| value.to_string()))
        }
        other => RunOutcome::InterpreterError(other.to_string()),
    }
}

#[async_trait]
impl ScriptHost for RhaiEngine {
    async fn run(
        &self,
        code: &str,
        binding_name: &str,
        payload: Value,
        userdata: Value,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> RunResult {
        let _guard = self.run_lock.lock();

        let ast = match self.engine.compile(code) {
            Ok(ast) => ast,
            Err(err) => {
                return RunResult {
                    outcome: RunOutcome::InterpreterError(err.to_string()),
                    userdata,
                }
            }
        };

        let mut engine = self.engine.clone();
        register_host_functions(&mut engine, callbacks);

        let mut scope = Scope::new();
        scope.push(binding_name, json_to_dynamic(&payload));
        scope.push(USERDATA_VAR, json_to_dynamic(&userdata));

        let outcome = match engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast) {
            Ok(_) => RunOutcome::Ok,
            Err(err) => classify_error(&err),
        };

        let userdata_out = scope
            .get_value::<Dynamic>(USERDATA_VAR)
            .map(dynamic_to_json)
            .unwrap_or(userdata);

        RunResult {
            outcome,
            userdata: userdata_out,
        }
    }
}

fn register_host_functions(engine: &mut Engine, callbacks: Arc<dyn HostCallbacks>) {
    {
        let callbacks = callbacks.clone();
        engine.register_fn(
            "updateDevice",
            move |selector: &str, value: &str, options: &str| -> Result<(), Box<EvalAltResult>> {
                futures::executor::block_on(callbacks.update_device(selector, value, options))
                    .map_err(|msg| runtime_error(msg))
            },
        );
    }
    {
        let callbacks = callbacks.clone();
        engine.register_fn("updateDevice", move |selector: &str, value: &str| -> Result<(), Box<EvalAltResult>> {
            futures::executor::block_on(callbacks.update_device(selector, value, ""))
                .map_err(|msg| runtime_error(msg))
        });
    }
    {
        let callbacks = callbacks.clone();
        engine.register_fn("getDevice", move |selector: &str| -> Dynamic {
            match futures::executor::block_on(callbacks.get_device_json(selector)) {
                Some(json) => json_to_dynamic(&json),
                None => Dynamic::UNIT,
            }
        });
    }
    {
        let callbacks = callbacks.clone();
        engine.register_fn(
            "include",
            move |context: NativeCallContext, name: &str| -> Result<(), Box<EvalAltResult>> {
                let code = futures::executor::block_on(callbacks.include_script(name))
                    .ok_or_else(|| runtime_error(format!("no enabled script named '{name}'")))?;
                context
                    .engine()
                    .eval_with_scope::<Dynamic>(&mut Scope::new(), &code)
                    .map(|_| ())
                    .map_err(|err| runtime_error(err.to_string()))
            },
        );
    }
    {
        let callbacks = callbacks.clone();
        engine.register_fn("log", move |value: Dynamic| {
            callbacks.log(&value.to_string());
        });
    }
}

fn runtime_error(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(message.into().into(), rhai::Position::NONE))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopCallbacks;

    #[async_trait]
    impl HostCallbacks for NoopCallbacks {
        async fn update_device(&self, _selector: &str, _raw_value: &str, _options: &str) -> Result<(), String> {
            Ok(())
        }
        async fn get_device_json(&self, _selector: &str) -> Option<Value> {
            None
        }
        async fn include_script(&self, _name: &str) -> Option<String> {
            None
        }
        fn log(&self, _message: &str) {}
    }

    #[tokio::test]
    async fn userdata_persists_across_runs() {
        let host = RhaiEngine::new();
        let callbacks: Arc<dyn HostCallbacks> = Arc::new(NoopCallbacks);
        let code = "if userdata.count == () { userdata.count = 0; } userdata.count += 1;";

        let first = host
            .run(code, "event", Value::Null, serde_json::json!({}), callbacks.clone())
            .await;
        assert_eq!(first.outcome, RunOutcome::Ok);
        assert_eq!(first.userdata["count"], 1);

        let second = host.run(code, "event", Value::Null, first.userdata, callbacks).await;
        assert_eq!(second.userdata["count"], 2);
    }

    #[tokio::test]
    async fn syntax_error_is_classified_as_interpreter_error() {
        let host = RhaiEngine::new();
        let callbacks: Arc<dyn HostCallbacks> = Arc::new(NoopCallbacks);
        let result = host
            .run("this is not valid {{{", "event", Value::Null, serde_json::json!({}), callbacks)
            .await;
        assert!(result.outcome.should_disable_script());
    }

    #[tokio::test]
    async fn user_throw_does_not_disable_the_script() {
        let host = RhaiEngine::new();
        let callbacks: Arc<dyn HostCallbacks> = Arc::new(NoopCallbacks);
        let result = host
            .run("throw \"boom\";", "event", Value::Null, serde_json::json!({}), callbacks)
            .await;
        assert!(matches!(result.outcome, RunOutcome::UserError(_)));
        assert!(!result.outcome.should_disable_script());
    }
}

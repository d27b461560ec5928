//! Script scope backed by the variable cache
//!
//! User code runs inside `with (__vars) { ... }`. `__vars` is a proxy that
//! claims every string name the global object does not already have, so
//! reads and assignments of free variables land in the cache of the run in
//! progress. `__ops` exposes stored operator methods by their symbol.
//!
//! Native callbacks cannot capture Rust state, so the run in progress is kept
//! in a thread local for the duration of the evaluation.

use std::cell::RefCell;
use std::rc::Rc;

use boa_engine::object::builtins::JsProxyBuilder;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::{Attribute, PropertyKey};
use boa_engine::{
    js_string, Context, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use scriptbox_state::{operator_key, Resolved, StateError, VariableStateCache};

use crate::bindings::{Helpers, JsHost};
use crate::output::LimitedOutput;

/// Everything a run's native callbacks need
pub(crate) struct RunState {
    pub cache: VariableStateCache<JsValue>,
    pub helpers: Helpers,
    pub output: Rc<RefCell<LimitedOutput>>,
}

impl RunState {
    fn resolve(&self, name: &str, context: &mut Context) -> JsResult<JsValue> {
        let mut host = JsHost::new(context, &self.helpers);
        match self.cache.get(name, &mut host) {
            Ok(Resolved::Builtin(value)) => Ok(JsString::from(value.as_str()).into()),
            Ok(Resolved::Value(value)) => Ok(value),
            Err(e) => Err(host.take_failure().unwrap_or_else(|| state_error(&e))),
        }
    }
}

thread_local! {
    static ACTIVE_RUN: RefCell<Option<Rc<RunState>>> = const { RefCell::new(None) };
}

/// Makes a run visible to native callbacks until dropped
pub(crate) struct ActiveRun;

impl ActiveRun {
    pub(crate) fn enter(run: Rc<RunState>) -> Self {
        ACTIVE_RUN.with(|active| *active.borrow_mut() = Some(run));
        ActiveRun
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        ACTIVE_RUN.with(|active| active.borrow_mut().take());
    }
}

fn active_run() -> JsResult<Rc<RunState>> {
    ACTIVE_RUN
        .with(|active| active.borrow().clone())
        .ok_or_else(|| JsNativeError::error().with_message("no script is running").into())
}

/// Register `print`, `__vars` and `__ops` on a fresh context
pub(crate) fn install(context: &mut Context) -> JsResult<()> {
    context.register_global_builtin_callable(
        js_string!("print"),
        1,
        NativeFunction::from_fn_ptr(print),
    )?;

    let target = ObjectInitializer::new(context).build();
    let variables = JsProxyBuilder::new(target)
        .has(has_variable)
        .get(get_variable)
        .set(set_variable)
        .build(context);
    context.register_global_property(
        js_string!("__vars"),
        JsObject::clone(&variables),
        Attribute::empty(),
    )?;

    let target = ObjectInitializer::new(context).build();
    let operators = JsProxyBuilder::new(target)
        .get(get_operator)
        .set(set_operator)
        .build(context);
    context.register_global_property(
        js_string!("__ops"),
        JsObject::clone(&operators),
        Attribute::empty(),
    )?;

    Ok(())
}

fn state_error(err: &StateError) -> JsError {
    let native = match err {
        StateError::UndefinedVariable(_) => JsNativeError::reference(),
        StateError::ReadOnly(_) | StateError::InvalidOperator(_) => JsNativeError::typ(),
        _ => JsNativeError::error(),
    };
    native.with_message(err.to_string()).into()
}

// Proxy traps receive (target, key, ...); symbols never name a variable.
fn string_key(args: &[JsValue]) -> Option<String> {
    args.get(1)
        .and_then(JsValue::as_string)
        .map(|key| key.to_std_string_escaped())
}

fn print(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let run = active_run()?;
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        parts.push(run.helpers.render(arg, context)?);
    }
    run.output.borrow_mut().write_line(&parts.join(" "));
    Ok(JsValue::undefined())
}

fn has_variable(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let Some(key) = args.get(1).and_then(JsValue::as_string).cloned() else {
        return Ok(false.into());
    };

    // globals (builtins, declared functions, `var`s) shadow stored variables
    let global = context.global_object();
    let shadowed = global.has_property(PropertyKey::from(key), context)?;
    Ok((!shadowed).into())
}

fn get_variable(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let Some(name) = string_key(args) else {
        return Ok(JsValue::undefined());
    };
    active_run()?.resolve(&name, context)
}

fn set_variable(_this: &JsValue, args: &[JsValue], _context: &mut Context) -> JsResult<JsValue> {
    let Some(name) = string_key(args) else {
        return Ok(false.into());
    };
    let value = args.get(2).cloned().unwrap_or_else(JsValue::undefined);
    active_run()?
        .cache
        .set(&name, value)
        .map_err(|e| state_error(&e))?;
    Ok(true.into())
}

fn get_operator(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let Some(op) = string_key(args) else {
        return Ok(JsValue::undefined());
    };
    let key = operator_key(&op).map_err(|e| state_error(&e))?;
    active_run()?.resolve(&key, context)
}

fn set_operator(_this: &JsValue, args: &[JsValue], _context: &mut Context) -> JsResult<JsValue> {
    let op = string_key(args).unwrap_or_default();
    Err(JsNativeError::typ()
        .with_message(format!("Operator '{}' is read-only; publish it as a method", op))
        .into())
}

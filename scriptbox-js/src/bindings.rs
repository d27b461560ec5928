//! Boa implementation of the variable cache's value host

use std::collections::BTreeMap;

use boa_engine::{
    js_string, Context, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue, Source,
};
use scriptbox_state::{
    ObjectValue, ScriptValue, StateError, StateResult, ValueHost, MAX_SNAPSHOT_DEPTH,
    METHOD_DECLARATION_VERSION, METHOD_EXPRESSION_VERSION,
};

// Captures the JSON builtins before any script can replace them.
const PRELUDE: &str = r#"(() => {
    const stringify = JSON.stringify;
    const parse = JSON.parse;
    const keys = Object.keys;
    const isArray = Array.isArray;
    const render = (value) => {
        if (typeof value === 'function') return 'function';
        if (typeof value === 'string') return value;
        try {
            const text = stringify(value);
            return text === undefined ? String(value) : text;
        } catch (e) {
            return String(value);
        }
    };
    globalThis.console = { log: print, info: print, warn: print, error: print, debug: print };
    return {
        stringify: (value) => stringify(value),
        parse: (text) => parse(text),
        render,
        hasHook: (value) =>
            value !== null && typeof value === 'object' && typeof value.toJSON === 'function',
        keys: (value) => keys(value),
        isArray: (value) => isArray(value),
    };
})()"#;

/// Interpreter functions the host calls into
pub(crate) struct Helpers {
    stringify: JsObject,
    parse: JsObject,
    render: JsObject,
    has_hook: JsObject,
    keys: JsObject,
    is_array: JsObject,
}

impl Helpers {
    /// Evaluate the prelude; `print` must already be registered
    pub(crate) fn install(context: &mut Context) -> JsResult<Self> {
        let exports = context.eval(Source::from_bytes(PRELUDE))?;
        let exports = exports
            .as_object()
            .cloned()
            .ok_or_else(|| JsNativeError::typ().with_message("prelude returned no helpers"))?;

        Ok(Self {
            stringify: export(&exports, "stringify", context)?,
            parse: export(&exports, "parse", context)?,
            render: export(&exports, "render", context)?,
            has_hook: export(&exports, "hasHook", context)?,
            keys: export(&exports, "keys", context)?,
            is_array: export(&exports, "isArray", context)?,
        })
    }

    /// How a value is shown in output
    pub(crate) fn render(&self, value: &JsValue, context: &mut Context) -> JsResult<String> {
        let text = call(&self.render, value, context)?;
        Ok(text.to_string(context)?.to_std_string_escaped())
    }

    /// `JSON.stringify`, `None` where it yields `undefined`
    pub(crate) fn stringify(
        &self,
        value: &JsValue,
        context: &mut Context,
    ) -> JsResult<Option<String>> {
        let text = call(&self.stringify, value, context)?;
        if text.is_undefined() {
            return Ok(None);
        }
        Ok(Some(text.to_string(context)?.to_std_string_escaped()))
    }

    pub(crate) fn parse(&self, text: &str, context: &mut Context) -> JsResult<JsValue> {
        call(&self.parse, &JsValue::from(JsString::from(text)), context)
    }

    fn has_hook(&self, value: &JsValue, context: &mut Context) -> JsResult<bool> {
        Ok(call(&self.has_hook, value, context)?.to_boolean())
    }

    fn is_array(&self, value: &JsValue, context: &mut Context) -> JsResult<bool> {
        Ok(call(&self.is_array, value, context)?.to_boolean())
    }

    fn keys(&self, value: &JsValue, context: &mut Context) -> JsResult<Vec<JsString>> {
        let keys = call(&self.keys, value, context)?;
        elements(&keys, context)?
            .into_iter()
            .map(|key| key.to_string(context))
            .collect()
    }
}

fn export(exports: &JsObject, name: &str, context: &mut Context) -> JsResult<JsObject> {
    exports
        .get(JsString::from(name), context)?
        .as_object()
        .cloned()
        .ok_or_else(|| {
            JsNativeError::typ()
                .with_message(format!("prelude helper '{}' is missing", name))
                .into()
        })
}

fn call(function: &JsObject, value: &JsValue, context: &mut Context) -> JsResult<JsValue> {
    function.call(&JsValue::undefined(), std::slice::from_ref(value), context)
}

fn elements(array: &JsValue, context: &mut Context) -> JsResult<Vec<JsValue>> {
    let Some(array) = array.as_object() else {
        return Ok(Vec::new());
    };

    let length = array.get(js_string!("length"), context)?.to_length(context)?;
    let length = u32::try_from(length).map_err(|_| {
        JsError::from(JsNativeError::range().with_message("array is too long to copy"))
    })?;

    (0..length).map(|index| array.get(index, context)).collect()
}

/// [`ValueHost`] over one interpreter context
pub(crate) struct JsHost<'a> {
    context: &'a mut Context,
    helpers: &'a Helpers,
    failure: Option<JsError>,
}

impl<'a> JsHost<'a> {
    pub(crate) fn new(context: &'a mut Context, helpers: &'a Helpers) -> Self {
        Self {
            context,
            helpers,
            failure: None,
        }
    }

    /// The interpreter error behind the last [`StateError::Host`]
    pub(crate) fn take_failure(&mut self) -> Option<JsError> {
        self.failure.take()
    }

    fn host_error(&mut self, err: JsError) -> StateError {
        let message = err.to_string();
        self.failure = Some(err);
        StateError::Host(message)
    }

    fn clone_value(&mut self, value: &JsValue, depth: usize) -> StateResult<ScriptValue> {
        if depth > MAX_SNAPSHOT_DEPTH {
            return Err(StateError::storage("value is nested too deeply"));
        }

        if value.is_null() || value.is_undefined() {
            return Ok(ScriptValue::Null);
        }
        if let Some(flag) = value.as_boolean() {
            return Ok(ScriptValue::Bool(flag));
        }
        if let Some(number) = value.as_number() {
            return Ok(ScriptValue::Number(number));
        }
        if let Some(text) = value.as_string() {
            return Ok(ScriptValue::String(text.to_std_string_escaped()));
        }

        let Some(object) = value.as_object().cloned() else {
            let label = if value.is_symbol() { "symbol" } else { "bigint" };
            return Ok(ScriptValue::Opaque(label.to_string()));
        };
        if object.is_callable() {
            return Ok(ScriptValue::Opaque("function".to_string()));
        }

        if self.helpers.is_array(value, self.context).map_err(fault)? {
            let items = elements(value, self.context).map_err(fault)?;
            return items
                .iter()
                .map(|item| self.clone_value(item, depth + 1))
                .collect::<StateResult<Vec<_>>>()
                .map(ScriptValue::Array);
        }

        let mut entries = BTreeMap::new();
        for key in self.helpers.keys(value, self.context).map_err(fault)? {
            let entry = object.get(key.clone(), self.context).map_err(fault)?;
            entries.insert(key.to_std_string_escaped(), self.clone_value(&entry, depth + 1)?);
        }

        let object = ObjectValue::new(entries);
        match self.canonical_form(value)? {
            Some(canonical) => Ok(ScriptValue::Object(object.with_canonical(canonical))),
            None => Ok(ScriptValue::Object(object)),
        }
    }
}

fn fault(err: JsError) -> StateError {
    StateError::storage(err.to_string())
}

impl ValueHost for JsHost<'_> {
    type Value = JsValue;

    fn decode(&mut self, name: &str, data: &str) -> StateResult<JsValue> {
        self.helpers.parse(data, self.context).map_err(|e| {
            StateError::storage(format!("stored value of '{}' is corrupt: {}", name, e))
        })
    }

    fn encode(&mut self, value: &JsValue) -> StateResult<String> {
        self.helpers
            .stringify(value, self.context)
            .map_err(fault)?
            .ok_or_else(|| StateError::storage("value cannot be serialized"))
    }

    fn canonical_form(&mut self, value: &JsValue) -> StateResult<Option<String>> {
        if !self.helpers.has_hook(value, self.context).map_err(fault)? {
            return Ok(None);
        }
        self.helpers.stringify(value, self.context).map_err(fault)
    }

    fn structural_clone(&mut self, value: &JsValue) -> StateResult<ScriptValue> {
        self.clone_value(value, 0)
    }

    fn load_method(&mut self, name: &str, code: &str, version: i32) -> StateResult<JsValue> {
        let source = match version {
            METHOD_EXPRESSION_VERSION => format!("with (__vars) {{\n(\n{}\n)\n}}", code),
            // the function wrapper keeps the declaration out of the global object
            METHOD_DECLARATION_VERSION => format!(
                "(function () {{ with (__vars) {{\n{}\n;return {};\n}} }})()",
                code, name
            ),
            other => {
                return Err(StateError::storage(format!(
                    "method '{}' has unknown version {}",
                    name, other
                )))
            }
        };

        self.context
            .eval(Source::from_bytes(&source))
            .map_err(|e| self.host_error(e))
    }
}

use super::value::{as_i64, length, type_name};
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Upper bound on the number of items `range()` may produce
pub const MAX_RANGE_LEN: usize = 100_000;

/// Function type callable from template expressions
pub type TemplateFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// Registry of functions callable as `name(args)` inside expressions
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, Arc<TemplateFn>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// Registry holding `range`, `len` and `json`
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        if let Ok(mut functions) = registry.functions.write() {
            functions.insert("range".to_string(), Arc::new(range) as Arc<TemplateFn>);
            functions.insert("len".to_string(), Arc::new(len) as Arc<TemplateFn>);
            functions.insert("json".to_string(), Arc::new(json) as Arc<TemplateFn>);
        }
        registry
    }

    pub fn register<F>(&self, name: impl Into<String>, function: F) -> Result<()>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut functions = self
            .functions
            .write()
            .map_err(|_| Error::template("function registry lock poisoned"))?;
        if functions.insert(name.clone(), Arc::new(function)).is_some() {
            log::debug!("Replaced function '{}'", name);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<TemplateFn>> {
        self.functions
            .read()
            .ok()
            .and_then(|functions| functions.get(name).cloned())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Call `name`; an unregistered name cannot be resolved
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let function = self
            .get(name)
            .ok_or_else(|| Error::context(format!("{}()", name)))?;
        function(args).map_err(|e| e.with_context(format!("in call to {}()", name)))
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn integer_arg(name: &str, value: &Value) -> Result<i64> {
    as_i64(value).ok_or_else(|| {
        Error::template(format!(
            "{}() expects integer arguments, got {}",
            name,
            type_name(value)
        ))
    })
}

/// `range(stop)`, `range(start, stop)`, `range(start, stop, step)`
fn range(args: &[Value]) -> Result<Value> {
    let (start, stop, step) = match args {
        [stop] => (0, integer_arg("range", stop)?, 1),
        [start, stop] => (integer_arg("range", start)?, integer_arg("range", stop)?, 1),
        [start, stop, step] => (
            integer_arg("range", start)?,
            integer_arg("range", stop)?,
            integer_arg("range", step)?,
        ),
        _ => {
            return Err(Error::template(format!(
                "range() takes 1 to 3 arguments, {} given",
                args.len()
            )))
        }
    };

    if step == 0 {
        return Err(Error::template("range() step must not be zero"));
    }

    let span = if step > 0 {
        stop.saturating_sub(start)
    } else {
        start.saturating_sub(stop)
    };
    let count = if span <= 0 {
        0
    } else {
        (span - 1) / step.saturating_abs() + 1
    };
    if count as u64 > MAX_RANGE_LEN as u64 {
        return Err(Error::template(format!(
            "range() would produce {} items, the limit is {}",
            count, MAX_RANGE_LEN
        )));
    }

    let items = (0..count).map(|i| Value::from(start + i * step)).collect();
    Ok(Value::Array(items))
}

fn len(args: &[Value]) -> Result<Value> {
    match args {
        [value] => length(value)
            .map(Value::from)
            .ok_or_else(|| Error::template(format!("len() of a {}", type_name(value)))),
        _ => Err(Error::template("len() takes exactly one argument")),
    }
}

/// Serialize a value as compact JSON text
fn json(args: &[Value]) -> Result<Value> {
    match args {
        [value] => Ok(Value::String(serde_json::to_string(value)?)),
        _ => Err(Error::template("json() takes exactly one argument")),
    }
}

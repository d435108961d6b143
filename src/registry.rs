//! Global template registry
//!
//! Holds the state shared by every render: global variables merged under the
//! caller's context, the filter registry and the function registry.
//!
//! # Usage
//! ```rust
//! use minimy_template::{inject_global, register_filter, Template};
//! use serde_json::{json, Value};
//!
//! inject_global("site_name", "Minimy").unwrap();
//! register_filter("shout", |value, _args| {
//!     Ok(Value::String(format!("{}!", value.as_str().unwrap_or_default())))
//! })
//! .unwrap();
//!
//! let template = Template::compile("{{ site_name | shout }}").unwrap();
//! assert_eq!(template.render(&json!({})).unwrap(), "Minimy!");
//! ```

use crate::error::{Error, Result};
use crate::template::expr::is_identifier;
use crate::template::filters::{FilterArgs, FilterRegistry};
use crate::template::functions::FunctionRegistry;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// Process-wide registry used by `Template::render` and `Environment::new`
static GLOBAL_REGISTRY: Lazy<Arc<TemplateRegistry>> =
    Lazy::new(|| Arc::new(TemplateRegistry::new()));

/// Globals, filters and functions available to templates
pub struct TemplateRegistry {
    globals: RwLock<IndexMap<String, Value>>,
    filters: FilterRegistry,
    functions: FunctionRegistry,
}

impl TemplateRegistry {
    /// Registry with the built-in filters and functions and no globals
    pub fn new() -> Self {
        Self {
            globals: RwLock::new(IndexMap::new()),
            filters: FilterRegistry::with_builtins(),
            functions: FunctionRegistry::with_builtins(),
        }
    }

    /// The process-wide registry
    pub fn global() -> Arc<TemplateRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Set a global variable, visible to every render unless the caller shadows it
    ///
    /// # Examples
    /// ```rust
    /// use minimy_template::TemplateRegistry;
    ///
    /// let registry = TemplateRegistry::new();
    /// registry.inject_global("version", "1.0.0").unwrap();
    /// assert_eq!(registry.global_value("version").unwrap(), "1.0.0");
    /// ```
    pub fn inject_global<T: Serialize>(&self, name: &str, value: T) -> Result<()> {
        check_name("global", name)?;
        let value = serde_json::to_value(value)?;
        let mut globals = self
            .globals
            .write()
            .map_err(|_| Error::template("globals lock poisoned"))?;
        globals.insert(name.to_string(), value);
        log::debug!("Injected global '{}'", name);
        Ok(())
    }

    pub fn global_value(&self, name: &str) -> Option<Value> {
        self.globals.read().ok()?.get(name).cloned()
    }

    /// Snapshot of every global, in insertion order
    pub fn globals(&self) -> IndexMap<String, Value> {
        self.globals
            .read()
            .map(|globals| globals.clone())
            .unwrap_or_default()
    }

    /// Register a filter usable as `{{ value | name }}`
    pub fn register_filter<F>(&self, name: &str, filter: F) -> Result<()>
    where
        F: Fn(Value, &FilterArgs) -> Result<Value> + Send + Sync + 'static,
    {
        check_name("filter", name)?;
        self.filters.register(name, filter)
    }

    /// Register a function usable as `{{ name(args) }}` or `{% call name(args) %}`
    pub fn register_function<F>(&self, name: &str, function: F) -> Result<()>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        check_name("function", name)?;
        self.functions.register(name, function)
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_name(kind: &str, name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(Error::template(format!(
            "'{}' is not a valid {} name",
            name, kind
        )))
    }
}

/// Register a filter on the process-wide registry
pub fn register_filter<F>(name: &str, filter: F) -> Result<()>
where
    F: Fn(Value, &FilterArgs) -> Result<Value> + Send + Sync + 'static,
{
    TemplateRegistry::global().register_filter(name, filter)
}

/// Register a function on the process-wide registry
pub fn register_function<F>(name: &str, function: F) -> Result<()>
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
{
    TemplateRegistry::global().register_function(name, function)
}

/// Set a global variable on the process-wide registry
pub fn inject_global<T: Serialize>(name: &str, value: T) -> Result<()> {
    TemplateRegistry::global().inject_global(name, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_globals_keep_insertion_order() {
        let registry = TemplateRegistry::new();
        registry.inject_global("b", 2).unwrap();
        registry.inject_global("a", json!({"x": 1})).unwrap();
        registry.inject_global("b", 3).unwrap();

        let globals = registry.globals();
        let keys: Vec<&String> = globals.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(globals["b"], json!(3));
        assert!(registry.global_value("c").is_none());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let registry = TemplateRegistry::new();
        assert!(registry.inject_global("not valid", 1).is_err());
        assert!(registry.inject_global("for", 1).is_ok());
        assert!(registry.register_filter("", |v, _| Ok(v)).is_err());
        assert!(registry.register_function("a.b", |_| Ok(Value::Null)).is_err());
    }

    #[test]
    fn test_builtins_present() {
        let registry = TemplateRegistry::new();
        assert!(registry.filters().contains("truncate"));
        assert!(registry.filters().contains("safe"));
        assert!(registry.functions().contains("range"));
    }

    #[test]
    fn test_global_registry_is_shared() {
        inject_global("registry_test_marker", "on").unwrap();
        assert_eq!(
            TemplateRegistry::global().global_value("registry_test_marker"),
            Some(json!("on"))
        );
    }
}

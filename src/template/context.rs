use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde_json::Value;

/// Variable scope used while rendering
///
/// Frames form a chain: lookups walk from the innermost frame outwards and
/// nested constructs (`for`, `set`, `escape`) push a new frame instead of
/// writing into their parent, so bindings never leak out of their block.
#[derive(Debug)]
pub struct Context<'a> {
    vars: IndexMap<String, Value>,
    parent: Option<&'a Context<'a>>,
    autoescape: bool,
}

impl Context<'static> {
    /// Root frame holding `vars`
    pub fn new(vars: IndexMap<String, Value>) -> Self {
        Self {
            vars,
            parent: None,
            autoescape: true,
        }
    }

    /// Root frame from a JSON object (null gives an empty frame)
    pub fn from_value(data: &Value) -> Result<Self> {
        Ok(Self::new(bindings_from_value(data)?))
    }
}

/// Frame bindings from the JSON object passed by a caller
pub fn bindings_from_value(data: &Value) -> Result<IndexMap<String, Value>> {
    match data {
        Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Value::Null => Ok(IndexMap::new()),
        other => Err(Error::template(format!(
            "render context must be an object, got {}",
            other
        ))),
    }
}

impl<'a> Context<'a> {
    pub fn with_autoescape(mut self, enabled: bool) -> Self {
        self.autoescape = enabled;
        self
    }

    /// New innermost frame holding `bindings`
    pub fn push(&self, bindings: IndexMap<String, Value>) -> Context<'_> {
        Context {
            vars: bindings,
            parent: Some(self),
            autoescape: self.autoescape,
        }
    }

    /// New empty frame with escaping switched on or off
    pub fn escaping(&self, enabled: bool) -> Context<'_> {
        Context {
            vars: IndexMap::new(),
            parent: Some(self),
            autoescape: enabled,
        }
    }

    /// Look a name up, innermost frame first
    pub fn get(&self, name: &str) -> Option<&Value> {
        let mut frame = Some(self);
        while let Some(current) = frame {
            if let Some(value) = current.vars.get(name) {
                return Some(value);
            }
            frame = current.parent;
        }
        None
    }

    /// Whether variable output is HTML-escaped in this frame
    pub fn autoescape(&self) -> bool {
        self.autoescape
    }
}

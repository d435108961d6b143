use super::value::{float_value, is_truthy, length, type_name, value_to_string};
use crate::error::{Error, Result};
use crate::security::HtmlEscaper;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Filter whose output, and everything piped after it, skips auto-escaping
pub const SAFE_FILTER: &str = "safe";

/// Filters that already escape; auto-escaping is skipped when one ends the pipeline
pub const ESCAPE_FILTERS: &[&str] = &["escape", "e"];

/// Filter function type
pub type FilterFn = dyn Fn(Value, &FilterArgs) -> Result<Value> + Send + Sync;

#[allow(clippy::expect_used)]
static WORD_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("word pattern is valid"));

/// Arguments passed to a filter after the piped value
#[derive(Debug, Clone, Default)]
pub struct FilterArgs {
    positional: Vec<Value>,
    keyword: IndexMap<String, Value>,
}

impl FilterArgs {
    pub fn new(positional: Vec<Value>, keyword: IndexMap<String, Value>) -> Self {
        Self {
            positional,
            keyword,
        }
    }

    /// Argument by position, or by name when passed as `name=value`
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.keyword.get(name))
    }

    pub fn string(&self, index: usize, name: &str, default: &str) -> String {
        self.get(index, name)
            .map(value_to_string)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn integer(&self, index: usize, name: &str, default: i64) -> Result<i64> {
        match self.get(index, name) {
            None => Ok(default),
            Some(value) => coerce_int(value).ok_or_else(|| {
                Error::template(format!("argument '{}' must be an integer", name))
            }),
        }
    }
}

/// Registry of named filters
pub struct FilterRegistry {
    filters: RwLock<HashMap<String, Arc<FilterFn>>>,
}

impl FilterRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            filters: RwLock::new(HashMap::new()),
        }
    }

    /// Registry holding every built-in filter
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_builtins();
        registry
    }

    /// Register or replace a filter
    pub fn register<F>(&self, name: impl Into<String>, filter: F) -> Result<()>
    where
        F: Fn(Value, &FilterArgs) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut filters = self
            .filters
            .write()
            .map_err(|_| Error::template("filter registry lock poisoned"))?;
        if filters.insert(name.clone(), Arc::new(filter)).is_some() {
            log::debug!("Replaced filter '{}'", name);
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters
            .read()
            .map(|filters| filters.contains_key(name))
            .unwrap_or(false)
    }

    /// Run filter `name` on `value`
    pub fn apply(&self, name: &str, value: Value, args: &FilterArgs) -> Result<Value> {
        let filter = {
            let filters = self
                .filters
                .read()
                .map_err(|_| Error::template("filter registry lock poisoned"))?;
            filters.get(name).cloned()
        };

        let filter =
            filter.ok_or_else(|| Error::filter(name, "the filter does not exist"))?;

        filter(value, args).map_err(|e| match e {
            Error::Filter { .. } => e,
            Error::Template(message) => Error::filter(name, message),
            other => Error::filter(name, other.to_string()),
        })
    }

    fn register_builtins(&self) {
        let builtins: [(&str, fn(Value, &FilterArgs) -> Result<Value>); 21] = [
            ("safe", safe),
            ("escape", escape),
            ("e", escape),
            ("unescape", unescape),
            ("trim", trim),
            ("upper", upper),
            ("lower", lower),
            ("capitalize", capitalize),
            ("title", title),
            ("truncate", truncate),
            ("wordcount", wordcount),
            ("first", first),
            ("last", last),
            ("random", random),
            ("length", count),
            ("count", count),
            ("round", round),
            ("int", int),
            ("float", float),
            ("default", default),
            ("join", join),
        ];

        if let Ok(mut filters) = self.filters.write() {
            for (name, filter) in builtins {
                filters.insert(name.to_string(), Arc::new(filter));
            }
        }
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn text(value: &Value) -> String {
    value_to_string(value)
}

// Decodes entities; the renderer then writes the result unescaped
fn safe(value: Value, _args: &FilterArgs) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(HtmlEscaper::unescape(&s))),
        other => Ok(other),
    }
}

fn escape(value: Value, _args: &FilterArgs) -> Result<Value> {
    Ok(Value::String(HtmlEscaper::escape(&text(&value))))
}

fn unescape(value: Value, _args: &FilterArgs) -> Result<Value> {
    Ok(Value::String(HtmlEscaper::unescape(&text(&value))))
}

fn trim(value: Value, _args: &FilterArgs) -> Result<Value> {
    Ok(Value::String(text(&value).trim().to_string()))
}

fn upper(value: Value, _args: &FilterArgs) -> Result<Value> {
    Ok(Value::String(text(&value).to_uppercase()))
}

fn lower(value: Value, _args: &FilterArgs) -> Result<Value> {
    Ok(Value::String(text(&value).to_lowercase()))
}

fn capitalize_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn capitalize(value: Value, _args: &FilterArgs) -> Result<Value> {
    Ok(Value::String(capitalize_word(&text(&value))))
}

fn title(value: Value, _args: &FilterArgs) -> Result<Value> {
    let source = text(&value);
    let mut out = String::with_capacity(source.len());
    let mut word = String::new();

    for ch in source.chars() {
        if ch.is_alphanumeric() {
            word.push(ch);
        } else {
            out.push_str(&capitalize_word(&word));
            word.clear();
            out.push(ch);
        }
    }
    out.push_str(&capitalize_word(&word));
    Ok(Value::String(out))
}

/// Keep `length` characters, cut back to a word boundary and append `end`
fn truncate(value: Value, args: &FilterArgs) -> Result<Value> {
    let source = text(&value);
    let length = args.integer(0, "length", 255)?;
    let length = usize::try_from(length)
        .map_err(|_| Error::template("argument 'length' must not be negative"))?;
    let end = args.string(1, "end", "...");

    if source.chars().count() <= length {
        return Ok(Value::String(source));
    }

    let mut kept: String = source.chars().take(length).collect();
    if let Some(space) = kept.rfind(' ') {
        if space > 0 {
            kept.truncate(space);
        }
    }
    Ok(Value::String(format!("{}{}", kept.trim_end(), end)))
}

fn wordcount(value: Value, _args: &FilterArgs) -> Result<Value> {
    Ok(Value::from(WORD_REGEX.find_iter(&text(&value)).count()))
}

fn first(value: Value, _args: &FilterArgs) -> Result<Value> {
    match value {
        Value::Array(items) => Ok(items.into_iter().next().unwrap_or(Value::Null)),
        Value::String(s) => Ok(s
            .chars()
            .next()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(not_a_sequence(&other)),
    }
}

fn last(value: Value, _args: &FilterArgs) -> Result<Value> {
    match value {
        Value::Array(items) => Ok(items.into_iter().last().unwrap_or(Value::Null)),
        Value::String(s) => Ok(s
            .chars()
            .last()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(not_a_sequence(&other)),
    }
}

fn random(value: Value, _args: &FilterArgs) -> Result<Value> {
    let mut rng = rand::thread_rng();
    match value {
        Value::Array(items) => Ok(items.choose(&mut rng).cloned().unwrap_or(Value::Null)),
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(chars
                .choose(&mut rng)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null))
        }
        Value::Null => Ok(Value::Null),
        other => Err(not_a_sequence(&other)),
    }
}

fn count(value: Value, _args: &FilterArgs) -> Result<Value> {
    length(&value)
        .map(Value::from)
        .ok_or_else(|| not_a_sequence(&value))
}

fn round(value: Value, args: &FilterArgs) -> Result<Value> {
    let number = coerce_float(&value)
        .ok_or_else(|| Error::template(format!("cannot round a {}", type_name(&value))))?;
    let precision = args.integer(0, "precision", 0)?;

    if precision <= 0 {
        let rounded = number.round();
        if rounded.abs() < i64::MAX as f64 {
            return Ok(Value::from(rounded as i64));
        }
        return Ok(float_value(rounded));
    }

    let factor = 10f64.powi(precision.min(15) as i32);
    Ok(float_value((number * factor).round() / factor))
}

fn int(value: Value, args: &FilterArgs) -> Result<Value> {
    match coerce_int(&value) {
        Some(n) => Ok(Value::from(n)),
        None => args.get(0, "default").cloned().ok_or_else(|| {
            Error::template(format!("cannot convert {} to an integer", type_name(&value)))
        }),
    }
}

fn float(value: Value, args: &FilterArgs) -> Result<Value> {
    match coerce_float(&value) {
        Some(n) => Ok(float_value(n)),
        None => args.get(0, "default").cloned().ok_or_else(|| {
            Error::template(format!("cannot convert {} to a float", type_name(&value)))
        }),
    }
}

fn default(value: Value, args: &FilterArgs) -> Result<Value> {
    let fallback = args.get(0, "value").cloned().unwrap_or_default();
    let check_truthiness = args.get(1, "boolean").map(is_truthy).unwrap_or(false);

    let missing = value.is_null() || (check_truthiness && !is_truthy(&value));
    Ok(if missing { fallback } else { value })
}

fn join(value: Value, args: &FilterArgs) -> Result<Value> {
    let separator = args.string(0, "sep", "");
    match value {
        Value::Array(items) => Ok(Value::String(
            items.iter().map(value_to_string).collect::<Vec<_>>().join(&separator),
        )),
        Value::String(s) => Ok(Value::String(
            s.chars().map(String::from).collect::<Vec<_>>().join(&separator),
        )),
        Value::Null => Ok(Value::String(String::new())),
        other => Err(not_a_sequence(&other)),
    }
}

fn not_a_sequence(value: &Value) -> Error {
    Error::template(format!("expected a sequence, got {}", type_name(value)))
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

//! Error context and chaining utilities
//!
//! Include and extends failures are wrapped with the name of the template
//! they came from, so a failure deep inside a partial still says which page
//! pulled it in.

use super::Error;
use std::fmt;

/// Trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to the error
    fn context<C>(self, context: C) -> Result<T, Error>
    where
        C: Into<String>;

    /// Add context with lazy evaluation
    fn with_context<C, F>(self, f: F) -> Result<T, Error>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ErrorContext<T> for Result<T, Error> {
    fn context<C>(self, context: C) -> Result<T, Error>
    where
        C: Into<String>,
    {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, Error>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

/// Traceback view of a wrapped error: the root cause plus the context
/// messages leading to it, outermost first
pub struct ErrorChain<'a> {
    root: &'a Error,
    contexts: Vec<&'a str>,
}

impl<'a> ErrorChain<'a> {
    pub fn new(error: &'a Error) -> Self {
        let mut contexts = Vec::new();
        let mut current = error;
        while let Error::WithContext { message, source } = current {
            contexts.push(message.as_str());
            current = source;
        }
        Self {
            root: current,
            contexts,
        }
    }

    /// Context messages, outermost first
    pub fn contexts(&self) -> &[&'a str] {
        &self.contexts
    }

    pub fn root_cause(&self) -> &'a Error {
        self.root
    }

    /// Single-line form for log records
    pub fn format_for_log(&self) -> String {
        let mut parts: Vec<String> = self.contexts.iter().map(|c| c.to_string()).collect();
        parts.push(self.root.to_string());
        parts.join(" -> ")
    }
}

/// Root cause first, then one indented line per context, innermost first
impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for context in self.contexts.iter().rev() {
            write!(f, "\n  {}", context)?;
        }
        Ok(())
    }
}

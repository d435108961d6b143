use thiserror::Error;

pub mod context;

pub type Result<T> = std::result::Result<T, Error>;

pub use context::{ErrorChain, ErrorContext};

/// Main error type for template compilation and rendering
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed tag body or unknown tag keyword
    #[error("Syntax error at line {line}: '{tag}' {message}")]
    Syntax {
        line: usize,
        tag: String,
        message: String,
    },

    /// Unmatched, mismatched or unterminated open/close tags
    #[error("Nesting error at line {line}: {message}")]
    Nesting { line: usize, message: String },

    /// An expression could not be resolved against the context
    #[error("Cannot resolve '{0}'")]
    Context(String),

    /// A filter is missing or failed while running
    #[error("Cannot apply filter '{name}': {message}")]
    Filter { name: String, message: String },

    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "config")]
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    // Error with context chain
    #[error("{message}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn syntax(line: usize, tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            tag: tag.into(),
            message: message.into(),
        }
    }

    pub fn nesting(line: usize, message: impl Into<String>) -> Self {
        Self::Nesting {
            line,
            message: message.into(),
        }
    }

    pub fn context(expr: impl Into<String>) -> Self {
        Self::Context(expr.into())
    }

    pub fn filter(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Filter {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    // Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Error::WithContext { source, .. } = current {
            current = source;
        }
        current
    }

    /// Raised while compiling (syntax or nesting problems)
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::Syntax { .. } | Error::Nesting { .. }
        )
    }

    /// Context errors are swallowed by best-effort rendering unless strict mode is on
    pub fn is_context_error(&self) -> bool {
        matches!(self.root_cause(), Error::Context(_))
    }
}

//! minimy-template - a small Jinja-flavoured template engine
//!
//! minimy-template compiles text templates into node trees and renders them
//! against JSON data:
//! - `{{ expr | filter(args) }}` output with HTML auto-escaping
//! - `if`/`elif`/`else`, `for`/`empty`, `set`, `raw` and `escape` blocks
//! - template inheritance through `extends` and `block`, plus `include`
//! - process-wide globals, filters and functions
//!
//! ```rust
//! use minimy_template::Template;
//! use serde_json::json;
//!
//! let template = Template::compile("{% for n in names %}{{ n | upper }} {% endfor %}").unwrap();
//! assert_eq!(template.render(&json!({"names": ["a", "b"]})).unwrap(), "A B ");
//! ```

// Enforce error handling best practices
#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
    )
)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used,))]

pub mod config;
pub mod error;
pub mod registry;
pub mod security;
pub mod template;

// Re-export main types for public API
pub use config::ViewConfig;
pub use error::{Error, ErrorContext, Result};
pub use registry::{inject_global, register_filter, register_function, TemplateRegistry};
pub use security::HtmlEscaper;
pub use template::{
    Compiler, Context, Environment, FileSystemLoader, FilterArgs, MemoryLoader, Node, Template,
    TemplateLoader,
};

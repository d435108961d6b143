/// Jinja-flavoured template compiler and renderer
///
/// Source text goes through three stages:
/// - the lexer splits it into fragments (text, `{{ }}`, `{% %}`, `{# #}`)
/// - the compiler folds fragments into a node tree, checking tag nesting
/// - the renderer walks the tree against a JSON context
///
/// `Environment` owns the loader, registry and cache used by `extends`
/// and `include`.
pub mod ast;
pub mod context;
pub mod engine;
pub mod eval;
pub mod expr;
pub mod filters;
pub mod functions;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod renderer;
pub mod value;

pub use ast::{Expression, FilterCall, Node, Template};
pub use context::Context;
pub use engine::Environment;
pub use filters::{FilterArgs, FilterRegistry, ESCAPE_FILTERS, SAFE_FILTER};
pub use functions::FunctionRegistry;
pub use lexer::{Fragment, FragmentKind, Lexer};
pub use loader::{FileSystemLoader, MemoryLoader, TemplateLoader};
pub use parser::Compiler;

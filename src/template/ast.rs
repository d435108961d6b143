use super::lexer::Fragment;
use std::fmt;

/// AST node types for compiled templates
///
/// The set is closed: the compiler produces only these variants and the
/// renderer matches on them exhaustively. `Empty`, `Elif` and `Else` are
/// markers the compiler folds into their owning `For`/`If` when the scope
/// closes; a finished tree never contains them.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Top of every compiled tree
    Root(Vec<Node>),

    /// Literal text between tags
    Text(String),

    /// `{{ expr | filter(args) }}`
    Variable {
        source: String,
        expression: Expression,
        filters: Vec<FilterCall>,
    },

    /// `{# ... #}`
    Comment,

    /// `{% set a=expr and b=expr %}...{% endset %}`
    Set {
        assignments: Vec<(String, Expression)>,
        body: Vec<Node>,
        end: Fragment,
    },

    /// `{% for x in expr %}...{% empty %}...{% endfor %}`
    For {
        targets: Vec<String>,
        iterable: Expression,
        body: Vec<Node>,
        empty: Vec<Node>,
        end: Fragment,
    },

    /// `{% empty %}` marker
    Empty,

    /// `{% if %}...{% elif %}...{% else %}...{% endif %}`, branches in source order
    If {
        branches: Vec<(Expression, Vec<Node>)>,
        end: Fragment,
    },

    /// `{% elif expr %}` marker
    Elif(Expression),

    /// `{% else %}` marker
    Else,

    /// `{% raw %}...{% endraw %}`; body kept verbatim
    Raw { text: String, end: Fragment },

    /// `{% escape on|off %}...{% endescape %}`
    Escape {
        enabled: bool,
        body: Vec<Node>,
        end: Fragment,
    },

    /// `{% block name %}...{% endblock %}`
    Block {
        name: String,
        body: Vec<Node>,
        end: Fragment,
    },

    /// `{% extends "parent" %}`
    Extends(Expression),

    /// `{% include "partial" %}`
    Include(Expression),

    /// `{% call func(args) %}`
    Call(Expression),
}

/// One `| name(args, key=value)` step of a variable pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    pub name: String,
    pub args: Vec<Expression>,
    pub kwargs: Vec<(String, Expression)>,
}

/// Expression types for conditions and values
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,

    /// Variable reference
    Variable(String),

    /// Property access (e.g., user.name)
    PropertyAccess {
        object: Box<Expression>,
        property: String,
    },

    /// Subscript (e.g., items[0], user["name"])
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
    },

    /// Array literal
    Array(Vec<Expression>),

    /// Registered function call
    FunctionCall { name: String, args: Vec<Expression> },

    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },

    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Logical
    Or,
    And,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    In,
    NotIn,

    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
}

impl BinaryOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::Or => "or",
            BinaryOperator::And => "and",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::In => "in",
            BinaryOperator::NotIn => "not in",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::FloorDivide => "//",
            BinaryOperator::Modulo => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

impl Expression {
    /// Create a property access expression from a dotted path
    pub fn from_path(path: &str) -> Self {
        let mut parts = path.split('.');
        let mut expr = Expression::Variable(parts.next().unwrap_or_default().to_string());

        for part in parts {
            expr = Expression::PropertyAccess {
                object: Box::new(expr),
                property: part.to_string(),
            };
        }

        expr
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::String(s) => write!(f, "{:?}", s),
            Expression::Integer(n) => write!(f, "{}", n),
            Expression::Float(n) => write!(f, "{}", n),
            Expression::Boolean(b) => write!(f, "{}", b),
            Expression::Null => write!(f, "null"),
            Expression::Variable(name) => write!(f, "{}", name),
            Expression::PropertyAccess { object, property } => write!(f, "{}.{}", object, property),
            Expression::Index { object, index } => write!(f, "{}[{}]", object, index),
            Expression::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Expression::FunctionCall { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expression::BinaryOp { left, op, right } => {
                write!(f, "({} {} {})", left, op.as_str(), right)
            }
            Expression::UnaryOp { op, operand } => match op {
                UnaryOperator::Not => write!(f, "not {}", operand),
                UnaryOperator::Minus => write!(f, "-{}", operand),
            },
        }
    }
}

/// A compiled template, ready to be rendered any number of times
#[derive(Debug, Clone)]
pub struct Template {
    root: Node,
}

impl Template {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }
}

/// The `extends` node when it leads the template (after whitespace text and comments)
pub fn find_extends(nodes: &[Node]) -> Option<&Expression> {
    for node in nodes {
        match node {
            Node::Extends(parent) => return Some(parent),
            Node::Comment => continue,
            Node::Text(text) if text.trim().is_empty() => continue,
            _ => return None,
        }
    }
    None
}

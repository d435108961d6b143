use super::ast::{Expression, Node};
use super::expr::{is_identifier, ExpressionParser};
use super::lexer::{strip_tag_lines, Fragment, FragmentKind, Lexer};
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Header of a scope that is still open on the compiler's stack
#[derive(Debug)]
enum ScopeKind {
    Root,
    Set(Vec<(String, Expression)>),
    For {
        targets: Vec<String>,
        iterable: Expression,
    },
    If(Expression),
    Raw,
    Escape(bool),
    Block(String),
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    open: Option<Fragment>,
    children: Vec<Node>,
    raw_text: String,
}

impl Scope {
    fn root() -> Self {
        Self::open(ScopeKind::Root, None)
    }

    fn open(kind: ScopeKind, fragment: Option<Fragment>) -> Self {
        Self {
            kind,
            open: fragment,
            children: Vec::new(),
            raw_text: String::new(),
        }
    }

    fn close_keyword(&self) -> &'static str {
        match self.kind {
            ScopeKind::Root => "",
            ScopeKind::Set(_) => "endset",
            ScopeKind::For { .. } => "endfor",
            ScopeKind::If(_) => "endif",
            ScopeKind::Raw => "endraw",
            ScopeKind::Escape(_) => "endescape",
            ScopeKind::Block(_) => "endblock",
        }
    }

    fn is_raw(&self) -> bool {
        matches!(self.kind, ScopeKind::Raw)
    }

    fn opened_by(&self) -> String {
        match &self.open {
            Some(fragment) => format!("'{}' from line {}", fragment.clean, fragment.line),
            None => "the template".to_string(),
        }
    }

    fn accepts(&self, end: &Fragment) -> bool {
        let mut words = end.clean.split_whitespace();
        if words.next() != Some(self.close_keyword()) {
            return false;
        }
        match (&self.kind, words.next(), words.next()) {
            (_, None, _) => true,
            (ScopeKind::Block(name), Some(repeated), None) => repeated == name,
            _ => false,
        }
    }

    /// Close the scope with `end`, folding branch markers into the node
    fn exit(self, end: Fragment) -> Result<Node> {
        if !self.accepts(&end) {
            return Err(Error::nesting(
                end.line,
                format!(
                    "'{}' does not close {}, expected '{}'",
                    end.clean,
                    self.opened_by(),
                    self.close_keyword()
                ),
            ));
        }

        let node = match self.kind {
            ScopeKind::Root => {
                return Err(Error::nesting(
                    end.line,
                    format!("unexpected '{}' with no open block", end.clean),
                ))
            }
            ScopeKind::Set(assignments) => Node::Set {
                assignments,
                body: self.children,
                end,
            },
            ScopeKind::For { targets, iterable } => {
                let mut body = Vec::new();
                let mut empty = Vec::new();
                let mut in_empty = false;
                for child in self.children {
                    match child {
                        Node::Empty => in_empty = true,
                        child if in_empty => empty.push(child),
                        child => body.push(child),
                    }
                }
                Node::For {
                    targets,
                    iterable,
                    body,
                    empty,
                    end,
                }
            }
            ScopeKind::If(condition) => {
                let mut branches = vec![(condition, Vec::new())];
                for child in self.children {
                    match child {
                        Node::Elif(condition) => branches.push((condition, Vec::new())),
                        Node::Else => branches.push((Expression::Boolean(true), Vec::new())),
                        child => {
                            if let Some((_, body)) = branches.last_mut() {
                                body.push(child);
                            }
                        }
                    }
                }
                Node::If { branches, end }
            }
            ScopeKind::Raw => Node::Raw {
                text: self.raw_text,
                end,
            },
            ScopeKind::Escape(enabled) => Node::Escape {
                enabled,
                body: self.children,
                end,
            },
            ScopeKind::Block(name) => Node::Block {
                name,
                body: self.children,
                end,
            },
        };

        Ok(node)
    }
}

/// What a fragment turns into: a leaf appended to the current scope, or a new scope
enum Compiled {
    Leaf(Node),
    Scope(Scope),
}

/// Builds a node tree from template source with an explicit scope stack
pub struct Compiler<'a> {
    source: &'a str,
    strict_delimiters: bool,
    strip_tag_lines: bool,
}

impl<'a> Compiler<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            strict_delimiters: false,
            strip_tag_lines: false,
        }
    }

    /// Report unterminated delimiters instead of keeping them as text
    pub fn strict_delimiters(mut self, strict: bool) -> Self {
        self.strict_delimiters = strict;
        self
    }

    /// Drop the indentation and newline around block tags that stand alone on a line
    pub fn strip_tag_lines(mut self, strip: bool) -> Self {
        self.strip_tag_lines = strip;
        self
    }

    /// Compile the source into a `Node::Root`
    pub fn compile(&self) -> Result<Node> {
        let mut fragments = Lexer::new(self.source)
            .strict(self.strict_delimiters)
            .tokenize()?;
        if self.strip_tag_lines {
            strip_tag_lines(&mut fragments);
        }

        let mut stack = vec![Scope::root()];
        let mut block_names = HashSet::new();
        let mut seen_content = false;

        for fragment in fragments {
            let Some(parent) = stack.last_mut() else {
                return Err(Error::nesting(fragment.line, "scope stack is empty"));
            };

            if parent.is_raw() {
                if fragment.kind == FragmentKind::CloseBlock && parent.accepts(&fragment) {
                    close_scope(&mut stack, fragment)?;
                } else {
                    parent.raw_text.push_str(&fragment.raw);
                }
                continue;
            }

            if fragment.kind == FragmentKind::CloseBlock {
                if stack.len() == 1 {
                    return Err(Error::nesting(
                        fragment.line,
                        format!("unexpected '{}' with no open block", fragment.clean),
                    ));
                }
                close_scope(&mut stack, fragment)?;
                continue;
            }

            let line = fragment.line;
            let clean = fragment.clean.clone();
            let compiled = self.compile_fragment(fragment)?;

            if let Compiled::Leaf(Node::Extends(_)) = &compiled {
                if seen_content || stack.len() > 1 {
                    return Err(Error::syntax(
                        line,
                        clean,
                        "must be the first tag in the template",
                    ));
                }
            }
            seen_content |= match &compiled {
                Compiled::Leaf(Node::Text(text)) => !text.trim().is_empty(),
                Compiled::Leaf(Node::Comment) => false,
                _ => true,
            };

            let Some(parent) = stack.last_mut() else {
                return Err(Error::nesting(line, "scope stack is empty"));
            };
            match compiled {
                Compiled::Leaf(node) => {
                    check_marker(parent, &node, line, &clean)?;
                    parent.children.push(node);
                }
                Compiled::Scope(scope) => {
                    if let ScopeKind::Block(name) = &scope.kind {
                        if !block_names.insert(name.clone()) {
                            return Err(Error::syntax(
                                line,
                                clean,
                                format!("block '{}' is defined more than once", name),
                            ));
                        }
                    }
                    stack.push(scope);
                }
            }
        }

        if stack.len() > 1 {
            let open = stack.last().map(Scope::opened_by).unwrap_or_default();
            let line = stack
                .last()
                .and_then(|scope| scope.open.as_ref())
                .map_or(0, |fragment| fragment.line);
            return Err(Error::nesting(line, format!("unterminated block {}", open)));
        }

        let root = stack
            .pop()
            .ok_or_else(|| Error::nesting(0, "scope stack is empty"))?;
        log::trace!("compiled {} top-level nodes", root.children.len());
        Ok(Node::Root(root.children))
    }

    fn compile_fragment(&self, fragment: Fragment) -> Result<Compiled> {
        match fragment.kind {
            FragmentKind::Text => Ok(Compiled::Leaf(Node::Text(fragment.raw))),
            FragmentKind::Comment => Ok(Compiled::Leaf(Node::Comment)),
            FragmentKind::Variable => {
                if fragment.clean.is_empty() {
                    return Err(Error::syntax(fragment.line, fragment.raw, "is empty"));
                }
                let (expression, filters) =
                    ExpressionParser::new(&fragment.clean, fragment.line)?.parse_pipeline()?;
                Ok(Compiled::Leaf(Node::Variable {
                    source: fragment.clean,
                    expression,
                    filters,
                }))
            }
            FragmentKind::OpenBlock => self.compile_tag(fragment),
            FragmentKind::CloseBlock => Err(Error::nesting(
                fragment.line,
                format!("unexpected '{}'", fragment.clean),
            )),
        }
    }

    /// Keyword dispatch for `{% ... %}` tags
    fn compile_tag(&self, fragment: Fragment) -> Result<Compiled> {
        let line = fragment.line;
        let args = fragment.arguments().to_string();
        let syntax = |message: &str| Error::syntax(line, fragment.clean.clone(), message);
        let expression = |what: &str| -> Result<Expression> {
            if args.is_empty() {
                return Err(syntax(&format!("expects {}", what)));
            }
            ExpressionParser::new(&args, line)?.parse_expression()
        };

        let compiled = match fragment.keyword() {
            "if" => Compiled::Scope(Scope::open(
                ScopeKind::If(expression("a condition")?),
                Some(fragment.clone()),
            )),
            "elif" => Compiled::Leaf(Node::Elif(expression("a condition")?)),
            "else" => {
                if !args.is_empty() {
                    return Err(syntax("takes no arguments"));
                }
                Compiled::Leaf(Node::Else)
            }
            "for" => {
                if args.is_empty() {
                    return Err(syntax("expects 'target in iterable'"));
                }
                let (targets, iterable) = ExpressionParser::new(&args, line)?.parse_for()?;
                Compiled::Scope(Scope::open(
                    ScopeKind::For { targets, iterable },
                    Some(fragment.clone()),
                ))
            }
            "empty" => {
                if !args.is_empty() {
                    return Err(syntax("takes no arguments"));
                }
                Compiled::Leaf(Node::Empty)
            }
            "set" => {
                if args.is_empty() {
                    return Err(syntax("expects 'name=value'"));
                }
                let assignments = ExpressionParser::new(&args, line)?.parse_assignments()?;
                Compiled::Scope(Scope::open(
                    ScopeKind::Set(assignments),
                    Some(fragment.clone()),
                ))
            }
            "raw" => {
                if !args.is_empty() {
                    return Err(syntax("takes no arguments"));
                }
                Compiled::Scope(Scope::open(ScopeKind::Raw, Some(fragment.clone())))
            }
            "escape" => {
                let enabled = match args.to_lowercase().as_str() {
                    "on" => true,
                    "off" => false,
                    _ => return Err(syntax("expects 'on' or 'off'")),
                };
                Compiled::Scope(Scope::open(
                    ScopeKind::Escape(enabled),
                    Some(fragment.clone()),
                ))
            }
            "block" => {
                if !is_identifier(&args) {
                    return Err(syntax("expects a block name"));
                }
                Compiled::Scope(Scope::open(
                    ScopeKind::Block(args.clone()),
                    Some(fragment.clone()),
                ))
            }
            "extends" => Compiled::Leaf(Node::Extends(expression("a template name")?)),
            "include" => Compiled::Leaf(Node::Include(expression("a template name")?)),
            "call" => Compiled::Leaf(Node::Call(expression("a function call")?)),
            _ => return Err(syntax("is not a known tag")),
        };

        Ok(compiled)
    }
}

fn close_scope(stack: &mut Vec<Scope>, end: Fragment) -> Result<()> {
    let line = end.line;
    let scope = stack
        .pop()
        .ok_or_else(|| Error::nesting(line, "scope stack is empty"))?;
    let node = scope.exit(end)?;
    let parent = stack
        .last_mut()
        .ok_or_else(|| Error::nesting(line, "closed the template root"))?;
    parent.children.push(node);
    Ok(())
}

/// `elif`/`else` belong to an `if`, `empty` to a `for`, each in a valid order
fn check_marker(parent: &Scope, node: &Node, line: usize, clean: &str) -> Result<()> {
    let has_else = || parent.children.iter().any(|n| matches!(n, Node::Else));

    match node {
        Node::Elif(_) | Node::Else => {
            if !matches!(parent.kind, ScopeKind::If(_)) {
                return Err(Error::syntax(line, clean, "is only allowed inside 'if'"));
            }
            if has_else() {
                return Err(Error::syntax(line, clean, "follows 'else'"));
            }
        }
        Node::Empty => {
            if !matches!(parent.kind, ScopeKind::For { .. }) {
                return Err(Error::syntax(line, clean, "is only allowed inside 'for'"));
            }
            if parent.children.iter().any(|n| matches!(n, Node::Empty)) {
                return Err(Error::syntax(line, clean, "appears twice in one 'for'"));
            }
        }
        _ => {}
    }
    Ok(())
}

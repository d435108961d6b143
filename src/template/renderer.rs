use super::ast::{find_extends, Expression, FilterCall, Node, Template};
use super::context::Context;
use super::engine::Environment;
use super::eval::Evaluator;
use super::filters::{FilterArgs, ESCAPE_FILTERS, SAFE_FILTER};
use super::value::{is_truthy, type_name, value_to_string};
use crate::error::{Error, ErrorChain, ErrorContext, Result};
use crate::security::HtmlEscaper;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Template renderer
///
/// One renderer serves one top-level render call. Block overrides collected
/// from `extends` chains and the templates loaded along the way live here,
/// never in the compiled trees, so a tree can be rendered concurrently.
pub struct Renderer<'e> {
    env: &'e Environment,
    evaluator: Evaluator<'e>,
    depth: usize,
    /// Rendered blocks of descendant templates, most derived first
    overrides: Vec<HashMap<String, String>>,
    /// Set while pre-rendering the direct blocks of a template that extends another
    recording: Option<HashMap<String, String>>,
    loaded: HashMap<String, Arc<Template>>,
}

impl<'e> Renderer<'e> {
    pub fn new(env: &'e Environment) -> Self {
        Self {
            env,
            evaluator: Evaluator::new(env.registry().functions()),
            depth: 0,
            overrides: Vec::new(),
            recording: None,
            loaded: HashMap::new(),
        }
    }

    /// Render a template to string
    pub fn render(&mut self, template: &Template, ctx: &Context<'_>) -> Result<String> {
        self.render_node(template.root(), ctx)
    }

    /// Render a list of nodes
    fn render_nodes(&mut self, nodes: &[Node], ctx: &Context<'_>) -> Result<String> {
        let mut output = String::new();
        for node in nodes {
            output.push_str(&self.render_node(node, ctx)?);
        }
        Ok(output)
    }

    /// Render a single node
    fn render_node(&mut self, node: &Node, ctx: &Context<'_>) -> Result<String> {
        match node {
            Node::Root(children) => self.render_root(children, ctx),

            Node::Text(text) => Ok(text.clone()),

            Node::Comment | Node::Empty | Node::Elif(_) | Node::Else => Ok(String::new()),

            Node::Variable {
                source,
                expression,
                filters,
            } => self.render_variable(source, expression, filters, ctx),

            Node::Set {
                assignments, body, ..
            } => {
                // Every value is computed against the enclosing scope
                let mut bindings = IndexMap::new();
                for (name, expr) in assignments {
                    let value = self.resolve(expr, ctx)?.unwrap_or(Value::Null);
                    bindings.insert(name.clone(), value);
                }
                let scope = ctx.push(bindings);
                self.render_nodes(body, &scope)
            }

            Node::For {
                targets,
                iterable,
                body,
                empty,
                ..
            } => self.render_for(targets, iterable, body, empty, ctx),

            Node::If { branches, .. } => {
                for (condition, body) in branches {
                    let passed = self
                        .resolve(condition, ctx)?
                        .map(|value| is_truthy(&value))
                        .unwrap_or(false);
                    if passed {
                        return self.render_nodes(body, ctx);
                    }
                }
                Ok(String::new())
            }

            Node::Raw { text, .. } => Ok(text.clone()),

            Node::Escape { enabled, body, .. } => {
                let scope = ctx.escaping(*enabled);
                self.render_nodes(body, &scope)
            }

            Node::Block { name, body, .. } => self.render_block(name, body, ctx),

            // Consumed by the enclosing Root
            Node::Extends(_) => Ok(String::new()),

            Node::Include(expr) => self.render_include(expr, ctx),

            Node::Call(expr) => Ok(self
                .resolve(expr, ctx)?
                .map(|value| value_to_string(&value))
                .unwrap_or_default()),
        }
    }

    fn render_root(&mut self, children: &[Node], ctx: &Context<'_>) -> Result<String> {
        let Some(parent) = find_extends(children) else {
            return self.render_nodes(children, ctx);
        };

        let previous = self.recording.replace(HashMap::new());
        for child in children {
            if matches!(child, Node::Block { .. }) {
                self.render_node(child, ctx)?;
            }
        }
        let recorded = std::mem::replace(&mut self.recording, previous).unwrap_or_default();
        log::trace!("extends: recorded blocks {:?}", recorded.keys().collect::<Vec<_>>());

        self.overrides.push(recorded);
        let result = self.render_parent(parent, ctx);
        self.overrides.pop();
        result
    }

    fn render_block(&mut self, name: &str, body: &[Node], ctx: &Context<'_>) -> Result<String> {
        let output = match self.find_override(name) {
            Some(text) => text,
            None => self.render_nodes(body, ctx)?,
        };
        if let Some(recorded) = self.recording.as_mut() {
            recorded.insert(name.to_string(), output.clone());
        }
        Ok(output)
    }

    fn find_override(&self, name: &str) -> Option<String> {
        self.overrides
            .iter()
            .find_map(|level| level.get(name).cloned())
    }

    fn render_parent(&mut self, expr: &Expression, ctx: &Context<'_>) -> Result<String> {
        let (name, template) = self.load(expr, ctx)?;
        self.enter(&name)?;
        let result = self
            .render_node(template.root(), ctx)
            .with_context(|| format!("while rendering parent template '{}'", name));
        self.depth -= 1;
        result
    }

    fn render_include(&mut self, expr: &Expression, ctx: &Context<'_>) -> Result<String> {
        let (name, template) = self.load(expr, ctx)?;
        self.enter(&name)?;

        // An included template resolves its own blocks
        let overrides = std::mem::take(&mut self.overrides);
        let recording = self.recording.take();
        let result = self
            .render_node(template.root(), ctx)
            .with_context(|| format!("while including '{}'", name));
        self.overrides = overrides;
        self.recording = recording;
        self.depth -= 1;
        result
    }

    fn enter(&mut self, name: &str) -> Result<()> {
        let max_depth = self.env.config().max_depth;
        if self.depth >= max_depth {
            return Err(Error::template(format!(
                "'{}' exceeds the maximum template nesting depth of {}",
                name, max_depth
            )));
        }
        self.depth += 1;
        Ok(())
    }

    /// Resolve an `extends`/`include` argument to a compiled template
    fn load(&mut self, expr: &Expression, ctx: &Context<'_>) -> Result<(String, Arc<Template>)> {
        let name = match self.evaluator.evaluate(expr, ctx)? {
            Value::String(name) => name,
            other => {
                return Err(Error::template(format!(
                    "'{}' must name a template, got {}",
                    expr,
                    type_name(&other)
                )))
            }
        };

        if let Some(template) = self.loaded.get(&name) {
            return Ok((name, template.clone()));
        }
        let template = self.env.get_template(&name)?;
        self.loaded.insert(name.clone(), template.clone());
        Ok((name, template))
    }

    fn render_variable(
        &mut self,
        source: &str,
        expression: &Expression,
        filters: &[FilterCall],
        ctx: &Context<'_>,
    ) -> Result<String> {
        let mut value = self.resolve(expression, ctx)?.unwrap_or(Value::Null);
        let mut safe = false;

        for filter in filters {
            let args = self.filter_args(filter, ctx)?;
            value = self
                .env
                .registry()
                .filters()
                .apply(&filter.name, value, &args)?;
            safe |= filter.name == SAFE_FILTER;
        }
        let escaped = filters
            .last()
            .is_some_and(|filter| ESCAPE_FILTERS.contains(&filter.name.as_str()));

        let text = value_to_string(&value);
        log::trace!("{{{{ {} }}}} -> {:?}", source, text);
        if safe || escaped || !ctx.autoescape() {
            Ok(text)
        } else {
            Ok(HtmlEscaper::escape(&text))
        }
    }

    fn filter_args(&self, filter: &FilterCall, ctx: &Context<'_>) -> Result<FilterArgs> {
        let mut positional = Vec::with_capacity(filter.args.len());
        for arg in &filter.args {
            positional.push(self.resolve(arg, ctx)?.unwrap_or(Value::Null));
        }
        let mut keyword = IndexMap::new();
        for (name, arg) in &filter.kwargs {
            keyword.insert(name.clone(), self.resolve(arg, ctx)?.unwrap_or(Value::Null));
        }
        Ok(FilterArgs::new(positional, keyword))
    }

    fn render_for(
        &mut self,
        targets: &[String],
        iterable: &Expression,
        body: &[Node],
        empty: &[Node],
        ctx: &Context<'_>,
    ) -> Result<String> {
        let collection = self.resolve(iterable, ctx)?.unwrap_or(Value::Null);
        let pairs = targets.len() == 2;

        let items: Vec<Value> = match collection {
            Value::Array(items) => items,
            Value::Object(map) if pairs => map
                .into_iter()
                .map(|(key, value)| Value::Array(vec![Value::String(key), value]))
                .collect(),
            Value::Object(map) => map.into_iter().map(|(key, _)| Value::String(key)).collect(),
            Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
            Value::Null => Vec::new(),
            other => {
                return Err(Error::template(format!(
                    "cannot iterate over '{}', a {}",
                    iterable,
                    type_name(&other)
                )))
            }
        };

        if items.is_empty() {
            return self.render_nodes(empty, ctx);
        }

        let length = items.len();
        let mut output = String::new();
        for (index, item) in items.into_iter().enumerate() {
            let mut bindings = IndexMap::new();
            bindings.insert(
                "loop".to_string(),
                json!({
                    "index": index + 1,
                    "index0": index,
                    "first": index == 0,
                    "last": index + 1 == length,
                    "length": length,
                }),
            );

            match targets {
                [target] => {
                    bindings.insert(target.clone(), item);
                }
                [key_name, value_name] => {
                    let (key, value) = unpack_pair(item, iterable)?;
                    bindings.insert(key_name.clone(), key);
                    bindings.insert(value_name.clone(), value);
                }
                _ => return Err(Error::template("for expects one or two loop variables")),
            }

            let scope = ctx.push(bindings);
            output.push_str(&self.render_nodes(body, &scope)?);
        }

        Ok(output)
    }

    /// Evaluate; expressions that fail to evaluate give `None` unless strict
    fn resolve(&self, expr: &Expression, ctx: &Context<'_>) -> Result<Option<Value>> {
        match self.evaluator.evaluate(expr, ctx) {
            Ok(value) => Ok(Some(value)),
            Err(e) if !self.env.config().strict_undefined => {
                if e.is_context_error() {
                    log::debug!("{} (rendered as empty)", e);
                } else {
                    log::debug!(
                        "'{}' failed: {} (rendered as empty)",
                        expr,
                        ErrorChain::new(&e).format_for_log()
                    );
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn unpack_pair(item: Value, iterable: &Expression) -> Result<(Value, Value)> {
    match item {
        Value::Array(pair) if pair.len() == 2 => {
            let mut pair = pair.into_iter();
            let key = pair.next().unwrap_or_default();
            let value = pair.next().unwrap_or_default();
            Ok((key, value))
        }
        other => Err(Error::template(format!(
            "cannot unpack {} from '{}' into two loop variables",
            type_name(&other),
            iterable
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewConfig;
    use crate::registry::TemplateRegistry;
    use crate::template::ast::UnaryOperator;
    use crate::template::lexer::Fragment;
    use crate::template::loader::MemoryLoader;
    use serde_json::json;

    fn env() -> Environment {
        Environment::with_registry(
            MemoryLoader::new(),
            Arc::new(TemplateRegistry::new()),
            ViewConfig::default(),
        )
    }

    fn render_nodes(nodes: Vec<Node>, data: Value) -> Result<String> {
        let env = env();
        let template = Template::new(Node::Root(nodes));
        env.render_template(&template, &data)
    }

    fn end(clean: &str) -> Fragment {
        Fragment::classify(format!("{{% {} %}}", clean), 1)
    }

    #[test]
    fn test_render_text() {
        let result = render_nodes(vec![Node::Text("Hello World".to_string())], json!({})).unwrap();
        assert_eq!(result, "Hello World");
    }

    #[test]
    fn test_render_variable() {
        let nodes = vec![
            Node::Text("Hello ".to_string()),
            Node::Variable {
                source: "name".to_string(),
                expression: Expression::Variable("name".to_string()),
                filters: vec![],
            },
            Node::Text("!".to_string()),
        ];
        assert_eq!(
            render_nodes(nodes, json!({ "name": "<Alice>" })).unwrap(),
            "Hello &lt;Alice&gt;!"
        );
    }

    #[test]
    fn test_render_conditional() {
        let nodes = || {
            vec![Node::If {
                branches: vec![
                    (
                        Expression::from_path("user.active"),
                        vec![Node::Text("Active".to_string())],
                    ),
                    (
                        Expression::Boolean(true),
                        vec![Node::Text("Inactive".to_string())],
                    ),
                ],
                end: end("endif"),
            }]
        };

        assert_eq!(
            render_nodes(nodes(), json!({ "user": { "active": true } })).unwrap(),
            "Active"
        );
        assert_eq!(
            render_nodes(nodes(), json!({ "user": { "active": false } })).unwrap(),
            "Inactive"
        );
        // Unresolvable condition is false
        assert_eq!(render_nodes(nodes(), json!({})).unwrap(), "Inactive");
    }

    #[test]
    fn test_render_loop_variables() {
        let nodes = vec![Node::For {
            targets: vec!["item".to_string()],
            iterable: Expression::Variable("items".to_string()),
            body: vec![
                Node::Variable {
                    source: "loop.index".to_string(),
                    expression: Expression::from_path("loop.index"),
                    filters: vec![],
                },
                Node::Text(":".to_string()),
                Node::Variable {
                    source: "item".to_string(),
                    expression: Expression::Variable("item".to_string()),
                    filters: vec![],
                },
                Node::If {
                    branches: vec![(
                        Expression::UnaryOp {
                            op: UnaryOperator::Not,
                            operand: Box::new(Expression::from_path("loop.last")),
                        },
                        vec![Node::Text(",".to_string())],
                    )],
                    end: end("endif"),
                },
            ],
            empty: vec![Node::Text("none".to_string())],
            end: end("endfor"),
        }];

        assert_eq!(
            render_nodes(nodes.clone(), json!({ "items": ["a", "b", "c"] })).unwrap(),
            "1:a,2:b,3:c"
        );
        assert_eq!(render_nodes(nodes.clone(), json!({ "items": [] })).unwrap(), "none");
        assert_eq!(render_nodes(nodes, json!({})).unwrap(), "none");
    }

    #[test]
    fn test_strict_undefined_propagates() {
        let env = Environment::with_registry(
            MemoryLoader::new(),
            Arc::new(TemplateRegistry::new()),
            ViewConfig {
                strict_undefined: true,
                ..ViewConfig::default()
            },
        );
        let template = Template::new(Node::Root(vec![Node::Variable {
            source: "missing".to_string(),
            expression: Expression::Variable("missing".to_string()),
            filters: vec![],
        }]));
        let err = env.render_template(&template, &json!({})).unwrap_err();
        assert!(err.is_context_error());
    }

    #[test]
    fn test_failing_expression_renders_empty() {
        let env = env();
        assert_eq!(
            env.render_str("[{{ range(1, 2, 0) }}]", &json!({})).unwrap(),
            "[]"
        );
        assert_eq!(
            env.render_str("{% if range(0, 1, 0) %}yes{% else %}no{% endif %}", &json!({}))
                .unwrap(),
            "no"
        );
    }

    #[test]
    fn test_failing_expression_propagates_when_strict() {
        let env = Environment::with_registry(
            MemoryLoader::new(),
            Arc::new(TemplateRegistry::new()),
            ViewConfig {
                strict_undefined: true,
                ..ViewConfig::default()
            },
        );
        let err = env.render_str("[{{ range(1, 2, 0) }}]", &json!({})).unwrap_err();
        assert!(err.to_string().contains("range()"));
    }

    #[test]
    fn test_only_trailing_escape_skips_autoescape() {
        let env = env();
        let data = json!({ "x": "<script>" });
        assert_eq!(env.render_str("{{ x | e }}", &data).unwrap(), "&lt;script&gt;");
        assert_eq!(
            env.render_str("{{ x | e | unescape }}", &data).unwrap(),
            "&lt;script&gt;"
        );
        assert_eq!(env.render_str("{{ x | e | safe }}", &data).unwrap(), "<script>");
    }

    #[test]
    fn test_unpack_pair() {
        let iterable = Expression::Variable("pairs".to_string());
        assert_eq!(
            unpack_pair(json!(["k", 1]), &iterable).unwrap(),
            (json!("k"), json!(1))
        );
        assert!(unpack_pair(json!([1, 2, 3]), &iterable).is_err());
        assert!(unpack_pair(json!("ab"), &iterable).is_err());
    }
}

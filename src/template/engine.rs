use super::ast::Template;
use super::context::{bindings_from_value, Context};
use super::loader::{FileSystemLoader, TemplateLoader};
use super::parser::Compiler;
use super::renderer::Renderer;
use crate::config::ViewConfig;
use crate::error::{Error, ErrorContext, Result};
use crate::registry::TemplateRegistry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Ties a loader, a registry, configuration and the compiled-template cache together
pub struct Environment {
    loader: Option<Arc<dyn TemplateLoader>>,
    registry: Arc<TemplateRegistry>,
    config: ViewConfig,
    cache: DashMap<String, Arc<Template>>,
}

impl Environment {
    /// Environment over `loader` using the process-wide registry and default settings
    pub fn new<L: TemplateLoader + 'static>(loader: L) -> Self {
        Self::with_registry(loader, TemplateRegistry::global(), ViewConfig::default())
    }

    pub fn with_registry<L: TemplateLoader + 'static>(
        loader: L,
        registry: Arc<TemplateRegistry>,
        config: ViewConfig,
    ) -> Self {
        Self {
            loader: Some(Arc::new(loader)),
            registry,
            config,
            cache: DashMap::new(),
        }
    }

    /// Filesystem loader rooted at `config.directory`
    pub fn from_config(config: ViewConfig) -> Self {
        let loader =
            FileSystemLoader::new(&config.directory).with_extension(config.extension.clone());
        Self::with_registry(loader, TemplateRegistry::global(), config)
    }

    /// Environment with no loader; `extends` and `include` fail with `NotFound`
    pub fn standalone() -> Self {
        Self {
            loader: None,
            registry: TemplateRegistry::global(),
            config: ViewConfig::default(),
            cache: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    /// Compile template source; tag lines are kept as written
    pub fn compile(&self, source: &str) -> Result<Template> {
        let root = Compiler::new(source)
            .strict_delimiters(self.config.strict_delimiters)
            .compile()?;
        Ok(Template::new(root))
    }

    /// Load, compile and (when caching is on) cache template `name`
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>> {
        if self.config.cache_enabled {
            if let Some(template) = self.cache.get(name) {
                log::debug!("Template cache hit: {}", name);
                return Ok(template.clone());
            }
        }

        let loader = self.loader.as_ref().ok_or_else(|| Error::not_found(name))?;
        let source = loader.load(name)?;
        let root = Compiler::new(&source)
            .strict_delimiters(self.config.strict_delimiters)
            .strip_tag_lines(self.config.strip_tag_lines)
            .compile()
            .with_context(|| format!("while compiling template '{}'", name))?;
        let template = Arc::new(Template::new(root));
        log::debug!("Compiled template '{}'", name);

        if self.config.cache_enabled {
            self.cache.insert(name.to_string(), template.clone());
        }
        Ok(template)
    }

    /// Render template `name` with `ctx`
    pub fn render(&self, name: &str, ctx: &Value) -> Result<String> {
        let template = self.get_template(name)?;
        self.render_template(&template, ctx)
            .with_context(|| format!("while rendering '{}'", name))
    }

    /// Compile and render template source in one step
    pub fn render_str(&self, source: &str, ctx: &Value) -> Result<String> {
        let template = self.compile(source)?;
        self.render_template(&template, ctx)
    }

    /// Render a compiled template; caller values shadow globals
    pub fn render_template(&self, template: &Template, ctx: &Value) -> Result<String> {
        let globals = Context::new(self.registry.globals()).with_autoescape(self.config.autoescape);
        let scope = globals.push(bindings_from_value(ctx)?);
        Renderer::new(self).render(template, &scope)
    }

    /// Drop every cached template
    pub fn clear_cache(&self) {
        self.cache.clear();
        log::debug!("Template cache cleared");
    }

    pub fn cached_templates(&self) -> usize {
        self.cache.len()
    }
}

impl Template {
    /// Compile template source with default settings
    ///
    /// # Examples
    /// ```rust
    /// use minimy_template::Template;
    /// use serde_json::json;
    ///
    /// let template = Template::compile("Hello {{ name | capitalize }}!").unwrap();
    /// assert_eq!(template.render(&json!({"name": "ada"})).unwrap(), "Hello Ada!");
    /// ```
    pub fn compile(source: &str) -> Result<Self> {
        Ok(Self::new(Compiler::new(source).compile()?))
    }

    /// Render against the process-wide registry
    pub fn render(&self, ctx: &Value) -> Result<String> {
        Environment::standalone().render_template(self, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::loader::MemoryLoader;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn env_with(loader: MemoryLoader, config: ViewConfig) -> Environment {
        Environment::with_registry(loader, Arc::new(TemplateRegistry::new()), config)
    }

    #[test]
    fn test_render_named_template() {
        let env = env_with(
            MemoryLoader::new().with("hello", "Hello {{ name }}"),
            ViewConfig::default(),
        );
        assert_eq!(env.render("hello", &json!({"name": "Bob"})).unwrap(), "Hello Bob");
        assert!(env.render("missing", &json!({})).unwrap_err().root_cause().to_string().contains("missing"));
    }

    #[test]
    fn test_cache_reuses_compiled_templates() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let loader = move |name: &str| -> Result<String> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("[{}]", name))
        };

        let config = ViewConfig {
            cache_enabled: true,
            ..ViewConfig::default()
        };
        let env = Environment::with_registry(loader, Arc::new(TemplateRegistry::new()), config);

        assert_eq!(env.render("a", &json!({})).unwrap(), "[a]");
        assert_eq!(env.render("a", &json!({})).unwrap(), "[a]");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(env.cached_templates(), 1);

        env.clear_cache();
        assert_eq!(env.cached_templates(), 0);
        env.render("a", &json!({})).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_without_cache_reloads() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let loader = move |_: &str| -> Result<String> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("x".to_string())
        };
        let env = Environment::with_registry(
            loader,
            Arc::new(TemplateRegistry::new()),
            ViewConfig::default(),
        );
        env.render("a", &json!({})).unwrap();
        env.render("a", &json!({})).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(env.cached_templates(), 0);
    }

    #[test]
    fn test_globals_under_caller_values() {
        let registry = Arc::new(TemplateRegistry::new());
        registry.inject_global("site", "Minimy").unwrap();
        registry.inject_global("title", "Default").unwrap();
        let env = Environment::with_registry(MemoryLoader::new(), registry, ViewConfig::default());

        assert_eq!(
            env.render_str("{{ site }}/{{ title }}", &json!({"title": "Page"}))
                .unwrap(),
            "Minimy/Page"
        );
    }

    #[test]
    fn test_autoescape_setting() {
        let config = ViewConfig {
            autoescape: false,
            ..ViewConfig::default()
        };
        let env = env_with(MemoryLoader::new(), config);
        assert_eq!(env.render_str("{{ x }}", &json!({"x": "<b>"})).unwrap(), "<b>");
    }

    #[test]
    fn test_loaded_templates_strip_tag_lines() {
        let source = "<ul>\n  {% for i in xs %}\n  <li>{{ i }}</li>\n  {% endfor %}\n</ul>\n";
        let env = env_with(MemoryLoader::new().with("list", source), ViewConfig::default());
        let data = json!({"xs": [1, 2]});

        assert_eq!(
            env.render("list", &data).unwrap(),
            "<ul>\n  <li>1</li>\n  <li>2</li>\n</ul>\n"
        );
        // Direct compilation keeps the source layout
        assert_eq!(
            env.render_str(source, &data).unwrap(),
            "<ul>\n  \n  <li>1</li>\n  \n  <li>2</li>\n  \n</ul>\n"
        );
    }

    #[test]
    fn test_context_must_be_object() {
        let env = env_with(MemoryLoader::new(), ViewConfig::default());
        assert!(env.render_str("x", &json!([1])).is_err());
        assert_eq!(env.render_str("x", &Value::Null).unwrap(), "x");
    }
}

use minimy_template::{Environment, Error, MemoryLoader, Template, TemplateRegistry, ViewConfig};
use serde_json::json;
use std::sync::Arc;

fn environment(loader: MemoryLoader) -> Environment {
    Environment::with_registry(loader, Arc::new(TemplateRegistry::new()), ViewConfig::default())
}

#[test]
fn test_child_overrides_blocks() {
    let env = environment(
        MemoryLoader::new()
            .with(
                "base",
                "<title>{% block title %}Site{% endblock %}</title><main>{% block body %}empty{% endblock %}</main>",
            )
            .with(
                "page",
                "{% extends \"base\" %}ignored text{% block body %}Hello {{ name }}{% endblock %}",
            ),
    );

    assert_eq!(
        env.render("page", &json!({"name": "<Ann>"})).unwrap(),
        "<title>Site</title><main>Hello &lt;Ann&gt;</main>"
    );
}

#[test]
fn test_multi_level_inheritance_prefers_most_derived() {
    let env = environment(
        MemoryLoader::new()
            .with(
                "base",
                "<title>{% block title %}Base{% endblock %}</title>|{% block body %}B{% endblock %}",
            )
            .with(
                "section",
                "{% extends 'base' %}{% block title %}Section{% endblock %}{% block body %}S[{% block inner %}i{% endblock inner %}]{% endblock body %}",
            )
            .with(
                "page",
                "{% extends 'section' %}{% block inner %}P{% endblock %}{% block title %}Page{% endblock title %}",
            ),
    );

    assert_eq!(env.render("page", &json!({})).unwrap(), "<title>Page</title>|S[P]");
    assert_eq!(
        env.render("section", &json!({})).unwrap(),
        "<title>Section</title>|S[i]"
    );
}

#[test]
fn test_extends_name_from_context() {
    let env = environment(
        MemoryLoader::new()
            .with("wide", "W:{% block c %}{% endblock %}")
            .with("narrow", "N:{% block c %}{% endblock %}")
            .with("page", "{% extends layout %}{% block c %}x{% endblock %}"),
    );

    assert_eq!(env.render("page", &json!({"layout": "wide"})).unwrap(), "W:x");
    assert_eq!(env.render("page", &json!({"layout": "narrow"})).unwrap(), "N:x");
}

#[test]
fn test_include_uses_current_context() {
    let env = environment(
        MemoryLoader::new()
            .with("greeting", "Hi {{ name }}")
            .with(
                "list",
                "{% for name in names %}[{% include 'greeting' %}]{% endfor %}",
            ),
    );

    assert_eq!(
        env.render("list", &json!({"names": ["Ann", "Bo"]})).unwrap(),
        "[Hi Ann][Hi Bo]"
    );
}

#[test]
fn test_included_template_keeps_its_own_blocks() {
    let env = environment(
        MemoryLoader::new()
            .with("base", "{% block a %}base-a{% endblock %}|{% include 'widget' %}")
            .with("widget", "{% block a %}widget-a{% endblock %}")
            .with("page", "{% extends 'base' %}{% block a %}page-a{% endblock %}"),
    );

    assert_eq!(env.render("page", &json!({})).unwrap(), "page-a|widget-a");
}

#[test]
fn test_missing_parent_is_not_found() {
    let env = environment(MemoryLoader::new().with("page", "{% extends 'nowhere' %}"));
    let err = env.render("page", &json!({})).unwrap_err();
    match err.root_cause() {
        Error::NotFound(name) => assert_eq!(name, "nowhere"),
        other => panic!("Expected not found error, got {:?}", other),
    }
}

#[test]
fn test_standalone_template_cannot_include() {
    let template = Template::compile("{% include 'partial' %}").unwrap();
    let err = template.render(&json!({})).unwrap_err();
    assert!(matches!(err.root_cause(), Error::NotFound(_)));
}

#[test]
fn test_recursive_include_hits_depth_limit() {
    let config = ViewConfig {
        max_depth: 4,
        ..ViewConfig::default()
    };
    let env = Environment::with_registry(
        MemoryLoader::new().with("loop", "x{% include 'loop' %}"),
        Arc::new(TemplateRegistry::new()),
        config,
    );

    let err = env.render("loop", &json!({})).unwrap_err();
    match err.root_cause() {
        Error::Template(message) => assert!(message.contains("maximum template nesting depth of 4")),
        other => panic!("Expected template error, got {:?}", other),
    }
}

#[test]
fn test_recursive_include_with_guard_terminates() {
    let env = environment(MemoryLoader::new().with(
        "tree",
        "{{ node.name }}{% for child in node.children %}({% set node = child %}{% include 'tree' %}{% endset %}){% endfor %}",
    ));
    let data = json!({
        "node": {"name": "a", "children": [
            {"name": "b", "children": []},
            {"name": "c", "children": [{"name": "d", "children": []}]}
        ]}
    });

    assert_eq!(env.render("tree", &data).unwrap(), "a(b)(c(d))");
}

#[test]
fn test_compile_error_names_template() {
    let env = environment(MemoryLoader::new().with("broken", "{% if x %}"));
    let err = env.render("broken", &json!({})).unwrap_err();
    assert!(err.is_compile_error());
    assert!(err.to_string().contains("broken"));
}

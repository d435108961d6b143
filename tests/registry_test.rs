use minimy_template::{
    inject_global, register_filter, register_function, Environment, Error, MemoryLoader, Template,
    TemplateRegistry, ViewConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;

#[test]
fn test_injected_global_is_shadowed_by_caller() {
    inject_global("reg_test_site", json!({"name": "Minimy"})).unwrap();
    let template = Template::compile("{{ reg_test_site.name }}").unwrap();

    assert_eq!(template.render(&json!({})).unwrap(), "Minimy");
    assert_eq!(
        template
            .render(&json!({"reg_test_site": {"name": "Local"}}))
            .unwrap(),
        "Local"
    );
}

#[test]
fn test_registered_filter_with_arguments() {
    register_filter("reg_test_wrap", |value, args| {
        let tag = args.string(0, "tag", "span");
        Ok(Value::String(format!(
            "<{tag}>{}</{tag}>",
            value.as_str().unwrap_or_default()
        )))
    })
    .unwrap();

    let template = Template::compile("{{ word | reg_test_wrap('em') }}").unwrap();
    // Custom filters are not in the safe set
    assert_eq!(
        template.render(&json!({"word": "hi"})).unwrap(),
        "&lt;em&gt;hi&lt;/em&gt;"
    );

    let template = Template::compile("{{ word | reg_test_wrap(tag='b') | safe }}").unwrap();
    assert_eq!(template.render(&json!({"word": "hi"})).unwrap(), "<b>hi</b>");
}

#[test]
fn test_failing_filter_is_named() {
    register_filter("reg_test_fail", |_, _| Err(Error::template("no thanks"))).unwrap();

    let template = Template::compile("{{ 1 | reg_test_fail }}").unwrap();
    match template.render(&json!({})) {
        Err(Error::Filter { name, message }) => {
            assert_eq!(name, "reg_test_fail");
            assert_eq!(message, "no thanks");
        }
        other => panic!("Expected filter error, got {:?}", other),
    }
}

#[test]
fn test_registered_function_in_call_and_expressions() {
    register_function("reg_test_add", |args| {
        let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
        Ok(json!(sum))
    })
    .unwrap();

    let template = Template::compile(
        "{% call reg_test_add(1, 2, 3) %}/{% if reg_test_add(n, 1) > 5 %}big{% endif %}",
    )
    .unwrap();
    assert_eq!(template.render(&json!({"n": 5})).unwrap(), "6/big");
}

#[test]
fn test_private_registry_is_isolated() {
    let registry = Arc::new(TemplateRegistry::new());
    registry.inject_global("only_here", 1).unwrap();
    registry
        .register_filter("twice", |value, _| {
            Ok(Value::String(value.to_string().repeat(2)))
        })
        .unwrap();

    let env = Environment::with_registry(MemoryLoader::new(), registry, ViewConfig::default());
    assert_eq!(env.render_str("{{ only_here | twice }}", &json!({})).unwrap(), "11");

    assert_eq!(
        Template::compile("[{{ only_here }}]")
            .unwrap()
            .render(&json!({}))
            .unwrap(),
        "[]"
    );
    assert!(!TemplateRegistry::global().filters().contains("twice"));
}

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use minimy_template::{Environment, MemoryLoader, Template, TemplateRegistry, ViewConfig};
use serde_json::json;
use std::sync::Arc;

const PAGE: &str = r#"<ul>
  {% for user in users %}
  <li class="{% if loop.first %}first{% endif %}">{{ user.name | title }} ({{ user.email | lower }})</li>
  {% empty %}
  <li>nobody</li>
  {% endfor %}
</ul>
{% set total = len(users) %}<p>{{ total }} users</p>{% endset %}"#;

fn sample_data() -> serde_json::Value {
    let users: Vec<_> = (0..50)
        .map(|i| json!({"name": format!("user number {}", i), "email": format!("USER{}@Example.com", i)}))
        .collect();
    json!({ "users": users })
}

fn benchmark_compile(c: &mut Criterion) {
    c.bench_function("compile", |b| {
        b.iter(|| {
            let template = Template::compile(black_box(PAGE)).unwrap();
            black_box(template);
        })
    });
}

fn benchmark_render(c: &mut Criterion) {
    let template = Template::compile(PAGE).unwrap();
    let data = sample_data();

    c.bench_function("render_loop", |b| {
        b.iter(|| {
            let output = template.render(black_box(&data)).unwrap();
            black_box(output);
        })
    });
}

fn benchmark_cached_inheritance(c: &mut Criterion) {
    let loader = MemoryLoader::new()
        .with("base", "<html>{% block body %}{% endblock %}</html>")
        .with("page", &format!("{{% extends 'base' %}}{{% block body %}}{}{{% endblock %}}", PAGE));
    let config = ViewConfig {
        cache_enabled: true,
        ..ViewConfig::default()
    };
    let env = Environment::with_registry(loader, Arc::new(TemplateRegistry::new()), config);
    let data = sample_data();

    c.bench_function("render_cached_extends", |b| {
        b.iter(|| {
            let output = env.render(black_box("page"), black_box(&data)).unwrap();
            black_box(output);
        })
    });
}

criterion_group!(
    benches,
    benchmark_compile,
    benchmark_render,
    benchmark_cached_inheritance
);
criterion_main!(benches);

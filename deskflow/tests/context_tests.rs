use deskflow::{MacroContext, RenderError};
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};

fn ctx(params: Value, vars: Value) -> MacroContext {
    MacroContext::new(
        params.as_object().cloned().unwrap_or_default(),
        vars.as_object().cloned().unwrap_or_default(),
    )
}

#[test]
fn test_layers_and_merged_view() {
    let mut context = ctx(json!({"b": "param"}), json!({"a": "var", "b": "var"}));
    context.set("c", json!("runtime"));
    let merged = context.variables();
    assert_eq!(merged["a"], json!("var"));
    assert_eq!(merged["b"], json!("param"));
    assert_eq!(merged["c"], json!("runtime"));
    assert_eq!(context.runtime_vars().len(), 1);
}

#[test]
fn test_render_identity_without_markers() {
    let context = MacroContext::default();
    for text in ["", "plain", "{ not a template }", "50% done"] {
        assert_eq!(context.render(text).unwrap(), text);
    }
}

#[test]
fn test_render_errors_name_their_cause() {
    let context = ctx(json!({"user": "john"}), json!({}));
    assert_eq!(context.render("Hi {{ user | upper }}").unwrap(), "Hi JOHN");

    let undefined = context.render("{{ nobody }}").unwrap_err();
    assert!(matches!(undefined, RenderError::Undefined(_)));
    assert!(undefined.to_string().starts_with("Undefined variable"));

    let syntax = context.render("{{ user + }}").unwrap_err();
    assert!(matches!(syntax, RenderError::Syntax(_)));
    assert!(syntax.to_string().starts_with("Template syntax error"));
}

#[test]
fn test_filters_and_functions() {
    let context = ctx(json!({"n": "42", "name": "  ada lovelace "}), json!({"missing": null}));
    assert_eq!(context.render("{{ name | strip | title }}").unwrap(), "Ada Lovelace");
    assert_eq!(context.render_value(&json!("{{ n | int + 1 }}")).unwrap(), json!(43));
    assert_eq!(context.render("{{ missing | default('none set') }}").unwrap(), "none set");
    assert_eq!(
        context
            .render("{{ env('DESKFLOW_TEST_SURELY_UNSET', 'fallback') }}")
            .unwrap(),
        "fallback"
    );
}

#[test]
fn test_conditions_never_fail() {
    let context = ctx(json!({"count": 3}), json!({}));
    assert!(context.evaluate_condition("count > 2"));
    assert!(context.evaluate_condition("{{ count }}"));
    assert!(!context.evaluate_condition("count > 5"));
    assert!(!context.evaluate_condition("undefined_thing"));
    assert!(!context.evaluate_condition("{{ broken syntax ("));
    assert!(!context.evaluate_condition("''"));
}

#[test]
fn test_integer_overflow_is_a_render_error_and_a_false_condition() {
    let context = MacroContext::default();
    assert!(!context.evaluate_condition("(-9223372036854775807 - 1) // -1 == 0"));
    assert!(!context.evaluate_condition("(-9223372036854775807 - 1) % -1 == 0"));
    assert_eq!(
        context.render("{{ (-9223372036854775807 - 1) // -1 }}"),
        Err(RenderError::Evaluation("integer overflow".into()))
    );
    assert_eq!(context.render("{{ 1 % 9223372036854775807 }}").unwrap(), "1");
}

#[test]
fn test_huge_range_is_refused() {
    let context = MacroContext::default();
    assert!(matches!(
        context.render("{{ range(10000000000) | length }}"),
        Err(RenderError::Evaluation(_))
    ));
    assert!(!context.evaluate_condition("range(10000000000) | length > 0"));
}

#[test]
fn test_copy_is_independent() {
    let mut original = MacroContext::new(Map::new(), Map::new());
    original.set("x", json!(1));
    let mut copy = original.clone();
    copy.set("x", json!(2));
    copy.set("y", json!(3));
    assert_eq!(original.get("x"), Some(&json!(1)));
    assert_eq!(original.get("y"), None);
}

#[cfg(unix)]
#[test]
fn test_shell_function_output_and_failures() {
    let context = MacroContext::default();
    assert_eq!(context.render("{{ shell('echo  hi  ') }}").unwrap(), "hi");
    assert_eq!(context.render("[{{ shell('exit 4') }}]").unwrap(), "[]");
    assert_eq!(
        context.render("[{{ shell('definitely-not-a-command-xyz') }}]").unwrap(),
        "[]"
    );
}

#[cfg(unix)]
#[test]
fn test_shell_function_timeout_is_swallowed() {
    let context = MacroContext::default().with_shell_timeout(Duration::from_millis(200));
    let start = Instant::now();
    assert_eq!(context.render("[{{ shell('sleep 5') }}]").unwrap(), "[]");
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_shell_function_inside_multi_thread_runtime() {
    let context = MacroContext::default();
    assert_eq!(context.render("{{ shell('echo hi') }}").unwrap(), "hi");
}

#[cfg(unix)]
#[tokio::test]
async fn test_shell_function_inside_current_thread_runtime() {
    let context = MacroContext::default();
    assert_eq!(context.render("{{ shell('echo hi') }}").unwrap(), "hi");
}

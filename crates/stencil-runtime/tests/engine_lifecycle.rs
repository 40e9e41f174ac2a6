//! End-to-end lifecycle tests: load from disk, resolve, transform, and
//! survive bad reloads.

use std::path::Path;

use serde_json::json;

use stencil_core::Document;
use stencil_packs::StrictMode;
use stencil_runtime::{Engine, EngineError, EngineSettings, EngineState};

fn write_pack(dir: &Path, name: &str, content: &serde_json::Value) {
    std::fs::write(dir.join(name), serde_json::to_string_pretty(content).expect("serialize"))
        .expect("write pack");
}

fn engine_for(dir: &Path) -> Engine {
    stencil_runtime::logging::init_subscriber("warn");
    Engine::with_seed(
        EngineSettings {
            packs_dir: dir.to_path_buf(),
            ..EngineSettings::default()
        },
        7,
    )
}

#[test]
fn not_loaded_until_first_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_pack(dir.path(), "a.json", &json!({"id": "a"}));
    let engine = engine_for(dir.path());

    assert!(matches!(
        engine.resolve_plan("chatgpt", "coding", None),
        Err(EngineError::NotLoaded)
    ));

    let diag = engine.force_reload().expect("first load");
    assert_eq!(diag.generation, 1);
    assert_eq!(diag.state, EngineState::Ready);
    assert!(engine.resolve_plan("chatgpt", "coding", None).is_ok());
}

#[test]
fn include_exclude_interaction_across_priorities() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_pack(
        dir.path(),
        "pack_a.json",
        &json!({
            "id": "pack-a",
            "priority": 10,
            "operators": {"include": ["role_hdr"]}
        }),
    );
    write_pack(
        dir.path(),
        "pack_b.json",
        &json!({
            "id": "pack-b",
            "priority": 20,
            "operators": {"exclude": ["role_hdr"], "include": ["quality_bar"]}
        }),
    );

    let engine = engine_for(dir.path());
    let _ = engine.force_reload().expect("load");

    let resolved = engine.resolve_plan("chatgpt", "coding", None).expect("plan");
    assert_eq!(resolved.packs_applied, ["pack-a", "pack-b"]);
    assert!(!resolved.plan.contains(&"role_hdr".to_string()));
    assert_eq!(
        resolved.plan.iter().filter(|op| *op == "quality_bar").count(),
        1
    );
}

#[test]
fn transform_runs_the_resolved_plan() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_pack(
        dir.path(),
        "base.json",
        &json!({"id": "base", "directives": {"style": ["terse"]}}),
    );

    let engine = engine_for(dir.path());
    let _ = engine.force_reload().expect("load");

    let doc = Document::from_goal("Summarize the appellate brief");
    let outcome = engine
        .transform("claude", "law", doc, None)
        .expect("transform");

    assert_eq!(outcome.document.packs_applied, ["base"]);
    assert!(outcome
        .document
        .sections
        .goal
        .as_deref()
        .is_some_and(|g| g.starts_with("[Role: law specialist]")));
    assert_eq!(
        outcome.document.sections.output_format.as_deref(),
        Some("Markdown")
    );
    assert!(outcome.document.meta.quality.score.is_some());
    assert!(outcome.trace.contains(&"pack:base".to_string()));
    assert!(outcome.trace.contains(&"op:quality_bar".to_string()));

    // Same plan, same input, same output.
    let again = engine
        .transform("claude", "law", Document::from_goal("Summarize the appellate brief"), None)
        .expect("transform");
    assert_eq!(outcome.document, again.document);
}

#[test]
fn request_overrides_merge_after_packs() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_pack(
        dir.path(),
        "base.json",
        &json!({"id": "base", "directives": {"max_tokens": 4000, "tone": "neutral"}}),
    );

    let engine = engine_for(dir.path());
    let _ = engine.force_reload().expect("load");

    let overrides = json!({"max_tokens": 1000, "tone": "playful"});
    let resolved = engine
        .resolve_plan("chatgpt", "coding", Some(&overrides))
        .expect("plan");
    assert_eq!(resolved.directives["max_tokens"], 1000);
    assert_eq!(resolved.directives["tone"], "playful");
}

#[test]
fn all_invalid_reload_keeps_serving_prior_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_pack(dir.path(), "a.json", &json!({"id": "a", "priority": 1}));

    let engine = engine_for(dir.path());
    let _ = engine.force_reload().expect("first load");

    std::fs::write(dir.path().join("a.json"), "{ broken json").expect("corrupt");
    let err = engine.force_reload().expect_err("rejected");
    assert!(matches!(err, EngineError::ReloadRejected { .. }));

    // Prior snapshot still serves; diagnostics reflect the rejection.
    let resolved = engine.resolve_plan("chatgpt", "coding", None).expect("plan");
    assert_eq!(resolved.packs_applied, ["a"]);
    let diag = engine.diagnostics();
    assert_eq!(diag.generation, 1);
    let last = diag.last_reload.expect("recorded");
    assert_eq!(last.outcome, "rejected");
}

#[test]
fn strict_mode_excludes_critical_category_packs_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_pack(
        dir.path(),
        "law.json",
        &json!({
            "id": "law-hot",
            "match": {"category": "law"},
            "directives": {"max_temperature": 0.9}
        }),
    );
    write_pack(
        dir.path(),
        "sci.json",
        &json!({
            "id": "sci-hot",
            "match": {"category": "science"},
            "directives": {"max_temperature": 0.9}
        }),
    );

    let engine = Engine::with_seed(
        EngineSettings {
            packs_dir: dir.path().to_path_buf(),
            strict: StrictMode::CriticalOnly,
            ..EngineSettings::default()
        },
        7,
    );
    let diag = engine.force_reload().expect("load");
    assert_eq!(diag.packs_valid, 1);

    let law = engine.resolve_plan("chatgpt", "law", None).expect("plan");
    assert!(law.packs_applied.is_empty());
    let sci = engine.resolve_plan("chatgpt", "science", None).expect("plan");
    assert_eq!(sci.packs_applied, ["sci-hot"]);
}

#[test]
fn dangling_anchor_degrades_with_warning() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_pack(
        dir.path(),
        "a.json",
        &json!({
            "id": "a",
            "operators": {
                "exclude": ["examples"],
                "insert_at": {"quality_bar": "after:examples"}
            }
        }),
    );

    let engine = engine_for(dir.path());
    let _ = engine.force_reload().expect("load");

    let resolved = engine.resolve_plan("chatgpt", "coding", None).expect("plan");
    assert_eq!(resolved.warnings.len(), 1);
    assert!(resolved.warnings[0].contains("quality_bar"));
    // The plan still serves, minus the excluded operator.
    assert!(!resolved.plan.is_empty());
    assert!(!resolved.plan.contains(&"examples".to_string()));
}

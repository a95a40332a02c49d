use std::fs;

use reverify::strategy::FieldSelectionMode;
use reverify::{ConfigError, EquivalencePolicy, OptimizerSettings};
use tempfile::TempDir;

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("absent.toml");
    let settings = OptimizerSettings::load(Some(path.clone())).expect("defaults");
    assert_eq!(settings.context, reverify::OptimizationContext::default());
    assert_eq!(settings.equivalence, EquivalencePolicy::Strict);
    assert_eq!(settings.field_selection, FieldSelectionMode::Flag);
    assert_eq!(settings.path(), Some(path.as_path()));
}

#[test]
fn file_settings_drive_the_optimizer() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("optimizer.toml");
    fs::write(
        &path,
        r#"
[context]
performance_threshold = 1.0

[context.field_sizes]
body = 4096

[verification]
equivalence = "allow_documented_pruning"

[field_selection]
mode = "prune"
keep = 3
"#,
    )
    .expect("write config");

    let settings = OptimizerSettings::load(Some(path)).expect("valid config");
    assert_eq!(settings.context.performance_threshold, 1.0);
    assert_eq!(settings.context.field_sizes.get("body"), Some(&4096));

    let names: Vec<String> = (0..12).map(|i| format!("f{i:02}")).collect();
    let outcome = settings
        .build_optimizer()
        .optimize(names, &settings.context)
        .expect("valid");
    assert_eq!(outcome.accepted_steps, vec!["field_selection".to_string()]);
    assert_eq!(outcome.optimized.len(), 3);
}

#[test]
fn persisted_settings_load_back() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("nested").join("optimizer.toml");
    let original = OptimizerSettings::from_toml_str(
        "[context]\nsupports_lazy_loading = true\n\n[field_selection]\nmode = \"prune\"\nkeep = 5\n",
    )
    .expect("valid");
    original.persist(&path).expect("persist");

    let loaded = OptimizerSettings::load(Some(path.clone())).expect("reload");
    assert_eq!(loaded.context, original.context);
    assert_eq!(loaded.field_selection, FieldSelectionMode::Prune { keep: 5 });
    assert_eq!(loaded.equivalence, original.equivalence);
}

#[test]
fn malformed_file_reports_its_path() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[context\nsupports_lazy_loading = true\n").expect("write config");
    let err = OptimizerSettings::load(Some(path.clone())).expect_err("invalid toml");
    assert_eq!(err.code(), "ConfigParse");
    match err {
        ConfigError::Parse { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }
}

use std::fs;
use std::io::Write;

use cellfield_app::{SeedSettings, SettingsError, load_config, run_steps, seed_population};
use cellfield_core::{Compartment, GridMethodRegistry, SimulationContext};
use rand::{SeedableRng, rngs::SmallRng};
use serde_json::Value;

const CONFIG: &str = r#"{
    "compartment": { "n_dim": 2, "lengths": [12.0, 12.0], "resolution": 1.0 },
    "solutes": [
        {
            "name": "glucose",
            "initial_concentration": 1.0,
            "diffusivity": 1.0,
            "boundaries": [
                { "face": { "dim": 1, "side": "max" }, "kind": "fixed_concentration", "value": 1.0 }
            ]
        }
    ],
    "parallel": { "threads": 2, "work_threshold": 4 },
    "time_step": 0.5,
    "rng_seed": 99
}"#;

#[test]
fn file_config_with_overrides_runs_and_writes_summaries() {
    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    file.write_all(CONFIG.as_bytes()).expect("write config");
    let config = load_config(Some(file.path()), &["collision.pull_range=0.2".to_owned()])
        .expect("load config");
    assert_eq!(config.collision.pull_range, 0.2);
    assert_eq!(config.time_step, 0.5);

    let mut compartment =
        Compartment::from_config(&config, &GridMethodRegistry::with_builtin()).expect("compartment");
    let mut rng = SmallRng::seed_from_u64(config.rng_seed.expect("seed"));
    let settings = SeedSettings {
        agents: 10,
        ..SeedSettings::default()
    };
    seed_population(&mut compartment, &config, &settings, &mut rng).expect("seed");
    let mut ctx = SimulationContext::from_config(&config).expect("context");
    let report = run_steps(&mut compartment, &mut ctx, 4, 2).expect("run");
    let last = report.last().expect("last step");
    assert_eq!(last.iteration, 4);
    assert!((last.time - 2.0).abs() < 1e-12);
    assert_eq!(last.agent_count, 10);

    let dir = tempfile::tempdir().expect("temp dir");
    let out = dir.path().join("summary.json");
    report.write_json(&out).expect("write summary");
    let written: Value = serde_json::from_str(&fs::read_to_string(&out).expect("read summary"))
        .expect("parse summary");
    let steps = written["steps"].as_array().expect("steps array");
    assert_eq!(steps.len(), 4);
    assert_eq!(steps[3]["solutes"][0]["name"], "glucose");
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("absent.json");
    let err = load_config(Some(&missing), &[]).expect_err("missing file");
    assert!(matches!(err, SettingsError::Io { .. }));
    assert!(err.to_string().contains("absent.json"));
}

#[test]
fn invalid_file_reports_the_json_path() {
    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "solutes": [ { "name": "glucose", "diffusivity": "fast" } ] }"#)
        .expect("write config");
    let err = load_config(Some(file.path()), &[]).expect_err("bad config");
    assert!(err.to_string().contains("solutes[0].diffusivity"), "{err}");
}

use kestrel_viz::app::{App, FrameClock};
use kestrel_viz::config::AppConfig;
use kestrel_viz::error::HostError;
use kestrel_viz::params::ParameterValue;
use kestrel_viz::session::{parameter_key, JsonFileStore, KeyValueStore};
use kestrel_viz::surface::{HeadlessSurface, Theme};
use kestrel_viz::ui::RecordingUi;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn config(session_path: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.session.path = Some(session_path.to_path_buf());
    config.plugins.default = Some("circle".to_string());
    config
}

fn app(config: AppConfig) -> (App, RecordingUi) {
    let ui = RecordingUi::new();
    let app = App::new(config, Box::new(HeadlessSurface::new()), Box::new(ui.clone()), FrameClock::fixed(1.0 / 60.0))
        .expect("app starts");
    (app, ui)
}

#[test]
fn session_survives_a_restart() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("session.json");

    let (mut first, _ui) = app(config(&path));
    assert_eq!(first.start().as_deref(), Some("circle"));
    let host = first.host_mut();
    host.activate("knot").unwrap();
    host.set_parameter("p", 5.0, None).unwrap();
    host.set_parameter("render_mode", "glass", None).unwrap();
    host.set_theme(Theme::light());
    first.shutdown();

    let store = JsonFileStore::open(&path);
    assert_eq!(store.get("session.active_plugin").as_deref(), Some("knot"));
    assert!(store.get(&parameter_key("knot", kestrel_viz::params::ParameterGroupKind::Structural, "p")).is_some());

    let (mut second, _ui) = app(config(&path));
    assert_eq!(second.start().as_deref(), Some("knot"));
    let host = second.host();
    assert_eq!(host.parameter("p"), Some(&ParameterValue::Number(5.0)));
    assert_eq!(host.parameter("render_mode"), Some(&ParameterValue::Text("glass".into())));
    assert_eq!(host.environments().theme().name, "light");
    let scene_id = host.environments().scene().scene().id();
    assert_eq!(host.runtime().compositor().current_mode(scene_id), Some("glass"));
}

#[test]
fn corrupt_session_file_falls_back_to_defaults() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("session.json");
    fs::write(&path, "{ not json").expect("write garbage");

    let (mut app, ui) = app(config(&path));
    assert_eq!(app.start().as_deref(), Some("circle"));
    assert_eq!(app.host().parameter("segments"), Some(&ParameterValue::Number(64.0)));
    assert!(ui.errors().is_empty());
}

#[test]
fn stale_stored_values_are_ignored() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("session.json");
    let mut store = JsonFileStore::open(&path);
    store.set("session.active_plugin", "circle").unwrap();
    store.set("param.circle.structural.segments", "\"many\"").unwrap();
    store.set("param.circle.structural.radius", "4.5").unwrap();
    store.set("param.circle.structural.vanished", "1").unwrap();
    store.set("param.circle.bogus.radius", "2").unwrap();

    let (mut app, _ui) = app(config(&path));
    assert_eq!(app.start().as_deref(), Some("circle"));
    assert_eq!(app.host().parameter("segments"), Some(&ParameterValue::Number(64.0)));
    assert_eq!(app.host().parameter("radius"), Some(&ParameterValue::Number(4.5)));
}

#[test]
fn disabled_plugins_are_listed_but_refuse_activation() {
    let dir = tempdir().expect("temp dir");
    let mut config = config(&dir.path().join("session.json"));
    config.plugins.disabled = vec!["circle".to_string()];
    config.plugins.default = Some("knot".to_string());

    let (mut app, ui) = app(config);
    let listing = app.host().plugins();
    assert!(listing.iter().any(|plugin| plugin.id == "circle" && !plugin.enabled));
    assert_eq!(app.start().as_deref(), Some("knot"));

    let err = app.host_mut().activate("circle").unwrap_err();
    assert!(matches!(err, HostError::PluginDisabled(_)));
    assert_eq!(app.host().active_plugin_id(), Some("knot"));
    assert_eq!(ui.errors().len(), 1);
}

#[test]
fn headless_run_stops_at_the_frame_budget() {
    let dir = tempdir().expect("temp dir");
    let (mut app, _ui) = app(config(&dir.path().join("session.json")));
    app.start();
    // The circle spins by default, so the loop never goes idle on its own.
    assert_eq!(app.run_frames(12), 12);
    app.host_mut().set_parameter("spin_speed", 0.0, None).unwrap();
    assert!(app.run_frames(12) <= 2);
    app.shutdown();
    assert!(app.host().is_shut_down());
}

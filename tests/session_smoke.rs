use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use maolan_plughost::{
    HostConfig, HostEvent, PluginMetadata, PortsOnlyHost, Presentation, Session, UridMap, Value,
};
use tokio::sync::oneshot;

const PLUGIN: &str = r#"{
    "uri": "http://example.org/plugins/synth",
    "name": "Synth X",
    "ports": [
        {"index": 0, "symbol": "control", "kind": "atom", "flow": "input"},
        {"index": 1, "symbol": "out", "kind": "audio", "flow": "output"},
        {"index": 2, "symbol": "cutoff", "name": "Cutoff", "kind": "control", "flow": "input",
         "range": {"min": 0.0, "max": 0.5, "default": 0.25},
         "properties": {"sample_rate": true, "logarithmic": true}},
        {"index": 3, "symbol": "wave", "kind": "control", "flow": "input",
         "range": {"min": 0.0, "max": 2.0, "default": 0.0},
         "properties": {"enumeration": true, "integer": true},
         "scale_points": [{"value": 1.0, "label": "Square"}, {"value": 0.0, "label": "Sine"}]},
        {"index": 4, "symbol": "peak", "kind": "control", "flow": "output"}
    ],
    "properties": [
        {"uri": "http://example.org/plugins/synth#sample", "label": "Sample",
         "ranges": ["http://lv2plug.in/ns/ext/atom#Path"], "writable": true}
    ]
}"#;

fn open(dir: &Path) -> (Session, maolan_plughost::AudioEndpoint) {
    let metadata = PluginMetadata::from_json_str(PLUGIN).unwrap();
    let config = HostConfig {
        preset_paths: vec![dir.to_path_buf()],
        ..HostConfig::default()
    };
    Session::open(
        &metadata,
        Box::new(PortsOnlyHost::new(48_000.0)),
        Arc::new(UridMap::new()),
        &config,
    )
    .unwrap()
}

#[test]
fn controls_are_described_from_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _audio) = open(dir.path());
    let controls = session.controls();
    assert_eq!(controls.len(), 4);

    let cutoff = controls.get(controls.by_symbol("cutoff").unwrap()).unwrap();
    assert_eq!(cutoff.range.max, Some(24_000.0));
    assert_eq!(cutoff.presentation, Presentation::LogarithmicSlider);

    let wave = controls.get(controls.by_symbol("wave").unwrap()).unwrap();
    assert_eq!(wave.presentation, Presentation::Enumeration);
    assert_eq!(wave.scale_points[0].label, "Sine");
    assert_eq!(wave.step(), 1.0);

    let sample = controls
        .get(controls.by_key("http://example.org/plugins/synth#sample").unwrap())
        .unwrap();
    assert_eq!(sample.presentation, Presentation::FileChooser);
    assert!(!controls.get(controls.by_symbol("peak").unwrap()).unwrap().is_writable);
}

#[test]
fn preset_bundle_layout() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _audio) = open(dir.path());
    let sample = session
        .controls()
        .by_key("http://example.org/plugins/synth#sample")
        .unwrap();
    session
        .set_control(sample, Value::String("/samples/pad.wav".to_string()))
        .unwrap();
    let preset = session.save_preset("My Lead!", Some("Leads"), None).unwrap();
    assert_eq!(
        preset.path,
        dir.path()
            .join("Synth_X_My_Lead_.preset.lv2")
            .join("My_Lead_.toml")
    );

    let text = std::fs::read_to_string(&preset.path).unwrap();
    assert!(text.contains("http://example.org/plugins/synth#sample"));
    assert!(text.contains("cutoff"));
    assert!(text.contains("bank = \"Leads\""));
}

#[tokio::test]
async fn polling_loop_forwards_audio_updates() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut audio) = open(dir.path());
    let mut events = session.subscribe();
    let (stop_tx, stop_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel();
    let poller = tokio::spawn(async move {
        session.run(stop_rx, release_rx).await;
    });

    assert!(audio.write_control(4, 0.7));
    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        HostEvent::ControlChanged { symbol, value, .. } => {
            assert_eq!(symbol, "peak");
            assert_eq!(value, Value::Float(0.7));
        }
        other => panic!("unexpected event {other:?}"),
    }

    stop_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    poller.await.unwrap();
}

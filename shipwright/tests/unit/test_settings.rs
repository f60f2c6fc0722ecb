//! Settings and storage layout tests

use shipwright::app::options::{AppOptions, ProviderOptions, RelayOptions};
use shipwright::filesys::file::File;
use shipwright::storage::layout::StorageLayout;
use shipwright::storage::settings::{ProviderKind, Settings};
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_missing_settings_file_yields_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(tmp.path());

    let settings = assert_ok!(tokio_test::block_on(Settings::load(&layout.settings_file())));
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.provider.kind, ProviderKind::CloudBuild);
}

#[test]
fn test_settings_file_drives_app_options() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{
            "log_level": "debug",
            "server": {"port": 9090},
            "ingestion": {"username": "pubsub", "password": "pw"},
            "provider": {"kind": "fake"},
            "orchestrator": {"poll_interval_secs": 2, "resume_interval_secs": 30},
            "relay": {"ingestion_url": "http://ingest.internal:9090", "password": "pw"}
        }"#,
    )
    .unwrap();

    let settings = assert_ok!(tokio_test::block_on(Settings::load(&File::new(&path))));
    let options = assert_ok!(AppOptions::from_settings(
        &settings,
        StorageLayout::new(tmp.path())
    ));
    assert_eq!(options.server.port, 9090);
    assert_eq!(options.credentials.username, "pubsub");
    assert!(matches!(options.provider, ProviderOptions::Fake));
    assert_eq!(options.orchestrator.poll_interval.as_secs(), 2);
    assert_eq!(options.resumer.interval.as_secs(), 30);

    let relay = RelayOptions::from_settings(&settings);
    assert_eq!(relay.ingestion_url, "http://ingest.internal:9090");
    assert_eq!(relay.server.port, 8081);
}

#[test]
fn test_cloud_build_without_project_is_a_config_error() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = Settings::default();
    assert_err!(AppOptions::from_settings(&settings, StorageLayout::new(tmp.path())));
}

#[test]
fn test_unreadable_settings_file_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert_err!(tokio_test::block_on(Settings::load(&File::new(&path))));
}

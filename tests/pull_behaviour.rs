//! Behavioural tests for processing a notification batch end to end against
//! in-memory collaborators.

use aws_lambda_events::event::s3::S3Event;
use rstest::{fixture, rstest};

use pullhook::test_support::{
    FakeConnector, FakeObjectStore, ScriptedRun, TEST_PRIVATE_KEY, sample_config,
};
use pullhook::{ErrorKind, PullConfig, PullOrchestrator, TriggerRecord};

const BATCH_EVENT: &str = include_str!("fixtures/s3_batch_event.json");

#[fixture]
fn records() -> Vec<TriggerRecord> {
    let event: S3Event = serde_json::from_str(BATCH_EVENT).expect("fixture should parse");
    TriggerRecord::batch(&event)
}

fn store_with_key(key_material: &str) -> FakeObjectStore {
    let store = FakeObjectStore::new();
    store.insert("b1", "deploy.pem", key_material);
    store.insert("b1", "server.pem", key_material);
    store.insert("b1", "data.csv", "id,value\n1,2\n");
    store
}

#[rstest]
#[tokio::test]
async fn notification_batch_pulls_only_data_objects(records: Vec<TriggerRecord>) {
    let connector = FakeConnector::new();
    connector.push(ScriptedRun::exits(
        0,
        "download: s3://b1/data.csv to ../tmp/data.csv\n",
    ));
    let orchestrator = PullOrchestrator::new(
        sample_config(),
        store_with_key(TEST_PRIVATE_KEY),
        connector.clone(),
    )
    .expect("valid config");

    let summary = orchestrator.process_batch(&records).await.expect("batch");

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(
        connector.commands(),
        ["sudo aws s3 sync s3://b1 /tmp --exclude=*.pem --exact-timestamps; sleep 5"]
    );
    assert_eq!(connector.close_count(), 1);
}

#[rstest]
#[tokio::test]
async fn bad_key_material_fails_the_invocation(records: Vec<TriggerRecord>) {
    let connector = FakeConnector::new();
    let orchestrator = PullOrchestrator::new(
        sample_config(),
        store_with_key("-----BEGIN NOT A KEY-----"),
        connector.clone(),
    )
    .expect("valid config");

    let error = orchestrator
        .process_batch(&records)
        .await
        .expect_err("malformed key is fatal");

    assert_eq!(error.kind(), ErrorKind::Fatal);
    assert_eq!(connector.connect_count(), 0);
}

#[rstest]
#[tokio::test]
async fn custom_settings_shape_the_command(records: Vec<TriggerRecord>) {
    let config = PullConfig {
        target_dir: String::from("/srv/incoming"),
        settle_secs: 0,
        accept_any_host_key: true,
        host_key_fingerprint: None,
        ssh_port: 2222,
        ..sample_config()
    };
    let connector = FakeConnector::new();
    connector.push(ScriptedRun::exits(0, ""));
    let orchestrator =
        PullOrchestrator::new(config, store_with_key(TEST_PRIVATE_KEY), connector.clone())
            .expect("valid config");

    orchestrator.process_batch(&records).await.expect("batch");

    assert_eq!(
        connector.commands(),
        ["sudo aws s3 sync s3://b1 /srv/incoming --exclude=*.pem --exact-timestamps; sleep 0"]
    );
    let targets = connector.targets();
    let target = targets.first().expect("one connection");
    assert_eq!(target.address(), "10.0.0.5:2222");
    assert_eq!(target.host_key_policy, pullhook::HostKeyPolicy::AcceptAny);
}

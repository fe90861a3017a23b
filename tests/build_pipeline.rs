//! End-to-end builder runs against the scripted cloud double.

use std::sync::Arc;
use std::time::Duration;

use rstest::{fixture, rstest};
use tokio_util::sync::CancellationToken;

use snapwright::cloud::types::{
    Collection, Datacenter, DatacenterId, Image, ImageId, ImageProperties, Lan, LanId, Nic,
    NicId, NicProperties, ResourceLink, ResourceMetadata, Server, ServerEntities, ServerId,
    ServerProperties, Snapshot, SnapshotId, Volume, VolumeId, VolumeProperties,
};
use snapwright::steps::{CleanupFuture, StepFuture};
use snapwright::test_support::{CloudCall, RecordingUi, ScriptedCloud, ScriptedCommunicator};
use snapwright::{
    ApiResponse, BuildContext, BuildError, Builder, BuilderConfig, ConfigError, Step,
    StepAction,
};

const LOCATION: &str = "https://api.example.test/requests/r/status";

#[fixture]
fn config() -> BuilderConfig {
    BuilderConfig {
        username: None,
        password: None,
        token: Some(String::from("token")),
        api_url: String::from("https://api.example.test/cloudapi/v6"),
        region: String::from("de/txl"),
        image: String::from("debian-11"),
        disk_type: String::from("HDD"),
        disk_size: 50,
        cores: 2,
        ram: 4096,
        snapshot_name: String::from("golden-debian"),
        ssh_public_key: Some(String::from("ssh-ed25519 AAAA builder")),
        ssh_public_key_path: None,
        ssh_password: None,
        ssh_user: String::from("root"),
        ssh_bin: String::from("ssh"),
        ssh_identity_file: None,
        ssh_port: 22,
        ssh_timeout_secs: 1,
        retries: 0,
    }
}

/// Installs a scripted communicator in place of the SSH connection.
struct FakeConnect {
    guest: ScriptedCommunicator,
}

impl Step for FakeConnect {
    fn name(&self) -> &'static str {
        "fake-connect"
    }

    fn run<'a>(&'a self, context: &'a mut BuildContext) -> StepFuture<'a> {
        Box::pin(async move {
            context.communicator = Some(Box::new(self.guest.clone()));
            StepAction::Continue
        })
    }

    fn cleanup<'a>(&'a self, context: &'a mut BuildContext) -> CleanupFuture<'a> {
        Box::pin(async move {
            context.communicator = None;
        })
    }
}

fn build_server() -> Server {
    Server {
        id: ServerId::from("srv-1"),
        properties: ServerProperties {
            name: String::from("golden-debian"),
            boot_volume: Some(ResourceLink {
                id: String::from("vol-1"),
            }),
        },
        entities: Some(ServerEntities {
            volumes: Some(Collection::of(vec![Volume {
                id: VolumeId::from("vol-1"),
                ..Volume::default()
            }])),
            nics: Some(Collection::of(vec![Nic {
                id: NicId::from("nic-1"),
                properties: NicProperties {
                    name: String::from("golden-debian"),
                    ips: vec![String::from("203.0.113.9")],
                },
            }])),
        }),
    }
}

fn catalog() -> Vec<Image> {
    vec![Image {
        id: ImageId::from("img-debian"),
        properties: ImageProperties {
            name: String::from("debian-11-genericcloud"),
            image_type: String::from("HDD"),
            location: String::from("de/txl"),
            public: true,
        },
    }]
}

fn provisioned(cloud: &ScriptedCloud) {
    cloud.push_list_images(Ok(ApiResponse::ok(catalog())));
    cloud.push_create_datacenter(Ok(ApiResponse::accepted(
        Datacenter {
            id: DatacenterId::from("dc-1"),
        },
        LOCATION,
    )));
    cloud.push_status("DONE");
    cloud.push_create_server(Ok(ApiResponse::accepted(build_server(), LOCATION)));
    cloud.push_status("DONE");
    cloud.push_create_lan(Ok(ApiResponse::accepted(
        Lan {
            id: LanId::from("1"),
        },
        LOCATION,
    )));
    cloud.push_status("DONE");
}

fn snapshotted(cloud: &ScriptedCloud) {
    cloud.push_find_server(Ok(ApiResponse::ok(build_server())));
    cloud.push_find_volume(Ok(ApiResponse::ok(Volume {
        id: VolumeId::from("vol-1"),
        properties: VolumeProperties {
            name: String::from("golden-debian"),
            licence_type: Some(String::from("LINUX")),
        },
    })));
    cloud.push_create_snapshot(Ok(ApiResponse::accepted(
        Snapshot {
            id: SnapshotId::from("snap-1"),
            metadata: ResourceMetadata {
                state: String::from("BUSY"),
            },
        },
        LOCATION,
    )));
    cloud.push_status("DONE");
    cloud.push_find_snapshot(Ok(ApiResponse::ok(Snapshot {
        id: SnapshotId::from("snap-1"),
        metadata: ResourceMetadata {
            state: String::from("AVAILABLE"),
        },
    })));
}

fn removed(cloud: &ScriptedCloud) {
    cloud.push_delete_datacenter(Ok(ApiResponse::accepted((), LOCATION)));
    cloud.push_status("DONE");
}

fn builder(config: BuilderConfig, cloud: &ScriptedCloud, ui: &RecordingUi) -> Builder {
    Builder::new(config, Arc::new(cloud.clone()), Arc::new(ui.clone()))
}

#[rstest]
#[tokio::test]
async fn successful_build_snapshots_and_tears_down(config: BuilderConfig) {
    let cloud = ScriptedCloud::new();
    provisioned(&cloud);
    cloud.push_attach_nic(Ok(ApiResponse::accepted(Nic::default(), LOCATION)));
    cloud.push_status("DONE");
    cloud.push_find_server(Ok(ApiResponse::ok(build_server())));
    snapshotted(&cloud);
    removed(&cloud);
    let ui = RecordingUi::new();
    let guest = ScriptedCommunicator::new();

    let artifact = builder(config, &cloud, &ui)
        .with_connector(Box::new(FakeConnect {
            guest: guest.clone(),
        }))
        .run(CancellationToken::new())
        .await
        .expect("build succeeds");

    assert_eq!(
        artifact.to_string(),
        "A snapshot was created: 'golden-debian' in 'de/txl'"
    );
    assert_eq!(
        artifact.exports.get("server_ip").map(String::as_str),
        Some("203.0.113.9")
    );
    assert_eq!(
        artifact.exports.get("instance_id").map(String::as_str),
        Some("srv-1")
    );
    assert_eq!(
        artifact.exports.get("datacenter_id").map(String::as_str),
        Some("dc-1")
    );
    assert_eq!(guest.commands(), vec![String::from("sync")]);
    assert!(ui.errors().is_empty(), "{:?}", ui.errors());
    assert!(ui.said("Removing Virtual Data Center..."));
    assert_eq!(
        cloud.calls().last(),
        Some(&CloudCall::RequestStatus(LOCATION.into()))
    );
    assert_eq!(
        cloud.count(|call| matches!(call, CloudCall::DeleteDatacenter(_))),
        1
    );
}

#[rstest]
#[tokio::test]
async fn halted_build_reports_provider_message_and_rolls_back(config: BuilderConfig) {
    let cloud = ScriptedCloud::new();
    provisioned(&cloud);
    cloud.push_attach_nic(Ok(ApiResponse::failure(
        422,
        r#"{"messages":[{"message":"quota exceeded"}]}"#,
    )));
    removed(&cloud);
    let ui = RecordingUi::new();

    let err = builder(config, &cloud, &ui)
        .run(CancellationToken::new())
        .await
        .expect_err("attach fails");

    let BuildError::Halted { step, message } = err else {
        panic!("expected halted build, got {err:?}");
    };
    assert_eq!(step, "create-server");
    assert!(message.contains("quota exceeded"), "{message}");
    assert!(
        cloud
            .calls()
            .contains(&CloudCall::DeleteDatacenter(DatacenterId::from("dc-1")))
    );
    assert_eq!(
        cloud.count(|call| matches!(call, CloudCall::CreateSnapshot(..))),
        0
    );
}

#[rstest]
#[tokio::test]
async fn invalid_config_fails_before_any_request(config: BuilderConfig) {
    let cloud = ScriptedCloud::new();
    let ui = RecordingUi::new();
    let invalid = BuilderConfig {
        image: String::new(),
        ..config
    };

    let err = builder(invalid, &cloud, &ui)
        .run(CancellationToken::new())
        .await
        .expect_err("image is required");

    assert!(matches!(
        err,
        BuildError::Config(ConfigError::MissingField(ref message)) if message.contains("IONOS_IMAGE")
    ));
    assert!(cloud.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn cancelled_build_creates_nothing(config: BuilderConfig) {
    let cloud = ScriptedCloud::new();
    let ui = RecordingUi::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = builder(config, &cloud, &ui)
        .run(cancel)
        .await
        .expect_err("cancelled");

    assert!(matches!(err, BuildError::Cancelled));
    assert!(cloud.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn cancellation_during_provisioning_rolls_back(config: BuilderConfig) {
    let cloud = ScriptedCloud::new();
    cloud.push_list_images(Ok(ApiResponse::ok(catalog())));
    cloud.push_create_datacenter(Ok(ApiResponse::accepted(
        Datacenter {
            id: DatacenterId::from("dc-1"),
        },
        LOCATION,
    )));
    cloud.push_status("QUEUED");
    removed(&cloud);
    let ui = RecordingUi::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = builder(config, &cloud, &ui)
        .run(cancel)
        .await
        .expect_err("cancelled mid-wait");

    assert!(matches!(err, BuildError::Cancelled), "{err:?}");
    assert_eq!(
        cloud.count(|call| matches!(call, CloudCall::DeleteDatacenter(_))),
        1
    );
    assert_eq!(
        cloud.count(|call| matches!(call, CloudCall::CreateServer(..))),
        0
    );
}

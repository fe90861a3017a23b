//! Creation of the disposable data center and the build server inside it.

use std::net::IpAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{BuildContext, CleanupFuture, Step, StepError, StepFuture, submit};
use crate::cloud::types::{
    Collection, DatacenterProperties, DatacenterRequest, LanRequest, LanRequestProperties,
    NicRequest, NicRequestProperties, ServerRequest, ServerRequestEntities,
    ServerRequestProperties, VolumeRequest, VolumeRequestProperties,
};
use crate::cloud::{ApiResponse, CloudApi, require_location};
use crate::resolve::{ImageResolver, ImageSource};
use crate::wait::{OperationWaiter, WaitError, WaitPolicy};

/// Shape of the build server and the image it boots from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerSpec {
    /// Name given to the data center, server, volume, NIC and LAN. Also the
    /// name of the resulting snapshot.
    pub name: String,
    /// Target region, for example `de/txl`.
    pub region: String,
    /// Image name or alias to boot from.
    pub image: String,
    /// Volume storage type.
    pub disk_type: String,
    /// Volume size in gigabytes.
    pub disk_size: u32,
    /// CPU core count.
    pub cores: u32,
    /// Memory in megabytes.
    pub ram: u32,
    /// Public key injected into the image.
    pub ssh_public_key: String,
    /// Initial image password, injected only when set.
    pub image_password: Option<String>,
}

impl ServerSpec {
    fn datacenter_request(&self) -> DatacenterRequest {
        DatacenterRequest {
            properties: DatacenterProperties {
                name: self.name.clone(),
                location: self.region.clone(),
            },
        }
    }

    /// Builds the server creation payload for the resolved image.
    #[must_use]
    pub fn server_request(&self, source: &ImageSource) -> ServerRequest {
        let volume = VolumeRequest {
            properties: VolumeRequestProperties {
                name: self.name.clone(),
                disk_type: self.disk_type.clone(),
                size: self.disk_size,
                image: source.image_id().cloned(),
                image_alias: source.alias().map(str::to_owned),
                ssh_keys: vec![self.ssh_public_key.clone()],
                image_password: self
                    .image_password
                    .clone()
                    .filter(|password| !password.is_empty()),
            },
        };
        let nic = NicRequest {
            properties: NicRequestProperties {
                name: self.name.clone(),
                dhcp: true,
            },
        };
        ServerRequest {
            properties: ServerRequestProperties {
                name: self.name.clone(),
                ram: self.ram,
                cores: self.cores,
            },
            entities: ServerRequestEntities {
                volumes: Collection::of(vec![volume]),
                nics: Collection::of(vec![nic]),
            },
        }
    }

    fn lan_request(&self) -> LanRequest {
        LanRequest {
            properties: LanRequestProperties {
                name: self.name.clone(),
                public: true,
            },
        }
    }
}

/// Creates the data center, server, public LAN and NIC attachment.
///
/// Cleanup deletes the whole data center, which cascades to everything
/// created inside it.
pub struct CreateServerStep {
    api: Arc<dyn CloudApi>,
    spec: ServerSpec,
    policy: WaitPolicy,
}

impl CreateServerStep {
    /// Creates the step.
    #[must_use]
    pub fn new(api: Arc<dyn CloudApi>, spec: ServerSpec, policy: WaitPolicy) -> Self {
        Self { api, spec, policy }
    }

    async fn provision(&self, context: &mut BuildContext) -> Result<(), StepError> {
        let api = self.api.as_ref();
        let spec = &self.spec;
        let cancel = context.cancel.clone();
        let waiter = OperationWaiter::new(api, &cancel);

        context.ui.say("Creating Virtual Data Center...");
        let source = ImageResolver::new(api)
            .resolve(&spec.image, &spec.disk_type, &spec.region)
            .await
            .map_err(|source| StepError::Request {
                action: "getting image",
                source,
            })?;

        let datacenter_request = spec.datacenter_request();
        let datacenter = submit(
            api.create_datacenter(&datacenter_request),
            "creating a datacenter",
        )
        .await?;
        let datacenter_id = datacenter.body.id.clone();
        context.state.datacenter_id = Some(datacenter_id.clone());
        info!(datacenter = %datacenter_id, region = %spec.region, "created datacenter");
        datacenter
            .confirm(&waiter, self.policy, "creating a datacenter")
            .await?;

        let server_request = spec.server_request(&source);
        let (server, _) = submit(
            api.create_server(&datacenter_id, &server_request),
            "creating a server",
        )
        .await?
        .confirm(&waiter, self.policy, "creating a server")
        .await?;
        info!(server = %server.id, "created server");

        let lan_request = spec.lan_request();
        let (lan, _) = submit(api.create_lan(&datacenter_id, &lan_request), "creating a LAN")
            .await?
            .confirm(&waiter, self.policy, "creating a LAN")
            .await?;

        let nic_id = server
            .first_nic()
            .map(|nic| nic.id.clone())
            .ok_or_else(|| StepError::MissingServerField {
                server: server.id.clone(),
                field: "network interface",
            })?;
        submit(
            api.attach_nic(&datacenter_id, &lan.id, &nic_id),
            "attaching a NIC",
        )
        .await?
        .confirm(&waiter, self.policy, "attaching a NIC")
        .await?;

        let volume_id = server
            .first_volume_id()
            .cloned()
            .ok_or_else(|| StepError::MissingServerField {
                server: server.id.clone(),
                field: "volume",
            })?;
        context.state.volume_id = Some(volume_id);

        let refreshed = api
            .find_server(&datacenter_id, &server.id)
            .await
            .and_then(ApiResponse::into_body)
            .map_err(|source| StepError::Request {
                action: "finding the server",
                source,
            })?;
        context.state.instance_id = Some(refreshed.id.clone());

        let raw_ip = refreshed
            .first_nic()
            .and_then(|nic| nic.properties.ips.first())
            .ok_or_else(|| StepError::MissingServerField {
                server: refreshed.id.clone(),
                field: "IP address",
            })?;
        let ip: IpAddr = raw_ip.parse().map_err(|_| StepError::InvalidIp {
            value: raw_ip.clone(),
        })?;
        context.state.server_ip = Some(ip);
        info!(server = %refreshed.id, %ip, "server ready");
        Ok(())
    }

    async fn remove_datacenter(&self, context: &mut BuildContext) {
        let Some(datacenter_id) = context.state.datacenter_id.take() else {
            return;
        };
        context.ui.say("Removing Virtual Data Center...");

        // Rollback must finish even when the run itself was cancelled.
        let cancel = CancellationToken::new();
        let waiter = OperationWaiter::new(self.api.as_ref(), &cancel);
        let result = async {
            let response = self.api.delete_datacenter(&datacenter_id).await?;
            let status = response.status;
            let ((), location) = response.into_parts()?;
            let handle = require_location(location, status)?;
            waiter.wait(handle, self.policy).await?;
            Ok::<(), WaitError>(())
        }
        .await;

        if let Err(err) = result {
            warn!(datacenter = %datacenter_id, error = %err, "datacenter removal failed");
            context.ui.error(&format!(
                "Error deleting Virtual Data Center. Please destroy it manually: {err}"
            ));
        }
    }
}

impl Step for CreateServerStep {
    fn name(&self) -> &'static str {
        "create-server"
    }

    fn run<'a>(&'a self, context: &'a mut BuildContext) -> StepFuture<'a> {
        Box::pin(async move {
            let result = self.provision(context).await;
            context.conclude(result)
        })
    }

    fn cleanup<'a>(&'a self, context: &'a mut BuildContext) -> CleanupFuture<'a> {
        Box::pin(self.remove_datacenter(context))
    }
}

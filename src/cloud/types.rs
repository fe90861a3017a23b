//! Wire models for the Cloud API v6 resources touched by the builder.
//!
//! Identifiers are wrapped in newtypes so a volume id cannot be passed where a
//! datacenter id is expected.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }
    };
}

newtype!(
    /// Identifier of a virtual data center.
    DatacenterId
);
newtype!(
    /// Identifier of a server.
    ServerId
);
newtype!(
    /// Identifier of a block storage volume.
    VolumeId
);
newtype!(
    /// Identifier of a LAN.
    LanId
);
newtype!(
    /// Identifier of a network interface.
    NicId
);
newtype!(
    /// Identifier of a snapshot.
    SnapshotId
);
newtype!(
    /// Identifier of a catalog image.
    ImageId
);
newtype!(
    /// Locator of a pending provider request, taken from the `Location`
    /// header of a mutating call. Consumed once by the operation waiter.
    OperationHandle
);

/// Generic `items` collection envelope.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Collection<T> {
    /// Collection members.
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> Collection<T> {
    /// Wraps the given items.
    #[must_use]
    pub const fn of(items: Vec<T>) -> Self {
        Self { items }
    }
}

/// Reference to another resource by id.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct ResourceLink {
    /// Referenced resource identifier.
    pub id: String,
}

/// Virtual data center returned by the provider.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Datacenter {
    /// Provider identifier.
    pub id: DatacenterId,
}

/// Payload for `POST /datacenters`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DatacenterRequest {
    /// Requested properties.
    pub properties: DatacenterProperties,
}

/// Properties of a virtual data center.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DatacenterProperties {
    /// Display name.
    pub name: String,
    /// Region, for example `de/txl`.
    pub location: String,
}

/// Server as returned by the provider.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Server {
    /// Provider identifier.
    pub id: ServerId,
    /// Server properties.
    #[serde(default)]
    pub properties: ServerProperties,
    /// Nested volumes and NICs, present when the response depth allows.
    #[serde(default)]
    pub entities: Option<ServerEntities>,
}

impl Server {
    /// Returns the identifier of the first attached volume.
    #[must_use]
    pub fn first_volume_id(&self) -> Option<&VolumeId> {
        self.entities
            .as_ref()
            .and_then(|entities| entities.volumes.as_ref())
            .and_then(|volumes| volumes.items.first())
            .map(|volume| &volume.id)
    }

    /// Returns the first network interface.
    #[must_use]
    pub fn first_nic(&self) -> Option<&Nic> {
        self.entities
            .as_ref()
            .and_then(|entities| entities.nics.as_ref())
            .and_then(|nics| nics.items.first())
    }
}

/// Server properties read back from the provider.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProperties {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Boot volume reference, when one is set.
    #[serde(default)]
    pub boot_volume: Option<ResourceLink>,
}

/// Nested server entities.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct ServerEntities {
    /// Attached volumes.
    #[serde(default)]
    pub volumes: Option<Collection<Volume>>,
    /// Network interfaces.
    #[serde(default)]
    pub nics: Option<Collection<Nic>>,
}

/// Payload for `POST /datacenters/{id}/servers`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ServerRequest {
    /// Compute properties.
    pub properties: ServerRequestProperties,
    /// Boot volume and NIC created together with the server.
    pub entities: ServerRequestEntities,
}

/// Compute sizing of a server request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ServerRequestProperties {
    /// Display name.
    pub name: String,
    /// Memory in megabytes.
    pub ram: u32,
    /// CPU core count.
    pub cores: u32,
}

/// Entities created with a server.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ServerRequestEntities {
    /// Volumes to create and attach.
    pub volumes: Collection<VolumeRequest>,
    /// NICs to create.
    pub nics: Collection<NicRequest>,
}

/// Volume as returned by the provider.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Volume {
    /// Provider identifier.
    pub id: VolumeId,
    /// Volume properties.
    #[serde(default)]
    pub properties: VolumeProperties,
}

/// Volume properties read back from the provider.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeProperties {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// OS family of the installed image (`LINUX`, `WINDOWS2019`, ...).
    #[serde(default)]
    pub licence_type: Option<String>,
}

/// Boot volume definition nested in a server request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VolumeRequest {
    /// Volume properties.
    pub properties: VolumeRequestProperties,
}

/// Properties of a boot volume to create.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRequestProperties {
    /// Display name.
    pub name: String,
    /// Storage type (`HDD`, `SSD`, ...).
    #[serde(rename = "type")]
    pub disk_type: String,
    /// Size in gigabytes.
    pub size: u32,
    /// Concrete catalog image id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageId>,
    /// Image alias such as `ubuntu:latest`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_alias: Option<String>,
    /// Public keys injected into the image.
    pub ssh_keys: Vec<String>,
    /// Initial root password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_password: Option<String>,
}

/// Network interface as returned by the provider.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Nic {
    /// Provider identifier.
    pub id: NicId,
    /// Interface properties.
    #[serde(default)]
    pub properties: NicProperties,
}

/// Network interface properties read back from the provider.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct NicProperties {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Addresses assigned to the interface.
    #[serde(default)]
    pub ips: Vec<String>,
}

/// NIC definition nested in a server request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct NicRequest {
    /// Interface properties.
    pub properties: NicRequestProperties,
}

/// Properties of a NIC to create.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct NicRequestProperties {
    /// Display name.
    pub name: String,
    /// Whether the interface obtains its address via DHCP.
    pub dhcp: bool,
}

/// LAN as returned by the provider.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Lan {
    /// Provider identifier.
    pub id: LanId,
}

/// Payload for `POST /datacenters/{id}/lans`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LanRequest {
    /// LAN properties.
    pub properties: LanRequestProperties,
}

/// Properties of a LAN to create.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LanRequestProperties {
    /// Display name.
    pub name: String,
    /// Whether the LAN is connected to the internet.
    pub public: bool,
}

/// Snapshot as returned by the provider.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Snapshot {
    /// Provider identifier.
    pub id: SnapshotId,
    /// Lifecycle metadata.
    #[serde(default)]
    pub metadata: ResourceMetadata,
}

/// Lifecycle metadata shared by provider resources.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct ResourceMetadata {
    /// Resource state, for example `BUSY` or `AVAILABLE`.
    #[serde(default)]
    pub state: String,
}

/// Form parameters for `POST .../volumes/{id}/create-snapshot`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SnapshotRequest {
    /// Snapshot name.
    pub name: String,
}

/// Catalog image.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Image {
    /// Provider identifier.
    pub id: ImageId,
    /// Image properties.
    #[serde(default)]
    pub properties: ImageProperties,
}

/// Catalog image properties.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageProperties {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Image type (`HDD` or `CDROM`).
    #[serde(default)]
    pub image_type: String,
    /// Region the image lives in.
    #[serde(default)]
    pub location: String,
    /// Whether the image is publicly visible.
    #[serde(default)]
    pub public: bool,
}

/// Region record.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Location {
    /// Region identifier, for example `de/txl`.
    pub id: String,
    /// Location properties.
    #[serde(default)]
    pub properties: LocationProperties,
}

/// Region properties.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationProperties {
    /// Image aliases available in the region.
    #[serde(default)]
    pub image_aliases: Vec<String>,
}

/// Status record of a pending provider request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct RequestStatus {
    /// Status metadata.
    #[serde(default)]
    pub metadata: RequestStatusMetadata,
}

/// Status metadata of a provider request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct RequestStatusMetadata {
    /// `QUEUED`, `RUNNING`, `DONE` or `FAILED`.
    #[serde(default)]
    pub status: String,
    /// Provider-supplied detail, set on failure.
    #[serde(default)]
    pub message: Option<String>,
}

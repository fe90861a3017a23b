//! Boundary to the provider's resource-management API.
//!
//! Steps talk to the provider through [`CloudApi`] so tests can substitute a
//! scripted double. Each call resolves to an [`ApiResponse`] carrying the HTTP
//! status, the raw message on failure, and the request location on mutating
//! calls; only transport and decoding failures surface as `Err`.

mod error;
mod http;
pub mod types;

use std::future::Future;
use std::pin::Pin;

pub use error::{CloudError, RestError, RestMessage, api_message};
pub use http::{Credentials, DEFAULT_API_URL, HttpCloudApi};
use types::{
    Datacenter, DatacenterId, DatacenterRequest, Image, Lan, LanId, LanRequest, Location, Nic,
    NicId, OperationHandle, RequestStatus, Server, ServerId, ServerRequest, Snapshot, SnapshotId,
    SnapshotRequest, Volume, VolumeId,
};

/// Future returned by [`CloudApi`] calls.
pub type CloudFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<ApiResponse<T>, CloudError>> + Send + 'a>>;

/// Provider answer to a single API call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiResponse<T> {
    /// HTTP status code.
    pub status: u16,
    /// Raw response message. Empty on success; on failure it may hold the
    /// provider's JSON error envelope.
    pub message: String,
    /// Request locator from the `Location` header.
    pub location: Option<OperationHandle>,
    /// Decoded body, present on success.
    pub body: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Successful `200 OK` response.
    #[must_use]
    pub const fn ok(body: T) -> Self {
        Self {
            status: 200,
            message: String::new(),
            location: None,
            body: Some(body),
        }
    }

    /// Successful `202 Accepted` response with a request location.
    #[must_use]
    pub fn accepted(body: T, location: impl Into<OperationHandle>) -> Self {
        Self {
            status: 202,
            message: String::new(),
            location: Some(location.into()),
            body: Some(body),
        }
    }

    /// Non-success response carrying the raw provider message.
    #[must_use]
    pub fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            location: None,
            body: None,
        }
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status <= 299
    }

    /// Splits a successful response into its body and request location.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Api`] for non-success statuses and
    /// [`CloudError::MissingBody`] when a success carries no body.
    pub fn into_parts(self) -> Result<(T, Option<OperationHandle>), CloudError> {
        if !self.is_success() {
            return Err(CloudError::from_response(self.status, &self.message));
        }
        let status = self.status;
        let body = self.body.ok_or(CloudError::MissingBody { status })?;
        Ok((body, self.location))
    }

    /// Returns the body of a successful response.
    ///
    /// # Errors
    ///
    /// See [`ApiResponse::into_parts`].
    pub fn into_body(self) -> Result<T, CloudError> {
        self.into_parts().map(|(body, _)| body)
    }

    /// Maps the decoded body, keeping status and location.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            status: self.status,
            message: self.message,
            location: self.location,
            body: self.body.map(f),
        }
    }
}

/// Requires the request location of a mutating call.
///
/// # Errors
///
/// Returns [`CloudError::MissingLocation`] when the header was absent.
pub fn require_location(
    location: Option<OperationHandle>,
    status: u16,
) -> Result<OperationHandle, CloudError> {
    location.ok_or(CloudError::MissingLocation { status })
}

/// Operations the builder needs from the provider.
pub trait CloudApi: Send + Sync {
    /// Creates a virtual data center.
    fn create_datacenter<'a>(&'a self, request: &'a DatacenterRequest)
    -> CloudFuture<'a, Datacenter>;

    /// Deletes a virtual data center together with everything inside it.
    fn delete_datacenter<'a>(&'a self, datacenter: &'a DatacenterId) -> CloudFuture<'a, ()>;

    /// Creates a server with its boot volume and NIC.
    fn create_server<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        request: &'a ServerRequest,
    ) -> CloudFuture<'a, Server>;

    /// Fetches a server including its volumes and NICs.
    fn find_server<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        server: &'a ServerId,
    ) -> CloudFuture<'a, Server>;

    /// Creates a LAN.
    fn create_lan<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        request: &'a LanRequest,
    ) -> CloudFuture<'a, Lan>;

    /// Attaches an existing NIC to a LAN.
    fn attach_nic<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        lan: &'a LanId,
        nic: &'a NicId,
    ) -> CloudFuture<'a, Nic>;

    /// Fetches a volume.
    fn find_volume<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        volume: &'a VolumeId,
    ) -> CloudFuture<'a, Volume>;

    /// Starts a snapshot of a volume.
    fn create_snapshot<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        volume: &'a VolumeId,
        request: &'a SnapshotRequest,
    ) -> CloudFuture<'a, Snapshot>;

    /// Fetches a snapshot.
    fn find_snapshot<'a>(&'a self, snapshot: &'a SnapshotId) -> CloudFuture<'a, Snapshot>;

    /// Fetches the status of a pending request.
    fn request_status<'a>(&'a self, handle: &'a OperationHandle) -> CloudFuture<'a, RequestStatus>;

    /// Lists the image catalog.
    fn list_images(&self) -> CloudFuture<'_, Vec<Image>>;

    /// Fetches the record of a region such as `de/txl`.
    fn find_location<'a>(&'a self, region: &'a str) -> CloudFuture<'a, Location>;
}

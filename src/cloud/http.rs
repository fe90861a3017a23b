//! `reqwest` implementation of [`CloudApi`] against Cloud API v6.

use std::time::Duration;

use reqwest::header::LOCATION;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::types::{
    Collection, Datacenter, DatacenterId, DatacenterRequest, Image, Lan, LanId, LanRequest,
    Location, Nic, NicId, OperationHandle, RequestStatus, Server, ServerId,
    ServerRequest, Snapshot, SnapshotId, SnapshotRequest, Volume, VolumeId,
};
use super::{ApiResponse, CloudApi, CloudError, CloudFuture};

/// Default Cloud API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.ionos.com/cloudapi/v6";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SERVER_DEPTH: &str = "3";

/// Authentication material for the Cloud API.
#[derive(Clone, Eq, PartialEq)]
pub enum Credentials {
    /// Bearer token.
    Token(String),
    /// Basic authentication.
    Basic {
        /// Account user name.
        username: String,
        /// Account password.
        password: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => formatter.write_str("Credentials::Token(..)"),
            Self::Basic { username, .. } => formatter
                .debug_struct("Credentials::Basic")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Cloud API client backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpCloudApi {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

#[derive(Serialize)]
struct AttachNicRequest<'a> {
    id: &'a str,
}

impl HttpCloudApi {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Transport`] when the HTTP client cannot be built.
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| CloudError::Transport {
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Resolves a request locator, which the provider returns as an absolute
    /// URL, against the configured endpoint.
    fn handle_url(&self, handle: &OperationHandle) -> String {
        if handle.starts_with("http://") || handle.starts_with("https://") {
            handle.as_str().to_owned()
        } else {
            self.url(handle.as_str())
        }
    }

    fn authorise(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::Token(token) => builder.bearer_auth(token),
            Credentials::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
        }
    }

    async fn execute(
        &self,
        builder: RequestBuilder,
    ) -> Result<(u16, Option<OperationHandle>, Vec<u8>), CloudError> {
        let response = self
            .authorise(builder)
            .send()
            .await
            .map_err(|err| CloudError::Transport {
                message: err.to_string(),
            })?;
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(OperationHandle::from);
        let body = response
            .bytes()
            .await
            .map_err(|err| CloudError::Transport {
                message: err.to_string(),
            })?;
        debug!(status, location = ?location, "cloud api response");
        Ok((status, location, body.to_vec()))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        resource: &str,
        builder: RequestBuilder,
    ) -> Result<ApiResponse<T>, CloudError> {
        let (status, location, body) = self.execute(builder).await?;
        if !(200..=299).contains(&status) {
            return Ok(ApiResponse::failure(
                status,
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }
        let decoded = serde_json::from_slice(&body).map_err(|err| CloudError::Decode {
            resource: resource.to_owned(),
            message: err.to_string(),
        })?;
        Ok(ApiResponse {
            status,
            message: String::new(),
            location,
            body: Some(decoded),
        })
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<ApiResponse<()>, CloudError> {
        let (status, location, body) = self.execute(builder).await?;
        if !(200..=299).contains(&status) {
            return Ok(ApiResponse::failure(
                status,
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }
        Ok(ApiResponse {
            status,
            message: String::new(),
            location,
            body: Some(()),
        })
    }
}

impl CloudApi for HttpCloudApi {
    fn create_datacenter<'a>(
        &'a self,
        request: &'a DatacenterRequest,
    ) -> CloudFuture<'a, Datacenter> {
        Box::pin(async move {
            let builder = self.client.post(self.url("/datacenters")).json(request);
            self.send("datacenter", builder).await
        })
    }

    fn delete_datacenter<'a>(&'a self, datacenter: &'a DatacenterId) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let builder = self
                .client
                .delete(self.url(&format!("/datacenters/{datacenter}")));
            self.send_empty(builder).await
        })
    }

    fn create_server<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        request: &'a ServerRequest,
    ) -> CloudFuture<'a, Server> {
        Box::pin(async move {
            let builder = self
                .client
                .post(self.url(&format!("/datacenters/{datacenter}/servers")))
                .query(&[("depth", SERVER_DEPTH)])
                .json(request);
            self.send("server", builder).await
        })
    }

    fn find_server<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        server: &'a ServerId,
    ) -> CloudFuture<'a, Server> {
        Box::pin(async move {
            let builder = self
                .client
                .get(self.url(&format!("/datacenters/{datacenter}/servers/{server}")))
                .query(&[("depth", SERVER_DEPTH)]);
            self.send("server", builder).await
        })
    }

    fn create_lan<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        request: &'a LanRequest,
    ) -> CloudFuture<'a, Lan> {
        Box::pin(async move {
            let builder = self
                .client
                .post(self.url(&format!("/datacenters/{datacenter}/lans")))
                .json(request);
            self.send("lan", builder).await
        })
    }

    fn attach_nic<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        lan: &'a LanId,
        nic: &'a NicId,
    ) -> CloudFuture<'a, Nic> {
        Box::pin(async move {
            let builder = self
                .client
                .post(self.url(&format!("/datacenters/{datacenter}/lans/{lan}/nics")))
                .json(&AttachNicRequest { id: nic.as_str() });
            self.send("nic", builder).await
        })
    }

    fn find_volume<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        volume: &'a VolumeId,
    ) -> CloudFuture<'a, Volume> {
        Box::pin(async move {
            let builder = self
                .client
                .get(self.url(&format!("/datacenters/{datacenter}/volumes/{volume}")));
            self.send("volume", builder).await
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        volume: &'a VolumeId,
        request: &'a SnapshotRequest,
    ) -> CloudFuture<'a, Snapshot> {
        Box::pin(async move {
            let builder = self
                .client
                .post(self.url(&format!(
                    "/datacenters/{datacenter}/volumes/{volume}/create-snapshot"
                )))
                .form(request);
            self.send("snapshot", builder).await
        })
    }

    fn find_snapshot<'a>(&'a self, snapshot: &'a SnapshotId) -> CloudFuture<'a, Snapshot> {
        Box::pin(async move {
            let builder = self.client.get(self.url(&format!("/snapshots/{snapshot}")));
            self.send("snapshot", builder).await
        })
    }

    fn request_status<'a>(
        &'a self,
        handle: &'a OperationHandle,
    ) -> CloudFuture<'a, RequestStatus> {
        Box::pin(async move {
            let builder = self.client.get(self.handle_url(handle));
            self.send("request status", builder).await
        })
    }

    fn list_images(&self) -> CloudFuture<'_, Vec<Image>> {
        Box::pin(async move {
            let builder = self
                .client
                .get(self.url("/images"))
                .query(&[("depth", "1")]);
            let response: ApiResponse<Collection<Image>> = self.send("images", builder).await?;
            Ok(response.map(|collection| collection.items))
        })
    }

    fn find_location<'a>(&'a self, region: &'a str) -> CloudFuture<'a, Location> {
        Box::pin(async move {
            let builder = self
                .client
                .get(self.url(&format!("/locations/{region}")))
                .query(&[("depth", "1")]);
            self.send("location", builder).await
        })
    }
}

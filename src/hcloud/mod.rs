//! Hetzner Cloud implementation of [`CloudStorageClient`].
//!
//! Volume creation, attachment and detachment return action identifiers that
//! the controller polls through `GET /actions/{id}`. Deleting a volume is
//! synchronous on the Hetzner side.

mod error;
mod types;

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::{ConfigError, DriverConfig};
use crate::provider::{
    CloudStorageClient, CreateVolumeSpec, OperationHandle, OperationStatus, ProviderError,
    ProviderFuture, ProviderVolume, VolumeCreation,
};

use self::error::{Target, decode, from_response, transport};
use self::types::{
    ActionResponse, AttachVolumeBody, CreateVolumeBody, CreateVolumeResponse, VolumeListResponse,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 50;

/// REST client for the Hetzner Cloud volumes API.
#[derive(Clone, Debug)]
pub struct HcloudClient {
    http: Client,
    endpoint: String,
    token: String,
}

impl HcloudClient {
    /// Builds a client for `endpoint` authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unavailable`] when the HTTP client cannot be
    /// constructed.
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("hcsi/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| transport(&err))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        })
    }

    /// Builds a client from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no token is configured and
    /// [`ConfigError::Invalid`] when the HTTP client cannot be built.
    pub fn from_config(config: &DriverConfig) -> Result<Self, ConfigError> {
        let token = config.api_token()?;
        Self::new(config.api_endpoint.as_str(), token)
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{path}", self.endpoint))
            .bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        target: Target<'_>,
    ) -> Result<T, ProviderError> {
        let body = self.send_raw(request, target).await?;
        serde_json::from_slice(&body).map_err(|err| decode(&err))
    }

    async fn send_raw(
        &self,
        request: RequestBuilder,
        target: Target<'_>,
    ) -> Result<Vec<u8>, ProviderError> {
        let response = request.send().await.map_err(|err| transport(&err))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|err| transport(&err))?;
        if status.is_success() {
            Ok(body.to_vec())
        } else {
            Err(from_response(status, &body, target))
        }
    }
}

fn numeric_id(resource: &str, id: &str) -> Result<u64, ProviderError> {
    id.parse().map_err(|_| ProviderError::NotFound {
        resource: resource.to_owned(),
        id: id.to_owned(),
    })
}

impl CloudStorageClient for HcloudClient {
    fn create_volume<'a>(&'a self, spec: &'a CreateVolumeSpec) -> ProviderFuture<'a, VolumeCreation> {
        Box::pin(async move {
            let body = CreateVolumeBody {
                name: &spec.name,
                size: spec.size_gb,
                location: &spec.location,
            };
            let response: CreateVolumeResponse = self
                .send(
                    self.request(Method::POST, "volumes").json(&body),
                    Target::new("volume", &spec.name),
                )
                .await?;
            debug!(volume_id = response.volume.id, name = %spec.name, "volume create accepted");
            Ok(VolumeCreation {
                operation: response.action.as_ref().map(types::ApiAction::handle),
                volume: ProviderVolume::from(response.volume),
            })
        })
    }

    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, Option<OperationHandle>> {
        Box::pin(async move {
            let id = numeric_id("volume", volume_id)?;
            self.send_raw(
                self.request(Method::DELETE, &format!("volumes/{id}")),
                Target::new("volume", volume_id),
            )
            .await?;
            Ok(None)
        })
    }

    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        server_id: &'a str,
    ) -> ProviderFuture<'a, OperationHandle> {
        Box::pin(async move {
            let id = numeric_id("volume", volume_id)?;
            let body = AttachVolumeBody {
                server: numeric_id("server", server_id)?,
                automount: false,
            };
            let response: ActionResponse = self
                .send(
                    self.request(Method::POST, &format!("volumes/{id}/actions/attach"))
                        .json(&body),
                    Target::new("volume", volume_id),
                )
                .await?;
            Ok(response.action.handle())
        })
    }

    fn detach_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, OperationHandle> {
        Box::pin(async move {
            let id = numeric_id("volume", volume_id)?;
            let response: ActionResponse = self
                .send(
                    self.request(Method::POST, &format!("volumes/{id}/actions/detach")),
                    Target::new("volume", volume_id),
                )
                .await?;
            Ok(response.action.handle())
        })
    }

    fn get_operation<'a>(
        &'a self,
        handle: &'a OperationHandle,
    ) -> ProviderFuture<'a, OperationStatus> {
        Box::pin(async move {
            let id = numeric_id("action", &handle.id)?;
            let response: ActionResponse = self
                .send(
                    self.request(Method::GET, &format!("actions/{id}")),
                    Target::new("action", &handle.id),
                )
                .await?;
            Ok(response.action.operation_status())
        })
    }

    fn list_volumes(&self) -> ProviderFuture<'_, Vec<ProviderVolume>> {
        Box::pin(async move {
            let mut volumes = Vec::new();
            let mut page = Some(1_u32);
            while let Some(current) = page {
                let response: VolumeListResponse = self
                    .send(
                        self.request(Method::GET, "volumes").query(&[
                            ("page", current.to_string()),
                            ("per_page", PAGE_SIZE.to_string()),
                        ]),
                        Target::new("volumes", "list"),
                    )
                    .await?;
                volumes.extend(response.volumes.into_iter().map(ProviderVolume::from));
                page = response.meta.pagination.next_page;
            }
            Ok(volumes)
        })
    }
}

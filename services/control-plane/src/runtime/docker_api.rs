//! Docker Engine API transport.
//!
//! Talks HTTP/1.1 to the daemon's unix socket.
//!
//! Reference: https://docs.docker.com/engine/api/

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use hyper::{body::Bytes, Body, Client, Method, Request, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::Deserialize;
use tenantry_reconcile::UnitObservation;
use tracing::{debug, error, info};

use super::docker::{self, ContainerInspect, ContainerSummary};
use super::{RuntimeTransport, TransportError, UnitHandle, UnitSpec};

/// Docker Engine API client for unix socket communication.
pub struct DockerApiTransport {
    socket_path: String,
    client: Client<UnixConnector>,
}

impl DockerApiTransport {
    /// Create a new client for the given socket path.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        let socket_path = socket_path.as_ref().to_string_lossy().to_string();
        let client = Client::unix();
        Self {
            socket_path,
            client,
        }
    }

    /// Check if the socket exists.
    pub fn socket_exists(&self) -> bool {
        Path::new(&self.socket_path).exists()
    }

    /// Perform a request and collect the response body.
    async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), TransportError> {
        if !self.socket_exists() {
            return Err(TransportError::Connect(format!(
                "socket not found: {}",
                self.socket_path
            )));
        }

        let uri = Uri::new(&self.socket_path, path_and_query);
        debug!(method = %method, path = path_and_query, "Docker API request");

        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Accept", "application/json");
        let request = match body {
            Some(bytes) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(bytes)),
            None => builder.body(Body::empty()),
        }
        .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let response = self.client.request(request).await.map_err(map_hyper_error)?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(map_hyper_error)?;

        Ok((status, bytes))
    }

    /// `POST /containers/create`. `None` means the image is missing: the
    /// daemon answers 404 on create only for that.
    async fn try_create(&self, spec: &UnitSpec) -> Result<Option<UnitHandle>, TransportError> {
        #[derive(Deserialize)]
        struct Created {
            #[serde(rename = "Id")]
            id: String,
        }

        let path = format!("/containers/create?name={}", encode(&spec.name));
        let body = serde_json::to_vec(&docker::create_body(spec))
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        let (status, body) = self.request(Method::POST, &path, Some(body)).await?;

        match status {
            StatusCode::CREATED | StatusCode::OK => {
                let created: Created = serde_json::from_slice(&body)
                    .map_err(|e| TransportError::Protocol(format!("container create: {e}")))?;
                Ok(Some(UnitHandle {
                    unit_id: docker::short_id(&created.id),
                    unit_name: spec.name.clone(),
                }))
            }
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::CONFLICT => Err(TransportError::Conflict(spec.name.clone())),
            _ => Err(unexpected(status, &body)),
        }
    }

    /// `POST /images/create`, draining the progress stream.
    async fn pull_image(&self, image: &str) -> Result<(), TransportError> {
        let (from_image, tag) = docker::split_image_ref(image);
        let mut path = format!("/images/create?fromImage={}", encode(from_image));
        if let Some(tag) = tag {
            path.push_str("&tag=");
            path.push_str(&encode(tag));
        }

        let (status, body) = self.request(Method::POST, &path, None).await?;
        if !status.is_success() {
            return Err(unexpected(status, &body));
        }
        if let Some(message) = docker::pull_error(&body) {
            error!(image, message = %message, "Image pull failed");
            return Err(TransportError::Rejected {
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                message,
            });
        }

        info!(image, "Image pulled");
        Ok(())
    }
}

#[async_trait]
impl RuntimeTransport for DockerApiTransport {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let (status, body) = self.request(Method::GET, "/_ping", None).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(unexpected(status, &body))
        }
    }

    async fn list_units(&self, name_filter: &str) -> Result<Vec<UnitObservation>, TransportError> {
        let filters = serde_json::json!({ "name": [name_filter] }).to_string();
        let path = format!("/containers/json?all=true&filters={}", encode(&filters));

        let (status, body) = self.request(Method::GET, &path, None).await?;
        if !status.is_success() {
            return Err(unexpected(status, &body));
        }

        let summaries: Vec<ContainerSummary> = serde_json::from_slice(&body)
            .map_err(|e| TransportError::Protocol(format!("container list: {e}")))?;

        Ok(summaries
            .into_iter()
            .filter_map(ContainerSummary::into_observation)
            .collect())
    }

    async fn get_unit(&self, name: &str) -> Result<UnitObservation, TransportError> {
        let path = format!("/containers/{}/json", encode(name));
        let (status, body) = self.request(Method::GET, &path, None).await?;

        match status {
            StatusCode::OK => {
                let inspect: ContainerInspect = serde_json::from_slice(&body)
                    .map_err(|e| TransportError::Protocol(format!("container inspect: {e}")))?;
                Ok(inspect.into_observation(name))
            }
            StatusCode::NOT_FOUND => Err(TransportError::NotFound(name.to_string())),
            _ => Err(unexpected(status, &body)),
        }
    }

    /// Create the container, pulling its image once if the daemon does not
    /// have it.
    async fn create_unit(&self, spec: &UnitSpec) -> Result<UnitHandle, TransportError> {
        if let Some(handle) = self.try_create(spec).await? {
            return Ok(handle);
        }

        info!(unit_name = %spec.name, image = %spec.image, "Image not present, pulling");
        self.pull_image(&spec.image).await?;

        self.try_create(spec)
            .await?
            .ok_or_else(|| TransportError::Rejected {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!("image {} still missing after pull", spec.image),
            })
    }

    async fn start_unit(&self, name: &str) -> Result<(), TransportError> {
        let path = format!("/containers/{}/start", encode(name));
        let (status, body) = self.request(Method::POST, &path, None).await?;

        match status {
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => Ok(()),
            StatusCode::NOT_FOUND => Err(TransportError::NotFound(name.to_string())),
            _ => Err(unexpected(status, &body)),
        }
    }

    async fn stop_unit(&self, name: &str, grace: Duration) -> Result<(), TransportError> {
        let path = format!("/containers/{}/stop?t={}", encode(name), grace.as_secs());
        let (status, body) = self.request(Method::POST, &path, None).await?;

        match status {
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => Ok(()),
            StatusCode::NOT_FOUND => Err(TransportError::NotFound(name.to_string())),
            _ => Err(unexpected(status, &body)),
        }
    }

    async fn remove_unit(&self, name: &str, force: bool) -> Result<(), TransportError> {
        let path = format!("/containers/{}?force={}", encode(name), force);
        let (status, body) = self.request(Method::DELETE, &path, None).await?;

        match status {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(TransportError::NotFound(name.to_string())),
            _ => Err(unexpected(status, &body)),
        }
    }
}

fn map_hyper_error(err: hyper::Error) -> TransportError {
    if err.is_connect() || err.is_closed() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Protocol(err.to_string())
    }
}

/// Build an error from a non-success response. Docker error bodies are
/// `{"message": "..."}`.
fn unexpected(status: StatusCode, body: &[u8]) -> TransportError {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    let message = serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());

    if status.is_server_error() {
        error!(status = %status, message = %message, "Docker API error");
    }

    TransportError::Rejected {
        status: status.as_u16(),
        message,
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

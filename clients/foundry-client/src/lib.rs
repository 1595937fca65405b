// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client to the agent-facing endpoints of the Foundry service.
//!
//! The agent uses four endpoints: host registration, instruction retrieval,
//! step replies, and log upload. Every request carries the pull secret in an
//! `X-Secret-Key` header.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use foundry_common::api::{
    RegisterRequest, RegisterResponse, StepReply, StepsEnvelope,
};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::multipart;
use slog::{debug, o, Logger};
use uuid::Uuid;

pub use reqwest::StatusCode;

/// A wedged connection must not stall the instruction loop indefinitely, so
/// every request gets an overall deadline. Log uploads are the largest
/// transfer and fit comfortably.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid service URL {url}: {err}")]
    BaseUrl {
        url: String,
        #[source]
        err: url::ParseError,
    },

    #[error("pull secret is not usable as a header value")]
    SecretToken,

    #[error("could not read CA certificate {path}: {err}")]
    ReadCertificate {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("could not parse CA certificate {path}: {err}")]
    ParseCertificate {
        path: Utf8PathBuf,
        #[source]
        err: reqwest::Error,
    },

    #[error("could not build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("{method} {url} failed: {err}")]
    Request {
        method: &'static str,
        url: String,
        #[source]
        err: reqwest::Error,
    },

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("could not deserialize response from {url}: {err}")]
    Deserialize {
        url: String,
        #[source]
        err: reqwest::Error,
    },

    #[error("could not read log archive {path}: {err}")]
    ReadArchive {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
}

impl ClientError {
    /// The HTTP status of the response, when the service produced one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the service has made a final decision about this host and
    /// repeating the request cannot change the outcome.
    pub fn is_authoritative_rejection(&self) -> bool {
        matches!(
            self.status(),
            Some(
                StatusCode::UNAUTHORIZED
                    | StatusCode::FORBIDDEN
                    | StatusCode::NOT_FOUND
                    | StatusCode::CONFLICT
            )
        )
    }
}

/// Settings needed to construct a [`Client`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the service, including any path prefix.
    pub url: String,
    pub infra_env_id: Uuid,
    pub pull_secret_token: String,
    pub agent_version: String,
    /// Additional CA certificate bundle (PEM) to trust.
    pub cacert: Option<Utf8PathBuf>,
    /// Skip TLS certificate verification.
    pub insecure: bool,
}

/// A client bound to one host within one infra-env.
#[derive(Debug)]
pub struct Client {
    log: Logger,
    base_url: String,
    infra_env_id: Uuid,
    host_id: Uuid,
    agent_version: String,
    client: reqwest::Client,
}

impl Client {
    pub fn new(
        config: &ClientConfig,
        host_id: Uuid,
        log: &Logger,
    ) -> Result<Client, ClientError> {
        let base = url::Url::parse(&config.url).map_err(|err| {
            ClientError::BaseUrl { url: config.url.clone(), err }
        })?;
        let base_url = base.as_str().trim_end_matches('/').to_string();

        let mut secret = HeaderValue::from_str(&config.pull_secret_token)
            .map_err(|_| ClientError::SecretToken)?;
        secret.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert("X-Secret-Key", secret);

        let mut builder = reqwest::Client::builder()
            .user_agent(format!("foundry-agent/{}", config.agent_version))
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);
        if let Some(path) = &config.cacert {
            let pem = std::fs::read(path).map_err(|err| {
                ClientError::ReadCertificate { path: path.clone(), err }
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem)
                .map_err(|err| ClientError::ParseCertificate {
                    path: path.clone(),
                    err,
                })?;
            builder = builder.add_root_certificate(certificate);
        }
        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(ClientError::Build)?;

        let log = log.new(o!(
            "component" => "foundry-client",
            "host_id" => host_id.to_string(),
        ));
        Ok(Client {
            log,
            base_url,
            infra_env_id: config.infra_env_id,
            host_id,
            agent_version: config.agent_version.clone(),
            client,
        })
    }

    pub fn host_id(&self) -> Uuid {
        self.host_id
    }

    fn instructions_url(&self) -> String {
        format!(
            "{}/infra-envs/{}/hosts/{}/instructions",
            self.base_url, self.infra_env_id, self.host_id
        )
    }

    /// Announce this host to the service.
    pub async fn register(&self) -> Result<RegisterResponse, ClientError> {
        let url =
            format!("{}/infra-envs/{}/hosts", self.base_url, self.infra_env_id);
        let request = RegisterRequest {
            host_id: self.host_id,
            discovery_agent_version: self.agent_version.clone(),
        };
        debug!(self.log, "registering host"; "url" => &url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|err| ClientError::Request {
                method: "POST",
                url: url.clone(),
                err,
            })?;
        let response = check_status("POST", &url, response).await?;
        response
            .json()
            .await
            .map_err(|err| ClientError::Deserialize { url, err })
    }

    /// Fetch the next batch of instructions. `ts` is the agent's current
    /// time in seconds since the epoch; the service uses it to spot
    /// clock skew on the host.
    pub async fn next_steps(
        &self,
        ts: i64,
    ) -> Result<StepsEnvelope, ClientError> {
        let url = self.instructions_url();
        debug!(self.log, "requesting instructions"; "url" => &url);
        let response = self
            .client
            .get(&url)
            .query(&[("ts", ts)])
            .send()
            .await
            .map_err(|err| ClientError::Request {
                method: "GET",
                url: url.clone(),
                err,
            })?;
        let response = check_status("GET", &url, response).await?;
        response
            .json()
            .await
            .map_err(|err| ClientError::Deserialize { url, err })
    }

    /// Post the outcome of one executed step.
    pub async fn post_step_reply(
        &self,
        reply: &StepReply,
    ) -> Result<(), ClientError> {
        let url = self.instructions_url();
        debug!(
            self.log, "posting step reply";
            "step_id" => &reply.step_id,
            "exit_code" => reply.exit_code,
        );
        let response = self
            .client
            .post(&url)
            .json(reply)
            .send()
            .await
            .map_err(|err| ClientError::Request {
                method: "POST",
                url: url.clone(),
                err,
            })?;
        check_status("POST", &url, response).await?;
        Ok(())
    }

    /// Upload a gzipped tar of collected logs.
    pub async fn upload_logs(
        &self,
        archive: &Utf8Path,
    ) -> Result<(), ClientError> {
        let url = format!("{}/hosts/{}/logs", self.base_url, self.host_id);
        let bytes = tokio::fs::read(archive).await.map_err(|err| {
            ClientError::ReadArchive { path: archive.to_owned(), err }
        })?;
        debug!(
            self.log, "uploading logs";
            "url" => &url,
            "bytes" => bytes.len(),
        );
        let part = multipart::Part::bytes(bytes).file_name("logs.tar.gz");
        let form = multipart::Form::new().part("upfile", part);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| ClientError::Request {
                method: "POST",
                url: url.clone(),
                err,
            })?;
        check_status("POST", &url, response).await?;
        Ok(())
    }
}

async fn check_status(
    method: &'static str,
    url: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_else(|e| e.to_string());
        Err(ClientError::Status {
            method,
            url: url.to_string(),
            status,
            body,
        })
    }
}

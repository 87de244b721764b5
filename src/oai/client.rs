//! The reference [`Communicator`] implementation: an HTTP GET transport over
//! `reqwest`, with the response body handed to [`super::envelope::parse`].

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::TransportError;

use super::envelope::{ResponseEnvelope, Verb, parse};

/// A single operation: issue a verb+parameters request, get back a parsed
/// response tree or a transport failure. Implementations never inspect
/// `<error>` children themselves — that's the driver's job.
#[async_trait]
pub trait Communicator: Send + Sync {
    async fn request(
        &self,
        verb: Verb,
        params: &[(&str, &str)],
    ) -> Result<ResponseEnvelope, TransportError>;
}

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

pub struct HttpCommunicator {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<BasicAuth>,
}

impl HttpCommunicator {
    pub fn new(base_url: impl Into<String>, credentials: Option<BasicAuth>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
        }
    }
}

#[async_trait]
impl Communicator for HttpCommunicator {
    #[instrument(skip(self, params), fields(verb = verb.as_str()))]
    async fn request(
        &self,
        verb: Verb,
        params: &[(&str, &str)],
    ) -> Result<ResponseEnvelope, TransportError> {
        let mut query: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 1);
        query.push(("verb", verb.as_str()));
        query.extend_from_slice(params);

        let mut request = self.client.get(&self.base_url).query(&query);
        if let Some(auth) = &self.credentials {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: self.base_url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                url: self.base_url.clone(),
                status: response.status().as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| TransportError::Request {
                url: self.base_url.clone(),
                source,
            })?;

        debug!(bytes = body.len(), "received OAI-PMH response body");
        parse(&self.base_url, &body)
    }
}

//! The protocol state machine: `Prepare -> Harvest -> Finalize`. Everything
//! else in this crate is a collaborator the driver composes; this module is
//! where most of the harvest logic lives.

use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::config::{Granularity, GranularityPolicy, HarvestConfig, HarvesterOptions};
use crate::error::{HarvestError, StateError};
use crate::oai::{Communicator, RawRecord, ResponseEnvelope, Verb};
use crate::state::{CHECKPOINT_ARTIFACT, Checkpoint, StateManager};
use crate::writer::RecordWriter;

/// `Identify` output cached for the life of one `launch()` call.
#[derive(Debug, Clone)]
struct IdentifyInfo {
    granularity: Granularity,
    response_date: String,
}

/// The resume cursor extracted from a loaded [`Checkpoint`]: which set it
/// belongs to, and the token to re-issue as that set's first request.
#[derive(Debug, Clone)]
struct ResumeCursor {
    set_spec: Option<String>,
    resumption_token: String,
}

/// Everything Prepare resolves before the Harvest phase can run.
struct Prepared {
    effective_from: Option<String>,
    effective_until: Option<String>,
    sets: Vec<Option<String>>,
    resume: Option<ResumeCursor>,
}

/// Drives `Identify` / `ListRecords` against one OAI-PMH target, composing a
/// [`Communicator`], a [`RecordWriter`], and a [`StateManager`]. One
/// instance harvests one target; `launch()` is the sole operation.
pub struct Harvester<C, W, S> {
    config: HarvestConfig,
    options: HarvesterOptions,
    communicator: C,
    writer: W,
    state: S,
    identify_info: OnceCell<IdentifyInfo>,
}

impl<C, W, S> Harvester<C, W, S>
where
    C: Communicator,
    W: RecordWriter,
    S: StateManager,
{
    pub fn new(config: HarvestConfig, communicator: C, writer: W, state: S) -> Self {
        Self::with_options(config, HarvesterOptions::default(), communicator, writer, state)
    }

    pub fn with_options(
        config: HarvestConfig,
        options: HarvesterOptions,
        communicator: C,
        writer: W,
        state: S,
    ) -> Self {
        Self {
            config,
            options,
            communicator,
            writer,
            state,
            identify_info: OnceCell::new(),
        }
    }

    /// Runs one full harvest: Prepare, then a `ListRecords` loop per
    /// configured set, then Finalize. Returns on the first unrecoverable
    /// error, leaving the checkpoint in whatever state the error kind's
    /// recovery policy calls for.
    #[instrument(skip(self), fields(url = %self.config.url))]
    pub async fn launch(&self) -> Result<(), HarvestError> {
        if self.options.disable_time_limit {
            debug!("long-running operation requested (no-op on this host)");
        }

        let prepared = self.prepare().await?;
        self.harvest(&prepared).await?;
        self.finalize(&prepared).await?;
        Ok(())
    }

    // ---- Prepare -------------------------------------------------------

    async fn prepare(&self) -> Result<Prepared, HarvestError> {
        let effective_from = match &self.config.from {
            Some(from) => Some(from.clone()),
            None => self.state.load_date().await?,
        };

        let effective_until = self.resolve_end_boundary().await?;

        let sets = self.config.set_spec.sequence();

        let mut prepared = Prepared {
            effective_from,
            effective_until,
            sets,
            resume: None,
        };

        match self.state.load_state().await {
            Ok(None) => {}
            Ok(Some(checkpoint)) => {
                info!(
                    set = ?checkpoint.set_spec,
                    token = %checkpoint.resumption_token,
                    "resuming from a saved checkpoint"
                );
                prepared.effective_from = checkpoint.effective_start_date.clone();
                prepared.effective_until = checkpoint.effective_end_date.clone();
                prepared.resume = Some(ResumeCursor {
                    set_spec: checkpoint.set_spec,
                    resumption_token: checkpoint.resumption_token,
                });
            }
            Err(StateError::Corrupt { path, found }) => {
                warn!(path = %path, found, "checkpoint has the wrong shape, clearing it");
                self.state.clear_state().await?;
                return Err(HarvestError::CorruptState { artifact: path });
            }
            Err(other) => return Err(other.into()),
        }

        Ok(prepared)
    }

    /// Resolves the end boundary and (if needed) the server's granularity.
    /// Caller-supplied `until` is always used verbatim, never truncated —
    /// truncating it to match granularity is the caller's responsibility.
    /// Whether `Identify` is consulted depends on whether `until` was
    /// supplied and on `identify_for_until` (see
    /// `HarvestConfig::identify_for_until`).
    async fn resolve_end_boundary(&self) -> Result<Option<String>, HarvestError> {
        let needs_identify = match (&self.config.until, self.config.granularity) {
            (Some(_), GranularityPolicy::Auto) => true,
            (Some(_), GranularityPolicy::Explicit(_)) => false,
            (None, GranularityPolicy::Auto) => true,
            (None, GranularityPolicy::Explicit(_)) => self.config.identify_for_until,
        };

        let identify_info = if needs_identify {
            Some(self.identify().await?)
        } else {
            None
        };

        if let Some(until) = &self.config.until {
            return Ok(Some(until.clone()));
        }

        Ok(identify_info.map(|info| info.response_date.clone()))
    }

    /// Calls `Identify` at most once per `launch()`, caching the result for
    /// the life of this run.
    async fn identify(&self) -> Result<IdentifyInfo, HarvestError> {
        if let Some(cached) = self.identify_info.get() {
            return Ok(cached.clone());
        }

        let envelope = self.communicator.request(Verb::Identify, &[]).await?;
        let info = match envelope {
            ResponseEnvelope::Identify {
                response_date,
                granularity,
            } => {
                let granularity = granularity
                    .as_deref()
                    .map(Granularity::from_token)
                    .unwrap_or(Granularity::Second);
                let response_date = match self.config.granularity {
                    GranularityPolicy::Explicit(explicit) => {
                        explicit.truncate(&response_date).to_string()
                    }
                    GranularityPolicy::Auto => granularity.truncate(&response_date).to_string(),
                };
                IdentifyInfo {
                    granularity,
                    response_date,
                }
            }
            ResponseEnvelope::Error { code, text, .. } => {
                return Err(HarvestError::OaiProtocol { code, text });
            }
            ResponseEnvelope::ListRecords { .. } => {
                return Err(self.unexpected_shape("Identify", "ListRecords"));
            }
        };

        let _ = self.identify_info.set(info.clone());
        Ok(info)
    }

    // ---- Harvest ---------------------------------------------------------

    async fn harvest(&self, prepared: &Prepared) -> Result<(), HarvestError> {
        let mut resume = prepared.resume.clone();

        for set in &prepared.sets {
            let initial_token = match &resume {
                Some(cursor) if &cursor.set_spec == set => {
                    let token = cursor.resumption_token.clone();
                    resume = None;
                    Some(token)
                }
                Some(_) => continue,
                None => None,
            };

            self.harvest_set(set, initial_token, prepared).await?;
        }

        Ok(())
    }

    async fn harvest_set(
        &self,
        set: &Option<String>,
        resume_token: Option<String>,
        prepared: &Prepared,
    ) -> Result<(), HarvestError> {
        let mut response = match resume_token {
            Some(token) => self.request_with_token(&token).await?,
            None => self.request_initial(set, prepared).await?,
        };

        loop {
            let (records, next_token) = self.validate(response).await?;

            if !records.is_empty() {
                self.writer.write(&records).await?;
            }

            let Some(token) = next_token else {
                break;
            };

            self.state
                .save_state(&Checkpoint {
                    set_spec: set.clone(),
                    resumption_token: token.clone(),
                    effective_start_date: prepared.effective_from.clone(),
                    effective_end_date: prepared.effective_until.clone(),
                })
                .await?;

            response = self.request_with_token(&token).await?;
        }

        Ok(())
    }

    async fn request_initial(
        &self,
        set: &Option<String>,
        prepared: &Prepared,
    ) -> Result<ResponseEnvelope, HarvestError> {
        let mut params: Vec<(&str, &str)> = vec![("metadataPrefix", &self.config.metadata_prefix)];
        if let Some(from) = prepared.effective_from.as_deref().filter(|v| !v.is_empty()) {
            params.push(("from", from));
        }
        if let Some(spec) = set.as_deref().filter(|v| !v.is_empty()) {
            params.push(("set", spec));
        }
        if let Some(until) = prepared.effective_until.as_deref().filter(|v| !v.is_empty()) {
            params.push(("until", until));
        }

        Ok(self.communicator.request(Verb::ListRecords, &params).await?)
    }

    async fn request_with_token(&self, token: &str) -> Result<ResponseEnvelope, HarvestError> {
        Ok(self
            .communicator
            .request(Verb::ListRecords, &[("resumptionToken", token)])
            .await?)
    }

    /// Checks a response for a protocol-level `<error>` before anything
    /// touches the writer. `badResumptionToken` only becomes
    /// `TokenExpiredError` when a checkpoint actually exists; any other
    /// error leaves the checkpoint untouched.
    async fn validate(
        &self,
        envelope: ResponseEnvelope,
    ) -> Result<(Vec<RawRecord>, Option<String>), HarvestError> {
        match envelope {
            ResponseEnvelope::ListRecords {
                records,
                resumption_token,
                ..
            } => Ok((records, resumption_token)),
            ResponseEnvelope::Error { code, text, .. } => {
                if code == "badResumptionToken"
                    && let Some(checkpoint) = self.state.load_state().await?
                {
                    self.state.clear_state().await?;
                    return Err(HarvestError::TokenExpired {
                        artifact: self.checkpoint_artifact_hint(&checkpoint),
                    });
                }
                Err(HarvestError::OaiProtocol { code, text })
            }
            ResponseEnvelope::Identify { .. } => {
                Err(self.unexpected_shape("ListRecords", "Identify"))
            }
        }
    }

    /// `FileStateManager` names its own file in [`StateError::Corrupt`]; a
    /// `badResumptionToken` reset has no such error to borrow the path
    /// from, so fall back to the historical artifact name.
    fn checkpoint_artifact_hint(&self, _checkpoint: &Checkpoint) -> String {
        CHECKPOINT_ARTIFACT.to_string()
    }

    fn unexpected_shape(&self, expected: &str, got: &str) -> HarvestError {
        HarvestError::from(crate::error::TransportError::MalformedXml {
            url: self.config.url.clone(),
            reason: format!("expected a {expected} response, got {got}"),
        })
    }

    // ---- Finalize --------------------------------------------------------

    async fn finalize(&self, prepared: &Prepared) -> Result<(), HarvestError> {
        match &prepared.effective_until {
            Some(end) => self.state.save_date(end).await?,
            None => debug!(
                "no end boundary was resolved this run (identify_for_until disabled); \
                 last-harvest marker left untouched"
            ),
        }
        self.state.clear_state().await?;
        Ok(())
    }
}

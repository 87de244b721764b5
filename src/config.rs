//! Immutable harvest configuration.

use crate::oai::BasicAuth;

/// Which sets to harvest. Normalizes to an ordered sequence in
/// [`SetSelector::sequence`] — `All` becomes a single `None` entry, the
/// sentinel for "no set filter".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetSelector {
    All,
    One(String),
    Many(Vec<String>),
}

impl SetSelector {
    pub fn sequence(&self) -> Vec<Option<String>> {
        match self {
            SetSelector::All => vec![None],
            SetSelector::One(set) => vec![Some(set.clone())],
            SetSelector::Many(sets) => sets.iter().cloned().map(Some).collect(),
        }
    }
}

/// The date-time precision a server accepts/emits (glossary: Granularity).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Second,
}

impl Granularity {
    /// Parse a server-declared `Identify/granularity` token. Anything other
    /// than the exact day token is treated as second-level, so an
    /// unrecognized or future granularity token degrades to the safer,
    /// higher-precision boundary rather than being rejected.
    pub fn from_token(token: &str) -> Self {
        if token == "YYYY-MM-DD" {
            Granularity::Day
        } else {
            Granularity::Second
        }
    }

    /// Truncate a `responseDate`-shaped boundary to this granularity's
    /// precision. Day granularity keeps the first ten characters
    /// (`YYYY-MM-DD`); second granularity is left untouched.
    pub fn truncate<'a>(&self, boundary: &'a str) -> &'a str {
        match self {
            Granularity::Day => boundary.get(..10).unwrap_or(boundary),
            Granularity::Second => boundary,
        }
    }
}

/// Whether the driver derives granularity from an `Identify` call or takes
/// a config-supplied value verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GranularityPolicy {
    Auto,
    Explicit(Granularity),
}

/// Immutable input to a [`crate::harvester::Harvester::new`] call.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub url: String,
    pub credentials: Option<BasicAuth>,
    pub metadata_prefix: String,
    pub set_spec: SetSelector,
    pub from: Option<String>,
    pub until: Option<String>,
    pub granularity: GranularityPolicy,
    /// When the caller supplies explicit granularity but no `until`, call
    /// `Identify` anyway to obtain an end boundary. Defaults to `true`.
    pub identify_for_until: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            credentials: None,
            metadata_prefix: "oai_dc".to_string(),
            set_spec: SetSelector::All,
            from: None,
            until: None,
            granularity: GranularityPolicy::Auto,
            identify_for_until: true,
        }
    }
}

/// Host-level options that aren't protocol state.
#[derive(Debug, Clone, Copy)]
pub struct HarvesterOptions {
    /// Request a long-lived process so a harvest never gets killed by a
    /// host script watchdog mid-run. Modeled as an explicit flag rather
    /// than a global side effect; a no-op on this platform.
    pub disable_time_limit: bool,
}

impl Default for HarvesterOptions {
    fn default() -> Self {
        Self {
            disable_time_limit: true,
        }
    }
}

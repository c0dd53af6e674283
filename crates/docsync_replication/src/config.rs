//! Session and dispatcher configuration.

use crate::error::{ReplicationError, ReplicationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Name of the server-side filter that selects documents by channel.
pub const CHANNEL_FILTER: &str = "by-channel";

/// Filter parameter holding the comma-joined channel list.
pub const CHANNELS_PARAM: &str = "channels";

/// Which way documents flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Remote endpoint to local database.
    Pull,
    /// Local database to remote endpoint.
    Push,
}

impl Direction {
    /// Returns true for pull replications.
    pub fn is_pull(&self) -> bool {
        matches!(self, Direction::Pull)
    }
}

/// Configuration of a single replication session.
///
/// Freely mutable on the caller's side; the engine only ever sees an
/// immutable [`ReplicationProperties`](crate::ReplicationProperties)
/// snapshot built from it at `start()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Replication direction.
    pub direction: Direction,
    /// Remote endpoint URL.
    pub remote: String,
    /// Keep running and follow changes after catching up.
    #[serde(default)]
    pub continuous: bool,
    /// Ask the engine to create the target database if missing.
    #[serde(default)]
    pub create_target: bool,
    /// Name of the filter function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Parameters passed to the filter function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_params: Option<BTreeMap<String, Value>>,
    /// Restricts replication to these document IDs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_ids: Option<Vec<String>>,
    /// Extra HTTP headers sent to the remote endpoint.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// OAuth parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<BTreeMap<String, String>>,
    /// Facebook login email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facebook_email: Option<String>,
    /// Persona login email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_email: Option<String>,
    /// Caller-supplied properties, merged over the generated ones.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl ReplicationConfig {
    /// Creates a configuration with default settings.
    pub fn new(direction: Direction, remote: impl Into<String>) -> Self {
        Self {
            direction,
            remote: remote.into(),
            continuous: false,
            create_target: false,
            filter: None,
            filter_params: None,
            doc_ids: None,
            headers: BTreeMap::new(),
            oauth: None,
            facebook_email: None,
            persona_email: None,
            extra: BTreeMap::new(),
        }
    }

    /// Creates a pull configuration.
    pub fn pull(remote: impl Into<String>) -> Self {
        Self::new(Direction::Pull, remote)
    }

    /// Creates a push configuration.
    pub fn push(remote: impl Into<String>) -> Self {
        Self::new(Direction::Push, remote)
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> ReplicationResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: &Path) -> ReplicationResult<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| ReplicationError::InvalidConfigFile(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&data)
    }

    /// Checks combinations that can never be valid.
    pub fn validate(&self) -> ReplicationResult<()> {
        if self.remote.is_empty() {
            return Err(ReplicationError::configuration("remote URL is empty"));
        }
        if self.filter.as_deref() == Some(CHANNEL_FILTER) && !self.direction.is_pull() {
            return Err(ReplicationError::configuration(
                "channel filter requires a pull replication",
            ));
        }
        Ok(())
    }

    /// Sets continuous mode.
    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    /// Sets the create-target flag.
    pub fn with_create_target(mut self, create_target: bool) -> Self {
        self.create_target = create_target;
        self
    }

    /// Sets the filter name and parameters.
    pub fn with_filter(
        mut self,
        filter: impl Into<String>,
        params: Option<BTreeMap<String, Value>>,
    ) -> Self {
        self.filter = Some(filter.into());
        self.filter_params = params;
        self
    }

    /// Sets the document ID allowlist.
    pub fn with_doc_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.doc_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds an extra property.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Sets the channel list; see [`ReplicationConfig::set_channels`].
    pub fn with_channels<I, S>(mut self, channels: I) -> ReplicationResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_channels(channels.into_iter().map(Into::into).collect())?;
        Ok(self)
    }

    /// Returns the channels selected by the channel filter.
    ///
    /// Empty unless the active filter is exactly [`CHANNEL_FILTER`].
    pub fn channels(&self) -> Vec<String> {
        if self.filter.as_deref() != Some(CHANNEL_FILTER) {
            return Vec::new();
        }
        match self
            .filter_params
            .as_ref()
            .and_then(|params| params.get(CHANNELS_PARAM))
        {
            Some(Value::String(joined)) => joined
                .split(',')
                .filter(|c| !c.is_empty())
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Selects documents by channel.
    ///
    /// Only legal on pull replications. An empty list clears the filter,
    /// but only if the channel filter is the one currently active.
    pub fn set_channels(&mut self, channels: Vec<String>) -> ReplicationResult<()> {
        if !self.direction.is_pull() {
            return Err(ReplicationError::configuration(
                "channels can only be set on pull replications",
            ));
        }
        if channels.is_empty() {
            if self.filter.as_deref() == Some(CHANNEL_FILTER) {
                self.filter = None;
                self.filter_params = None;
            }
        } else {
            let mut params = BTreeMap::new();
            params.insert(CHANNELS_PARAM.to_owned(), Value::String(channels.join(",")));
            self.filter = Some(CHANNEL_FILTER.to_owned());
            self.filter_params = Some(params);
        }
        Ok(())
    }
}

/// Configuration for the background dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name of the worker thread.
    pub thread_name: String,
}

impl DispatcherConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker thread name.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: "docsync-server".into(),
        }
    }
}

//! Immutable property snapshot handed to the engine factory.

use crate::config::{Direction, ReplicationConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Property keys understood by engine factories.
pub mod keys {
    /// Continuous mode flag.
    pub const CONTINUOUS: &str = "continuous";
    /// Create-target flag.
    pub const CREATE_TARGET: &str = "create_target";
    /// Filter function name.
    pub const FILTER: &str = "filter";
    /// Filter parameters.
    pub const QUERY_PARAMS: &str = "query_params";
    /// Document ID allowlist.
    pub const DOC_IDS: &str = "doc_ids";
    /// Replication source.
    pub const SOURCE: &str = "source";
    /// Replication target.
    pub const TARGET: &str = "target";
}

/// A declarative, replayable description of one replication run.
///
/// Built once per `start()` and never mutated afterwards, so it is safe to
/// move across to the background context.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicationProperties(BTreeMap<String, Value>);

impl ReplicationProperties {
    /// Builds the snapshot for a session replicating `local_db`.
    ///
    /// The local side is the database name; the remote side is encoded as
    /// `{url, headers, auth}`. Extra properties are merged last and win.
    pub fn build(config: &ReplicationConfig, local_db: &str) -> Self {
        let mut props = BTreeMap::new();
        props.insert(keys::CONTINUOUS.to_owned(), Value::Bool(config.continuous));
        props.insert(
            keys::CREATE_TARGET.to_owned(),
            Value::Bool(config.create_target),
        );
        if let Some(filter) = &config.filter {
            props.insert(keys::FILTER.to_owned(), Value::String(filter.clone()));
        }
        if let Some(params) = &config.filter_params {
            let params: Map<String, Value> =
                params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            props.insert(keys::QUERY_PARAMS.to_owned(), Value::Object(params));
        }
        if let Some(ids) = &config.doc_ids {
            props.insert(
                keys::DOC_IDS.to_owned(),
                Value::Array(ids.iter().cloned().map(Value::String).collect()),
            );
        }

        let local = Value::String(local_db.to_owned());
        let remote = remote_descriptor(config);
        let (source, target) = match config.direction {
            Direction::Pull => (remote, local),
            Direction::Push => (local, remote),
        };
        props.insert(keys::SOURCE.to_owned(), source);
        props.insert(keys::TARGET.to_owned(), target);

        for (key, value) in &config.extra {
            props.insert(key.clone(), value.clone());
        }
        Self(props)
    }

    /// Returns the value of a property.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns true if the property is present.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the number of properties.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no properties.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Reads the `continuous` flag.
    pub fn continuous(&self) -> bool {
        self.get(keys::CONTINUOUS)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Converts the snapshot into a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

fn remote_descriptor(config: &ReplicationConfig) -> Value {
    let mut remote = Map::new();
    remote.insert("url".into(), Value::String(config.remote.clone()));
    if !config.headers.is_empty() {
        let headers = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        remote.insert("headers".into(), Value::Object(headers));
    }
    if let Some(auth) = auth_descriptor(config) {
        remote.insert("auth".into(), auth);
    }
    Value::Object(remote)
}

// OAuth wins over Facebook, which wins over Persona.
fn auth_descriptor(config: &ReplicationConfig) -> Option<Value> {
    let mut auth = Map::new();
    if let Some(oauth) = &config.oauth {
        let oauth = oauth
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        auth.insert("oauth".into(), Value::Object(oauth));
    } else if let Some(email) = &config.facebook_email {
        auth.insert("facebook".into(), email_object(email));
    } else if let Some(email) = &config.persona_email {
        auth.insert("persona".into(), email_object(email));
    } else {
        return None;
    }
    Some(Value::Object(auth))
}

fn email_object(email: &str) -> Value {
    let mut obj = Map::new();
    obj.insert("email".into(), Value::String(email.to_owned()));
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REMOTE: &str = "https://sync.example.com/db";

    #[test]
    fn pull_uses_remote_as_source() {
        let props = ReplicationProperties::build(&ReplicationConfig::pull(REMOTE), "notes");

        assert_eq!(props.get(keys::SOURCE), Some(&json!({"url": REMOTE})));
        assert_eq!(props.get(keys::TARGET), Some(&json!("notes")));
        assert_eq!(props.get(keys::CONTINUOUS), Some(&json!(false)));
        assert_eq!(props.get(keys::CREATE_TARGET), Some(&json!(false)));
        assert!(!props.contains(keys::FILTER));
        assert!(!props.contains(keys::QUERY_PARAMS));
        assert!(!props.contains(keys::DOC_IDS));
    }

    #[test]
    fn push_uses_remote_as_target() {
        let config = ReplicationConfig::push(REMOTE)
            .with_create_target(true)
            .with_header("X-Client", "docsync");
        let props = ReplicationProperties::build(&config, "notes");

        assert_eq!(props.get(keys::SOURCE), Some(&json!("notes")));
        assert_eq!(
            props.get(keys::TARGET),
            Some(&json!({"url": REMOTE, "headers": {"X-Client": "docsync"}}))
        );
        assert_eq!(props.get(keys::CREATE_TARGET), Some(&json!(true)));
    }

    #[test]
    fn filter_and_doc_ids() {
        let config = ReplicationConfig::pull(REMOTE)
            .with_channels(["a", "b"])
            .unwrap()
            .with_doc_ids(["d1"]);
        let props = ReplicationProperties::build(&config, "notes");

        assert_eq!(props.get(keys::FILTER), Some(&json!("by-channel")));
        assert_eq!(props.get(keys::QUERY_PARAMS), Some(&json!({"channels": "a,b"})));
        assert_eq!(props.get(keys::DOC_IDS), Some(&json!(["d1"])));
    }

    #[test]
    fn auth_precedence() {
        let mut config = ReplicationConfig::pull(REMOTE);
        config.persona_email = Some("p@example.com".into());
        let props = ReplicationProperties::build(&config, "notes");
        assert_eq!(
            props.get(keys::SOURCE).and_then(|s| s.get("auth")),
            Some(&json!({"persona": {"email": "p@example.com"}}))
        );

        config.facebook_email = Some("f@example.com".into());
        let props = ReplicationProperties::build(&config, "notes");
        assert_eq!(
            props.get(keys::SOURCE).and_then(|s| s.get("auth")),
            Some(&json!({"facebook": {"email": "f@example.com"}}))
        );

        let mut oauth = BTreeMap::new();
        oauth.insert("token".to_string(), "t".to_string());
        config.oauth = Some(oauth);
        let props = ReplicationProperties::build(&config, "notes");
        assert_eq!(
            props.get(keys::SOURCE).and_then(|s| s.get("auth")),
            Some(&json!({"oauth": {"token": "t"}}))
        );
    }

    #[test]
    fn extras_override_generated_keys() {
        let config = ReplicationConfig::pull(REMOTE)
            .with_continuous(false)
            .with_extra("continuous", json!(true))
            .with_extra("heartbeat", json!(300));
        let props = ReplicationProperties::build(&config, "notes");

        assert!(props.continuous());
        assert_eq!(props.get("heartbeat"), Some(&json!(300)));
    }

    #[test]
    fn snapshot_is_detached_from_config() {
        let mut config = ReplicationConfig::pull(REMOTE);
        let props = ReplicationProperties::build(&config, "notes");
        config.continuous = true;

        assert!(!props.continuous());
    }

    #[test]
    fn serializes_as_plain_object() {
        let props = ReplicationProperties::build(&ReplicationConfig::push(REMOTE), "notes");
        let text = serde_json::to_string(&props).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), props.to_json());
        assert_eq!(props.len(), 4);
    }
}

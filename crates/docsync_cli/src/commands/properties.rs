//! Properties command implementation.

use docsync_replication::{ReplicationConfig, ReplicationProperties};
use std::path::Path;

/// Builds the property snapshot for the configuration at `path`.
pub fn build(path: &Path, database: &str) -> Result<ReplicationProperties, Box<dyn std::error::Error>> {
    let config = ReplicationConfig::from_file(path)?;
    Ok(ReplicationProperties::build(&config, database))
}

/// Runs the properties command.
pub fn run(path: &Path, database: &str) -> Result<(), Box<dyn std::error::Error>> {
    let properties = build(path, database)?;
    println!("{}", serde_json::to_string_pretty(&properties)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn builds_push_properties() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"direction": "push", "remote": "https://sync.example.com/db", "create_target": true}"#,
        )
        .unwrap();

        let props = build(file.path(), "notes").unwrap();
        assert_eq!(props.get("source"), Some(&json!("notes")));
        assert_eq!(
            props.get("target"),
            Some(&json!({"url": "https://sync.example.com/db"}))
        );
        assert_eq!(props.get("create_target"), Some(&json!(true)));
    }

    #[test]
    fn rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{").unwrap();
        assert!(build(file.path(), "notes").is_err());
    }
}

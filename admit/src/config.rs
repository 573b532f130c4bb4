use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Annotation holding the last operation performed on an add-on
pub const ANNOTATION_LAST_OPERATION: &str = "harvesterhci.io/addon-last-operation";

/// Annotation holding the time of the last operation, RFC3339 in UTC
pub const ANNOTATION_LAST_OPERATION_TIMESTAMP: &str =
    "harvesterhci.io/addon-last-operation-timestamp";

/// Webhook configuration
///
/// Every field is optional when loading, missing values fall back to the defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub webhook: WebhookConfig,
    pub tracker: TrackerConfig,
}

impl Config {
    /// Parses a JSON document
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(Error::SerializationError)
    }
}

/// Where the mutating endpoint is served
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookConfig {
    /// Path segment the admission reviews are posted to
    pub path: String,
    pub bind_address: SocketAddr,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            path: "mutate".to_string(),
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8443)),
        }
    }
}

/// Annotation keys written by the last operation tracker
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    pub last_operation_annotation: String,
    pub timestamp_annotation: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            last_operation_annotation: ANNOTATION_LAST_OPERATION.to_string(),
            timestamp_annotation: ANNOTATION_LAST_OPERATION_TIMESTAMP.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.webhook.path, "mutate");
        assert_eq!(config.webhook.bind_address.port(), 8443);
        assert_eq!(
            config.tracker.last_operation_annotation,
            "harvesterhci.io/addon-last-operation"
        );
    }

    #[test]
    fn test_partial_document() {
        let config = Config::from_json(
            r#"{
                "webhook": { "bindAddress": "127.0.0.1:9443" },
                "tracker": { "timestampAnnotation": "example.com/touched-at" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.webhook.path, "mutate");
        assert_eq!(
            config.webhook.bind_address,
            "127.0.0.1:9443".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            config.tracker.last_operation_annotation,
            ANNOTATION_LAST_OPERATION
        );
        assert_eq!(config.tracker.timestamp_annotation, "example.com/touched-at");
    }

    #[test]
    fn test_malformed_document() {
        let err = Config::from_json(r#"{ "webhook": { "bindAddress": 42 } }"#).unwrap_err();
        assert!(matches!(err, Error::SerializationError(_)));
    }
}

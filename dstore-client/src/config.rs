/// Client configuration
///
/// Options are passed through untouched to the transport collaborator; the
/// client itself only uses `project_id` and `namespace`.

use serde::{Deserialize, Serialize};

/// Endpoint used when neither an explicit endpoint nor an emulator is configured
pub const DEFAULT_API_ENDPOINT: &str = "https://datastore.googleapis.com";

pub const ENV_PROJECT_ID: &str = "DATASTORE_PROJECT_ID";
pub const ENV_PROJECT_ID_FALLBACK: &str = "GCLOUD_PROJECT";
pub const ENV_NAMESPACE: &str = "DATASTORE_NAMESPACE";
pub const ENV_EMULATOR_HOST: &str = "DATASTORE_EMULATOR_HOST";

/// Construction-time options of a [`crate::Datastore`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Target store identity
    pub project_id: String,

    /// Default namespace for keys and queries (None = default namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Override of the transport target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,

    /// Emulator host, usually taken from `DATASTORE_EMULATOR_HOST`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emulator_host: Option<String>,

    /// Path to a credentials file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_filename: Option<String>,

    /// Inline auth material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<serde_json::Value>,
}

impl ClientConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            project_id: non_empty(ENV_PROJECT_ID)
                .or_else(|| non_empty(ENV_PROJECT_ID_FALLBACK))
                .unwrap_or_default(),
            namespace: non_empty(ENV_NAMESPACE),
            emulator_host: non_empty(ENV_EMULATOR_HOST),
            ..Default::default()
        }
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into()).filter(|ns| !ns.is_empty());
        self
    }

    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_emulator_host(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    pub fn with_key_filename(mut self, path: impl Into<String>) -> Self {
        self.key_filename = Some(path.into());
        self
    }

    pub fn with_credentials(mut self, credentials: serde_json::Value) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Resolved transport base URL.
    ///
    /// Precedence: explicit endpoint, then emulator host, then the default.
    /// Trailing slashes are stripped and a missing scheme is added
    /// (`http://` for local hosts, `https://` otherwise).
    pub fn base_url(&self) -> String {
        let raw = self
            .api_endpoint
            .as_deref()
            .or(self.emulator_host.as_deref())
            .unwrap_or(DEFAULT_API_ENDPOINT)
            .trim()
            .trim_end_matches('/');

        if raw.contains("://") {
            return raw.to_string();
        }
        if is_local_host(raw) {
            format!("http://{}", raw)
        } else {
            format!("https://{}", raw)
        }
    }

    /// True when the base URL differs from the default endpoint
    pub fn is_custom_endpoint(&self) -> bool {
        self.base_url() != DEFAULT_API_ENDPOINT
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.project_id.trim().is_empty() {
            return Err(format!(
                "project_id must be set (or {} / {} in the environment)",
                ENV_PROJECT_ID, ENV_PROJECT_ID_FALLBACK
            ));
        }

        if let Some(endpoint) = &self.api_endpoint {
            if endpoint.trim().trim_end_matches('/').is_empty() {
                return Err("api_endpoint must not be empty when set".to_string());
            }
        }

        if self.key_filename.is_some() && self.credentials.is_some() {
            return Err("key_filename and credentials are mutually exclusive".to_string());
        }

        Ok(())
    }
}

fn is_local_host(authority: &str) -> bool {
    ["localhost", "127.", "0.0.0.0", "[::1]"]
        .iter()
        .any(|prefix| authority.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_base_url() {
        let config = ClientConfig::new("demo");
        assert_eq!(config.base_url(), DEFAULT_API_ENDPOINT);
        assert!(!config.is_custom_endpoint());
    }

    #[test]
    fn test_base_url_normalization() {
        let config = ClientConfig::new("demo").with_api_endpoint("datastore.example.com//");
        assert_eq!(config.base_url(), "https://datastore.example.com");
        assert!(config.is_custom_endpoint());

        let config = ClientConfig::new("demo").with_api_endpoint("localhost:8081/");
        assert_eq!(config.base_url(), "http://localhost:8081");

        let config = ClientConfig::new("demo").with_api_endpoint("http://10.0.0.5:8081");
        assert_eq!(config.base_url(), "http://10.0.0.5:8081");
    }

    #[test]
    fn test_endpoint_precedence() {
        let config = ClientConfig::new("demo").with_emulator_host("127.0.0.1:8432");
        assert_eq!(config.base_url(), "http://127.0.0.1:8432");

        let config = config.with_api_endpoint("https://custom.example.com");
        assert_eq!(config.base_url(), "https://custom.example.com");
    }

    #[test]
    fn test_from_lookup() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_PROJECT_ID_FALLBACK, "fallback"),
            (ENV_NAMESPACE, "tenant-a"),
            (ENV_EMULATOR_HOST, "localhost:8081"),
        ]));
        assert_eq!(config.project_id, "fallback");
        assert_eq!(config.namespace.as_deref(), Some("tenant-a"));
        assert_eq!(config.base_url(), "http://localhost:8081");

        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_PROJECT_ID, "primary"),
            (ENV_PROJECT_ID_FALLBACK, "fallback"),
        ]));
        assert_eq!(config.project_id, "primary");
    }

    #[test]
    fn test_validate() {
        assert!(ClientConfig::new("demo").validate().is_ok());
        assert!(ClientConfig::default().validate().is_err());
        assert!(ClientConfig::new("demo").with_api_endpoint("/").validate().is_err());
        assert!(ClientConfig::new("demo")
            .with_key_filename("key.json")
            .with_credentials(serde_json::json!({"client_email": "x"}))
            .validate()
            .is_err());
    }

    #[test]
    fn test_serde_shape() {
        let config = ClientConfig::new("demo").with_namespace("ns");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json, serde_json::json!({"projectId": "demo", "namespace": "ns"}));
    }
}

//! Data shapes exchanged with Vault.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Field names that may carry the unseal key shares, in preference order.
///
/// `vault operator init -format=json` emits `unseal_keys_b64`/`unseal_keys_hex`;
/// `PUT /v1/sys/init` emits `keys_base64`/`keys`.
const KEY_FIELDS: &[&str] = &[
    "unseal_keys_b64",
    "unseal_keys_hex",
    "unseal_keys",
    "keys_base64",
    "keys",
];

/// Field names that may carry the unseal threshold, in preference order.
const THRESHOLD_FIELDS: &[&str] = &["key_threshold", "unseal_threshold", "secret_threshold"];

/// Why an init response could not be turned into [`InitMaterial`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaterialError {
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("no unseal keys found in init data")]
    MissingKeys,
    #[error("no root token found in init data")]
    MissingRootToken,
    #[error("key threshold {threshold} is invalid for {keys} key share(s)")]
    InvalidThreshold { threshold: usize, keys: usize },
}

/// Key shares and root credential produced by `operator init`.
#[derive(Clone, PartialEq)]
pub struct InitMaterial {
    pub unseal_keys: Vec<String>,
    pub key_threshold: usize,
    pub root_token: String,
    pub raw_response: Value,
}

impl InitMaterial {
    /// Parse an init response (CLI or HTTP shape).
    ///
    /// `default_threshold` is used when the response carries no threshold field.
    pub fn from_response(raw: Value, default_threshold: usize) -> Result<Self, MaterialError> {
        let object = raw.as_object().ok_or(MaterialError::NotAnObject)?;

        // Every share must be a string; a gap would shift the threshold prefix.
        let unseal_keys: Vec<String> = KEY_FIELDS
            .iter()
            .filter_map(|field| object.get(*field).and_then(Value::as_array))
            .find(|keys| !keys.is_empty())
            .and_then(|keys| {
                keys.iter()
                    .map(|key| key.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
            })
            .ok_or(MaterialError::MissingKeys)?;

        let key_threshold = THRESHOLD_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(threshold_value))
            .unwrap_or(default_threshold);

        if key_threshold == 0 || key_threshold > unseal_keys.len() {
            return Err(MaterialError::InvalidThreshold {
                threshold: key_threshold,
                keys: unseal_keys.len(),
            });
        }

        let root_token = object
            .get("root_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or(MaterialError::MissingRootToken)?
            .to_string();

        Ok(Self {
            unseal_keys,
            key_threshold,
            root_token,
            raw_response: raw,
        })
    }

    /// The keys to apply during unseal: a fixed-order prefix of length `key_threshold`.
    pub fn threshold_keys(&self) -> &[String] {
        &self.unseal_keys[..self.key_threshold.min(self.unseal_keys.len())]
    }

    /// Document written to the key file: the raw response plus a normalized
    /// `key_threshold` field.
    pub fn to_persisted(&self) -> Value {
        let mut doc = self.raw_response.clone();
        if let Some(object) = doc.as_object_mut() {
            object
                .entry("key_threshold")
                .or_insert_with(|| Value::from(self.key_threshold));
        }
        doc
    }
}

fn threshold_value(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl std::fmt::Debug for InitMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitMaterial")
            .field("unseal_keys", &format!("[{} REDACTED]", self.unseal_keys.len()))
            .field("key_threshold", &self.key_threshold)
            .field("root_token", &"[REDACTED]")
            .finish()
    }
}

/// A mounted secrets engine or auth method as listed by `sys/mounts` / `sys/auth`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountInfo {
    #[serde(rename = "type", default)]
    pub mount_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Option<serde_json::Map<String, Value>>,
}

impl MountInfo {
    /// The `version` option as a string, if any (`"2"` and `2` both count).
    pub fn version(&self) -> Option<String> {
        let version = self.options.as_ref()?.get("version")?;
        match version {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// AppRole login material for a machine identity.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppRoleCredentials {
    pub role_id: String,
    pub secret_id: String,
}

impl std::fmt::Debug for AppRoleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRoleCredentials")
            .field("role_id", &self.role_id)
            .field("secret_id", &"[REDACTED]")
            .finish()
    }
}

/// Body of `PUT /v1/sys/init`.
#[derive(Debug, Serialize)]
pub struct InitRequest {
    pub secret_shares: usize,
    pub secret_threshold: usize,
}

/// Body of `PUT /v1/sys/unseal`.
#[derive(Serialize)]
pub struct UnsealRequest<'a> {
    pub key: &'a str,
}

/// Response of `PUT /v1/sys/unseal`.
#[derive(Debug, Clone, Deserialize)]
pub struct UnsealResponse {
    pub sealed: bool,
    #[serde(rename = "t", default)]
    pub threshold: usize,
    #[serde(default)]
    pub progress: usize,
}

/// Body of `POST /v1/sys/mounts/:path`.
#[derive(Debug, Serialize)]
pub struct EnableEngineRequest {
    #[serde(rename = "type")]
    pub engine_type: String,
    pub options: serde_json::Map<String, Value>,
}

/// Body of `POST /v1/sys/auth/:path`.
#[derive(Debug, Serialize)]
pub struct EnableAuthRequest {
    #[serde(rename = "type")]
    pub method_type: String,
}

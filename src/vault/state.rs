//! Operational state of a Vault server, derived from its health endpoint.

use serde_json::Value;

/// Health status codes Vault uses to signal a standby-like node
/// (standby, DR secondary, performance standby).
pub const STANDBY_STATUS_CODES: [u16; 3] = [429, 472, 473];

/// HTTP status `/v1/sys/health` returns for an uninitialized server.
pub const NOT_INITIALIZED_STATUS: u16 = 501;

/// Live operational state of the server.
///
/// Never stored; recomputed from a fresh probe every time it is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultState {
    Down,
    NotInitialized,
    Sealed,
    Unsealed,
    Standby,
    PerfStandby,
    Recovery,
    DrSecondary,
    Unknown,
}

impl VaultState {
    /// Whether the server has already been through `operator init`.
    pub fn is_initialized(&self) -> bool {
        matches!(
            self,
            VaultState::Sealed | VaultState::Unsealed | VaultState::Standby
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VaultState::Down => "down",
            VaultState::NotInitialized => "not-initialized",
            VaultState::Sealed => "sealed",
            VaultState::Unsealed => "unsealed",
            VaultState::Standby => "standby",
            VaultState::PerfStandby => "perf-standby",
            VaultState::Recovery => "recovery",
            VaultState::DrSecondary => "dr-secondary",
            VaultState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for VaultState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn flag(payload: &Value, name: &str) -> Option<bool> {
    payload.get(name).and_then(Value::as_bool)
}

/// Classify a health probe response.
///
/// Rules are checked in order and the first match wins:
/// 1. no payload: `Down`
/// 2. HTTP 501 with `initialized: false`: `NotInitialized`
/// 3. `sealed: true`: `Sealed`
/// 4. HTTP 200 with `sealed: false` and `standby: false`: `Unsealed`
/// 5. HTTP 429/472/473: `Standby`
/// 6. anything else: `Down`
///
/// Payload flags are consulted before bare status codes because status codes
/// differ across health endpoint versions. Ambiguous input never maps to a
/// ready state.
pub fn classify(http_status: Option<u16>, payload: Option<&Value>) -> VaultState {
    let Some(payload) = payload else {
        return VaultState::Down;
    };

    if http_status == Some(NOT_INITIALIZED_STATUS) && flag(payload, "initialized") == Some(false) {
        return VaultState::NotInitialized;
    }

    if flag(payload, "sealed") == Some(true) {
        return VaultState::Sealed;
    }

    if http_status == Some(200)
        && flag(payload, "sealed") == Some(false)
        && flag(payload, "standby") == Some(false)
    {
        return VaultState::Unsealed;
    }

    if let Some(status) = http_status {
        if STANDBY_STATUS_CODES.contains(&status) {
            return VaultState::Standby;
        }
    }

    VaultState::Down
}

//! Unified keyring storage for logmedic credentials
//!
//! All secrets live in a single keychain entry as JSON, so the OS prompts at
//! most once per session.

use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

const KEYRING_SERVICE: &str = "logmedic-credentials";
const KEYRING_USERNAME: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) model_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) search_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) github_token: Option<String>,
}

/// Which secret a caller wants to read or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Secret {
    ModelApiKey,
    SearchPassword,
    GitHubToken,
}

impl Secret {
    pub fn label(&self) -> &'static str {
        match self {
            Secret::ModelApiKey => "model API key",
            Secret::SearchPassword => "search password",
            Secret::GitHubToken => "GitHub token",
        }
    }

    fn get(self, creds: &StoredCredentials) -> Option<String> {
        match self {
            Secret::ModelApiKey => creds.model_api_key.clone(),
            Secret::SearchPassword => creds.search_password.clone(),
            Secret::GitHubToken => creds.github_token.clone(),
        }
    }

    fn set(self, creds: &mut StoredCredentials, value: Option<String>) {
        match self {
            Secret::ModelApiKey => creds.model_api_key = value,
            Secret::SearchPassword => creds.search_password = value,
            Secret::GitHubToken => creds.github_token = value,
        }
    }
}

type KeyringResult<T> = Result<T, String>;

static CREDENTIALS_CACHE: OnceLock<Mutex<Option<StoredCredentials>>> = OnceLock::new();
static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn credentials_cache() -> &'static Mutex<Option<StoredCredentials>> {
    CREDENTIALS_CACHE.get_or_init(|| Mutex::new(None))
}

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("LOGMEDIC_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

/// Human-readable name of the platform credential store.
pub fn credentials_store_label() -> &'static str {
    if cfg!(target_os = "macos") {
        "macOS Keychain"
    } else if cfg!(target_os = "windows") {
        "Windows Credential Manager"
    } else {
        "system keyring"
    }
}

/// Warn about keychain errors only once per process
pub fn warn_keychain_error_once(context: &str, err: &str) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    tracing::warn!(
        "Couldn't access {} for {}: {}. Environment variables still work.",
        credentials_store_label(),
        context,
        err
    );
}

fn read_credentials_uncached() -> KeyringResult<StoredCredentials> {
    if keyring_disabled() {
        return Ok(StoredCredentials::default());
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(json) => {
            serde_json::from_str(&json).map_err(|e| format!("Failed to parse credentials: {}", e))
        }
        Err(keyring::Error::NoEntry) => Ok(StoredCredentials::default()),
        Err(err) => Err(err.to_string()),
    }
}

fn read_credentials() -> KeyringResult<StoredCredentials> {
    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(cached) = guard.as_ref() {
        return Ok(cached.clone());
    }
    let creds = read_credentials_uncached()?;
    *guard = Some(creds.clone());
    Ok(creds)
}

fn write_credentials(creds: &StoredCredentials) -> KeyringResult<()> {
    if keyring_disabled() {
        return Err("keyring access is disabled (LOGMEDIC_DISABLE_KEYRING)".to_string());
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    let json = serde_json::to_string(creds).map_err(|e| e.to_string())?;
    entry.set_password(&json).map_err(|e| e.to_string())?;

    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some(creds.clone());
    Ok(())
}

/// Read one secret. Keychain failures are reported once and treated as absent.
pub fn get_secret(secret: Secret) -> Option<String> {
    match read_credentials() {
        Ok(creds) => secret.get(&creds).filter(|v| !v.is_empty()),
        Err(err) => {
            warn_keychain_error_once(secret.label(), &err);
            None
        }
    }
}

/// Store (or with `None`, remove) one secret.
pub fn set_secret(secret: Secret, value: Option<&str>) -> Result<(), String> {
    let mut creds = read_credentials()?;
    secret.set(&mut creds, value.map(str::to_string));
    write_credentials(&creds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_credentials_partial_serialization() {
        let creds = StoredCredentials {
            model_api_key: Some("key".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&creds).unwrap();
        assert_eq!(json, r#"{"model_api_key":"key"}"#);
    }

    #[test]
    fn test_stored_credentials_deserialize_empty() {
        let creds: StoredCredentials = serde_json::from_str("{}").unwrap();
        assert_eq!(creds, StoredCredentials::default());
    }

    #[test]
    fn test_secret_accessors_round_trip_fields() {
        let mut creds = StoredCredentials::default();
        Secret::GitHubToken.set(&mut creds, Some("ghp_x".into()));
        assert_eq!(Secret::GitHubToken.get(&creds).as_deref(), Some("ghp_x"));
        assert!(Secret::SearchPassword.get(&creds).is_none());
    }

    #[test]
    fn test_keyring_disabled_in_tests() {
        assert!(get_secret(Secret::ModelApiKey).is_none());
        assert!(set_secret(Secret::ModelApiKey, Some("x")).is_err());
    }
}

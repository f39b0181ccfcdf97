//! Token record and storage backends

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Fixed storage key for the persisted token record.
pub const TOKEN_STORAGE_KEY: &str = "spotify-tokens";

/// Refresh this long before the access token actually expires.
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_LIFETIME_SECS: u64 = 3600;

/// Upper bound on any advertised lifetime.
const MAX_LIFETIME_SECS: u64 = 365 * 24 * 3600;

/// Access token, refresh token and expiry, always stored and cleared together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(rename = "tokenExpiry", with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn new(access_token: String, refresh_token: String, expires_in_secs: Option<u64>) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: expiry_from_now(expires_in_secs),
        }
    }

    /// Apply a refresh response in place. The old refresh token survives when
    /// the server does not rotate it.
    pub fn apply_refresh(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
        expires_in_secs: Option<u64>,
    ) {
        self.access_token = access_token;
        if let Some(rt) = refresh_token {
            self.refresh_token = rt;
        }
        self.expires_at = expiry_from_now(expires_in_secs);
    }

    /// True once `now` is inside the five-minute safety margin.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

fn expiry_from_now(expires_in_secs: Option<u64>) -> DateTime<Utc> {
    let secs = expires_in_secs
        .unwrap_or(DEFAULT_LIFETIME_SECS)
        .min(MAX_LIFETIME_SECS);
    Utc::now() + Duration::seconds(secs as i64)
}

/// Token store trait for different storage backends
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<TokenRecord>>;
    fn save(&self, record: &TokenRecord) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON file named after [`TOKEN_STORAGE_KEY`], readable only by the owner.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(format!("{}.json", TOKEN_STORAGE_KEY)),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<TokenRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).context("Failed to read token file")?;
        let record = serde_json::from_str(&content).context("Failed to parse token file")?;
        Ok(Some(record))
    }

    fn save(&self, record: &TokenRecord) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("Failed to create token directory")?;
        }
        let content = serde_json::to_string(record).context("Failed to serialize tokens")?;

        // Write to a sibling file and rename so readers never see half a record.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).context("Failed to write token file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&tmp, perms).context("Failed to set token file permissions")?;
        }

        fs::rename(&tmp, &self.path).context("Failed to replace token file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove token file"),
        }
    }
}

#[cfg(test)]
pub use memory::MemoryTokenStore;


#[cfg(test)]
mod tests {
    use super::*;

    fn record_expiring_in(secs: i64) -> TokenRecord {
        TokenRecord {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Utc::now() + Duration::seconds(secs),
        }
    }

    #[test]
    fn test_needs_refresh_inside_margin() {
        let now = Utc::now();
        assert!(record_expiring_in(-10).needs_refresh(now));
        assert!(record_expiring_in(120).needs_refresh(now));
        assert!(!record_expiring_in(3600).needs_refresh(now));
    }

    #[test]
    fn test_apply_refresh_keeps_old_refresh_token() {
        let mut record = record_expiring_in(-10);
        record.apply_refresh("new-access".to_string(), None, Some(3600));
        assert_eq!(record.access_token, "new-access");
        assert_eq!(record.refresh_token, "refresh");
        assert!(!record.needs_refresh(Utc::now()));

        record.apply_refresh("newer".to_string(), Some("rotated".to_string()), None);
        assert_eq!(record.refresh_token, "rotated");
    }

    #[test]
    fn test_record_serialized_field_names() {
        let record = TokenRecord {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        };
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert_eq!(json["tokenExpiry"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_file_store_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        assert!(store.load().unwrap().is_none());

        let record = record_expiring_in(3600);
        store.save(&record).unwrap();
        assert!(store.path().ends_with("spotify-tokens.json"));

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, record.access_token);
        assert_eq!(
            loaded.expires_at.timestamp_millis(),
            record.expires_at.timestamp_millis()
        );

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        store.save(&record_expiring_in(3600)).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().is_err());
    }
}

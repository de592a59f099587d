//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file fills the rest from [`Default`].

mod proxy;
mod server;
mod sync;

pub use proxy::*;
pub use server::*;
pub use sync::*;

use std::collections::HashSet;

use cuihub_core::AccountRoute;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "dashboard": { "port": 4005 },
///   "accounts": [
///     { "id": "rafael", "localPort": 5001, "targetBaseUrl": "http://127.0.0.1:3001" }
///   ]
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Dashboard/observer server.
    pub dashboard: DashboardSettings,
    /// Proxied accounts, one listener each.
    pub accounts: Vec<AccountRoute>,
    /// Proxy behaviour and timings.
    pub proxy: ProxySettings,
    /// Auto-sync watcher.
    pub sync: SyncSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl HubSettings {
    /// Reject configurations the proxy set cannot be built from.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut ports = HashSet::new();
        for account in &self.accounts {
            if account.id.as_str().is_empty() {
                return Err(SettingsError::InvalidValue("account id must not be empty".into()));
            }
            if !ids.insert(account.id.as_str()) {
                return Err(SettingsError::InvalidValue(format!(
                    "duplicate account id {}",
                    account.id
                )));
            }
            if account.local_port == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "account {} has localPort 0",
                    account.id
                )));
            }
            if account.local_port == self.dashboard.port {
                return Err(SettingsError::InvalidValue(format!(
                    "account {} localPort {} collides with the dashboard port",
                    account.id, account.local_port
                )));
            }
            if !ports.insert(account.local_port) {
                return Err(SettingsError::InvalidValue(format!(
                    "duplicate localPort {}",
                    account.local_port
                )));
            }
            if !account.has_http_scheme() {
                return Err(SettingsError::InvalidValue(format!(
                    "account {} targetBaseUrl must start with http:// or https://",
                    account.id
                )));
            }
        }
        if !self.proxy.stream_prefix.starts_with('/') || !self.proxy.stream_prefix.ends_with('/') {
            return Err(SettingsError::InvalidValue(
                "proxy.streamPrefix must start and end with '/'".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_accounts(accounts: Vec<AccountRoute>) -> HubSettings {
        HubSettings {
            accounts,
            ..HubSettings::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        HubSettings::default().validate().unwrap();
    }

    #[test]
    fn distinct_accounts_are_valid() {
        let s = with_accounts(vec![
            AccountRoute::new("rafael", 5001, "http://127.0.0.1:3001"),
            AccountRoute::new("work", 5002, "https://cui.internal"),
        ]);
        s.validate().unwrap();
    }

    #[test]
    fn duplicate_ids_rejected() {
        let s = with_accounts(vec![
            AccountRoute::new("a", 5001, "http://h:1"),
            AccountRoute::new("a", 5002, "http://h:2"),
        ]);
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate account id a"));
    }

    #[test]
    fn duplicate_ports_rejected() {
        let s = with_accounts(vec![
            AccountRoute::new("a", 5001, "http://h:1"),
            AccountRoute::new("b", 5001, "http://h:2"),
        ]);
        assert!(s.validate().unwrap_err().to_string().contains("duplicate localPort"));
    }

    #[test]
    fn port_zero_rejected() {
        let s = with_accounts(vec![AccountRoute::new("a", 0, "http://h:1")]);
        assert!(s.validate().is_err());
    }

    #[test]
    fn dashboard_port_collision_rejected() {
        let s = with_accounts(vec![AccountRoute::new("a", 4005, "http://h:1")]);
        assert!(s.validate().unwrap_err().to_string().contains("dashboard port"));
    }

    #[test]
    fn non_http_target_rejected() {
        let s = with_accounts(vec![AccountRoute::new("a", 5001, "127.0.0.1:3001")]);
        assert!(s.validate().is_err());
    }

    #[test]
    fn bad_stream_prefix_rejected() {
        let mut s = HubSettings::default();
        s.proxy.stream_prefix = "api/stream".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: HubSettings =
            serde_json::from_str(r#"{"dashboard":{"port":4100},"sync":{"enabled":false}}"#).unwrap();
        assert_eq!(s.dashboard.port, 4100);
        assert_eq!(s.dashboard.host, "127.0.0.1");
        assert!(!s.sync.enabled);
        assert_eq!(s.sync.debounce_ms, 3_000);
    }
}

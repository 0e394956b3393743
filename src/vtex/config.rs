use once_cell::sync::Lazy;
use serde::Deserialize;
use std::env;
use tracing::warn;

/// Domain suffix for VTEX commerce accounts. Overridable so staging mirrors
/// can be targeted without code changes.
pub static VTEX_DOMAIN_SUFFIX: Lazy<String> = Lazy::new(|| {
    env::var("VTEX_DOMAIN_SUFFIX").unwrap_or_else(|_| "vtexcommercestable.com.br".to_string())
});

pub fn base_url_for(account_name: &str) -> String {
    format!("https://{account_name}.{}", VTEX_DOMAIN_SUFFIX.as_str())
}

/// One configured VTEX account: API credentials plus an optional parent
/// marketplace account id. Catalog truth is read with the marketplace
/// credentials, price/stock with the seller's own.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub account_name: String,
    pub app_key: String,
    pub app_token: String,
    #[serde(default)]
    pub marketplace: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedAccount {
    pub seller: AccountEntry,
    pub marketplace: AccountEntry,
}

#[derive(Clone, Default)]
pub struct AccountRegistry {
    entries: Vec<AccountEntry>,
}

impl AccountRegistry {
    /// Loads `VTEX_ACCOUNTS` (JSON array of account entries). An unset or
    /// malformed value yields an empty registry; every job against it fails
    /// with an unknown-account error rather than a panic at startup.
    pub fn from_env() -> Self {
        let raw = match env::var("VTEX_ACCOUNTS") {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<Vec<AccountEntry>>(&raw) {
            Ok(entries) => Self { entries },
            Err(err) => {
                warn!(target = "vitrina.vtex", error = %err, "VTEX_ACCOUNTS is not valid JSON; registry empty");
                Self::default()
            }
        }
    }

    pub fn resolve(&self, account_id: &str) -> Option<ResolvedAccount> {
        let seller = self.entries.iter().find(|e| e.id == account_id)?.clone();
        // A seller without a parent marketplace is its own read authority.
        let marketplace = seller
            .marketplace
            .as_deref()
            .and_then(|mk| self.entries.iter().find(|e| e.id == mk))
            .cloned()
            .unwrap_or_else(|| seller.clone());
        Some(ResolvedAccount {
            seller,
            marketplace,
        })
    }
}

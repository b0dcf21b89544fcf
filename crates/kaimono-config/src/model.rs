use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: u32,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    #[serde(default)]
    pub search: SearchConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Gmail search query used when listing candidate messages.
    pub gmail_query: String,
    /// How far back a full sync reaches, in days.
    pub lookback_days: u32,
    /// Messages handed to the parser per batch.
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Shortest search term routed through the FTS index. Terms below this
    /// fall back to LIKE-only matching; the trigram tokenizer cannot index
    /// shorter substrings.
    pub min_fts_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { min_fts_chars: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    pub items_per_page: usize,
    pub default_sort: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            database: DatabaseConfig {
                file_name: "kaimono.sqlite3".to_string(),
            },
            sync: SyncConfig {
                gmail_query: "category:purchases OR subject:(注文 OR ご注文 OR order)".to_string(),
                lookback_days: 365,
                batch_size: 25,
            },
            search: SearchConfig::default(),
            ui: UiConfig {
                items_per_page: 60,
                default_sort: "order_date".to_string(),
            },
        }
    }
}

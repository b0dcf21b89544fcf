use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One order parsed from a Gmail message, as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub gmail_message_id: String,
    pub shop_domain: String,
    pub shop_name: Option<String>,
    pub order_number: String,
    /// ISO date (`YYYY-MM-DD`) when the parser could extract one.
    pub order_date: Option<String>,
    pub total_price: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub name: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub price: Option<i64>,
    pub quantity: i64,
    pub product_master_id: Option<i64>,
}

/// Order payload arriving from the parse pipeline, before it has row ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub gmail_message_id: String,
    pub shop_domain: String,
    pub shop_name: Option<String>,
    pub order_number: String,
    pub order_date: Option<String>,
    pub total_price: Option<i64>,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub name: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub price: Option<i64>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

/// Denormalized read projection for the item browsing screen.
///
/// Carries both the value as originally parsed and the effective value after
/// override resolution; `has_override` is true whenever any effective value
/// differs from its original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItemRow {
    pub id: i64,
    pub order_id: i64,
    pub name: String,
    pub original_name: String,
    pub price: Option<i64>,
    pub original_price: Option<i64>,
    pub quantity: i64,
    pub original_quantity: i64,
    pub brand: Option<String>,
    pub original_brand: Option<String>,
    pub category: Option<String>,
    pub original_category: Option<String>,
    pub order_number: String,
    pub original_order_number: String,
    pub order_date: Option<String>,
    pub original_order_date: Option<String>,
    /// Effective display name: override shop name, else parsed shop name,
    /// else the shop domain.
    pub shop_display: String,
    pub shop_domain: String,
    pub image_path: Option<String>,
    pub delivery_status: Option<String>,
    pub maker: Option<String>,
    pub series: Option<String>,
    pub product_name: Option<String>,
    pub scale: Option<String>,
    pub reissue: bool,
    pub has_override: bool,
    pub created_at: String,
}

/// Distinct selectable filter values derived from non-excluded orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemFilterOptions {
    pub shop_domains: Vec<String>,
    pub years: Vec<i32>,
}

/// Manual correction for a parsed line item, keyed by business identifiers
/// rather than row ids so it survives a re-sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOverride {
    pub shop_domain: String,
    pub order_number: String,
    pub item_name: String,
    pub item_brand: Option<String>,
    pub name: Option<String>,
    pub price: Option<i64>,
    pub quantity: Option<i64>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Manual correction for a parsed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderOverride {
    pub shop_domain: String,
    pub order_number: String,
    pub new_order_number: Option<String>,
    pub order_date: Option<String>,
    pub shop_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Business-key reference to an excluded order, stable across re-syncs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedOrderRef {
    pub shop_domain: String,
    pub order_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedItemRef {
    pub shop_domain: String,
    pub order_number: String,
    pub item_name: String,
    pub item_brand: Option<String>,
}

/// Portable backup of everything the user hand-curated: overrides and
/// exclusions. Orders and items themselves are re-derivable from mail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataBackup {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub item_overrides: Vec<ItemOverride>,
    pub order_overrides: Vec<OrderOverride>,
    pub excluded_orders: Vec<ExcludedOrderRef>,
    pub excluded_items: Vec<ExcludedItemRef>,
}

pub const METADATA_BACKUP_VERSION: u32 = 1;

/// Outcome of a metadata import: how many entries landed and how many were
/// skipped because their referenced order or item no longer exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataImportStats {
    pub item_overrides: usize,
    pub order_overrides: usize,
    pub excluded_orders: usize,
    pub excluded_items: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Started,
    Ingesting,
    Completed,
    Failed,
    Cancelled,
}

/// Payload for `sync://progress` events emitted to the webview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    pub run_id: Uuid,
    pub phase: SyncPhase,
    pub message_count: i64,
    pub error: Option<String>,
}

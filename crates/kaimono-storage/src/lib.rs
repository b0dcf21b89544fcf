mod error;
mod escape;
mod executor;
mod query;
mod storage;

pub use error::StorageError;
pub use escape::{build_fts5_item_brand_query, escape_fts5_query, escape_like_prefix};
pub use executor::{QueryExecutor, SqlRow, SqlValue, SqliteExecutor};
pub use query::{
    get_order_item_filter_options, load_order_items, OrderItemFilter, SortDirection, SortKey,
    FTS_MIN_QUERY_CHARS,
};
pub use storage::Storage;

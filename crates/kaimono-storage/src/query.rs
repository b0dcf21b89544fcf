//! Read queries for the item browsing screen: the filtered/sorted item
//! listing and the distinct filter options derived from it.
//!
//! Queries are assembled as (fragment, params) pairs so placeholder order and
//! bound-argument order cannot drift apart. Callers hand in any
//! `QueryExecutor`; this module holds no state between calls.

use crate::escape::{build_fts5_item_brand_query, escape_like_prefix};
use crate::executor::{QueryExecutor, SqlRow, SqlValue};
use crate::StorageError;
use kaimono_core::{OrderItemFilterOptions, OrderItemRow};

/// Search terms shorter than this skip the FTS index: the trigram tokenizer
/// cannot index shorter substrings. Measured in characters, not bytes.
pub const FTS_MIN_QUERY_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    OrderDate,
    Price,
}

impl SortKey {
    /// Normalizes the raw UI string; anything but `"price"` is the default
    /// purchase-date ordering.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "price" => Self::Price,
            _ => Self::OrderDate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// Case-sensitive: anything but exactly `"asc"` or `"desc"` resolves to
    /// descending.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "asc" => Self::Asc,
            "desc" => Self::Desc,
            _ => Self::Desc,
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filter/sort parameters for [`load_order_items`]. All filters optional;
/// raw UI strings are normalized into the enums at the command boundary, so
/// this layer only ever sees valid variants.
#[derive(Debug, Clone, Default)]
pub struct OrderItemFilter {
    pub search: Option<String>,
    /// Exact match against the effective shop display name.
    pub shop: Option<String>,
    /// Calendar year of the effective order date.
    pub year: Option<i32>,
    /// Inclusive bounds on the effective price.
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub sort_key: SortKey,
    pub sort_direction: SortDirection,
    /// Config override for the FTS routing threshold.
    pub min_fts_chars: Option<usize>,
}

/// `override ?? original`: the one place the override-resolution rule lives.
fn effective(override_expr: &str, original: &str) -> String {
    format!("COALESCE({override_expr}, {original})")
}

/// Three-way resolution for fields with a second fallback.
fn effective_or(override_expr: &str, original: &str, fallback: &str) -> String {
    format!("COALESCE({override_expr}, {original}, {fallback})")
}

fn eff_name() -> String {
    effective("io.name", "i.name")
}

fn eff_price() -> String {
    effective("io.price", "i.price")
}

fn eff_brand() -> String {
    effective("io.brand", "i.brand")
}

fn eff_order_number() -> String {
    effective("oo.new_order_number", "o.order_number")
}

fn eff_order_date() -> String {
    effective("oo.order_date", "o.order_date")
}

fn eff_shop_name() -> String {
    effective("oo.shop_name", "o.shop_name")
}

fn shop_display() -> String {
    effective_or("oo.shop_name", "o.shop_name", "o.shop_domain")
}

/// Ordered list of AND-ed predicate fragments with their bound values kept
/// side by side.
struct ConditionSet {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl ConditionSet {
    fn new() -> Self {
        Self {
            // Always-true base so every real predicate appends uniformly.
            clauses: vec!["1 = 1".to_string()],
            params: Vec::new(),
        }
    }

    fn push(&mut self, clause: String, params: Vec<SqlValue>) {
        self.clauses.push(clause);
        self.params.extend(params);
    }

    fn clause_sql(&self) -> String {
        self.clauses.join("\n  AND ")
    }
}

fn select_clause() -> String {
    let has_override = [
        (eff_name(), "i.name"),
        (eff_price(), "i.price"),
        (effective("io.quantity", "i.quantity"), "i.quantity"),
        (eff_brand(), "i.brand"),
        (effective("io.category", "i.category"), "i.category"),
        (eff_order_number(), "o.order_number"),
        (eff_order_date(), "o.order_date"),
        (eff_shop_name(), "o.shop_name"),
    ]
    .iter()
    .map(|(effective_expr, original)| format!("{effective_expr} IS NOT {original}"))
    .collect::<Vec<_>>()
    .join(" OR ");

    format!(
        "SELECT
  i.id AS id,
  i.order_id AS order_id,
  {name} AS name,
  i.name AS original_name,
  {price} AS price,
  i.price AS original_price,
  {quantity} AS quantity,
  i.quantity AS original_quantity,
  {brand} AS brand,
  i.brand AS original_brand,
  {category} AS category,
  i.category AS original_category,
  {order_number} AS order_number,
  o.order_number AS original_order_number,
  {order_date} AS order_date,
  o.order_date AS original_order_date,
  {shop_display} AS shop_display,
  o.shop_domain AS shop_domain,
  img.file_path AS image_path,
  d.status AS delivery_status,
  pm.maker AS maker,
  pm.series AS series,
  pm.product_name AS product_name,
  pm.scale AS scale,
  COALESCE(pm.reissue, 0) AS reissue,
  CASE WHEN {has_override} THEN 1 ELSE 0 END AS has_override,
  i.created_at AS created_at
FROM items i
JOIN orders o ON o.id = i.order_id
LEFT JOIN order_overrides oo
  ON oo.shop_domain = o.shop_domain AND oo.order_number = o.order_number
LEFT JOIN item_overrides io
  ON io.shop_domain = o.shop_domain AND io.order_number = o.order_number
 AND io.item_name = i.name AND io.item_brand IS i.brand
LEFT JOIN images img
  ON img.id = (SELECT id FROM images WHERE item_id = i.id ORDER BY id DESC LIMIT 1)
LEFT JOIN deliveries d
  ON d.id = (SELECT id FROM deliveries WHERE order_id = i.order_id
             ORDER BY updated_at DESC, id DESC LIMIT 1)
LEFT JOIN product_master pm ON pm.id = i.product_master_id",
        name = eff_name(),
        price = eff_price(),
        quantity = effective("io.quantity", "i.quantity"),
        brand = eff_brand(),
        category = effective("io.category", "i.category"),
        order_number = eff_order_number(),
        order_date = eff_order_date(),
        shop_display = shop_display(),
    )
}

const NOT_EXCLUDED: &str = "NOT EXISTS (SELECT 1 FROM excluded_orders eo WHERE eo.order_id = o.id)
  AND NOT EXISTS (SELECT 1 FROM excluded_items ei WHERE ei.item_id = i.id)";

fn build_order_item_query(filter: &OrderItemFilter) -> (String, Vec<SqlValue>) {
    let mut conditions = ConditionSet::new();

    if let Some(term) = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty())
    {
        let threshold = filter.min_fts_chars.unwrap_or(FTS_MIN_QUERY_CHARS);
        let prefix_pattern = format!("{}%", escape_like_prefix(term));
        let contains_pattern = format!("%{}%", escape_like_prefix(term));

        let mut branches = Vec::new();
        let mut params = Vec::new();

        if term.chars().count() >= threshold {
            branches
                .push("i.id IN (SELECT rowid FROM items_fts WHERE items_fts MATCH ?)".to_string());
            params.push(SqlValue::from(build_fts5_item_brand_query(term)));
        }

        // Order numbers match from the start; the other fields match anywhere.
        let like_fields = [
            (eff_order_number(), prefix_pattern),
            ("o.shop_domain".to_string(), contains_pattern.clone()),
            (eff_shop_name(), contains_pattern.clone()),
            (eff_name(), contains_pattern.clone()),
            (eff_brand(), contains_pattern),
        ];
        for (expr, pattern) in like_fields {
            branches.push(format!("{expr} LIKE ? ESCAPE '\\'"));
            params.push(SqlValue::from(pattern));
        }

        conditions.push(format!("({})", branches.join(" OR ")), params);
    }

    if let Some(shop) = filter.shop.as_deref() {
        conditions.push(
            format!("{} = ?", shop_display()),
            vec![SqlValue::from(shop)],
        );
    }

    if let Some(year) = filter.year {
        // NULL effective date yields NULL here and matches nothing.
        conditions.push(
            format!("strftime('%Y', {}) = ?", eff_order_date()),
            vec![SqlValue::from(format!("{year:04}"))],
        );
    }

    if let Some(price_min) = filter.price_min {
        conditions.push(
            format!("{} >= ?", eff_price()),
            vec![SqlValue::from(price_min)],
        );
    }

    if let Some(price_max) = filter.price_max {
        conditions.push(
            format!("{} <= ?", eff_price()),
            vec![SqlValue::from(price_max)],
        );
    }

    let sort_expr = match filter.sort_key {
        SortKey::Price => eff_price(),
        SortKey::OrderDate => effective_or("oo.order_date", "o.order_date", "o.created_at"),
    };
    let direction = filter.sort_direction.as_sql();

    let sql = format!(
        "{select}
WHERE {not_excluded}
  AND {conditions}
ORDER BY {sort_expr} {direction}, i.id {direction}",
        select = select_clause(),
        not_excluded = NOT_EXCLUDED,
        conditions = conditions.clause_sql(),
    );

    (sql, conditions.params)
}

/// Loads the denormalized item listing. Issues exactly one `select` per
/// call; rows come back in query order, untouched beyond field mapping.
pub async fn load_order_items<E>(
    executor: &E,
    filter: &OrderItemFilter,
) -> Result<Vec<OrderItemRow>, StorageError>
where
    E: QueryExecutor + ?Sized,
{
    let (sql, params) = build_order_item_query(filter);
    let rows = executor.select(&sql, &params).await?;
    rows.iter().map(map_order_item_row).collect()
}

const SHOP_OPTIONS_SQL: &str = "\
SELECT DISTINCT COALESCE(oo.shop_name, o.shop_name, o.shop_domain) AS shop_display
FROM orders o
LEFT JOIN order_overrides oo
  ON oo.shop_domain = o.shop_domain AND oo.order_number = o.order_number
WHERE NOT EXISTS (SELECT 1 FROM excluded_orders eo WHERE eo.order_id = o.id)
  AND COALESCE(oo.shop_name, o.shop_name, o.shop_domain) IS NOT NULL
  AND COALESCE(oo.shop_name, o.shop_name, o.shop_domain) <> ''
ORDER BY shop_display ASC";

const YEAR_OPTIONS_SQL: &str = "\
SELECT DISTINCT strftime('%Y', COALESCE(oo.order_date, o.order_date)) AS yr
FROM orders o
LEFT JOIN order_overrides oo
  ON oo.shop_domain = o.shop_domain AND oo.order_number = o.order_number
WHERE NOT EXISTS (SELECT 1 FROM excluded_orders eo WHERE eo.order_id = o.id)
  AND COALESCE(oo.order_date, o.order_date) IS NOT NULL
  AND strftime('%Y', COALESCE(oo.order_date, o.order_date)) IS NOT NULL
  AND strftime('%Y', COALESCE(oo.order_date, o.order_date)) <> ''
ORDER BY yr DESC";

/// Distinct selectable shop names and purchase years over non-excluded
/// orders. The two queries run concurrently; either failing fails the call.
/// Row order from the executor is preserved.
pub async fn get_order_item_filter_options<E>(
    executor: &E,
) -> Result<OrderItemFilterOptions, StorageError>
where
    E: QueryExecutor + ?Sized,
{
    let shops = executor.select(SHOP_OPTIONS_SQL, &[]);
    let years = executor.select(YEAR_OPTIONS_SQL, &[]);
    let (shop_rows, year_rows) = tokio::try_join!(shops, years)?;

    let shop_domains = shop_rows
        .iter()
        .filter_map(|row| row.text("shop_display"))
        .collect();

    // Anything that fails to parse as an integer year is dropped.
    let years = year_rows
        .iter()
        .filter_map(|row| match row.get("yr") {
            Some(SqlValue::Text(raw)) => raw.parse::<i32>().ok(),
            Some(SqlValue::Integer(value)) => i32::try_from(*value).ok(),
            _ => None,
        })
        .collect();

    Ok(OrderItemFilterOptions {
        shop_domains,
        years,
    })
}

fn map_order_item_row(row: &SqlRow) -> Result<OrderItemRow, StorageError> {
    Ok(OrderItemRow {
        id: row.require_integer("id")?,
        order_id: row.require_integer("order_id")?,
        name: row.require_text("name")?,
        original_name: row.require_text("original_name")?,
        price: row.integer("price"),
        original_price: row.integer("original_price"),
        quantity: row.require_integer("quantity")?,
        original_quantity: row.require_integer("original_quantity")?,
        brand: row.text("brand"),
        original_brand: row.text("original_brand"),
        category: row.text("category"),
        original_category: row.text("original_category"),
        order_number: row.require_text("order_number")?,
        original_order_number: row.require_text("original_order_number")?,
        order_date: row.text("order_date"),
        original_order_date: row.text("original_order_date"),
        shop_display: row.require_text("shop_display")?,
        shop_domain: row.require_text("shop_domain")?,
        image_path: row.text("image_path"),
        delivery_status: row.text("delivery_status"),
        maker: row.text("maker"),
        series: row.text("series"),
        product_name: row.text("product_name"),
        scale: row.text("scale"),
        reissue: row.integer("reissue").unwrap_or(0) != 0,
        has_override: row.require_integer("has_override")? != 0,
        created_at: row.require_text("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct MockExecutor {
        calls: Mutex<Vec<(String, Vec<SqlValue>)>>,
        item_rows: Vec<SqlRow>,
        shop_rows: Vec<SqlRow>,
        year_rows: Vec<SqlRow>,
    }

    impl MockExecutor {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                item_rows: Vec::new(),
                shop_rows: Vec::new(),
                year_rows: Vec::new(),
            }
        }

        async fn calls(&self) -> Vec<(String, Vec<SqlValue>)> {
            self.calls.lock().await.clone()
        }
    }

    #[async_trait]
    impl QueryExecutor for MockExecutor {
        async fn select(
            &self,
            sql: &str,
            params: &[SqlValue],
        ) -> Result<Vec<SqlRow>, StorageError> {
            self.calls
                .lock()
                .await
                .push((sql.to_string(), params.to_vec()));

            if sql.contains("AS shop_display") && sql.starts_with("SELECT DISTINCT") {
                Ok(self.shop_rows.clone())
            } else if sql.contains("AS yr") {
                Ok(self.year_rows.clone())
            } else {
                Ok(self.item_rows.clone())
            }
        }
    }

    fn sample_item_row() -> SqlRow {
        SqlRow::new()
            .with("id", 7_i64)
            .with("order_id", 3_i64)
            .with("name", "RG ガンダム")
            .with("original_name", "RG ガンダム")
            .with("price", 2750_i64)
            .with("original_price", 2750_i64)
            .with("quantity", 1_i64)
            .with("original_quantity", 1_i64)
            .with("brand", "バンダイ")
            .with("original_brand", "バンダイ")
            .with("category", Option::<String>::None)
            .with("original_category", Option::<String>::None)
            .with("order_number", "123-456")
            .with("original_order_number", "123-456")
            .with("order_date", "2024-05-01")
            .with("original_order_date", "2024-05-01")
            .with("shop_display", "ホビーサーチ")
            .with("shop_domain", "1999.co.jp")
            .with("image_path", Option::<String>::None)
            .with("delivery_status", "shipped")
            .with("maker", Option::<String>::None)
            .with("series", Option::<String>::None)
            .with("product_name", Option::<String>::None)
            .with("scale", Option::<String>::None)
            .with("reissue", 0_i64)
            .with("has_override", 0_i64)
            .with("created_at", "2024-05-01 12:00:00")
    }

    fn text_params(params: &[SqlValue]) -> Vec<&str> {
        params.iter().filter_map(SqlValue::as_text).collect()
    }

    #[tokio::test]
    async fn default_query_sorts_by_effective_order_date_desc() {
        let executor = MockExecutor::new();
        load_order_items(&executor, &OrderItemFilter::default())
            .await
            .unwrap();

        let calls = executor.calls().await;
        assert_eq!(calls.len(), 1);
        let (sql, params) = &calls[0];
        assert!(
            sql.contains("ORDER BY COALESCE(oo.order_date, o.order_date, o.created_at) DESC"),
            "{sql}"
        );
        assert!(params.is_empty());
    }

    #[tokio::test]
    async fn price_sort_ascending_orders_on_effective_price() {
        let executor = MockExecutor::new();
        let filter = OrderItemFilter {
            sort_key: SortKey::Price,
            sort_direction: SortDirection::Asc,
            ..Default::default()
        };
        load_order_items(&executor, &filter).await.unwrap();

        let (sql, _) = &executor.calls().await[0];
        assert!(sql.contains("ORDER BY COALESCE(io.price, i.price) ASC"), "{sql}");
    }

    #[test]
    fn sort_normalization_falls_back_to_defaults() {
        assert_eq!(SortDirection::parse("asc"), SortDirection::Asc);
        assert_eq!(SortDirection::parse("desc"), SortDirection::Desc);
        // Case-sensitive: anything else is descending.
        assert_eq!(SortDirection::parse("ASC"), SortDirection::Desc);
        assert_eq!(SortDirection::parse("invalid"), SortDirection::Desc);
        assert_eq!(SortDirection::parse(""), SortDirection::Desc);

        assert_eq!(SortKey::parse("price"), SortKey::Price);
        assert_eq!(SortKey::parse("order_date"), SortKey::OrderDate);
        assert_eq!(SortKey::parse("bogus"), SortKey::OrderDate);
    }

    #[tokio::test]
    async fn invalid_direction_never_reaches_the_sql() {
        let executor = MockExecutor::new();
        let filter = OrderItemFilter {
            sort_direction: SortDirection::parse("invalid"),
            ..Default::default()
        };
        load_order_items(&executor, &filter).await.unwrap();

        let (sql, _) = &executor.calls().await[0];
        assert!(sql.contains(" DESC"), "{sql}");
        assert!(!sql.contains("invalid"), "{sql}");
    }

    #[tokio::test]
    async fn shop_filter_binds_the_value_exactly_once() {
        let executor = MockExecutor::new();
        let filter = OrderItemFilter {
            shop: Some("x".to_string()),
            ..Default::default()
        };
        load_order_items(&executor, &filter).await.unwrap();

        let (sql, params) = &executor.calls().await[0];
        assert!(
            sql.contains("COALESCE(oo.shop_name, o.shop_name, o.shop_domain) = ?"),
            "{sql}"
        );
        let occurrences = params
            .iter()
            .filter(|param| **param == SqlValue::Text("x".to_string()))
            .count();
        assert_eq!(occurrences, 1);
    }

    #[tokio::test]
    async fn price_bounds_are_bound_inclusively_in_order() {
        let executor = MockExecutor::new();
        let filter = OrderItemFilter {
            price_min: Some(100),
            price_max: Some(5000),
            ..Default::default()
        };
        load_order_items(&executor, &filter).await.unwrap();

        let (sql, params) = &executor.calls().await[0];
        assert!(sql.contains("COALESCE(io.price, i.price) >= ?"), "{sql}");
        assert!(sql.contains("COALESCE(io.price, i.price) <= ?"), "{sql}");
        assert_eq!(
            params,
            &vec![SqlValue::Integer(100), SqlValue::Integer(5000)]
        );
    }

    #[tokio::test]
    async fn year_filter_matches_effective_order_date_year() {
        let executor = MockExecutor::new();
        let filter = OrderItemFilter {
            year: Some(2024),
            ..Default::default()
        };
        load_order_items(&executor, &filter).await.unwrap();

        let (sql, params) = &executor.calls().await[0];
        assert!(
            sql.contains("strftime('%Y', COALESCE(oo.order_date, o.order_date)) = ?"),
            "{sql}"
        );
        assert_eq!(params, &vec![SqlValue::Text("2024".to_string())]);
    }

    #[tokio::test]
    async fn short_search_uses_like_only() {
        let executor = MockExecutor::new();
        let filter = OrderItemFilter {
            search: Some("ガン".to_string()),
            ..Default::default()
        };
        load_order_items(&executor, &filter).await.unwrap();

        let (sql, params) = &executor.calls().await[0];
        assert!(!sql.contains("MATCH"), "{sql}");
        assert_eq!(sql.matches("LIKE ? ESCAPE '\\'").count(), 5, "{sql}");
        assert_eq!(
            text_params(params),
            vec!["ガン%", "%ガン%", "%ガン%", "%ガン%", "%ガン%"]
        );
    }

    #[tokio::test]
    async fn long_search_combines_fts_match_with_like_fallback() {
        let executor = MockExecutor::new();
        let filter = OrderItemFilter {
            search: Some("RG ガンダム".to_string()),
            ..Default::default()
        };
        load_order_items(&executor, &filter).await.unwrap();

        let (sql, params) = &executor.calls().await[0];
        assert!(
            sql.contains("i.id IN (SELECT rowid FROM items_fts WHERE items_fts MATCH ?)"),
            "{sql}"
        );
        assert_eq!(sql.matches("LIKE ? ESCAPE '\\'").count(), 5, "{sql}");
        assert_eq!(params.len(), 6);
        assert_eq!(
            params[0],
            SqlValue::Text("{name brand} : (\"RG\" AND \"ガンダム\")".to_string())
        );
    }

    #[tokio::test]
    async fn like_patterns_are_escaped() {
        let executor = MockExecutor::new();
        let filter = OrderItemFilter {
            search: Some("50%".to_string()),
            ..Default::default()
        };
        load_order_items(&executor, &filter).await.unwrap();

        let (_, params) = &executor.calls().await[0];
        assert!(text_params(params).contains(&"50\\%%"));
        assert!(text_params(params).contains(&"%50\\%%"));
    }

    #[tokio::test]
    async fn whitespace_only_search_is_no_filter() {
        let executor = MockExecutor::new();
        let filter = OrderItemFilter {
            search: Some("   ".to_string()),
            ..Default::default()
        };
        load_order_items(&executor, &filter).await.unwrap();

        let (sql, params) = &executor.calls().await[0];
        assert!(!sql.contains("MATCH"), "{sql}");
        assert!(!sql.contains("LIKE"), "{sql}");
        assert!(params.is_empty());
    }

    #[tokio::test]
    async fn repeated_calls_with_identical_parameters_are_identical() {
        let mut executor = MockExecutor::new();
        executor.item_rows = vec![sample_item_row()];

        let filter = OrderItemFilter {
            search: Some("ガンダム".to_string()),
            year: Some(2024),
            ..Default::default()
        };
        let first = load_order_items(&executor, &filter).await.unwrap();
        let second = load_order_items(&executor, &filter).await.unwrap();

        assert_eq!(first, second);
        let calls = executor.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn filter_options_drop_unparseable_years_and_preserve_shop_order() {
        let mut executor = MockExecutor::new();
        executor.shop_rows = vec![
            SqlRow::new().with("shop_display", "ホビーサーチ"),
            SqlRow::new().with("shop_display", "shop2.com"),
        ];
        executor.year_rows = vec![
            SqlRow::new().with("yr", "2024"),
            SqlRow::new().with("yr", "invalid"),
        ];

        let options = get_order_item_filter_options(&executor).await.unwrap();
        assert_eq!(options.shop_domains, vec!["ホビーサーチ", "shop2.com"]);
        assert_eq!(options.years, vec![2024]);
        assert_eq!(executor.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn excluded_rows_are_suppressed_in_both_queries() {
        let executor = MockExecutor::new();
        load_order_items(&executor, &OrderItemFilter::default())
            .await
            .unwrap();
        get_order_item_filter_options(&executor).await.unwrap();

        for (sql, _) in executor.calls().await {
            assert!(sql.contains("NOT EXISTS (SELECT 1 FROM excluded_orders"), "{sql}");
        }
    }
}

use crate::executor::SqliteExecutor;
use crate::StorageError;
use chrono::{DateTime, Utc};
use kaimono_core::{
    ExcludedItemRef, ExcludedOrderRef, ItemOverride, MetadataBackup, MetadataImportStats,
    NewOrder, OrderOverride, SyncRun, SyncStatus, METADATA_BACKUP_VERSION,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn connect(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30))
            .pragma("temp_store", "memory");

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!(path = %db_path.display(), "sqlite storage ready");

        Ok(Self { pool })
    }

    /// Read-side executor over the same pool, for the query layer.
    pub fn executor(&self) -> SqliteExecutor {
        SqliteExecutor::new(self.pool.clone())
    }

    pub async fn order_count(&self) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }

    pub async fn item_count(&self) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }

    /// Inserts or refreshes one parsed order, keyed by its Gmail message id.
    /// Re-ingesting replaces the order's items wholesale; the FTS index
    /// follows through the content-sync triggers.
    pub async fn upsert_order(&self, order: &NewOrder) -> Result<i64, StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (
              gmail_message_id, shop_domain, shop_name, order_number,
              order_date, total_price
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(gmail_message_id) DO UPDATE SET
              shop_domain = excluded.shop_domain,
              shop_name = excluded.shop_name,
              order_number = excluded.order_number,
              order_date = excluded.order_date,
              total_price = excluded.total_price
            "#,
        )
        .bind(&order.gmail_message_id)
        .bind(&order.shop_domain)
        .bind(&order.shop_name)
        .bind(&order.order_number)
        .bind(&order.order_date)
        .bind(order.total_price)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT id FROM orders WHERE gmail_message_id = ?1")
            .bind(&order.gmail_message_id)
            .fetch_one(&mut *tx)
            .await?;
        let order_id: i64 = row.try_get("id")?;

        sqlx::query("DELETE FROM items WHERE order_id = ?1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO items (order_id, name, brand, category, price, quantity)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(order_id)
            .bind(&item.name)
            .bind(&item.brand)
            .bind(&item.category)
            .bind(item.price)
            .bind(item.quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(order_id)
    }

    pub async fn set_item_override(&self, entry: &ItemOverride) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO item_overrides (
              shop_domain, order_number, item_name, item_brand,
              name, price, quantity, brand, category, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(shop_domain, order_number, item_name, item_brand) DO UPDATE SET
              name = excluded.name,
              price = excluded.price,
              quantity = excluded.quantity,
              brand = excluded.brand,
              category = excluded.category,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(&entry.shop_domain)
        .bind(&entry.order_number)
        .bind(&entry.item_name)
        .bind(&entry.item_brand)
        .bind(&entry.name)
        .bind(entry.price)
        .bind(entry.quantity)
        .bind(&entry.brand)
        .bind(&entry.category)
        .bind(entry.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_item_override(
        &self,
        shop_domain: &str,
        order_number: &str,
        item_name: &str,
        item_brand: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            DELETE FROM item_overrides
            WHERE shop_domain = ?1 AND order_number = ?2
              AND item_name = ?3 AND item_brand IS ?4
            "#,
        )
        .bind(shop_domain)
        .bind(order_number)
        .bind(item_name)
        .bind(item_brand)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_item_overrides(&self) -> Result<Vec<ItemOverride>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT shop_domain, order_number, item_name, item_brand,
                   name, price, quantity, brand, category, updated_at
            FROM item_overrides
            ORDER BY shop_domain, order_number, item_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item_override).collect()
    }

    pub async fn set_order_override(&self, entry: &OrderOverride) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO order_overrides (
              shop_domain, order_number, new_order_number, order_date,
              shop_name, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(shop_domain, order_number) DO UPDATE SET
              new_order_number = excluded.new_order_number,
              order_date = excluded.order_date,
              shop_name = excluded.shop_name,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(&entry.shop_domain)
        .bind(&entry.order_number)
        .bind(&entry.new_order_number)
        .bind(&entry.order_date)
        .bind(&entry.shop_name)
        .bind(entry.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_order_override(
        &self,
        shop_domain: &str,
        order_number: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "DELETE FROM order_overrides WHERE shop_domain = ?1 AND order_number = ?2",
        )
        .bind(shop_domain)
        .bind(order_number)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_order_overrides(&self) -> Result<Vec<OrderOverride>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT shop_domain, order_number, new_order_number, order_date,
                   shop_name, updated_at
            FROM order_overrides
            ORDER BY shop_domain, order_number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order_override).collect()
    }

    pub async fn exclude_order(&self, order_id: i64) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO excluded_orders (order_id, excluded_at)
            VALUES (?1, ?2)
            ON CONFLICT(order_id) DO NOTHING
            "#,
        )
        .bind(order_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn restore_order(&self, order_id: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM excluded_orders WHERE order_id = ?1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn exclude_item(&self, item_id: i64) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO excluded_items (item_id, excluded_at)
            VALUES (?1, ?2)
            ON CONFLICT(item_id) DO NOTHING
            "#,
        )
        .bind(item_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn restore_item(&self, item_id: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM excluded_items WHERE item_id = ?1")
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Excluded orders as business-key references, for export.
    pub async fn list_excluded_order_refs(&self) -> Result<Vec<ExcludedOrderRef>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT o.shop_domain, o.order_number
            FROM excluded_orders eo
            JOIN orders o ON o.id = eo.order_id
            ORDER BY o.shop_domain, o.order_number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ExcludedOrderRef {
                    shop_domain: row.try_get("shop_domain")?,
                    order_number: row.try_get("order_number")?,
                })
            })
            .collect()
    }

    pub async fn list_excluded_item_refs(&self) -> Result<Vec<ExcludedItemRef>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT o.shop_domain, o.order_number, i.name AS item_name, i.brand AS item_brand
            FROM excluded_items ei
            JOIN items i ON i.id = ei.item_id
            JOIN orders o ON o.id = i.order_id
            ORDER BY o.shop_domain, o.order_number, i.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ExcludedItemRef {
                    shop_domain: row.try_get("shop_domain")?,
                    order_number: row.try_get("order_number")?,
                    item_name: row.try_get("item_name")?,
                    item_brand: row.try_get("item_brand")?,
                })
            })
            .collect()
    }

    /// Everything the user hand-curated, as one portable document.
    pub async fn metadata_snapshot(&self) -> Result<MetadataBackup, StorageError> {
        Ok(MetadataBackup {
            version: METADATA_BACKUP_VERSION,
            exported_at: Utc::now(),
            item_overrides: self.list_item_overrides().await?,
            order_overrides: self.list_order_overrides().await?,
            excluded_orders: self.list_excluded_order_refs().await?,
            excluded_items: self.list_excluded_item_refs().await?,
        })
    }

    /// Replaces all overrides and exclusions with the backup's contents in
    /// one transaction. Exclusion references whose order or item no longer
    /// exists are skipped and counted, not treated as errors.
    pub async fn import_metadata(
        &self,
        backup: &MetadataBackup,
    ) -> Result<MetadataImportStats, StorageError> {
        if backup.version != METADATA_BACKUP_VERSION {
            return Err(StorageError::Data(format!(
                "unsupported metadata backup version {}",
                backup.version
            )));
        }

        let mut tx = self.pool.begin().await?;
        let mut stats = MetadataImportStats::default();

        sqlx::query("DELETE FROM item_overrides")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM order_overrides")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM excluded_orders")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM excluded_items")
            .execute(&mut *tx)
            .await?;

        for entry in &backup.item_overrides {
            sqlx::query(
                r#"
                INSERT INTO item_overrides (
                  shop_domain, order_number, item_name, item_brand,
                  name, price, quantity, brand, category, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(&entry.shop_domain)
            .bind(&entry.order_number)
            .bind(&entry.item_name)
            .bind(&entry.item_brand)
            .bind(&entry.name)
            .bind(entry.price)
            .bind(entry.quantity)
            .bind(&entry.brand)
            .bind(&entry.category)
            .bind(entry.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
            stats.item_overrides += 1;
        }

        for entry in &backup.order_overrides {
            sqlx::query(
                r#"
                INSERT INTO order_overrides (
                  shop_domain, order_number, new_order_number, order_date,
                  shop_name, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&entry.shop_domain)
            .bind(&entry.order_number)
            .bind(&entry.new_order_number)
            .bind(&entry.order_date)
            .bind(&entry.shop_name)
            .bind(entry.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
            stats.order_overrides += 1;
        }

        let excluded_at = Utc::now().to_rfc3339();

        for entry in &backup.excluded_orders {
            let row = sqlx::query(
                "SELECT id FROM orders WHERE shop_domain = ?1 AND order_number = ?2",
            )
            .bind(&entry.shop_domain)
            .bind(&entry.order_number)
            .fetch_optional(&mut *tx)
            .await?;

            match row {
                Some(row) => {
                    let order_id: i64 = row.try_get("id")?;
                    sqlx::query(
                        r#"
                        INSERT INTO excluded_orders (order_id, excluded_at)
                        VALUES (?1, ?2)
                        ON CONFLICT(order_id) DO NOTHING
                        "#,
                    )
                    .bind(order_id)
                    .bind(&excluded_at)
                    .execute(&mut *tx)
                    .await?;
                    stats.excluded_orders += 1;
                }
                None => stats.skipped += 1,
            }
        }

        for entry in &backup.excluded_items {
            let row = sqlx::query(
                r#"
                SELECT i.id
                FROM items i
                JOIN orders o ON o.id = i.order_id
                WHERE o.shop_domain = ?1 AND o.order_number = ?2
                  AND i.name = ?3 AND i.brand IS ?4
                "#,
            )
            .bind(&entry.shop_domain)
            .bind(&entry.order_number)
            .bind(&entry.item_name)
            .bind(&entry.item_brand)
            .fetch_optional(&mut *tx)
            .await?;

            match row {
                Some(row) => {
                    let item_id: i64 = row.try_get("id")?;
                    sqlx::query(
                        r#"
                        INSERT INTO excluded_items (item_id, excluded_at)
                        VALUES (?1, ?2)
                        ON CONFLICT(item_id) DO NOTHING
                        "#,
                    )
                    .bind(item_id)
                    .bind(&excluded_at)
                    .execute(&mut *tx)
                    .await?;
                    stats.excluded_items += 1;
                }
                None => stats.skipped += 1,
            }
        }

        tx.commit().await?;
        tracing::info!(
            item_overrides = stats.item_overrides,
            order_overrides = stats.order_overrides,
            skipped = stats.skipped,
            "metadata import applied"
        );
        Ok(stats)
    }

    pub async fn create_sync_run(&self) -> Result<SyncRun, StorageError> {
        let run = SyncRun {
            id: Uuid::new_v4(),
            status: SyncStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            message_count: 0,
            last_error: None,
        };

        sqlx::query(
            r#"
            INSERT INTO sync_runs (id, status, started_at, message_count)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.status.as_str())
        .bind(run.started_at.to_rfc3339())
        .bind(run.message_count)
        .execute(&self.pool)
        .await?;

        Ok(run)
    }

    pub async fn update_sync_run_progress(
        &self,
        id: Uuid,
        message_count: i64,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE sync_runs SET message_count = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(message_count)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn finish_sync_run(
        &self,
        id: Uuid,
        status: SyncStatus,
        last_error: Option<String>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = ?2, finished_at = ?3, last_error = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn latest_sync_run(&self) -> Result<Option<SyncRun>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, status, started_at, finished_at, message_count, last_error
            FROM sync_runs
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_sync_run).transpose()
    }

    /// Marks runs left `running` by a crash or forced quit as failed.
    /// Called once at startup, before any new run can begin.
    pub async fn fail_interrupted_sync_runs(&self) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = ?1, finished_at = ?2, last_error = ?3
            WHERE status = ?4
            "#,
        )
        .bind(SyncStatus::Failed.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind("interrupted by shutdown")
        .bind(SyncStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    fn row_to_item_override(row: sqlx::sqlite::SqliteRow) -> Result<ItemOverride, StorageError> {
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(ItemOverride {
            shop_domain: row.try_get("shop_domain")?,
            order_number: row.try_get("order_number")?,
            item_name: row.try_get("item_name")?,
            item_brand: row.try_get("item_brand")?,
            name: row.try_get("name")?,
            price: row.try_get("price")?,
            quantity: row.try_get("quantity")?,
            brand: row.try_get("brand")?,
            category: row.try_get("category")?,
            updated_at: parse_datetime(&updated_raw, "item_overrides.updated_at")?,
        })
    }

    fn row_to_order_override(row: sqlx::sqlite::SqliteRow) -> Result<OrderOverride, StorageError> {
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(OrderOverride {
            shop_domain: row.try_get("shop_domain")?,
            order_number: row.try_get("order_number")?,
            new_order_number: row.try_get("new_order_number")?,
            order_date: row.try_get("order_date")?,
            shop_name: row.try_get("shop_name")?,
            updated_at: parse_datetime(&updated_raw, "order_overrides.updated_at")?,
        })
    }

    fn row_to_sync_run(row: sqlx::sqlite::SqliteRow) -> Result<SyncRun, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let status_raw: String = row.try_get("status")?;
        let started_raw: String = row.try_get("started_at")?;
        let finished_raw: Option<String> = row.try_get("finished_at")?;

        Ok(SyncRun {
            id: parse_uuid(&id_raw, "sync_runs.id")?,
            status: SyncStatus::parse(&status_raw).ok_or_else(|| {
                StorageError::Data(format!("invalid sync status `{status_raw}`"))
            })?,
            started_at: parse_datetime(&started_raw, "sync_runs.started_at")?,
            finished_at: finished_raw
                .as_deref()
                .map(|raw| parse_datetime(raw, "sync_runs.finished_at"))
                .transpose()?,
            message_count: row.try_get("message_count")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw)
        .map_err(|err| StorageError::Data(format!("invalid uuid for {field}: {err}")))
}

fn parse_datetime(raw: &str, field: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StorageError::Data(format!("invalid datetime for {field}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{load_order_items, OrderItemFilter};
    use crate::{get_order_item_filter_options, SortDirection, SortKey};
    use kaimono_core::NewOrderItem;
    use tempfile::TempDir;

    async fn open_storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::connect(&dir.path().join("kaimono.sqlite3"))
            .await
            .unwrap();
        (dir, storage)
    }

    fn gundam_order() -> NewOrder {
        NewOrder {
            gmail_message_id: "msg-001".to_string(),
            shop_domain: "1999.co.jp".to_string(),
            shop_name: Some("ホビーサーチ".to_string()),
            order_number: "123-456".to_string(),
            order_date: Some("2024-05-01".to_string()),
            total_price: Some(2750),
            items: vec![NewOrderItem {
                name: "RG ガンダムエアリアル".to_string(),
                brand: Some("バンダイ".to_string()),
                category: Some("プラモデル".to_string()),
                price: Some(2750),
                quantity: 1,
            }],
        }
    }

    #[tokio::test]
    async fn upsert_then_fts_search_finds_the_item() {
        let (_dir, storage) = open_storage().await;
        storage.upsert_order(&gundam_order()).await.unwrap();

        let executor = storage.executor();
        let filter = OrderItemFilter {
            search: Some("ガンダム".to_string()),
            ..Default::default()
        };
        let rows = load_order_items(&executor, &filter).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "RG ガンダムエアリアル");
        assert_eq!(rows[0].shop_display, "ホビーサーチ");
        assert!(!rows[0].has_override);
    }

    #[tokio::test]
    async fn reingesting_the_same_message_replaces_items() {
        let (_dir, storage) = open_storage().await;
        let first_id = storage.upsert_order(&gundam_order()).await.unwrap();

        let mut updated = gundam_order();
        updated.items[0].name = "MG ザクII".to_string();
        let second_id = storage.upsert_order(&updated).await.unwrap();

        assert_eq!(first_id, second_id);
        assert_eq!(storage.order_count().await.unwrap(), 1);
        assert_eq!(storage.item_count().await.unwrap(), 1);

        let executor = storage.executor();
        let rows = load_order_items(&executor, &OrderItemFilter::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "MG ザクII");

        // FTS index followed the replacement through the triggers.
        let stale = load_order_items(
            &executor,
            &OrderItemFilter {
                search: Some("ガンダム".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn item_override_changes_effective_values_and_flags_the_row() {
        let (_dir, storage) = open_storage().await;
        storage.upsert_order(&gundam_order()).await.unwrap();

        storage
            .set_item_override(&ItemOverride {
                shop_domain: "1999.co.jp".to_string(),
                order_number: "123-456".to_string(),
                item_name: "RG ガンダムエアリアル".to_string(),
                item_brand: Some("バンダイ".to_string()),
                name: None,
                price: Some(1980),
                quantity: None,
                brand: None,
                category: None,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let executor = storage.executor();
        let rows = load_order_items(&executor, &OrderItemFilter::default())
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, Some(1980));
        assert_eq!(rows[0].original_price, Some(2750));
        assert_eq!(rows[0].name, "RG ガンダムエアリアル");
        assert!(rows[0].has_override);

        storage
            .delete_item_override(
                "1999.co.jp",
                "123-456",
                "RG ガンダムエアリアル",
                Some("バンダイ"),
            )
            .await
            .unwrap();

        let rows = load_order_items(&executor, &OrderItemFilter::default())
            .await
            .unwrap();
        assert_eq!(rows[0].price, Some(2750));
        assert!(!rows[0].has_override);
    }

    #[tokio::test]
    async fn order_override_renames_the_shop_everywhere() {
        let (_dir, storage) = open_storage().await;
        storage.upsert_order(&gundam_order()).await.unwrap();

        storage
            .set_order_override(&OrderOverride {
                shop_domain: "1999.co.jp".to_string(),
                order_number: "123-456".to_string(),
                new_order_number: None,
                order_date: Some("2023-12-31".to_string()),
                shop_name: Some("Hobby Search".to_string()),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let executor = storage.executor();
        let rows = load_order_items(&executor, &OrderItemFilter::default())
            .await
            .unwrap();
        assert_eq!(rows[0].shop_display, "Hobby Search");
        assert_eq!(rows[0].order_date.as_deref(), Some("2023-12-31"));
        assert_eq!(rows[0].original_order_date.as_deref(), Some("2024-05-01"));
        assert!(rows[0].has_override);

        let options = get_order_item_filter_options(&executor).await.unwrap();
        assert_eq!(options.shop_domains, vec!["Hobby Search"]);
        assert_eq!(options.years, vec![2023]);
    }

    #[tokio::test]
    async fn excluded_orders_vanish_from_listing_and_options_until_restored() {
        let (_dir, storage) = open_storage().await;
        let order_id = storage.upsert_order(&gundam_order()).await.unwrap();

        storage.exclude_order(order_id).await.unwrap();

        let executor = storage.executor();
        let rows = load_order_items(&executor, &OrderItemFilter::default())
            .await
            .unwrap();
        assert!(rows.is_empty());

        let options = get_order_item_filter_options(&executor).await.unwrap();
        assert!(options.shop_domains.is_empty());
        assert!(options.years.is_empty());

        storage.restore_order(order_id).await.unwrap();
        let rows = load_order_items(&executor, &OrderItemFilter::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn price_sort_uses_effective_prices() {
        let (_dir, storage) = open_storage().await;
        let mut cheap = gundam_order();
        cheap.gmail_message_id = "msg-010".to_string();
        cheap.order_number = "A-1".to_string();
        cheap.items[0].name = "HG グフ".to_string();
        cheap.items[0].price = Some(880);
        storage.upsert_order(&cheap).await.unwrap();
        storage.upsert_order(&gundam_order()).await.unwrap();

        let executor = storage.executor();
        let filter = OrderItemFilter {
            sort_key: SortKey::Price,
            sort_direction: SortDirection::Asc,
            ..Default::default()
        };
        let rows = load_order_items(&executor, &filter).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].price, Some(880));
        assert_eq!(rows[1].price, Some(2750));
    }

    #[tokio::test]
    async fn metadata_roundtrip_restores_curation_and_skips_stale_refs() {
        let (_dir, storage) = open_storage().await;
        let order_id = storage.upsert_order(&gundam_order()).await.unwrap();
        storage.exclude_order(order_id).await.unwrap();
        storage
            .set_order_override(&OrderOverride {
                shop_domain: "1999.co.jp".to_string(),
                order_number: "123-456".to_string(),
                new_order_number: Some("R-123".to_string()),
                order_date: None,
                shop_name: None,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let mut backup = storage.metadata_snapshot().await.unwrap();
        assert_eq!(backup.version, METADATA_BACKUP_VERSION);
        assert_eq!(backup.excluded_orders.len(), 1);
        assert_eq!(backup.order_overrides.len(), 1);

        // Reference to an order the target database never saw.
        backup.excluded_orders.push(ExcludedOrderRef {
            shop_domain: "gone.example".to_string(),
            order_number: "Z-999".to_string(),
        });

        let (_dir2, target) = open_storage().await;
        target.upsert_order(&gundam_order()).await.unwrap();
        let stats = target.import_metadata(&backup).await.unwrap();

        assert_eq!(stats.order_overrides, 1);
        assert_eq!(stats.excluded_orders, 1);
        assert_eq!(stats.skipped, 1);

        let executor = target.executor();
        let rows = load_order_items(&executor, &OrderItemFilter::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn import_rejects_unknown_backup_version() {
        let (_dir, storage) = open_storage().await;
        let mut backup = storage.metadata_snapshot().await.unwrap();
        backup.version = 99;

        let err = storage.import_metadata(&backup).await.unwrap_err();
        assert!(matches!(err, StorageError::Data(_)));
    }

    #[tokio::test]
    async fn sync_run_lifecycle_and_interrupted_recovery() {
        let (_dir, storage) = open_storage().await;
        let run = storage.create_sync_run().await.unwrap();
        assert_eq!(run.status, SyncStatus::Running);

        storage
            .update_sync_run_progress(run.id, 12)
            .await
            .unwrap();
        storage
            .finish_sync_run(run.id, SyncStatus::Completed, None)
            .await
            .unwrap();

        let latest = storage.latest_sync_run().await.unwrap().unwrap();
        assert_eq!(latest.id, run.id);
        assert_eq!(latest.status, SyncStatus::Completed);
        assert_eq!(latest.message_count, 12);
        assert!(latest.finished_at.is_some());

        let orphan = storage.create_sync_run().await.unwrap();
        let recovered = storage.fail_interrupted_sync_runs().await.unwrap();
        assert_eq!(recovered, 1);

        let latest = storage.latest_sync_run().await.unwrap().unwrap();
        assert_eq!(latest.id, orphan.id);
        assert_eq!(latest.status, SyncStatus::Failed);
        assert_eq!(latest.last_error.as_deref(), Some("interrupted by shutdown"));
    }
}

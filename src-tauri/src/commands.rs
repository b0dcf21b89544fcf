use crate::state::AppState;
use chrono::Utc;
use kaimono_config::AppConfig;
use kaimono_core::{
    ItemOverride, MetadataBackup, MetadataImportStats, NewOrder, OrderItemFilterOptions,
    OrderItemRow, OrderOverride, SyncPhase, SyncProgress, SyncRun, SyncStatus,
};
use kaimono_security::SecretKey;
use kaimono_storage::{OrderItemFilter, SortDirection, SortKey};
use serde::{Deserialize, Serialize};
use tauri::{Emitter, State};
use tauri_plugin_notification::NotificationExt;
use uuid::Uuid;

const GEMINI_API_KEY: (&str, &str) = ("gemini", "api_key");
const GMAIL_CLIENT_ID: (&str, &str) = ("gmail", "client_id");
const GMAIL_CLIENT_SECRET: (&str, &str) = ("gmail", "client_secret");

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub config: AppConfig,
    pub order_count: i64,
    pub item_count: i64,
    pub latest_sync: Option<SyncRun>,
    pub has_gemini_api_key: bool,
    pub has_gmail_credentials: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct OrderItemQueryPayload {
    pub search: Option<String>,
    pub shop: Option<String>,
    pub year: Option<i32>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    /// Raw UI strings; normalized here, never inside the query layer.
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GmailCredentialsPayload {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestOrdersPayload {
    pub run_id: Uuid,
    pub orders: Vec<NewOrder>,
}

#[derive(Debug, Deserialize)]
pub struct ItemOverridePayload {
    pub shop_domain: String,
    pub order_number: String,
    pub item_name: String,
    pub item_brand: Option<String>,
    pub name: Option<String>,
    pub price: Option<i64>,
    pub quantity: Option<i64>,
    pub brand: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ItemOverrideKeyPayload {
    pub shop_domain: String,
    pub order_number: String,
    pub item_name: String,
    pub item_brand: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderOverridePayload {
    pub shop_domain: String,
    pub order_number: String,
    pub new_order_number: Option<String>,
    pub order_date: Option<String>,
    pub shop_name: Option<String>,
}

#[tauri::command]
pub async fn bootstrap(state: State<'_, AppState>) -> Result<BootstrapResponse, String> {
    let config = state.config().await;
    let order_count = state.storage.order_count().await.map_err(to_error_string)?;
    let item_count = state.storage.item_count().await.map_err(to_error_string)?;
    let latest_sync = state
        .storage
        .latest_sync_run()
        .await
        .map_err(to_error_string)?;
    let has_gemini_api_key = state
        .secrets
        .exists(&SecretKey::new(GEMINI_API_KEY.0, GEMINI_API_KEY.1))
        .map_err(to_error_string)?;
    let has_gmail_credentials = state
        .secrets
        .exists(&SecretKey::new(GMAIL_CLIENT_ID.0, GMAIL_CLIENT_ID.1))
        .map_err(to_error_string)?;

    Ok(BootstrapResponse {
        config,
        order_count,
        item_count,
        latest_sync,
        has_gemini_api_key,
        has_gmail_credentials,
    })
}

#[tauri::command]
pub async fn get_config(state: State<'_, AppState>) -> Result<AppConfig, String> {
    Ok(state.config().await)
}

#[tauri::command]
pub async fn save_config(state: State<'_, AppState>, config: AppConfig) -> Result<(), String> {
    state.set_config(config).await.map_err(to_error_string)
}

#[tauri::command]
pub async fn load_order_items(
    state: State<'_, AppState>,
    payload: OrderItemQueryPayload,
) -> Result<Vec<OrderItemRow>, String> {
    let config = state.config().await;
    let sort_by = payload
        .sort_by
        .unwrap_or_else(|| config.ui.default_sort.clone());

    let filter = OrderItemFilter {
        search: payload.search,
        shop: payload.shop,
        year: payload.year,
        price_min: payload.price_min,
        price_max: payload.price_max,
        sort_key: SortKey::parse(&sort_by),
        sort_direction: payload
            .sort_order
            .as_deref()
            .map(SortDirection::parse)
            .unwrap_or_default(),
        min_fts_chars: Some(config.search.min_fts_chars),
    };

    kaimono_storage::load_order_items(&state.storage.executor(), &filter)
        .await
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn get_order_item_filter_options(
    state: State<'_, AppState>,
) -> Result<OrderItemFilterOptions, String> {
    kaimono_storage::get_order_item_filter_options(&state.storage.executor())
        .await
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn save_gemini_api_key(
    state: State<'_, AppState>,
    api_key: String,
) -> Result<(), String> {
    if api_key.trim().is_empty() {
        return Err("API key must not be empty".to_string());
    }
    state
        .secrets
        .set(&SecretKey::new(GEMINI_API_KEY.0, GEMINI_API_KEY.1), &api_key)
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn delete_gemini_api_key(state: State<'_, AppState>) -> Result<(), String> {
    state
        .secrets
        .delete(&SecretKey::new(GEMINI_API_KEY.0, GEMINI_API_KEY.1))
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn has_gemini_api_key(state: State<'_, AppState>) -> Result<bool, String> {
    state
        .secrets
        .exists(&SecretKey::new(GEMINI_API_KEY.0, GEMINI_API_KEY.1))
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn save_gmail_credentials(
    state: State<'_, AppState>,
    payload: GmailCredentialsPayload,
) -> Result<(), String> {
    if payload.client_id.trim().is_empty() || payload.client_secret.trim().is_empty() {
        return Err("Gmail client id and secret must not be empty".to_string());
    }
    state
        .secrets
        .set(
            &SecretKey::new(GMAIL_CLIENT_ID.0, GMAIL_CLIENT_ID.1),
            &payload.client_id,
        )
        .map_err(to_error_string)?;
    state
        .secrets
        .set(
            &SecretKey::new(GMAIL_CLIENT_SECRET.0, GMAIL_CLIENT_SECRET.1),
            &payload.client_secret,
        )
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn delete_gmail_credentials(state: State<'_, AppState>) -> Result<(), String> {
    state
        .secrets
        .delete(&SecretKey::new(GMAIL_CLIENT_ID.0, GMAIL_CLIENT_ID.1))
        .map_err(to_error_string)?;
    state
        .secrets
        .delete(&SecretKey::new(GMAIL_CLIENT_SECRET.0, GMAIL_CLIENT_SECRET.1))
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn start_sync(
    state: State<'_, AppState>,
    app_handle: tauri::AppHandle,
) -> Result<SyncRun, String> {
    let mut active = state.active_sync.lock().await;
    if active.is_some() {
        return Err("a sync run is already active".to_string());
    }

    let run = state
        .storage
        .create_sync_run()
        .await
        .map_err(to_error_string)?;
    tracing::info!(run_id = %run.id, "sync run started");
    emit_sync_progress(&app_handle, &run, SyncPhase::Started, None);

    *active = Some(run.clone());
    Ok(run)
}

#[tauri::command]
pub async fn ingest_orders(
    state: State<'_, AppState>,
    app_handle: tauri::AppHandle,
    payload: IngestOrdersPayload,
) -> Result<i64, String> {
    let mut active = state.active_sync.lock().await;
    let run = active
        .as_mut()
        .filter(|run| run.id == payload.run_id)
        .ok_or_else(|| "no active sync run with that id".to_string())?;

    for order in &payload.orders {
        state
            .storage
            .upsert_order(order)
            .await
            .map_err(to_error_string)?;
    }

    run.message_count += payload.orders.len() as i64;
    state
        .storage
        .update_sync_run_progress(run.id, run.message_count)
        .await
        .map_err(to_error_string)?;
    emit_sync_progress(&app_handle, run, SyncPhase::Ingesting, None);

    Ok(run.message_count)
}

#[tauri::command]
pub async fn finish_sync(
    state: State<'_, AppState>,
    app_handle: tauri::AppHandle,
    run_id: Uuid,
    error: Option<String>,
) -> Result<SyncRun, String> {
    let run = take_active_run(&state, run_id).await?;
    let status = if error.is_some() {
        SyncStatus::Failed
    } else {
        SyncStatus::Completed
    };
    state
        .storage
        .finish_sync_run(run.id, status, error.clone())
        .await
        .map_err(to_error_string)?;

    if let Some(message) = error {
        tracing::warn!(run_id = %run.id, error = %message, "sync run failed");
        emit_sync_progress(&app_handle, &run, SyncPhase::Failed, Some(message));
    } else {
        tracing::info!(run_id = %run.id, messages = run.message_count, "sync run completed");
        emit_sync_progress(&app_handle, &run, SyncPhase::Completed, None);
        let _ = app_handle
            .notification()
            .builder()
            .title("Kaimono")
            .body(format!("同期が完了しました（{}件）", run.message_count))
            .show();
    }

    state
        .storage
        .latest_sync_run()
        .await
        .map_err(to_error_string)?
        .ok_or_else(|| "sync run disappeared".to_string())
}

#[tauri::command]
pub async fn cancel_sync(
    state: State<'_, AppState>,
    app_handle: tauri::AppHandle,
    run_id: Uuid,
) -> Result<(), String> {
    let run = take_active_run(&state, run_id).await?;
    state
        .storage
        .finish_sync_run(run.id, SyncStatus::Cancelled, None)
        .await
        .map_err(to_error_string)?;
    tracing::info!(run_id = %run.id, "sync run cancelled");
    emit_sync_progress(&app_handle, &run, SyncPhase::Cancelled, None);
    Ok(())
}

#[tauri::command]
pub async fn get_sync_status(state: State<'_, AppState>) -> Result<Option<SyncRun>, String> {
    state.storage.latest_sync_run().await.map_err(to_error_string)
}

#[tauri::command]
pub async fn set_item_override(
    state: State<'_, AppState>,
    payload: ItemOverridePayload,
) -> Result<(), String> {
    state
        .storage
        .set_item_override(&ItemOverride {
            shop_domain: payload.shop_domain,
            order_number: payload.order_number,
            item_name: payload.item_name,
            item_brand: payload.item_brand,
            name: payload.name,
            price: payload.price,
            quantity: payload.quantity,
            brand: payload.brand,
            category: payload.category,
            updated_at: Utc::now(),
        })
        .await
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn delete_item_override(
    state: State<'_, AppState>,
    payload: ItemOverrideKeyPayload,
) -> Result<(), String> {
    state
        .storage
        .delete_item_override(
            &payload.shop_domain,
            &payload.order_number,
            &payload.item_name,
            payload.item_brand.as_deref(),
        )
        .await
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn set_order_override(
    state: State<'_, AppState>,
    payload: OrderOverridePayload,
) -> Result<(), String> {
    state
        .storage
        .set_order_override(&OrderOverride {
            shop_domain: payload.shop_domain,
            order_number: payload.order_number,
            new_order_number: payload.new_order_number,
            order_date: payload.order_date,
            shop_name: payload.shop_name,
            updated_at: Utc::now(),
        })
        .await
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn delete_order_override(
    state: State<'_, AppState>,
    shop_domain: String,
    order_number: String,
) -> Result<(), String> {
    state
        .storage
        .delete_order_override(&shop_domain, &order_number)
        .await
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn exclude_order(state: State<'_, AppState>, order_id: i64) -> Result<(), String> {
    state
        .storage
        .exclude_order(order_id)
        .await
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn restore_order(state: State<'_, AppState>, order_id: i64) -> Result<(), String> {
    state
        .storage
        .restore_order(order_id)
        .await
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn exclude_item(state: State<'_, AppState>, item_id: i64) -> Result<(), String> {
    state
        .storage
        .exclude_item(item_id)
        .await
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn restore_item(state: State<'_, AppState>, item_id: i64) -> Result<(), String> {
    state
        .storage
        .restore_item(item_id)
        .await
        .map_err(to_error_string)
}

#[tauri::command]
pub async fn export_metadata(
    state: State<'_, AppState>,
    save_path: String,
) -> Result<MetadataBackup, String> {
    let backup = state
        .storage
        .metadata_snapshot()
        .await
        .map_err(to_error_string)?;
    let document = serde_json::to_string_pretty(&backup).map_err(to_error_string)?;
    std::fs::write(&save_path, document).map_err(to_error_string)?;
    tracing::info!(path = %save_path, "metadata exported");
    Ok(backup)
}

#[tauri::command]
pub async fn import_metadata(
    state: State<'_, AppState>,
    load_path: String,
) -> Result<MetadataImportStats, String> {
    let document = std::fs::read_to_string(&load_path).map_err(to_error_string)?;
    let backup: MetadataBackup = serde_json::from_str(&document).map_err(to_error_string)?;
    state
        .storage
        .import_metadata(&backup)
        .await
        .map_err(to_error_string)
}

async fn take_active_run(state: &State<'_, AppState>, run_id: Uuid) -> Result<SyncRun, String> {
    let mut active = state.active_sync.lock().await;
    match active.take() {
        Some(run) if run.id == run_id => Ok(run),
        Some(run) => {
            // Wrong id: put the run back and reject.
            *active = Some(run);
            Err("no active sync run with that id".to_string())
        }
        None => Err("no active sync run".to_string()),
    }
}

fn emit_sync_progress(
    app_handle: &tauri::AppHandle,
    run: &SyncRun,
    phase: SyncPhase,
    error: Option<String>,
) {
    let payload = SyncProgress {
        run_id: run.id,
        phase,
        message_count: run.message_count,
        error,
    };
    let _ = app_handle.emit("sync://progress", &payload);
}

fn to_error_string<E: std::fmt::Display>(err: E) -> String {
    err.to_string()
}

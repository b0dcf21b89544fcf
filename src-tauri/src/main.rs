#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod commands;
mod state;

use state::AppState;
use tauri::Manager;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() {
    init_tracing();

    let app_state = tauri::async_runtime::block_on(AppState::initialize())
        .expect("failed to initialize Kaimono app state");

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_fs::init())
        .plugin(tauri_plugin_notification::init())
        .manage(app_state)
        .setup(|app| {
            let app_handle = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                let state = app_handle.state::<AppState>();
                if let Err(err) = state.recover_interrupted_sync().await {
                    tracing::error!("interrupted sync recovery failed: {err}");
                }
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::bootstrap,
            commands::get_config,
            commands::save_config,
            commands::load_order_items,
            commands::get_order_item_filter_options,
            commands::save_gemini_api_key,
            commands::delete_gemini_api_key,
            commands::has_gemini_api_key,
            commands::save_gmail_credentials,
            commands::delete_gmail_credentials,
            commands::start_sync,
            commands::ingest_orders,
            commands::finish_sync,
            commands::cancel_sync,
            commands::get_sync_status,
            commands::set_item_override,
            commands::delete_item_override,
            commands::set_order_override,
            commands::delete_order_override,
            commands::exclude_order,
            commands::restore_order,
            commands::exclude_item,
            commands::restore_item,
            commands::export_metadata,
            commands::import_metadata,
        ])
        .run(tauri::generate_context!())
        .expect("error while running Kaimono");
}

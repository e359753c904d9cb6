// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use env_logger::Builder;
use log::{info, warn, LevelFilter};
use std::path::PathBuf;
use tauri::{
    CustomMenuItem, GlobalShortcutManager, Manager, RunEvent, SystemTray, SystemTrayEvent,
    SystemTrayMenu, WindowEvent,
};

mod emitter;
mod error;
mod frontend;
mod generator;
mod prompt;
mod relay;
mod schema;
mod state;
mod store;

const PALETTE_SHORTCUT: &str = "CmdOrCtrl+Shift+S";

#[tokio::main]
async fn main() {
    tauri::async_runtime::set(tokio::runtime::Handle::current());

    Builder::new()
        .filter(None, LevelFilter::Info) // Default log level set to `info`
        .init();

    let context = tauri::generate_context!();

    let mut settings_path = tauri::api::path::app_local_data_dir(context.config())
        .unwrap_or_else(|| PathBuf::from("."));
    settings_path.push("settings.json");
    let settings = store::SettingsStore::load(settings_path);

    let global_state = state::create_global_state(settings);

    let tray_menu = SystemTrayMenu::new()
        .add_item(CustomMenuItem::new("quit", "Quit"))
        .add_item(CustomMenuItem::new("hide", "Hide"))
        .add_item(CustomMenuItem::new("open", "Open"));

    let app = tauri::Builder::default()
        .manage(global_state)
        .setup(|app| {
            let handle = app.handle();
            let mut shortcuts = app.global_shortcut_manager();
            match shortcuts.register(PALETTE_SHORTCUT, move || {
                if let Some(window) = handle.get_window("main") {
                    if window.is_visible().unwrap_or(false) {
                        let _ = window.hide();
                    } else {
                        let _ = window.show();
                        let _ = window.set_focus();
                    }
                }
            }) {
                Ok(()) => info!("registered palette shortcut {}", PALETTE_SHORTCUT),
                Err(err) => warn!("failed to register palette shortcut: {}", err),
            }
            Ok(())
        })
        .system_tray(SystemTray::new().with_menu(tray_menu))
        .on_system_tray_event(|app, event| match event {
            SystemTrayEvent::MenuItemClick { id, .. } => match id.as_str() {
                "quit" => {
                    info!("quit requested from tray");
                    // Settings writes are synchronous, nothing to flush.
                    std::process::exit(0);
                }
                "hide" => {
                    if let Some(window) = app.get_window("main") {
                        let _ = window.hide();
                    }
                }
                "open" => {
                    if let Some(window) = app.get_window("main") {
                        let _ = window.show();
                        let _ = window.set_focus();
                    }
                }
                _ => {}
            },
            _ => {}
        })
        .invoke_handler(tauri::generate_handler![
            frontend::get_setting,
            frontend::set_setting,
            frontend::has_setting,
            frontend::delete_setting,
            frontend::reset_setting,
            frontend::list_databases,
            frontend::schema_extraction_query,
            frontend::add_database_schema,
            frontend::remove_database,
            frontend::complete_once,
            frontend::generate_query,
            frontend::cancel_generation,
            frontend::copy_to_clipboard,
        ])
        .build(context)
        .expect("error while running tauri application");

    app.run(|app_handle, event| match event {
        // Tray app: closing or deactivating the palette hides it.
        RunEvent::ExitRequested { api, .. } => {
            api.prevent_exit();
        }
        RunEvent::WindowEvent {
            label,
            event: WindowEvent::CloseRequested { api, .. },
            ..
        } => {
            api.prevent_close();
            if let Some(window) = app_handle.get_window(&label) {
                let _ = window.hide();
            }
        }
        RunEvent::WindowEvent {
            label,
            event: WindowEvent::Focused(false),
            ..
        } => {
            if let Some(window) = app_handle.get_window(&label) {
                let _ = window.hide();
            }
        }
        _ => {}
    });
}

use std::sync::Arc;

use tauri::{
  plugin::{Builder, TauriPlugin},
  Manager, Runtime,
};

pub use models::*;

#[cfg(not(any(target_os = "windows", all(target_os = "macos", feature = "unstable"))))]
mod desktop;
#[cfg(all(target_os = "macos", feature = "unstable"))]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

mod bridge;
mod commands;
mod config;
mod error;
mod manager;
mod models;
pub mod script;
mod service;
mod surface;

pub use bridge::{BridgeAdapter, WebSurface};
pub use config::{Config, Delivery};
pub use error::{Error, RequestKind, Result};
pub use manager::{EventReceiver, EventSink, PurchaseManager, DEFAULT_MAX_LISTENERS};
pub use service::{reply_within, PurchaseService, StoreEventQueue, StoreEventStream};
pub use surface::TauriSurface;

#[cfg(not(any(target_os = "windows", all(target_os = "macos", feature = "unstable"))))]
use self::desktop as platform;
#[cfg(all(target_os = "macos", feature = "unstable"))]
use self::macos as platform;
#[cfg(target_os = "windows")]
use self::windows as platform;

/// State managed by the plugin: the purchase manager and its web bridge.
pub struct IapBridge {
  manager: PurchaseManager,
  bridge: BridgeAdapter,
}

impl IapBridge {
  pub fn manager(&self) -> &PurchaseManager {
    &self.manager
  }

  pub fn bridge(&self) -> &BridgeAdapter {
    &self.bridge
  }
}

/// Extensions to [`tauri::App`], [`tauri::AppHandle`] and [`tauri::Window`] to access the bridge.
pub trait IapBridgeExt<R: Runtime> {
  fn iap_bridge(&self) -> &IapBridge;
}

impl<R: Runtime, T: Manager<R>> crate::IapBridgeExt<R> for T {
  fn iap_bridge(&self) -> &IapBridge {
    self.state::<IapBridge>().inner()
  }
}

/// Initializes the plugin.
pub fn init<R: Runtime>() -> TauriPlugin<R, Option<Config>> {
  Builder::<R, Option<Config>>::new("iap-bridge")
    .invoke_handler(tauri::generate_handler![
      commands::load_products,
      commands::purchase_product,
      commands::restore_purchases,
      commands::can_make_payments,
      commands::post_message,
      commands::get_receipt,
    ])
    .setup(|app, api| {
      let config = api.config().clone().unwrap_or_default();
      let service: Arc<dyn PurchaseService> = platform::init(app)?;
      let manager = PurchaseManager::with_listener_limit(service, config.max_listeners)?;
      let bridge = BridgeAdapter::new(manager.clone())?;
      let surface = TauriSurface::new(app, &config);
      tracing::info!(webview = surface.label(), delivery = ?config.delivery, "iap bridge ready");
      bridge.bind(Arc::new(surface));
      app.manage(IapBridge { manager, bridge });
      Ok(())
    })
    .build()
}

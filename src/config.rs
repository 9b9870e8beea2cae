use serde::Deserialize;

/// How bridge messages reach the webview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Delivery {
    /// Emit a Tauri event targeted at the bound webview window.
    #[default]
    Event,
    /// Evaluate a dispatch script calling `scriptReceiver.receive(message)`.
    Script,
}

/// Plugin configuration, read from `plugins.iap-bridge` in `tauri.conf.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Label of the webview window the bridge binds to.
    pub webview: String,
    pub delivery: Delivery,
    pub event_name: String,
    pub script_receiver: String,
    pub max_listeners: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webview: "main".to_string(),
            delivery: Delivery::Event,
            event_name: "iap-bridge://message".to_string(),
            script_receiver: "window.__IAP_BRIDGE__".to_string(),
            max_listeners: 8,
        }
    }
}

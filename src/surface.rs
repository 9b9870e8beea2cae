use tauri::{AppHandle, Emitter, EventTarget, Manager, Runtime};
use tracing::warn;

use crate::bridge::WebSurface;
use crate::config::{Config, Delivery};
use crate::models::BridgeMessage;
use crate::{script, Error, Result};

/// A webview window addressed by label.
///
/// The surface never keeps the window alive: the window is looked up on
/// every delivery, and a closed window turns deliveries into
/// [`Error::SurfaceUnavailable`].
pub struct TauriSurface<R: Runtime> {
    app: AppHandle<R>,
    label: String,
    delivery: Delivery,
    event_name: String,
    script_receiver: String,
}

impl<R: Runtime> TauriSurface<R> {
    pub fn new(app: &AppHandle<R>, config: &Config) -> Self {
        Self {
            app: app.clone(),
            label: config.webview.clone(),
            delivery: config.delivery,
            event_name: config.event_name.clone(),
            script_receiver: config.script_receiver.clone(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<R: Runtime> WebSurface for TauriSurface<R> {
    fn deliver(&self, message: &BridgeMessage) -> Result<()> {
        let window = self
            .app
            .get_webview_window(&self.label)
            .ok_or_else(|| Error::SurfaceUnavailable(self.label.clone()))?;

        // Webviews may only be touched from the main thread.
        match self.delivery {
            Delivery::Event => {
                let app = self.app.clone();
                let target = EventTarget::WebviewWindow {
                    label: self.label.clone(),
                };
                let event_name = self.event_name.clone();
                let message = message.clone();
                self.app.run_on_main_thread(move || {
                    if let Err(err) = app.emit_to(target, &event_name, message) {
                        warn!(error = %err, "failed to emit bridge message");
                    }
                })?;
            }
            Delivery::Script => {
                let script = script::dispatch_script(&self.script_receiver, message)?;
                self.app.run_on_main_thread(move || {
                    if let Err(err) = window.eval(script.as_str()) {
                        warn!(error = %err, "failed to evaluate bridge script");
                    }
                })?;
            }
        }
        Ok(())
    }
}

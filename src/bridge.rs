//! Adapter between a [`PurchaseManager`] and web content.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::manager::{EventSink, PurchaseManager};
use crate::models::*;
use crate::{Error, Result};

/// A web content surface messages can be delivered to.
///
/// `deliver` may be called from any thread; implementations are responsible
/// for moving onto whatever thread owns the underlying webview.
pub trait WebSurface: Send + Sync + 'static {
    fn deliver(&self, message: &BridgeMessage) -> Result<()>;
}

type SurfaceSlot = Arc<RwLock<Option<Arc<dyn WebSurface>>>>;

/// Routes web requests to the manager and manager events back to the web.
///
/// The adapter registers its outbound queue as a manager listener, so manager
/// events enter the queue as they are published. Messages `handle` produces
/// itself go into the same queue, and the web observes both in the order they
/// were produced.
pub struct BridgeAdapter {
    manager: PurchaseManager,
    surface: SurfaceSlot,
    outbound: mpsc::UnboundedSender<BridgeMessage>,
}

impl BridgeAdapter {
    pub fn new(manager: PurchaseManager) -> Result<Self> {
        let surface: SurfaceSlot = Arc::new(RwLock::new(None));
        let (outbound, queue) = mpsc::unbounded_channel();
        manager.attach(outbound.clone())?;

        tauri::async_runtime::spawn(deliver_messages(queue, surface.clone()));

        Ok(Self {
            manager,
            surface,
            outbound,
        })
    }

    /// Binds the adapter to `surface`, replacing any previous one.
    pub fn bind(&self, surface: Arc<dyn WebSurface>) {
        *self.surface.write().unwrap_or_else(PoisonError::into_inner) = Some(surface);
    }

    pub fn unbind(&self) {
        self.surface.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn manager(&self) -> &PurchaseManager {
        &self.manager
    }

    /// Handles one request from web content.
    ///
    /// Malformed requests are rejected with [`Error::InvalidRequest`] and
    /// start nothing. Every other outcome, including errors the manager
    /// detects on the spot, reaches the web as a message.
    pub fn handle(&self, request: BridgeRequest) -> Result<()> {
        debug!(?request, "bridge request");
        match request {
            BridgeRequest::LoadProducts { product_ids } => {
                if product_ids.is_empty() {
                    return Err(Error::InvalidRequest("productIds must not be empty".into()));
                }
                if product_ids.iter().any(|id| id.trim().is_empty()) {
                    return Err(Error::InvalidRequest("productIds must not contain blank entries".into()));
                }
                if let Err(err) = self.manager.load_products(product_ids) {
                    self.send(BridgeMessage::ProductsLoadFailed {
                        reason: err.to_string(),
                    });
                }
            }
            BridgeRequest::PurchaseProduct { product_id } => {
                if product_id.trim().is_empty() {
                    return Err(Error::InvalidRequest("productId must not be blank".into()));
                }
                if let Err(err) = self.manager.purchase_product(&product_id) {
                    self.send(BridgeMessage::PurchaseFailed {
                        reason: err.to_string(),
                    });
                }
            }
            BridgeRequest::RestorePurchases => {
                if let Err(err) = self.manager.restore_purchases() {
                    self.send(BridgeMessage::PurchaseFailed {
                        reason: err.to_string(),
                    });
                }
            }
            BridgeRequest::CanMakePayments => {
                let allowed = self.manager.can_make_payments();
                self.send(BridgeMessage::CanMakePayments { allowed });
            }
        }
        Ok(())
    }

    pub fn load_products(&self, product_ids: Vec<String>) -> Result<()> {
        self.handle(BridgeRequest::LoadProducts { product_ids })
    }

    pub fn purchase_product(&self, product_id: String) -> Result<()> {
        self.handle(BridgeRequest::PurchaseProduct { product_id })
    }

    pub fn restore_purchases(&self) -> Result<()> {
        self.handle(BridgeRequest::RestorePurchases)
    }

    pub fn can_make_payments(&self) -> Result<()> {
        self.handle(BridgeRequest::CanMakePayments)
    }

    fn send(&self, message: BridgeMessage) {
        if self.outbound.send(message).is_err() {
            warn!("bridge delivery queue closed");
        }
    }
}

impl EventSink for mpsc::UnboundedSender<BridgeMessage> {
    fn send_event(&self, event: &IapEvent) -> bool {
        self.send(BridgeMessage::from(event.clone())).is_ok()
    }

    fn is_closed(&self) -> bool {
        mpsc::UnboundedSender::is_closed(self)
    }
}

async fn deliver_messages(mut queue: mpsc::UnboundedReceiver<BridgeMessage>, surface: SurfaceSlot) {
    while let Some(message) = queue.recv().await {
        let target = surface.read().unwrap_or_else(PoisonError::into_inner).clone();
        match target {
            Some(target) => {
                if let Err(err) = target.deliver(&message) {
                    warn!(error = %err, ?message, "bridge message not delivered");
                }
            }
            None => warn!(?message, "no web surface bound, dropping bridge message"),
        }
    }
}

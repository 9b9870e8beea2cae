use std::sync::Arc;

use async_trait::async_trait;
use tauri::{AppHandle, Runtime};

use crate::models::*;
use crate::service::{PurchaseService, StoreEventQueue, StoreEventStream};

const UNSUPPORTED: &str = "In-app purchases are not supported on this platform";

pub fn init<R: Runtime>(_app: &AppHandle<R>) -> crate::Result<Arc<dyn PurchaseService>> {
    Ok(Arc::new(UnsupportedStore::default()))
}

/// Purchase service for platforms without a store. Payments are never
/// allowed, so purchases are rejected as restricted before reaching it.
#[derive(Default)]
pub struct UnsupportedStore {
    events: StoreEventQueue,
}

#[async_trait]
impl PurchaseService for UnsupportedStore {
    async fn query_products(&self, _product_ids: Vec<String>) -> crate::Result<ProductsResponse> {
        Err(crate::Error::ServiceError(UNSUPPORTED.to_string()))
    }

    fn can_make_payments(&self) -> bool {
        false
    }

    fn submit_payment(&self, _product: &Product) -> crate::Result<()> {
        Err(crate::Error::PurchaseRestricted)
    }

    fn restore_completed_transactions(&self) -> crate::Result<()> {
        Err(crate::Error::ServiceError(UNSUPPORTED.to_string()))
    }

    fn finish_transaction(&self, _transaction_id: &str) -> crate::Result<()> {
        Ok(())
    }

    fn app_receipt(&self) -> Option<Vec<u8>> {
        None
    }

    fn transaction_updates(&self) -> crate::Result<StoreEventStream> {
        self.events.take_stream()
    }
}

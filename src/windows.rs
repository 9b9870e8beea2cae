use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use ::windows::core::HSTRING;
use ::windows::Services::Store::{StoreContext, StoreProduct, StorePurchaseStatus};
use async_trait::async_trait;
use tauri::{AppHandle, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use windows_collections::IIterable;

use crate::models::*;
use crate::service::{PurchaseService, StoreEventQueue, StoreEventStream};
use crate::Error;

const PRODUCT_KINDS: [&str; 4] = ["Consumable", "UnmanagedConsumable", "Durable", "Subscription"];

pub fn init<R: Runtime>(_app: &AppHandle<R>) -> crate::Result<Arc<dyn PurchaseService>> {
    Ok(Arc::new(WindowsStore::default()))
}

/// Microsoft Store backend.
///
/// The Store has no transaction queue, so purchase and restore outcomes are
/// turned into queue-style updates here. Store calls block, and always run
/// on the blocking pool.
#[derive(Default)]
pub struct WindowsStore {
    store_context: Arc<RwLock<Option<StoreContext>>>,
    events: StoreEventQueue,
    /// License JSON from the last license refresh, used as the receipt.
    receipt: Arc<Mutex<Option<String>>>,
}

impl WindowsStore {
    /// Get or create the StoreContext instance
    fn store_context(&self) -> crate::Result<StoreContext> {
        let mut context_guard = self.store_context.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(context) = context_guard.as_ref() {
            return Ok(context.clone());
        }

        // Get the default store context for the current user
        let context = StoreContext::GetDefault()
            .map_err(|e| Error::ServiceError(format!("Failed to get store context: {:?}", e)))?;
        *context_guard = Some(context.clone());
        Ok(context)
    }
}

#[async_trait]
impl PurchaseService for WindowsStore {
    async fn query_products(&self, product_ids: Vec<String>) -> crate::Result<ProductsResponse> {
        let context = self.store_context()?;
        tauri::async_runtime::spawn_blocking(move || query_products_blocking(&context, product_ids)).await?
    }

    fn can_make_payments(&self) -> bool {
        self.store_context().is_ok()
    }

    fn submit_payment(&self, product: &Product) -> crate::Result<()> {
        let context = self.store_context()?;
        let sender = self.events.sender();
        let receipt = self.receipt.clone();
        let product_id = product.id.clone();
        let transaction_id = format!("win_{}_{}", product_id, unix_millis());

        self.events.push(StoreEvent::Transaction(TransactionUpdate::new(
            transaction_id.clone(),
            product_id.clone(),
            TransactionState::Purchasing,
        )));

        tauri::async_runtime::spawn_blocking(move || {
            let update = match request_purchase(&context, &product_id) {
                Ok(StorePurchaseStatus::Succeeded) | Ok(StorePurchaseStatus::AlreadyPurchased) => {
                    refresh_receipt(&context, &receipt);
                    TransactionUpdate::new(transaction_id, product_id, TransactionState::Purchased)
                }
                Ok(StorePurchaseStatus::NotPurchased) => TransactionUpdate::failed(
                    transaction_id,
                    product_id,
                    StoreFailure::cancelled("The purchase was cancelled"),
                ),
                Ok(StorePurchaseStatus::NetworkError) => TransactionUpdate::failed(
                    transaction_id,
                    product_id,
                    StoreFailure::other("Network error during purchase"),
                ),
                Ok(StorePurchaseStatus::ServerError) => TransactionUpdate::failed(
                    transaction_id,
                    product_id,
                    StoreFailure::other("Server error during purchase"),
                ),
                Ok(_) => TransactionUpdate::failed(transaction_id, product_id, StoreFailure::other("Purchase failed")),
                Err(err) => TransactionUpdate::failed(transaction_id, product_id, StoreFailure::other(err.to_string())),
            };
            send(&sender, StoreEvent::Transaction(update));
        });
        Ok(())
    }

    fn restore_completed_transactions(&self) -> crate::Result<()> {
        let context = self.store_context()?;
        let sender = self.events.sender();
        let receipt = self.receipt.clone();

        tauri::async_runtime::spawn_blocking(move || {
            match restore_blocking(&context, &sender, &receipt) {
                Ok(()) => send(&sender, StoreEvent::RestoreFinished),
                Err(err) => send(
                    &sender,
                    StoreEvent::RestoreFailed {
                        message: err.to_string(),
                    },
                ),
            }
        });
        Ok(())
    }

    fn finish_transaction(&self, transaction_id: &str) -> crate::Result<()> {
        // Store licenses are granted by the Store itself; nothing stays queued.
        debug!(transaction_id, "transaction finished");
        Ok(())
    }

    fn app_receipt(&self) -> Option<Vec<u8>> {
        self.receipt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|json| json.clone().into_bytes())
    }

    fn transaction_updates(&self) -> crate::Result<StoreEventStream> {
        self.events.take_stream()
    }
}

fn query_products_blocking(context: &StoreContext, product_ids: Vec<String>) -> crate::Result<ProductsResponse> {
    let store_ids: Vec<HSTRING> = product_ids.iter().map(|id| HSTRING::from(id.as_str())).collect();
    let product_kinds: Vec<HSTRING> = PRODUCT_KINDS.iter().map(|kind| HSTRING::from(*kind)).collect();

    let kinds_it: IIterable<HSTRING> = IIterable::try_from(product_kinds)
        .map_err(|e| Error::ServiceError(format!("Failed to create IIterable: {:?}", e)))?;
    let ids_it: IIterable<HSTRING> = IIterable::try_from(store_ids)
        .map_err(|e| Error::ServiceError(format!("Failed to create IIterable: {:?}", e)))?;

    let query_result = context
        .GetStoreProductsAsync(&kinds_it, &ids_it)
        .and_then(|async_op| async_op.get())
        .map_err(|e| Error::ServiceError(format!("Failed to get products: {:?}", e)))?;

    let extended_error = query_result.ExtendedError()?;
    if extended_error.is_err() {
        return Err(Error::ServiceError(format!(
            "Store query failed with error: {:?}",
            extended_error.message()
        )));
    }

    let mut products = Vec::new();
    let iterator = query_result.Products()?.First()?;
    while iterator.HasCurrent()? {
        let store_product = iterator.Current()?.Value()?;
        products.push(convert_store_product(&store_product)?);
        iterator.MoveNext()?;
    }

    let found: HashSet<&str> = products.iter().map(|product| product.id.as_str()).collect();
    let invalid_product_ids = product_ids
        .iter()
        .filter(|id| !found.contains(id.as_str()))
        .cloned()
        .collect();

    Ok(ProductsResponse {
        products,
        invalid_product_ids,
    })
}

fn convert_store_product(store_product: &StoreProduct) -> crate::Result<Product> {
    let price = store_product.Price()?;

    // Parse price to get numeric value (remove currency symbols)
    let price_amount_micros = price
        .FormattedBasePrice()?
        .to_string()
        .chars()
        .filter(|c| c.is_numeric() || *c == '.')
        .collect::<String>()
        .parse::<f64>()
        .ok()
        .map(|value| (value * 1_000_000.0) as i64);

    Ok(Product {
        id: store_product.StoreId()?.to_string(),
        title: store_product.Title()?.to_string(),
        description: store_product.Description()?.to_string(),
        price: price.FormattedPrice()?.to_string(),
        price_currency_code: Some(price.CurrencyCode()?.to_string()),
        price_amount_micros,
    })
}

fn request_purchase(context: &StoreContext, product_id: &str) -> crate::Result<StorePurchaseStatus> {
    let result = context
        .RequestPurchaseAsync(&HSTRING::from(product_id))
        .and_then(|async_op| async_op.get())
        .map_err(|e| Error::ServiceError(format!("Purchase request failed: {:?}", e)))?;
    Ok(result.Status()?)
}

fn restore_blocking(
    context: &StoreContext,
    sender: &mpsc::UnboundedSender<StoreEvent>,
    receipt: &Mutex<Option<String>>,
) -> crate::Result<()> {
    let app_license = context
        .GetAppLicenseAsync()
        .and_then(|async_op| async_op.get())
        .map_err(|e| Error::ServiceError(format!("Failed to get app license: {:?}", e)))?;
    *receipt.lock().unwrap_or_else(PoisonError::into_inner) = Some(app_license.ExtendedJsonData()?.to_string());

    let iterator = app_license.AddOnLicenses()?.First()?;
    while iterator.HasCurrent()? {
        let license = iterator.Current()?.Value()?;
        if license.IsActive()? {
            send(
                sender,
                StoreEvent::Transaction(TransactionUpdate::new(
                    license.SkuStoreId()?.to_string(),
                    license.InAppOfferToken()?.to_string(),
                    TransactionState::Restored,
                )),
            );
        }
        iterator.MoveNext()?;
    }
    Ok(())
}

fn refresh_receipt(context: &StoreContext, receipt: &Mutex<Option<String>>) {
    let json = context
        .GetAppLicenseAsync()
        .and_then(|async_op| async_op.get())
        .and_then(|license| license.ExtendedJsonData());
    match json {
        Ok(json) => *receipt.lock().unwrap_or_else(PoisonError::into_inner) = Some(json.to_string()),
        Err(err) => warn!(error = ?err, "could not refresh app license"),
    }
}

fn send(sender: &mpsc::UnboundedSender<StoreEvent>, event: StoreEvent) {
    if sender.send(event).is_err() {
        warn!("store event dropped: no transaction observer");
    }
}

fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

use tauri::{AppHandle, command, Runtime};

use crate::models::*;
use crate::{IapBridgeExt, Result};

#[command]
pub(crate) async fn load_products<R: Runtime>(
    app: AppHandle<R>,
    payload: LoadProductsRequest,
) -> Result<()> {
    app.iap_bridge().bridge().load_products(payload.product_ids)
}

#[command]
pub(crate) async fn purchase_product<R: Runtime>(
    app: AppHandle<R>,
    payload: PurchaseRequest,
) -> Result<()> {
    app.iap_bridge().bridge().purchase_product(payload.product_id)
}

#[command]
pub(crate) async fn restore_purchases<R: Runtime>(app: AppHandle<R>) -> Result<()> {
    app.iap_bridge().bridge().restore_purchases()
}

/// The answer arrives as a `canMakePayments` message, like every other result.
#[command]
pub(crate) async fn can_make_payments<R: Runtime>(app: AppHandle<R>) -> Result<()> {
    app.iap_bridge().bridge().can_make_payments()
}

#[command]
pub(crate) async fn post_message<R: Runtime>(
    app: AppHandle<R>,
    request: BridgeRequest,
) -> Result<()> {
    app.iap_bridge().bridge().handle(request)
}

#[command]
pub(crate) async fn get_receipt<R: Runtime>(app: AppHandle<R>) -> Result<String> {
    Ok(app.iap_bridge().manager().receipt_string())
}

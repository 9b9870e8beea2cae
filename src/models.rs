use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Localized, formatted price as shown by the store.
    pub price: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_currency_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_amount_micros: Option<i64>,
}

/// Result of a catalog query. Identifiers the store does not recognize are
/// listed in `invalid_product_ids` and never appear in `products`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductsResponse {
    pub products: Vec<Product>,
    #[serde(default)]
    pub invalid_product_ids: Vec<String>,
}

/// A finalized purchase as surfaced to listeners.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub product_id: String,
    pub transaction_id: String,
    /// Base64 app receipt, empty when the device has none.
    pub receipt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionState {
    Purchasing,
    Purchased,
    Failed,
    Restored,
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    Cancelled,
    Restricted,
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StoreFailure {
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Other,
            message: message.into(),
        }
    }

    pub(crate) fn into_error(self) -> crate::Error {
        match self.kind {
            FailureKind::Cancelled => crate::Error::PurchaseCancelled(self.message),
            FailureKind::Restricted => crate::Error::PurchaseRestricted,
            FailureKind::Other => crate::Error::ServiceError(self.message),
        }
    }
}

/// One entry of the purchase service's transaction queue.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    pub transaction_id: String,
    pub product_id: String,
    pub state: TransactionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StoreFailure>,
}

impl TransactionUpdate {
    pub fn new(
        transaction_id: impl Into<String>,
        product_id: impl Into<String>,
        state: TransactionState,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            product_id: product_id.into(),
            state,
            failure: None,
        }
    }

    pub fn failed(
        transaction_id: impl Into<String>,
        product_id: impl Into<String>,
        failure: StoreFailure,
    ) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new(transaction_id, product_id, TransactionState::Failed)
        }
    }
}

/// Everything the purchase service reports through its update stream.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum StoreEvent {
    Transaction(TransactionUpdate),
    RestoreFinished,
    RestoreFailed { message: String },
}

/// Notifications published by the purchase manager.
#[derive(Debug, Clone, PartialEq)]
pub enum IapEvent {
    ProductsLoaded(Vec<Product>),
    ProductsLoadFailed(String),
    PurchaseCompleted(Transaction),
    PurchaseFailed(String),
    RestoreCompleted(Vec<String>),
}

/// Requests sent from web content into the bridge.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum BridgeRequest {
    #[serde(rename_all = "camelCase")]
    LoadProducts { product_ids: Vec<String> },
    #[serde(rename_all = "camelCase")]
    PurchaseProduct { product_id: String },
    RestorePurchases,
    CanMakePayments,
}

/// Messages delivered from the bridge into web content.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum BridgeMessage {
    ProductsLoaded(Vec<Product>),
    ProductsLoadFailed { reason: String },
    PurchaseCompleted(Transaction),
    PurchaseFailed { reason: String },
    RestoreCompleted(Vec<String>),
    CanMakePayments { allowed: bool },
}

impl From<IapEvent> for BridgeMessage {
    fn from(event: IapEvent) -> Self {
        match event {
            IapEvent::ProductsLoaded(products) => BridgeMessage::ProductsLoaded(products),
            IapEvent::ProductsLoadFailed(reason) => BridgeMessage::ProductsLoadFailed { reason },
            IapEvent::PurchaseCompleted(transaction) => BridgeMessage::PurchaseCompleted(transaction),
            IapEvent::PurchaseFailed(reason) => BridgeMessage::PurchaseFailed { reason },
            IapEvent::RestoreCompleted(product_ids) => BridgeMessage::RestoreCompleted(product_ids),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadProductsRequest {
    pub product_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub product_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product() -> Product {
        Product {
            id: "id.a".into(),
            title: "Gems".into(),
            description: "A bag of gems".into(),
            price: "$0.99".into(),
            price_currency_code: None,
            price_amount_micros: None,
        }
    }

    #[test]
    fn products_loaded_payload_is_a_plain_list() {
        let value = serde_json::to_value(BridgeMessage::ProductsLoaded(vec![product()])).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "productsLoaded",
                "payload": [{
                    "id": "id.a",
                    "title": "Gems",
                    "description": "A bag of gems",
                    "price": "$0.99"
                }]
            })
        );
    }

    #[test]
    fn purchase_completed_payload_shape() {
        let message = BridgeMessage::PurchaseCompleted(Transaction {
            product_id: "id.a".into(),
            transaction_id: "1000".into(),
            receipt: "cmVjZWlwdA==".into(),
        });
        assert_eq!(
            serde_json::to_value(message).unwrap(),
            json!({
                "type": "purchaseCompleted",
                "payload": { "productId": "id.a", "transactionId": "1000", "receipt": "cmVjZWlwdA==" }
            })
        );
    }

    #[test]
    fn failure_and_restore_payload_shapes() {
        assert_eq!(
            serde_json::to_value(BridgeMessage::PurchaseFailed { reason: "nope".into() }).unwrap(),
            json!({ "type": "purchaseFailed", "payload": { "reason": "nope" } })
        );
        assert_eq!(
            serde_json::to_value(BridgeMessage::RestoreCompleted(vec![])).unwrap(),
            json!({ "type": "restoreCompleted", "payload": [] })
        );
        assert_eq!(
            serde_json::to_value(BridgeMessage::CanMakePayments { allowed: true }).unwrap(),
            json!({ "type": "canMakePayments", "payload": { "allowed": true } })
        );
    }

    #[test]
    fn bridge_requests_parse_from_web_shapes() {
        let load: BridgeRequest = serde_json::from_value(json!({
            "method": "loadProducts",
            "params": { "productIds": ["id.a", "id.b"] }
        }))
        .unwrap();
        assert_eq!(
            load,
            BridgeRequest::LoadProducts {
                product_ids: vec!["id.a".into(), "id.b".into()]
            }
        );

        let restore: BridgeRequest = serde_json::from_value(json!({ "method": "restorePurchases" })).unwrap();
        assert_eq!(restore, BridgeRequest::RestorePurchases);
    }

    #[test]
    fn store_events_parse_from_native_json() {
        let event: StoreEvent = serde_json::from_str(
            r#"{"event":"transaction","transactionId":"7","productId":"id.a","state":"failed",
                "failure":{"kind":"cancelled","message":"user cancelled"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            StoreEvent::Transaction(TransactionUpdate::failed(
                "7",
                "id.a",
                StoreFailure::cancelled("user cancelled")
            ))
        );

        let finished: StoreEvent = serde_json::from_str(r#"{"event":"restoreFinished"}"#).unwrap();
        assert_eq!(finished, StoreEvent::RestoreFinished);
    }
}

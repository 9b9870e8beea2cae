use std::fmt;

use serde::{ser::Serializer, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

/// The kinds of request the manager tracks while they are in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
  LoadProducts,
  Purchase,
  Restore,
}

impl fmt::Display for RequestKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      RequestKind::LoadProducts => "product load",
      RequestKind::Purchase => "purchase",
      RequestKind::Restore => "restore",
    })
  }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("product not found: {0}")]
  ProductNotFound(String),
  #[error("purchases are restricted on this device or account")]
  PurchaseRestricted,
  #[error("purchase cancelled: {0}")]
  PurchaseCancelled(String),
  #[error("{0}")]
  ServiceError(String),
  #[error("a {0} request is already in progress")]
  DuplicateRequest(RequestKind),
  #[error("invalid request: {0}")]
  InvalidRequest(String),
  #[error("listener limit of {0} reached")]
  TooManyListeners(usize),
  #[error("the transaction observer is already registered")]
  ObserverAlreadyRegistered,
  #[error("web surface unavailable: {0}")]
  SurfaceUnavailable(String),
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error(transparent)]
  Tauri(#[from] tauri::Error),
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[cfg(target_os = "windows")]
  #[error(transparent)]
  Windows(#[from] windows_result::Error),
}

impl Serialize for Error {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(self.to_string().as_ref())
  }
}

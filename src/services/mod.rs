//! Services module for business logic and integrations

pub mod callback_reconciler;
pub mod notification;

pub use callback_reconciler::{CallbackOutcome, CallbackReconciler, CallbackRequest};
pub use notification::{LogNotifier, NotificationError, OrderNotifier};

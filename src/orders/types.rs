use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::gateway::config::StoreId;

/// Order state as seen by the payment protocol.
///
/// `New` and `PendingPayment` are initial; `Processing` and `Canceled` are
/// terminal and never left by a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    New,
    PendingPayment,
    Processing,
    Canceled,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::New => "new",
            OrderState::PendingPayment => "pending_payment",
            OrderState::Processing => "processing",
            OrderState::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Processing | OrderState::Canceled)
    }

    /// The store's default status label for the state.
    pub fn default_status(&self) -> &'static str {
        match self {
            OrderState::New => "pending",
            OrderState::PendingPayment => "pending_payment",
            OrderState::Processing => "processing",
            OrderState::Canceled => "canceled",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "new" => Ok(OrderState::New),
            "pending_payment" => Ok(OrderState::PendingPayment),
            "processing" => Ok(OrderState::Processing),
            "canceled" => Ok(OrderState::Canceled),
            other => Err(format!("unknown order state '{}'", other)),
        }
    }
}

/// Payment details attached to an order. Written only by the payment flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<u64>,
    /// Gateway fields outside the known set.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl PaymentInfo {
    /// Overwrite only the fields `update` sets.
    pub fn merge(&mut self, update: PaymentInfo) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if update.$field.is_some() { self.$field = update.$field; })*
            };
        }
        take!(
            payment_id,
            payment_status,
            crypto_symbol,
            crypto_amount,
            wallet_address,
            gateway_url,
            merchant_id
        );
        self.extra.extend(update.extra);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderComment {
    pub created_at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub increment_id: String,
    pub store_id: StoreId,
    pub grand_total: Decimal,
    pub currency: String,
    pub state: OrderState,
    pub status: String,
    pub customer_email: Option<String>,
    pub payment_info: PaymentInfo,
    pub comments: Vec<OrderComment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        increment_id: impl Into<String>,
        store_id: StoreId,
        grand_total: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            increment_id: increment_id.into(),
            store_id,
            grand_total,
            currency: currency.into(),
            state: OrderState::New,
            status: OrderState::New.default_status().to_string(),
            customer_email: None,
            payment_info: PaymentInfo::default(),
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_customer_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }
}

/// A terminal transition requested by the payment flow.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub target: OrderState,
    pub status_label: String,
    pub payment_info: PaymentInfo,
    pub comment: String,
}

#[derive(Debug, Clone)]
pub enum SettleOutcome {
    Applied(Order),
    /// The order was already terminal; nothing was written.
    AlreadySettled(Order),
}

pub mod error;
pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;
pub mod repository;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryOrderStore;
#[cfg(feature = "database")]
pub use postgres::PgOrderStore;
pub use repository::OrderStore;
pub use types::{Order, OrderComment, OrderState, PaymentInfo, SettleOutcome, Settlement};

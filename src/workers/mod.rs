pub mod pending_order_sweeper;

pub use pending_order_sweeper::{PendingOrderSweeper, SweeperConfig};

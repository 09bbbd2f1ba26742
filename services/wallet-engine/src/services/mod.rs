//! Orchestrators that compose balance mutations into business flows.

pub mod adjustments;
pub mod external;
pub mod marketplace;
pub mod missions;
pub mod transfers;

pub use adjustments::AdjustmentService;
pub use external::ExternalSyncService;
pub use marketplace::{MarketplaceService, PurchaseReceipt};
pub use missions::{MissionService, ReviewOutcome};
pub use transfers::{TransferReceipt, TransferService};

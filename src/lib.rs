// Library exports for testing and external use

pub mod api;
pub mod app;
pub mod config;
pub mod confirmation;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod reconciler;
pub mod store;
pub mod telemetry;
pub mod time;
pub mod traits;
pub mod types;

// Re-export commonly used types and traits
pub use api::ApiServer;
pub use app::App;
pub use config::{BaseConfig, LedgerType, ReconcilerConfig};
pub use error::{EngineError, LedgerError, TransitionError};
pub use reconciler::Reconciler;
pub use traits::{ConfirmationSource, LedgerClient, RecordStore};
pub use types::{
    Confirmation, ConfirmationPayload, ConfirmedVia, DeliveredAt, DeliveredFields, DeliveryRecord,
    DeliveryStatus, DeliveryUpdate, LedgerReceipt, LedgerSubmission, StatusEvent,
};

// Re-export variant enums for convenience
pub use confirmation::{ConfirmationSourceVariant, MockConfirmationSource};
pub use ledger::{LedgerVariant, MockLedger};
pub use store::{MemoryStore, RecordStoreVariant};

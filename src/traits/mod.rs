pub mod confirmation_source;
pub mod ledger_client;
pub mod record_store;

pub use confirmation_source::ConfirmationSource;
pub use ledger_client::LedgerClient;
pub use record_store::RecordStore;

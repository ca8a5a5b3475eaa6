pub mod abi;
pub mod json_rpc;
pub mod mock;
pub mod noop;
pub mod variant;

pub use json_rpc::JsonRpcLedger;
pub use mock::MockLedger;
pub use noop::NoopLedger;
pub use variant::LedgerVariant;

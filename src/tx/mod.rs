//! Transaction construction, fee shaping, and settlement submission

mod builder;
mod fees;
mod submitter;

pub use builder::{Asset, TransactionBuilder, TransferTemplate, NATIVE_ASSET};
pub use fees::{shape_transaction, FeeModelResolver};
pub use submitter::SettlementSubmitter;

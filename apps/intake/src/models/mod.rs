pub mod catalog;
pub mod ledger;
pub mod outbox;
pub mod snapshot;
pub mod summary;

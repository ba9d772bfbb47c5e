//! gridsync core library: domain types, store contracts, in-memory stores.
//!
//! Public API surface:
//! - [`types`]: newtypes, records, wire payloads
//! - [`error`]: [`StoreError`]
//! - [`store`]: [`GridStore`] / [`RelationalStore`] contracts
//! - [`memory`]: process-local implementations of both stores

pub mod error;
pub mod memory;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use memory::{MemoryGrid, MemoryRelational};
pub use store::{
    GridRange, GridStore, Notification, NotificationStream, RelationalStore, RelationalTx,
};
pub use types::{
    BatchId, CandidateRecord, ChangeNotice, GridRow, Header, Operation, Provenance, Record,
    RecordId, RowRange,
};

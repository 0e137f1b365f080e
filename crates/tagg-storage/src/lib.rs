//! Shared HTTP transport and tender/cursor persistence for tagg.

pub mod http;
pub mod memory;
pub mod postgres;
pub mod store;

pub use http::{
    BackoffPolicy, FetchError, FetchRequest, FetchedJson, HttpClientConfig, HttpFetcher, HttpMethod,
    JsonTransport, ScriptedTransport,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{
    CursorStore, RunLedger, RunRecord, StoreError, TenderOrder, TenderQuery, TenderReader, TenderSink,
    MAX_PAGE_SIZE,
};

pub const CRATE_NAME: &str = "tagg-storage";

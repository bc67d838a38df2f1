pub mod executor;
pub mod memory;
pub mod postgres;
pub mod store;

pub use executor::{PageLimits, QueryError, QueryExecutor, ResultPage};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{RecordStore, StoreError, StoreQuery, StoreRows};

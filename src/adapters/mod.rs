mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryAdapter;
#[cfg(feature = "postgres")]
pub use postgres::PostgresAdapter;

mod gateway;
mod schema;

pub use gateway::{Gateway, LogonRow, SessionRow};

/// Role the ingester runs as; rows generated by it are never re-ingested.
pub const ETL_USER: &str = "pgaudit_etl";

pub mod postgres;

pub use postgres::PostgresMetadataStore;

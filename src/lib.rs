pub mod config;
pub mod error;
pub mod ids;
pub mod io;
pub mod links;
pub mod objects;
pub mod pipeline;
pub mod quality;
pub mod schema;
pub mod sources;
pub mod table;

pub use config::RunConfig;
pub use error::MergeError;
pub use pipeline::{merge, MergedTables, ProviderExtract};

pub mod config;
pub mod context;
pub mod docx;
pub mod error;
pub mod registry;
pub mod schema;
pub mod store;
pub mod templates;
pub mod tokens;
pub mod words;

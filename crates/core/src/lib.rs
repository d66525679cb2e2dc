//! Core library: inference coordination, embeddings, clustering and graph projection.

pub mod clustering;
pub mod config;
pub mod coordinator;
pub mod embeddings;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod vectorstore;

pub use error::{CoreError, CoreResult};

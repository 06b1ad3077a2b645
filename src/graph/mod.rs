//! Property-graph store client and domain repository

pub mod client;
pub mod repository;

pub use client::{GraphClient, HttpGraphClient, Row, WriteSummary};
pub use repository::{ComponentContext, GraphRepository};

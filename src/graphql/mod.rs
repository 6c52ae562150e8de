//! GraphQL wire types and the HTTP transport.
//!
//! The transport performs exactly one attempt per call and maps HTTP and
//! GraphQL outcomes onto [`GraphQLError`](crate::error::GraphQLError) variants.
//! Retry and circuit breaking are layered on top in [`crate::resilience`].

mod client;
mod types;

pub use client::{auth_headers, GraphQLTransport, HttpTransport};
pub use types::{ErrorLocation, GraphQLErrorEntry, GraphQLRequest, GraphQLResponse};

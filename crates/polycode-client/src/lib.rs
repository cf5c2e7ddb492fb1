//! Polycode Client
//!
//! Everything needed to talk to the platform sidecar: the structured
//! [`Error`] type and its catalogue, the wire models, the [`Transport`]
//! seam with its `reqwest` implementation, and [`ServiceClient`], which maps
//! each platform endpoint to a typed call.

mod client;
mod error;
mod model;
mod transport;

pub use client::{ServiceClient, paths};
pub use error::{
  CLIENT_MODULE, ERR_BAD_REQUEST, ERR_CANCELLED, ERR_CONTEXT_NOT_FOUND, ERR_HTTP_STATUS,
  ERR_INTERNAL, ERR_METHOD_NOT_FOUND, ERR_NON_DETERMINISTIC, ERR_SERVICE_NOT_FOUND,
  ERR_TASK_EXEC_ERROR, ERR_TASK_IN_PROGRESS, ERR_UNKNOWN_ERROR, Error, TransportError,
};
pub use model::*;
pub use transport::{HttpTransport, SESSION_HEADER, Transport, endpoint_url};

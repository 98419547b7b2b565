//! Batch HTTP client core.
//!
//! # Overview
//! Packs many independent HTTP subrequests into one `multipart/mixed` POST
//! to a batch processor, then splits the multipart response and hands each
//! subresponse to the callback registered with its subrequest. Correlation is
//! strictly positional: the `i`-th response part answers the `i`-th
//! subrequest.
//!
//! # Design
//! - The core does no I/O of its own. The single outer exchange goes through
//!   a `Transport` (any closure works) or, with `BatchClient::prepare`,
//!   through the host, which sends the outer request and hands the response
//!   back to `PreparedBatch::dispatch`.
//! - Failures of the whole exchange (transport, cancellation, non-batch
//!   status, unsplittable body, boundary collision) reach every callback.
//!   Failures of one part reach only that part's callback.
//! - Every callback is invoked exactly once, in the order it was added.
//!
//! ```no_run
//! use batchhttp_core::{BatchClient, ClientConfig, HttpRequest, HttpResponse, Subrequest, TransportError};
//!
//! fn send(request: &HttpRequest) -> Result<HttpResponse, TransportError> {
//!     unimplemented!("perform {} {}", request.method, request.url)
//! }
//!
//! let mut client = BatchClient::new(ClientConfig::for_site("http://api.example.com/")).with_transport(send);
//! let mut batch = client.new_batch();
//! batch.add(Subrequest::get("/users/1.json"), |result| println!("{result:?}"))?;
//! batch.add(Subrequest::get("/groups/1.json"), |result| println!("{result:?}"))?;
//! client.complete(&mut batch)?;
//! # Ok::<(), batchhttp_core::BatchError>(())
//! ```

pub mod batch;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod http;
pub mod multipart;
pub mod transfer;

pub use batch::{BatchEntry, BatchRequest, Callback, FrozenBatch, SubresponseResult};
pub use client::{BatchClient, BatchReport, BatchState, PreparedBatch, Transport};
pub use config::ClientConfig;
pub use error::{BatchError, DecodeError, TransportError, TransportErrorKind};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Subrequest, Subresponse};
pub use multipart::{ContentType, MimePart};

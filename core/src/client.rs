//! Batch client: builds the outer request, exchanges it, dispatches results.
//!
//! # Design
//! One batch goes through `Building -> Sending -> AwaitingResponse ->
//! Dispatching -> Done`, or ends in `Failed`. The transport call is the only
//! point where control leaves the client. Everything else (encoding,
//! assembly, parsing, dispatch) is sequential and deterministic.
//!
//! Two ways to drive a batch:
//! - `BatchClient::complete` runs every phase with the injected `Transport`.
//! - `BatchClient::prepare` returns a `PreparedBatch` whose outer request the
//!   host sends itself. The host then calls exactly one of `dispatch`,
//!   `fail` or `cancel`, each of which consumes the prepared batch. A
//!   prepared batch dropped without any of them is cancelled.
//!
//! Whatever the outcome, every callback is invoked exactly once, in
//! ascending sequence order.

use tracing::{debug, info_span, warn};

use crate::batch::{broadcast, BatchEntry, BatchRequest, FrozenBatch};
use crate::config::ClientConfig;
use crate::envelope::{decode_subresponse, encode_subrequest};
use crate::error::{BatchError, TransportError, TransportErrorKind};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::multipart::{self, ContentType, MimePart};

/// Header numbering request parts, and echoed on response parts.
pub const REQUEST_ID_HEADER: &str = "Multipart-Request-ID";

/// Performs the single outer HTTP exchange of a batch.
///
/// Connection handling, TLS, redirects and retries are the transport's
/// business. Any closure `FnMut(&HttpRequest) -> Result<HttpResponse,
/// TransportError>` is a transport.
pub trait Transport {
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<F> Transport for F
where
    F: FnMut(&HttpRequest) -> Result<HttpResponse, TransportError>,
{
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self(request)
    }
}

/// Phase of one batch exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Building,
    Sending,
    AwaitingResponse,
    Dispatching,
    Done,
    Failed,
}

/// Outcome of a dispatched batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Entries in the batch.
    pub entries: usize,
    /// Callbacks that received a subresponse.
    pub delivered: usize,
    /// Callbacks that received an entry-local failure.
    pub failed: usize,
    /// Response parts beyond the last entry, discarded.
    pub surplus_parts: usize,
}

/// Client for one batch processor endpoint.
///
/// `T` is the transport used by `complete`/`execute`; a client built with
/// `BatchClient::new` has none and only prepares batches for the host to
/// send.
#[derive(Debug, Clone)]
pub struct BatchClient<T = ()> {
    config: ClientConfig,
    transport: T,
    next_boundary: fn() -> String,
}

impl BatchClient<()> {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: (),
            next_boundary: multipart::generate_boundary,
        }
    }
}

impl<T> BatchClient<T> {
    pub fn with_transport<U: Transport>(self, transport: U) -> BatchClient<U> {
        BatchClient {
            config: self.config,
            transport,
            next_boundary: self.next_boundary,
        }
    }

    /// Replace the source of boundary candidates.
    pub fn with_boundary_generator(mut self, next_boundary: fn() -> String) -> Self {
        self.next_boundary = next_boundary;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start an empty batch request.
    pub fn new_batch(&self) -> BatchRequest {
        BatchRequest::new()
    }

    /// Encode and assemble `batch` into the outer request (`Building`).
    ///
    /// On `BoundaryCollision` nothing can be sent: every callback receives
    /// the error, which is also returned.
    pub fn prepare(&self, batch: FrozenBatch) -> Result<PreparedBatch, BatchError> {
        debug!(state = ?BatchState::Building, entries = batch.len(), "building batch");
        let entries = batch.into_entries();

        let parts: Vec<MimePart> = entries
            .iter()
            .map(|entry| {
                let mut part = encode_subrequest(entry.subrequest());
                if self.config.request_ids {
                    part.headers.push((REQUEST_ID_HEADER.to_string(), (entry.index() + 1).to_string()));
                }
                part
            })
            .collect();

        let document = match multipart::assemble_with(&parts, self.config.max_boundary_attempts, self.next_boundary) {
            Ok(document) => document,
            Err(err) => {
                debug!(state = ?BatchState::Failed, error = %err, "batch assembly failed");
                broadcast(entries, &err);
                return Err(err);
            }
        };

        let mut headers = vec![
            ("MIME-Version".to_string(), "1.0".to_string()),
            ("Content-Type".to_string(), document.content_type()),
        ];
        if let Some(user_agent) = &self.config.user_agent {
            headers.push(("User-Agent".to_string(), user_agent.clone()));
        }
        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self.config.endpoint.clone(),
            headers,
            body: document.body,
        };

        debug!(state = ?BatchState::Sending, boundary = %document.boundary, bytes = request.body.len(), "batch assembled");
        Ok(PreparedBatch {
            request,
            boundary: document.boundary,
            entries,
            config: self.config.clone(),
            state: BatchState::Sending,
        })
    }
}

impl<T: Transport> BatchClient<T> {
    /// Freeze `batch`, send it, and dispatch every subresponse.
    ///
    /// Batch-wide failures are delivered to every callback and returned.
    pub fn complete(&mut self, batch: &mut BatchRequest) -> Result<BatchReport, BatchError> {
        let frozen = batch.complete()?;
        self.execute(frozen)
    }

    /// Send an already frozen batch and dispatch every subresponse.
    pub fn execute(&mut self, batch: FrozenBatch) -> Result<BatchReport, BatchError> {
        if batch.is_empty() {
            warn!(endpoint = %self.config.endpoint, "no subrequests in batch, nothing sent");
            return Ok(BatchReport::default());
        }

        let span = info_span!("batch", entries = batch.len(), endpoint = %self.config.endpoint);
        let _enter = span.enter();

        let mut prepared = self.prepare(batch)?;
        prepared.transition(BatchState::AwaitingResponse);
        match self.transport.send(prepared.request()) {
            Ok(response) => prepared.dispatch(response),
            Err(err) => Err(prepared.fail(err)),
        }
    }
}

/// An assembled batch whose outer request is ready to be sent.
///
/// Dropping it before `dispatch`, `fail` or `cancel` cancels the exchange:
/// every pending callback receives `Cancelled`.
#[derive(Debug)]
pub struct PreparedBatch {
    request: HttpRequest,
    boundary: String,
    entries: Vec<BatchEntry>,
    config: ClientConfig,
    state: BatchState,
}

impl PreparedBatch {
    /// The outer request to put on the wire.
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Split the outer response and deliver each subresponse by position.
    ///
    /// Part `i` goes to entry `i`. Entries beyond the last part receive
    /// `MissingSubresponse`; parts beyond the last entry are discarded. A part
    /// that fails to decode affects only its own entry. A non-batch status or
    /// an unsplittable body is delivered to every callback and returned.
    pub fn dispatch(mut self, response: HttpResponse) -> Result<BatchReport, BatchError> {
        self.transition(BatchState::Dispatching);

        if !self.config.accepts_status(response.status) {
            warn!(status = response.status, "non-batch response");
            return Err(self.fail_all(BatchError::NonBatchResponse {
                status: response.status,
            }));
        }

        let mut report = BatchReport {
            entries: self.entries.len(),
            ..BatchReport::default()
        };
        if self.entries.is_empty() {
            self.transition(BatchState::Done);
            return Ok(report);
        }

        let parts = match response_boundary(&response).and_then(|b| multipart::split(&response.body, &b)) {
            Ok(parts) => parts,
            Err(err) => return Err(self.fail_all(err)),
        };
        debug!(parts = parts.len(), entries = self.entries.len(), "batch response split");

        let mut parts = parts.into_iter();
        for entry in std::mem::take(&mut self.entries) {
            let index = entry.index();
            let result = match parts.next() {
                Some(part) => part
                    .and_then(|part| {
                        check_request_id(&part, index);
                        decode_subresponse(&part)
                    })
                    .map_err(|e| {
                        debug!(index, reason = %e, "undecodable response part");
                        BatchError::MalformedPart {
                            index,
                            reason: e.to_string(),
                        }
                    }),
                None => Err(BatchError::MissingSubresponse { index }),
            };
            if result.is_ok() {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
            entry.deliver(result);
        }

        report.surplus_parts = parts.count();
        if report.surplus_parts > 0 {
            warn!(surplus = report.surplus_parts, "batch response has more parts than entries, discarding");
        }

        self.transition(BatchState::Done);
        Ok(report)
    }

    /// Record a failed exchange, delivering it to every callback.
    ///
    /// A transport failure of kind `Cancelled` is delivered as `Cancelled`.
    pub fn fail(self, error: TransportError) -> BatchError {
        let err = match error.kind {
            TransportErrorKind::Cancelled => BatchError::Cancelled,
            _ => BatchError::Transport(error),
        };
        self.fail_all(err)
    }

    /// Abandon the exchange; every callback receives `Cancelled`.
    pub fn cancel(self) {
        self.fail_all(BatchError::Cancelled);
    }

    fn fail_all(mut self, err: BatchError) -> BatchError {
        warn!(error = %err, entries = self.entries.len(), "batch failed");
        self.transition(BatchState::Failed);
        broadcast(std::mem::take(&mut self.entries), &err);
        err
    }

    fn transition(&mut self, next: BatchState) {
        debug!(from = ?self.state, to = ?next, "batch state");
        self.state = next;
    }
}

impl Drop for PreparedBatch {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        warn!(entries = self.entries.len(), "prepared batch dropped before completion, cancelling");
        self.state = BatchState::Failed;
        broadcast(std::mem::take(&mut self.entries), &BatchError::Cancelled);
    }
}

/// Boundary announced by the outer response's multipart Content-Type.
fn response_boundary(response: &HttpResponse) -> Result<String, BatchError> {
    let value = response
        .header("Content-Type")
        .ok_or_else(|| BatchError::MalformedMultipart("response has no Content-Type".into()))?;
    let content_type = ContentType::parse(value)
        .filter(ContentType::is_multipart)
        .ok_or_else(|| BatchError::MalformedMultipart(format!("response is not multipart: {value}")))?;
    content_type
        .boundary()
        .map(str::to_string)
        .ok_or_else(|| BatchError::MalformedMultipart("multipart response has no boundary".into()))
}

/// Correlation is positional; a disagreeing request id is only reported.
fn check_request_id(part: &MimePart, index: usize) {
    if let Some(id) = part.header(REQUEST_ID_HEADER) {
        if id.trim().parse::<usize>().ok() != Some(index + 1) {
            warn!(index, request_id = id, "response part request id does not match its position");
        }
    }
}

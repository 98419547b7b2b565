//! Batch exchanges against the live mock batch processor.
//!
//! # Design
//! Starts the mock server on a random port, then sends real batches over
//! HTTP using ureq as the transport. Validates that the client's multipart
//! assembly and the processor's parsing agree, and that every fault the
//! processor can inject surfaces as the right callback result.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use batchhttp_core::{
    BatchClient, BatchError, BatchRequest, ClientConfig, HttpMethod, HttpRequest, HttpResponse, Subrequest,
    Subresponse, TransportError, TransportErrorKind,
};

type Results = Rc<RefCell<Vec<Result<Subresponse, BatchError>>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start a mock server with a freshly seeded store on a random port.
fn start_server() -> SocketAddr {
    init_tracing();
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    addr
}

/// A ureq-backed transport.
///
/// Disables ureq's status-code-as-error behaviour so a non-batch 5xx comes
/// back as data for the client to judge.
fn ureq_transport() -> impl FnMut(&HttpRequest) -> Result<HttpResponse, TransportError> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .new_agent();
    move |request| send(&agent, request)
}

fn send(agent: &ureq::Agent, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    assert_eq!(request.method, HttpMethod::Post);
    let mut builder = agent.post(request.url.as_str());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let mut response = builder.send(&request.body[..]).map_err(transport_error)?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let body = response.body_mut().read_to_vec().map_err(transport_error)?;

    Ok(HttpResponse { status, headers, body })
}

fn transport_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::timeout(err.to_string()),
        ureq::Error::ConnectionFailed | ureq::Error::Io(_) => TransportError::connect(err.to_string()),
        other => TransportError::new(TransportErrorKind::Other, other.to_string()),
    }
}

fn batch_of(subrequests: Vec<Subrequest>, results: &Results) -> BatchRequest {
    let mut batch = BatchRequest::new();
    for subrequest in subrequests {
        let results = Rc::clone(results);
        batch
            .add(subrequest, move |result| results.borrow_mut().push(result))
            .unwrap();
    }
    batch
}

fn fault_config(addr: SocketAddr, fault: &str) -> ClientConfig {
    ClientConfig::new(&format!("http://{addr}/batch-processor?fault={fault}"))
}

fn json_body(sub: &Subresponse) -> serde_json::Value {
    serde_json::from_slice(sub.body.as_deref().unwrap()).unwrap()
}

#[test]
fn mixed_statuses_come_back_in_order() {
    let addr = start_server();
    let mut client =
        BatchClient::new(ClientConfig::for_site(&format!("http://{addr}/ignored/path"))).with_transport(ureq_transport());

    let results = Results::default();
    let mut batch = batch_of(
        vec![
            Subrequest::get(format!("http://{addr}/users/1.json")),
            Subrequest::get("/missing"),
            Subrequest::get("/users/@self"),
            Subrequest::get("/groups/1.json").header("Accept", "application/json"),
        ],
        &results,
    );
    let report = client.complete(&mut batch).unwrap();
    assert_eq!(report.delivered, 4);

    let results = results.borrow();
    let user = results[0].as_ref().unwrap();
    assert_eq!(user.status, 200);
    assert_eq!(user.version.as_deref(), Some("HTTP/1.1"));
    assert_eq!(user.header("content-type"), Some("application/json"));
    assert_eq!(json_body(user)["displayName"], "Deidra Hough");

    assert_eq!(results[1].as_ref().unwrap().status, 404);

    let unauthorized = results[2].as_ref().unwrap();
    assert_eq!(unauthorized.status, 401);
    assert_eq!(unauthorized.reason.as_deref(), Some("Unauthorized"));
    let challenges: Vec<&str> = unauthorized.header_all("WWW-Authenticate").collect();
    assert_eq!(challenges, vec!["Basic realm=\"Mock\"", "OAuth realm=\"Mock\""]);

    assert_eq!(json_body(results[3].as_ref().unwrap())["id"], "group-1");
}

#[test]
fn writes_and_reads_in_one_batch_apply_in_order() {
    let addr = start_server();
    let mut client = BatchClient::new(ClientConfig::for_site(&format!("http://{addr}")))
        .with_transport(ureq_transport());

    let results = Results::default();
    let mut batch = batch_of(
        vec![
            Subrequest::get("/notes/1"),
            Subrequest::new(HttpMethod::Put, "/notes/1")
                .header("Content-Type", "text/plain")
                .body("remember the milk"),
            Subrequest::get("/notes/1"),
            Subrequest::new(HttpMethod::Put, "/notes/1")
                .header("Content-Type", "text/plain")
                .body("forget the milk"),
            Subrequest::new(HttpMethod::Delete, "/notes/1"),
            Subrequest::new(HttpMethod::Head, "/notes/1"),
        ],
        &results,
    );
    client.complete(&mut batch).unwrap();

    let statuses: Vec<u16> = results.borrow().iter().map(|r| r.as_ref().unwrap().status).collect();
    assert_eq!(statuses, vec![404, 201, 200, 204, 204, 404]);
    let stored = results.borrow()[2].as_ref().unwrap().clone();
    assert_eq!(stored.header("Content-Type"), Some("text/plain"));
    assert_eq!(stored.body_text(), "remember the milk");
}

#[test]
fn binary_body_survives_the_round_trip() {
    let addr = start_server();
    let mut client = BatchClient::new(ClientConfig::for_site(&format!("http://{addr}")))
        .with_transport(ureq_transport());

    let payload: Vec<u8> = b"\r\n--not-the-boundary\r\n\x00\x01\xfe\xff\r\n".to_vec();
    let results = Results::default();
    let mut batch = batch_of(
        vec![
            Subrequest::new(HttpMethod::Post, "/echo")
                .header("Content-Type", "application/octet-stream")
                .body(payload.clone()),
            Subrequest::new(HttpMethod::Patch, "/users/1.json").body("{}"),
        ],
        &results,
    );
    client.complete(&mut batch).unwrap();

    let results = results.borrow();
    let echoed = results[0].as_ref().unwrap();
    assert_eq!(echoed.status, 200);
    assert_eq!(echoed.header("X-Echo-Method"), Some("POST"));
    assert_eq!(echoed.body.as_deref(), Some(&payload[..]));

    let rejected = results[1].as_ref().unwrap();
    assert_eq!(rejected.status, 405);
    assert_eq!(rejected.header("Allow"), Some("GET, HEAD, PUT, DELETE"));
}

#[test]
fn truncated_response_misses_the_last_entry() {
    let addr = start_server();
    let mut client = BatchClient::new(fault_config(addr, "truncate")).with_transport(ureq_transport());

    let results = Results::default();
    let mut batch = batch_of(
        vec![Subrequest::get("/users/1.json"), Subrequest::get("/groups/1.json")],
        &results,
    );
    let report = client.complete(&mut batch).unwrap();

    assert_eq!((report.delivered, report.failed), (1, 1));
    let results = results.borrow();
    assert_eq!(results[0].as_ref().unwrap().status, 200);
    assert_eq!(results[1], Err(BatchError::MissingSubresponse { index: 1 }));
}

#[test]
fn surplus_parts_are_discarded() {
    let addr = start_server();
    let mut client = BatchClient::new(fault_config(addr, "surplus")).with_transport(ureq_transport());

    let results = Results::default();
    let mut batch = batch_of(vec![Subrequest::get("/users/1.json")], &results);
    let report = client.complete(&mut batch).unwrap();

    assert_eq!(report.surplus_parts, 1);
    assert_eq!(results.borrow().len(), 1);
    assert_eq!(json_body(results.borrow()[0].as_ref().unwrap())["id"], "user-1");
}

#[test]
fn broken_part_fails_only_its_entry() {
    let addr = start_server();
    let mut client = BatchClient::new(fault_config(addr, "broken")).with_transport(ureq_transport());

    let results = Results::default();
    let mut batch = batch_of(
        vec![Subrequest::get("/users/1.json"), Subrequest::get("/groups/1.json")],
        &results,
    );
    let report = client.complete(&mut batch).unwrap();

    assert_eq!(report.failed, 1);
    let results = results.borrow();
    assert!(matches!(results[0], Err(BatchError::MalformedPart { index: 0, .. })));
    assert_eq!(json_body(results[1].as_ref().unwrap())["id"], "group-1");
}

#[test]
fn server_error_fails_every_entry() {
    let addr = start_server();
    let mut client = BatchClient::new(fault_config(addr, "error")).with_transport(ureq_transport());

    let results = Results::default();
    let mut batch = batch_of(vec![Subrequest::get("/a"), Subrequest::get("/b")], &results);
    let err = client.complete(&mut batch).unwrap_err();

    let expected = BatchError::NonBatchResponse { status: 500 };
    assert_eq!(err, expected);
    assert_eq!(*results.borrow(), vec![Err(expected.clone()), Err(expected)]);
}

#[test]
fn quoted_printable_parts_are_decoded() {
    let addr = start_server();
    let mut client = BatchClient::new(fault_config(addr, "quoted-printable")).with_transport(ureq_transport());

    let results = Results::default();
    let mut batch = batch_of(
        vec![Subrequest::get("/users/1.json"), Subrequest::get("/users/@self")],
        &results,
    );
    client.complete(&mut batch).unwrap();

    let results = results.borrow();
    assert_eq!(json_body(results[0].as_ref().unwrap())["displayName"], "Deidra Hough");
    assert_eq!(results[1].as_ref().unwrap().header_all("www-authenticate").count(), 2);
}

#[test]
fn legacy_framing_and_versionless_status_lines_are_accepted() {
    let addr = start_server();
    let mut client = BatchClient::new(fault_config(addr, "legacy")).with_transport(ureq_transport());

    let results = Results::default();
    let mut batch = batch_of(
        vec![Subrequest::get("/groups/1.json"), Subrequest::get("/nothing")],
        &results,
    );
    client.complete(&mut batch).unwrap();

    let results = results.borrow();
    let group = results[0].as_ref().unwrap();
    assert_eq!(group.version, None);
    assert_eq!(group.status, 200);
    assert_eq!(json_body(group)["displayName"], "Risus Urna Ve");
    let missing = results[1].as_ref().unwrap();
    assert_eq!((missing.status, missing.reason.as_deref()), (404, Some("Not Found")));
}

#[test]
fn unreachable_processor_fails_every_entry_with_transport_error() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let mut client =
        BatchClient::new(ClientConfig::for_site(&format!("http://{addr}"))).with_transport(ureq_transport());

    let results = Results::default();
    let mut batch = batch_of(vec![Subrequest::get("/a"), Subrequest::get("/b")], &results);
    let err = client.complete(&mut batch).unwrap_err();

    assert!(matches!(err, BatchError::Transport(_)));
    let results = results.borrow();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| *r == Err(err.clone())));
}

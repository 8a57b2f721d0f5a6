//! Client Lifecycle Tests
//!
//! Configuration, active case resolution and the submit/seal round trips
//! against an in-process transport.

use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::json;
use tally::transport::{Response, API_KEY_HEADER};
use tally::wire::schema;
use tally::{Client, ClientOptions, Error, MockTransport, SubmitStatus, Value};

fn online(transport: &Arc<MockTransport>) -> Client {
    transport.respond("/client/verify", Response::no_content());
    let client = Client::with_transport(transport.clone());
    client
        .configure(
            ClientOptions::new()
                .with_api_key("secret")
                .with_api_url("http://host/@/acme/students/v2"),
        )
        .expect("configure should succeed");
    client
}

fn offline() -> Client {
    let client = Client::new();
    client
        .configure(
            ClientOptions::new()
                .with_team("acme")
                .with_suite("students")
                .with_version("v1")
                .with_offline(true),
        )
        .expect("configure should succeed");
    client
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_api_url_supplies_identity() {
    let transport = Arc::new(MockTransport::new());
    let client = online(&transport);

    let options = client.options().unwrap();
    assert_eq!(options.team, "acme");
    assert_eq!(options.suite, "students");
    assert_eq!(options.version, "v2");
    assert_eq!(options.api_url.as_deref(), Some("http://host"));
    assert!(client.is_online());
}

#[test]
fn test_conflicting_suite_is_rejected() {
    let client = Client::new();
    let err = client
        .configure(
            ClientOptions::new()
                .with_suite("X")
                .with_api_url("http://host/@/acme/Y/v1")
                .with_offline(true),
        )
        .unwrap_err();
    match err {
        Error::Configuration(msg) => assert!(msg.contains("suite"), "message: {msg}"),
        other => panic!("expected configuration error, got {other:?}"),
    }
    assert!(!client.is_configured());
}

#[test]
fn test_failed_handshake_leaves_previous_configuration() {
    let transport = Arc::new(MockTransport::new());
    let client = online(&transport);

    transport.enqueue("/client/verify", Response::new(401, ""));
    let err = client
        .configure(ClientOptions::new().with_api_key("rotated"))
        .unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));

    let options = client.options().unwrap();
    assert_eq!(options.api_key.as_deref(), Some("secret"));
    assert!(client.is_online());
}

#[test]
fn test_going_offline_drops_server_access() {
    let transport = Arc::new(MockTransport::new());
    let client = online(&transport);
    client
        .configure(ClientOptions::new().with_offline(true))
        .unwrap();
    assert!(client.is_configured());
    assert!(!client.is_online());
    assert!(matches!(client.seal(), Err(Error::NotConfigured(_))));
}

// =============================================================================
// Active case resolution
// =============================================================================

#[test]
fn test_shared_mode_redirects_all_threads() {
    let client = Arc::new(offline());
    client.declare_testcase("alice").unwrap();

    let worker = Arc::clone(&client);
    thread::spawn(move || worker.check("from_thread", &true).unwrap())
        .join()
        .unwrap();

    let case = client.testcase("alice").unwrap();
    let case = case.lock().unwrap();
    assert_eq!(case.get("from_thread").unwrap().value, Value::Boolean(true));
}

#[test]
fn test_isolated_mode_keeps_threads_apart() {
    let client = Arc::new(Client::new());
    client
        .configure(
            ClientOptions::new()
                .with_team("acme")
                .with_suite("students")
                .with_version("v1")
                .with_offline(true)
                .with_concurrency(false),
        )
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["alice", "bob"]
        .into_iter()
        .map(|name| {
            let client = Arc::clone(&client);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                client.declare_testcase(name).unwrap();
                // both threads have declared before either captures
                barrier.wait();
                client.check("owner", name).unwrap();
                client.add_hit_count("calls").unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for name in ["alice", "bob"] {
        let case = client.testcase(name).unwrap();
        let case = case.lock().unwrap();
        assert_eq!(case.get("owner").unwrap().value, Value::from(name));
        assert_eq!(case.get("calls").unwrap().value, Value::Integer(1));
    }
}

#[test]
fn test_declare_twice_keeps_union() {
    let client = offline();
    client.declare_testcase("alice").unwrap();
    client.check("a", &1).unwrap();
    client.check("both", &1).unwrap();
    client.declare_testcase("alice").unwrap();
    client.check("b", &2).unwrap();
    client.check("both", &2).unwrap();

    let case = client.testcase("alice").unwrap();
    let case = case.lock().unwrap();
    let keys: Vec<_> = case.results().keys().cloned().collect();
    assert_eq!(keys, vec!["a", "b", "both"]);
    assert_eq!(case.get("both").unwrap().value, Value::Integer(2));
}

// =============================================================================
// Submission
// =============================================================================

#[test]
fn test_post_then_seal() {
    let transport = Arc::new(MockTransport::new());
    let client = online(&transport);
    client.declare_testcase("alice").unwrap();
    client.check("gpa", &3.5).unwrap();
    client.declare_testcase("bob").unwrap();
    client.check("gpa", &2.5).unwrap();

    transport.enqueue("/client/submit", Response::json(&json!([
        {"testcase": "alice", "src": {"version": "v2"}, "dst": {"version": "v1"}, "score": 1.0},
        {"testcase": "bob", "src": {"version": "v2"}, "dst": {"version": "v1"}, "score": 0.8}
    ])));
    assert_eq!(client.post().unwrap(), SubmitStatus::Diff);

    let submit = transport.requests_to("/client/submit");
    let messages = schema::decode_messages(&submit[0].body).unwrap();
    let names: Vec<_> = messages.iter().map(|m| m.metadata.testcase.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob"]);

    transport.respond("/batch/acme/students/v2/seal", Response::no_content());
    client.seal().unwrap();
}

#[test]
fn test_first_version_is_sent() {
    let transport = Arc::new(MockTransport::new());
    let client = online(&transport);
    client.declare_testcase("alice").unwrap();

    transport.enqueue("/client/submit", Response::json(&json!([
        {"testcase": "alice", "src": {"version": "v2"}, "dst": {"version": "v2"}, "score": 0.0}
    ])));
    assert_eq!(client.post().unwrap(), SubmitStatus::Sent);
}

#[test]
fn test_requests_leave_auth_to_transport() {
    let transport = Arc::new(MockTransport::new());
    let client = online(&transport);
    transport.enqueue("/batch/acme/students/v2/seal", Response::no_content());
    client.seal().unwrap();
    for request in transport.requests() {
        assert!(request.header(API_KEY_HEADER).is_none());
    }
}

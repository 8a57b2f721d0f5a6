//! Server round-trips: handshake, submission, seal, test case listing

use std::fmt;
use std::sync::{Arc, PoisonError};

use serde::{Deserialize, Serialize};
use tally_wire::{schema, ComparisonOverview, ErrorBody};
use tracing::{debug, info};

use super::Client;
use crate::config::ResolvedOptions;
use crate::error::{Error, Result};
use crate::transport::{Request, Transport, SUBMISSION_MODE_HEADER};

const OCTET_STREAM: &str = "application/octet-stream";

/// Outcome of a successful submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitStatus {
    /// Accepted; no comparison result (yet)
    Sent,
    /// Compared and matched the baseline
    Pass,
    /// Compared and differed from the baseline
    Diff,
}

impl fmt::Display for SubmitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmitStatus::Sent => "sent",
            SubmitStatus::Pass => "pass",
            SubmitStatus::Diff => "diff",
        };
        f.pad(s)
    }
}

impl SubmitStatus {
    /// Status for one comparison entry.
    ///
    /// A baseline equal to the submitted version means this version is
    /// itself the baseline, so there is nothing to compare against.
    pub fn classify(submitted_version: &str, overview: &ComparisonOverview) -> Self {
        if overview.dst.version == submitted_version {
            SubmitStatus::Sent
        } else if overview.score >= 1.0 {
            SubmitStatus::Pass
        } else {
            SubmitStatus::Diff
        }
    }

    /// Combined status of several entries: any diff wins, then any pass.
    pub fn aggregate<I: IntoIterator<Item = SubmitStatus>>(statuses: I) -> Self {
        statuses
            .into_iter()
            .fold(SubmitStatus::Sent, |acc, status| match (acc, status) {
                (SubmitStatus::Diff, _) | (_, SubmitStatus::Diff) => SubmitStatus::Diff,
                (SubmitStatus::Pass, _) | (_, SubmitStatus::Pass) => SubmitStatus::Pass,
                _ => SubmitStatus::Sent,
            })
    }
}

#[derive(Deserialize)]
struct ElementEntry {
    name: String,
}

/// Verify the API key. `204` is the only accepted reply.
pub(super) fn handshake(transport: &dyn Transport) -> Result<()> {
    let response = transport.execute(&Request::post("/client/verify"))?;
    match response.status {
        204 => {
            debug!("API key verified");
            Ok(())
        }
        401 => Err(Error::Authentication("invalid API key".to_string())),
        status => Err(Error::Authentication(format!(
            "could not verify API key (status {status})"
        ))),
    }
}

impl Client {
    fn online(&self, op: &str) -> Result<(ResolvedOptions, Arc<dyn Transport>)> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match (&state.options, &state.transport) {
            (Some(options), Some(transport)) => Ok((options.clone(), Arc::clone(transport))),
            _ => Err(Error::NotConfigured(op.to_string())),
        }
    }

    /// Submit every registered case in one envelope.
    pub fn post(&self) -> Result<SubmitStatus> {
        self.post_cases(None)
    }

    /// Submit the named cases (all when `None`) in one envelope.
    pub fn post_cases(&self, names: Option<&[&str]>) -> Result<SubmitStatus> {
        self.online("post")?;
        let buffers = self.encode_cases(names);
        self.submit_buffers(&buffers)
    }

    /// Submit already-encoded message buffers in one envelope.
    pub fn submit_buffers<B: AsRef<[u8]>>(&self, buffers: &[B]) -> Result<SubmitStatus> {
        let (options, transport) = self.online("post")?;
        if buffers.is_empty() {
            debug!("nothing to submit");
            return Ok(SubmitStatus::Sent);
        }

        let mode = if options.submit_async { "async" } else { "sync" };
        let request = Request::post("/client/submit")
            .with_header(SUBMISSION_MODE_HEADER, mode)
            .with_body(OCTET_STREAM, schema::encode_messages(buffers));
        let response = transport.execute(&request)?;

        let status = match response.status {
            204 => SubmitStatus::Sent,
            200 => {
                let overviews = ComparisonOverview::parse_list(&response.body).map_err(|e| {
                    Error::Submission(format!("unreadable comparison result: {e}"))
                })?;
                SubmitStatus::aggregate(
                    overviews
                        .iter()
                        .map(|o| SubmitStatus::classify(&options.version, o)),
                )
            }
            400 => {
                return Err(Error::Submission(ErrorBody::message_from(&response.body)));
            }
            status => {
                return Err(Error::Submission(format!(
                    "server rejected submission (status {status})"
                )));
            }
        };

        info!(messages = buffers.len(), %status, mode, "submitted results");
        Ok(status)
    }

    /// Mark the configured version as complete.
    pub fn seal(&self) -> Result<()> {
        let (options, transport) = self.online("seal")?;
        let path = format!(
            "/batch/{}/{}/{}/seal",
            path_segment(&options.team),
            path_segment(&options.suite),
            path_segment(&options.version)
        );
        let response = transport.execute(&Request::post(path))?;
        match response.status {
            204 => {
                info!(version = %options.version, "sealed version");
                Ok(())
            }
            403 => Err(Error::Authentication(
                "not allowed to seal this version".to_string(),
            )),
            status => Err(Error::Submission(format!(
                "failed to seal version (status {status})"
            ))),
        }
    }

    /// Test case names the server knows for the configured suite.
    pub fn get_testcases(&self) -> Result<Vec<String>> {
        let (options, transport) = self.online("get_testcases")?;
        let path = format!(
            "/client/element/{}/{}",
            path_segment(&options.team),
            path_segment(&options.suite)
        );
        let response = transport.execute(&Request::get(path))?;
        if response.status != 200 {
            return Err(Error::Submission(format!(
                "failed to list test cases (status {})",
                response.status
            )));
        }
        let entries: Vec<ElementEntry> = serde_json::from_slice(&response.body)?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn path_segment(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientOptions;
    use crate::transport::{MockTransport, Response, API_KEY_HEADER};
    use serde_json::json;
    use tally_wire::VersionRef;

    fn online_client() -> (Client, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        transport.respond("/client/verify", Response::no_content());
        let client = Client::with_transport(transport.clone());
        client
            .configure(
                ClientOptions::new()
                    .with_api_key("secret")
                    .with_api_url("http://host/@/acme/students/v2"),
            )
            .unwrap();
        (client, transport)
    }

    fn overview(dst: &str, score: f64) -> ComparisonOverview {
        ComparisonOverview {
            testcase: None,
            src: VersionRef {
                version: "v2".to_string(),
            },
            dst: VersionRef {
                version: dst.to_string(),
            },
            score,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(SubmitStatus::classify("v2", &overview("v2", 0.3)), SubmitStatus::Sent);
        assert_eq!(SubmitStatus::classify("v2", &overview("v1", 1.0)), SubmitStatus::Pass);
        assert_eq!(SubmitStatus::classify("v2", &overview("v1", 0.99)), SubmitStatus::Diff);
    }

    #[test]
    fn test_aggregate() {
        use SubmitStatus::*;
        assert_eq!(SubmitStatus::aggregate(Vec::new()), Sent);
        assert_eq!(SubmitStatus::aggregate([Sent, Pass]), Pass);
        assert_eq!(SubmitStatus::aggregate([Pass, Diff, Sent]), Diff);
    }

    #[test]
    fn test_handshake_on_configure() {
        let (client, transport) = online_client();
        assert!(client.is_online());
        let verify = transport.requests_to("/client/verify");
        assert_eq!(verify.len(), 1);
        // the key header is the HTTP transport's job
        assert!(verify[0].header(API_KEY_HEADER).is_none());
    }

    #[test]
    fn test_handshake_rejected_key() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue("/client/verify", Response::new(401, ""));
        let client = Client::with_transport(transport.clone());
        let err = client
            .configure(
                ClientOptions::new()
                    .with_api_key("bad")
                    .with_api_url("http://host/@/acme/students/v1"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(ref msg) if msg == "invalid API key"));
        assert!(!client.is_configured());

        transport.enqueue("/client/verify", Response::new(500, ""));
        let err = client
            .configure(
                ClientOptions::new()
                    .with_api_key("k")
                    .with_api_url("http://host/@/acme/students/v1"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn test_post_statuses() {
        let (client, transport) = online_client();
        client.declare_testcase("alice").unwrap();
        client.check("k", &1).unwrap();

        transport.enqueue("/client/submit", Response::no_content());
        assert_eq!(client.post().unwrap(), SubmitStatus::Sent);

        transport.enqueue("/client/submit", Response::json(&json!([
            {"testcase": "alice", "src": {"version": "v2"}, "dst": {"version": "v1"}, "score": 1.0}
        ])));
        assert_eq!(client.post().unwrap(), SubmitStatus::Pass);

        transport.enqueue("/client/submit", Response::json(&json!([
            {"testcase": "alice", "src": {"version": "v2"}, "dst": {"version": "v1"}, "score": 0.5}
        ])));
        assert_eq!(client.post().unwrap(), SubmitStatus::Diff);

        transport.enqueue("/client/submit", Response::new(400, r#"{"errors":["batch is sealed"]}"#));
        assert!(matches!(
            client.post(),
            Err(Error::Submission(ref msg)) if msg == "batch is sealed"
        ));

        transport.enqueue("/client/submit", Response::new(502, "bad gateway"));
        assert!(matches!(client.post(), Err(Error::Submission(_))));
    }

    #[test]
    fn test_post_request_shape() {
        let (client, transport) = online_client();
        client.declare_testcase("alice").unwrap();
        client.check("k", "v").unwrap();
        client.declare_testcase("bob").unwrap();

        transport.enqueue("/client/submit", Response::no_content());
        client.post_cases(Some(&["alice"])).unwrap();

        let submit = transport.requests_to("/client/submit");
        assert_eq!(submit.len(), 1);
        assert_eq!(submit[0].content_type.as_deref(), Some(OCTET_STREAM));
        assert_eq!(submit[0].header(SUBMISSION_MODE_HEADER), Some("sync"));
        let messages = schema::decode_messages(&submit[0].body).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].metadata.testcase, "alice");
        assert_eq!(messages[0].metadata.version, "v2");
    }

    #[test]
    fn test_async_submission_header() {
        let (client, transport) = online_client();
        client
            .configure(ClientOptions::new().with_submit_async(true))
            .unwrap();
        client.declare_testcase("alice").unwrap();
        transport.enqueue("/client/submit", Response::no_content());
        client.post().unwrap();
        let submit = transport.requests_to("/client/submit");
        assert_eq!(submit[0].header(SUBMISSION_MODE_HEADER), Some("async"));
    }

    #[test]
    fn test_seal() {
        let (client, transport) = online_client();
        transport.enqueue("/batch/acme/students/v2/seal", Response::no_content());
        client.seal().unwrap();
        assert_eq!(
            transport.requests()[1].path,
            "/batch/acme/students/v2/seal"
        );

        transport.enqueue("/batch/acme/students/v2/seal", Response::new(403, ""));
        assert!(matches!(client.seal(), Err(Error::Authentication(_))));
        transport.enqueue("/batch/acme/students/v2/seal", Response::new(500, ""));
        assert!(matches!(client.seal(), Err(Error::Submission(_))));
    }

    #[test]
    fn test_get_testcases() {
        let (client, transport) = online_client();
        transport.respond(
            "/client/element/acme/students",
            Response::json(&json!([{"name": "alice"}, {"name": "bob"}])),
        );
        assert_eq!(
            client.get_testcases().unwrap(),
            vec!["alice".to_string(), "bob".to_string()]
        );
    }

    #[test]
    fn test_path_segment() {
        assert_eq!(path_segment("students-v1.2_x~"), "students-v1.2_x~");
        assert_eq!(path_segment("first year"), "first%20year");
        assert_eq!(path_segment("a/b?c#d"), "a%2Fb%3Fc%23d");
        assert_eq!(path_segment("é"), "%C3%A9");
    }

    #[test]
    fn test_seal_and_listing_encode_names() {
        let transport = Arc::new(MockTransport::new());
        transport
            .respond("/client/verify", Response::no_content())
            .respond("/batch/acme/first%20year/v2%2Frc/seal", Response::no_content())
            .respond(
                "/client/element/acme/first%20year",
                Response::json(&json!([{"name": "alice"}])),
            );
        let client = Client::with_transport(transport.clone());
        client
            .configure(
                ClientOptions::new()
                    .with_api_key("secret")
                    .with_api_url("http://host/@/acme")
                    .with_suite("first year")
                    .with_version("v2/rc"),
            )
            .unwrap();

        client.seal().unwrap();
        assert_eq!(client.get_testcases().unwrap(), vec!["alice".to_string()]);
        assert_eq!(transport.requests_to("/batch/acme/first%20year/v2%2Frc/seal").len(), 1);
    }

    #[test]
    fn test_transport_failure_propagates() {
        let (client, transport) = online_client();
        client.declare_testcase("alice").unwrap();
        transport.enqueue_failure("/client/submit", "connection reset");
        assert!(matches!(client.post(), Err(Error::Transport(_))));
    }
}

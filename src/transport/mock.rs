//! In-process transport with scripted replies

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use super::{Request, Response, Transport, TransportError};

type Scripted = Result<Response, String>;

/// Mock transport for testing.
///
/// Each path has a queue of one-shot replies and an optional standing
/// reply used once the queue is empty. Every request is recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    standing: Mutex<HashMap<String, Response>>,
    log: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request to `path` with `response` once its queue is empty.
    pub fn respond(&self, path: impl Into<String>, response: Response) -> &Self {
        self.standing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), response);
        self
    }

    /// Queue a reply for the next request to `path`.
    pub fn enqueue(&self, path: impl Into<String>, response: Response) -> &Self {
        self.push(path.into(), Ok(response))
    }

    /// Queue a connection failure for the next request to `path`.
    pub fn enqueue_failure(&self, path: impl Into<String>, message: impl Into<String>) -> &Self {
        self.push(path.into(), Err(message.into()))
    }

    fn push(&self, path: String, reply: Scripted) -> &Self {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path)
            .or_default()
            .push_back(reply);
        self
    }

    /// Requests seen so far, oldest first
    pub fn requests(&self) -> Vec<Request> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Requests seen so far for `path`
    pub fn requests_to(&self, path: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: &Request) -> Result<Response, TransportError> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let queued = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError::ConnectionFailed(message)),
            None => self
                .standing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&request.path)
                .cloned()
                .ok_or_else(|| {
                    TransportError::ConnectionFailed(format!(
                        "no reply scripted for {} {}",
                        request.method.as_str(),
                        request.path
                    ))
                }),
        }
    }
}

//! Tally - test result capture client
//!
//! Captures values and timings produced while a test case runs, converts
//! them into a typed value model, and submits them to a comparison
//! service that checks them against a baseline version.
//!
//! ```no_run
//! use tally::{Client, ClientOptions};
//!
//! let client = Client::new();
//! client.configure(
//!     ClientOptions::new()
//!         .with_api_key("key")
//!         .with_api_url("https://tally.example.com/@/acme/students/v2"),
//! )?;
//! client.declare_testcase("alice")?;
//! client.check("gpa", &3.9)?;
//! client.post()?;
//! client.seal()?;
//! # Ok::<(), tally::Error>(())
//! ```

pub mod case;
pub mod client;
pub mod config;
pub mod error;
pub mod runner;
pub mod transform;
pub mod transport;

pub use case::{Case, ResultEntry};
pub use client::{CaseHandle, Client, ScopedTimer, SubmitStatus};
pub use config::{ClientOptions, ResolvedOptions};
pub use error::{Error, Result};
pub use runner::{CaseOutcome, CaseState, RunSummary, Runner, RunnerOptions, Workflow, WorkflowError};
pub use transform::{Adapted, Capturable, Context, TransformError, Transformer};
pub use transport::{HttpTransport, MockTransport, Transport, TransportError};

pub use tally_wire as wire;
pub use tally_wire::{Category, ComparisonRule, Value};

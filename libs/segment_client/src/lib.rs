//! # Segment Client
//!
//! Client for the segment membership service with request coalescing.
//!
//! Callers ask "is identifier X in segment S?" one lookup at a time. The
//! [`Batcher`] queues those lookups, flushes them when a batch fills up or the
//! oldest one has waited `max_batch_delay`, merges lookups that share an
//! identifier into a single `GET /segment/touch-multi` request, and fans the one
//! response back out so every caller gets its own result.
//!
//! ```text
//! check() ─► BatchQueue ─► FlushScheduler ─► BatchProcessor ─► Transport
//!    ▲                      (size | delay)     (group by id)        │
//!    └──────────── PendingCheck ◄──── fan-out ◄── LookupResponse ◄──┘
//! ```
//!
//! ## Failure semantics
//!
//! - Transport, status and parse failures hit every lookup in the affected
//!   request and nothing else.
//! - A segment reported with an `error`, or missing from the response, fails
//!   only the lookups for that segment.
//! - Nothing is retried here; [`CheckError::is_retryable`] helps callers decide.
//! - Shutdown answers every queued lookup with [`CheckError::Shutdown`].
//!
//! ## Usage
//!
//! ```no_run
//! use segment_client::{ClientConfig, IdentifierType, SegmentClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SegmentClient::new(ClientConfig::load(None)?.with_token("dsn"))?;
//! let member = client.check("259f835567d099ee", 307, IdentifierType::ExternalUid).await?;
//! println!("member: {member}");
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod batcher;
pub mod client;
pub mod config;
pub mod error;
pub mod group;
pub mod identifier;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod response;
pub mod scan;
pub mod scheduler;
pub mod task;
pub mod test_utils;
pub mod transport;

pub use batcher::Batcher;
pub use client::SegmentClient;
pub use config::{BatchConfig, ClientConfig, HttpConfig, DEFAULT_BASE_URL};
pub use error::{AdmissionError, CheckError, ClientError, ConfigError, ScanError, TransportError};
pub use group::{group_tasks, Grouping, RequestGroup, TOUCH_MULTI_PATH};
pub use identifier::{IdentifierType, UnknownIdentifierType};
pub use metrics::{EngineStats, FlushTrigger, StatsSnapshot};
pub use response::{LookupResponse, SegmentOutcome};
pub use scan::{Scanner, SCAN_MIN_IDENTIFIERS, SCAN_PATH};
pub use task::{CheckResult, LookupTask, PendingCheck, ResultSlot};
pub use transport::{HttpTransport, Method, Transport, TransportRequest, TransportResponse};

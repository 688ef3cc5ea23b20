//! Session state machine, ingestion pipeline and read/command facade.
//!
//! Transport events arrive on an mpsc channel and are consumed in order by a
//! single event loop ([`Hub::spawn_event_loop`]). Storage is the source of
//! truth; [`cache::AggregateCache`] is a derived index rebuilt from it on
//! start.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod ingest;
pub mod qr;
pub mod session;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use config::{HubConfig, ReadSource};
pub use dispatcher::Dispatcher;
pub use error::{HubError, TransportError};
pub use hub::Hub;
pub use transport::{EventSink, Transport};

/// Capacity of the transport event queue.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

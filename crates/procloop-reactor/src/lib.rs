//! # procloop-reactor
//!
//! **Purpose**: Synchronous process I/O reactor: spawn one child, talk to it
//! over its stdin/stdout, and get control back when there is nothing more to
//! do or the run times out.
//!
//! ## Features
//!
//! - **Spawn**: one child per reactor, stdin and stdout piped, stderr inherited
//! - **Send**: buffered, non-blocking writes; the caller's bytes are copied
//! - **Run**: bounded event loop delivering stdout chunks to a handler, with
//!   an optional one-shot timeout
//! - **Backpressure**: a single read buffer, never more than one chunk in flight
//! - **Sticky errors**: end of stream and read failures are recorded once and
//!   refuse further runs
//! - **Teardown**: SIGTERM (or SIGKILL) with escalation, ordered handle close,
//!   and zombie reaping; also performed on drop
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use procloop_reactor::{Reactor, RunOutcome};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut reactor = Reactor::new();
//! reactor.spawn(["cat"])?;
//! reactor.send(b"ping")?;
//!
//! let mut received = Vec::new();
//! let outcome = reactor.run(
//!     |control, chunk| {
//!         received.extend_from_slice(chunk);
//!         if received.len() >= 4 {
//!             control.stop();
//!         }
//!     },
//!     Some(Duration::from_secs(5)),
//! )?;
//! assert_eq!(outcome, RunOutcome::Stopped);
//!
//! reactor.exit(false)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod reaper;

#[cfg(unix)]
mod buffer;
#[cfg(unix)]
mod event_loop;
#[cfg(unix)]
mod handles;
#[cfg(unix)]
mod pipe;
#[cfg(unix)]
mod reactor;
#[cfg(unix)]
mod timer;
#[cfg(unix)]
mod write;

pub use config::ReactorConfig;
pub use error::{ReactorError, Result, StreamFault};
pub use reaper::{reap, reap_with_interval};

#[cfg(unix)]
pub use reactor::{Control, Reactor, ReactorState, RunOutcome};

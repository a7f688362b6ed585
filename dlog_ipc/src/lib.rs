//! # dlog cross-core primitives
//!
//! The two cores of the logger share no mutable state except through the
//! types in this crate:
//!
//! - [`mailbox`] - single-slot, latest-write-wins 32-bit signal with a
//!   blocking read. Carries control (`period` / `stop`) from the ingress
//!   core to the sampler, and the stop confirmation back.
//! - [`egress`] - bounded lock-free byte ring from the sampler's timer
//!   callback to the transport writer task.
//!
//! ```text
//!  core 0                         core 1
//! ┌──────────────┐  mailbox   ┌──────────────────┐
//! │ Ingress task ├───────────►│ Sampler control  │
//! │              │◄───────────┤  + timer callback├──┐
//! └──────────────┘  mailbox   └──────────────────┘  │ enqueue
//!                             ┌──────────────────┐  │
//!           transport ◄───────┤ Egress writer    │◄─┘ drain
//!                             └──────────────────┘
//! ```
//!
//! ```rust
//! use dlog_ipc::{EgressQueue, mailbox};
//! use std::sync::Arc;
//!
//! let (tx, rx) = mailbox("sampler-control");
//! tx.post(1000);
//! assert_eq!(rx.try_recv(), Some(1000));
//!
//! let queue = Arc::new(EgressQueue::with_capacity(64).unwrap());
//! let mut consumer = queue.consumer().unwrap();
//! assert!(queue.enqueue(&[1, 2, 3]));
//! let mut out = [0u8; 64];
//! assert_eq!(consumer.drain(&mut out).len(), 3);
//! ```

pub mod egress;
pub mod error;
pub mod mailbox;

pub use crate::egress::{Drain, EgressConsumer, EgressQueue, EgressStats};
pub use crate::error::{IpcError, IpcResult};
pub use crate::mailbox::{MailboxReceiver, MailboxSender, MailboxStats, mailbox};

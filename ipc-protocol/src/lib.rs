//! Length-framed IPC session protocol between the orchestrator and each
//! agent process.
//!
//! A process-wide [`IpcTransport`] listens on a Unix domain socket; each
//! accepted connection becomes a [`Session`] carrying `TaskCommand`s one way
//! and `TaskEvent`s the other, framed per [`framing`]'s 4-byte
//! big-endian-length-prefixed wire format.

mod framing;
mod transport;

pub use framing::{read_frame, write_frame};
pub use transport::{IpcTransport, Session};

pub use eval_core::ipc_messages::{TaskCommand, TaskEvent};

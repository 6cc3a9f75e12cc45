//! PostgreSQL target: session management, COPY framing and the writer.

pub mod copy;
pub mod session;
pub mod tls;
pub mod writer;

pub use session::{with_session, with_transaction, Session, TxnState};
pub use writer::{copy_from_queue, WriterOptions, WriterOutcome};

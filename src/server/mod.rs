//! TCP server for the flatshop store daemon.
//!
//! [`Router`] accepts connections and hands each one to
//! [`handle_connection`](router::handle_connection), which speaks a
//! one-command-per-line protocol against a shared [`Shop`](crate::Shop).
pub mod router;

pub use router::Router;

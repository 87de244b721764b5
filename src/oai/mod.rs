//! OAI-PMH wire protocol: verbs, the parsed response envelope, and the
//! [`Communicator`] capability contract with its HTTP reference impl.

mod client;
mod envelope;

pub use client::{BasicAuth, Communicator, HttpCommunicator};
pub use envelope::{RawRecord, RecordHeader, ResponseEnvelope, Verb, parse};

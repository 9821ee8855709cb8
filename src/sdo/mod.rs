pub mod client;
pub use client::{Completion, SdoClient};

pub mod codec;
pub use codec::{BlockSegment, ClientRequest, CodecError, CommandByte, ServerResponse};

pub mod errors;
pub use errors::{SDOAbortCode, SdoError};

pub mod queue;
pub use queue::RequestQueue;

pub mod request;
pub use request::{Direction, RequestId, TransferMode, TransferRequest, TransferState};

//! Wire messages shared by the gRPC surface and the job queue.
//!
//! Declared with prost derives; field tags are the on-wire contract and must
//! not be renumbered.

use std::collections::HashMap;

/// A request to run the module's command once.
#[derive(Clone, PartialEq, prost::Message)]
pub struct InvocationRequest {
    /// Caller-assigned id, unique for the caller's lifetime.
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(string, tag = "2")]
    pub module: String,
    /// Invocation parameters, exported to the command's environment.
    #[prost(map = "string, string", tag = "3")]
    pub env: HashMap<String, String>,
    /// Inline input payload. Takes precedence over `payload_url`.
    #[prost(bytes = "vec", tag = "4")]
    pub stdin: Vec<u8>,
    /// External location of the input when it is too large to inline.
    #[prost(string, tag = "5")]
    pub payload_url: String,
}

/// Result of one invocation.
///
/// At most one of `stdout` and `payload_url` is non-empty.
#[derive(Clone, PartialEq, prost::Message)]
pub struct InvocationReply {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(string, tag = "2")]
    pub module: String,
    #[prost(int32, tag = "3")]
    pub exitcode: i32,
    #[prost(bytes = "vec", tag = "4")]
    pub stdout: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub stderr: Vec<u8>,
    /// Reference to offloaded output, set instead of `stdout`.
    #[prost(string, tag = "6")]
    pub payload_url: String,
}

impl InvocationReply {
    /// Empty reply echoing the request's identity.
    pub fn for_request(request: &InvocationRequest) -> Self {
        Self {
            id: request.id,
            module: request.module.clone(),
            ..Default::default()
        }
    }

    /// Reply that never reached the command, with a reserved exit code.
    pub fn short_circuit(request: &InvocationRequest, exitcode: i32, reason: &str) -> Self {
        Self {
            exitcode,
            stderr: reason.as_bytes().to_vec(),
            ..Self::for_request(request)
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Pong {
    #[prost(string, tag = "1")]
    pub val: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CancelRequest {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,
}

/// Entry on a module's control topic.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ControlEntry {
    #[prost(oneof = "control_entry::Entry", tags = "1, 2")]
    pub entry: Option<control_entry::Entry>,
}

pub mod control_entry {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Entry {
        #[prost(message, tag = "1")]
        Ping(super::Empty),
        #[prost(message, tag = "2")]
        Cancel(super::CancelRequest),
    }
}

/// Decoded control-plane instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Ping,
    Cancel(u64),
}

/// A control entry with no variant set.
#[derive(Debug, thiserror::Error)]
#[error("control entry carries no instruction")]
pub struct EmptyControlEntry;

impl TryFrom<ControlEntry> for Control {
    type Error = EmptyControlEntry;

    fn try_from(entry: ControlEntry) -> Result<Self, Self::Error> {
        match entry.entry {
            Some(control_entry::Entry::Ping(_)) => Ok(Control::Ping),
            Some(control_entry::Entry::Cancel(cancel)) => Ok(Control::Cancel(cancel.request_id)),
            None => Err(EmptyControlEntry),
        }
    }
}

impl From<Control> for ControlEntry {
    fn from(control: Control) -> Self {
        let entry = match control {
            Control::Ping => control_entry::Entry::Ping(Empty {}),
            Control::Cancel(request_id) => {
                control_entry::Entry::Cancel(CancelRequest { request_id })
            }
        };
        ControlEntry { entry: Some(entry) }
    }
}

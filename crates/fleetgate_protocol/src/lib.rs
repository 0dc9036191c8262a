//! # Fleetgate Protocol
//!
//! Wire types for the agent sync protocol.
//!
//! This crate provides:
//! - `FrameDecoder` for recovering request bodies sent with or without
//!   compression framing
//! - Tag enums (`Policy`, `RuleType`, `VoteType`, `ClientMode`) with
//!   canonical spellings
//! - Request and response messages for preflight, event upload, rule
//!   download and postflight
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod messages;
mod tags;

pub use error::{FrameError, FrameResult};
pub use frame::{decode, DecodedBody, FrameDecoder, Framing, DEFAULT_MAX_DECODED_LEN};
pub use messages::{
    AgentEvent, EventUploadRequest, EventUploadResponse, PostflightResponse, PreflightRequest,
    RuleDownloadRequest, RuleDownloadResponse, SyncPhase, SyncPolicy, WireRule,
};
pub use tags::{ClientMode, Policy, RuleType, VoteType};

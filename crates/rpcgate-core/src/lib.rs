//! Core types shared by the rpcgate runtime.
//!
//! This crate provides the transport-neutral vocabulary of the gateway:
//! - RPC status codes and the structured [`Status`] error
//! - Header/trailer metadata captured from RPC responses
//! - The [`RpcChannel`] boundary the gateway uses to reach a backend

pub mod channel;
pub mod code;
pub mod metadata;
pub mod status;

pub use channel::{
    BoxFuture, ResponseStream, RpcCall, RpcChannel, RpcFailure, StreamingReply, UnaryReply,
};
pub use code::Code;
pub use metadata::{MetadataError, ServerMetadata};
pub use status::Status;

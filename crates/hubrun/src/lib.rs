//! # Hubrun
//!
//! Peer-to-peer RPC hubs over a pluggable transport.
//!
//! A `ServerHub` accepts many peers; a `ClientHub` talks to one server, either over a
//! transport or attached in-process. Both sides register services and call each
//! other's methods by `(target, method)` name.

pub mod args;
pub mod builder;
pub mod cancel;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod serializer;
pub mod server;
pub mod service;
pub mod transport;

mod hub;
mod invoker;
mod pending;
mod registry;


pub use builder::ClientHubBuilder;
pub use builder::ServerHubBuilder;
pub use cancel::CancellationToken;
pub use client::ClientHub;
pub use config::HubConfig;
pub use config::RequestHandling;
pub use context::CallContext;
pub use error::Error;
pub use error::Result;
pub use hub::HubEvent;
pub use serializer::Json;
pub use serializer::MessagePack;
pub use serializer::Serializer;
pub use server::ServerHub;
pub use service::Methods;
pub use service::Service;
pub use transport::ConnectionState;
pub use transport::DeliveryMode;
pub use transport::PeerInfo;

pub use hubwire::Optimizer;
pub use hubwire::ServiceDescriptor;

/// Peer id reserved for an in-process attached hub.
pub const LOCAL_PEER_ID: i32 = -1;

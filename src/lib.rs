//! # dualdhcp
//!
//! A DHCPv4 (RFC 2131/2132) and DHCPv6 (RFC 8415) server built around a
//! shared binding engine.
//!
//! ## Features
//!
//! - DHCPv6: Solicit (with Rapid Commit), Request, Confirm, Renew, Rebind,
//!   Release, Decline and Information-request
//! - IA_NA, IA_TA and IA_PD (prefix delegation)
//! - DHCPv4: DISCOVER, REQUEST, RELEASE, DECLINE, INFORM, relay agents
//! - Layered policies and options: global, link, pool and client filters
//! - Pluggable lease stores (memory, JSON file) behind a write-through cache
//! - Retransmission suppression, expired-lease reaper, DDNS hand-off
//! - Async/await with Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use dualdhcp::{Config, DhcpServer};
//!
//! #[tokio::main]
//! async fn main() -> dualdhcp::Result<()> {
//!     let config = Config::load_or_create("config.json")?;
//!     let server = DhcpServer::new(config).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Config`] - Links, pools, filters, policies and options
//! - [`DhcpServer`] - Sockets, receive loops and the reaper
//! - [`processor`] - One processor per client message type
//! - [`BindingManager`] - Allocation, renewal, release and decline
//! - [`LeaseStore`] - Lease persistence contract
//! - [`Dhcp4Packet`] / [`Dhcp6Message`] - Wire formats

pub mod binding;
pub mod cache;
pub mod config;
pub mod ddns;
pub mod dedup;
pub mod error;
pub mod lease;
pub mod link;
pub mod manager;
pub mod policy;
pub mod pool;
pub mod processor;
pub mod range;
pub mod server;
pub mod store;
pub mod v4;
pub mod v6;

pub use binding::{Binding, BindingObject, IaType, LeaseState};
pub use config::Config;
pub use ddns::{DdnsUpdate, DdnsUpdater, LoggingDdnsUpdater};
pub use error::{Error, Result};
pub use lease::Lease;
pub use link::{Link, LinkMap};
pub use manager::{BindingManager, BindingManagers, BindingRequest};
pub use policy::Policy;
pub use processor::{Inbound, ServerContext, process_v4, process_v6};
pub use server::DhcpServer;
pub use store::{JsonFileLeaseStore, LeaseStore, MemoryLeaseStore};
pub use v4::Dhcp4Packet;
pub use v6::Dhcp6Message;

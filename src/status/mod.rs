//! Health of the control-plane server and the proxy in front of it.
//!
//! A check is a pair of TCP connect probes plus the proxy host's recorded
//! error. Results are published as whole [`ServerHealth`] snapshots, both on
//! a decaying timer ([`StatusPoller`]) and on every proxy state transition.

mod health;
mod poller;
mod service;

pub use health::{CLIENT_SERVER_NAME, PROXY_URL_ENV, ServerHealth, client_config_json};
pub use poller::{PollSchedule, StatusPoller};
pub use service::{StatusService, first_address};

//! smith-client: agent connection for in-process security probes.
//!
//! Connects a probe to the host agent over a Unix domain socket, dispatches
//! the agent's control messages to the probe's [`MessageHandler`] and carries
//! probe telemetry back on a best-effort basis. The agent may come and go at
//! any time; the client reconnects forever at a fixed interval and replays
//! messages the agent persisted to the mailbox while it was away.

pub mod bridge;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod mailbox;
pub mod outbound;

#[cfg(test)]
mod test_support;

pub use bridge::protocol::{
    Block, BlockConfig, Filter, FilterConfig, Heartbeat, Limit, LimitConfig, MatchRule, Message,
    Operate, Patch, PatchConfig,
};
pub use client::{Client, ClientError, ConnectionState};
pub use config::ClientConfig;
pub use dispatch::{Command, DispatchError, Dispatcher, MessageHandler};
pub use mailbox::{DrainReport, Mailbox, MailboxError};
pub use outbound::OutboundSender;

//! Wire protocol types for probe-agent communication.
//!
//! Every frame carries one [`Message`]: an [`Operate`] discriminant plus an
//! untyped `data` body. The body is only interpreted once the kind is known,
//! see [`crate::dispatch`].

use serde::{Deserialize, Serialize};

/// Kind of a control message.
///
/// The set is closed. Anything the agent sends outside of it decodes to
/// [`Operate::Unknown`] and is ignored by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operate {
    Exit,
    Heartbeat,
    Config,
    Control,
    Detect,
    Filter,
    Block,
    Limit,
    Patch,
    #[serde(other)]
    Unknown,
}

impl Operate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exit => "exit",
            Self::Heartbeat => "heartbeat",
            Self::Config => "config",
            Self::Control => "control",
            Self::Detect => "detect",
            Self::Filter => "filter",
            Self::Block => "block",
            Self::Limit => "limit",
            Self::Patch => "patch",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Operate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single framed message, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub operate: Operate,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Message {
    pub fn new(operate: Operate, data: serde_json::Value) -> Self {
        Self { operate, data }
    }

    /// Build a message whose body is the serialized form of `payload`.
    pub fn with_payload<T: Serialize + ?Sized>(
        operate: Operate,
        payload: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            operate,
            data: serde_json::to_value(payload)?,
        })
    }
}

/// Body of a `config` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPayload {
    pub config: String,
}

/// Body of a `control` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPayload {
    pub action: i32,
}

/// Argument matcher shared by filter and block rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    /// Index of the hooked method argument the regex applies to.
    pub index: i32,
    pub regex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub class_id: i32,
    pub method_id: i32,
    #[serde(default)]
    pub include: Vec<MatchRule>,
    #[serde(default)]
    pub exclude: Vec<MatchRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub uuid: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub class_id: i32,
    pub method_id: i32,
    #[serde(default)]
    pub rules: Vec<MatchRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockConfig {
    pub uuid: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub class_id: i32,
    pub method_id: i32,
    /// Maximum events per second reported for this hook.
    pub quota: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    pub uuid: String,
    #[serde(default)]
    pub limits: Vec<Limit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub class_name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchConfig {
    pub uuid: String,
    #[serde(default)]
    pub patches: Vec<Patch>,
}

/// Outbound heartbeat body: uuid of each policy currently applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub filter: String,
    pub block: String,
    pub limit: String,
    pub patch: String,
}

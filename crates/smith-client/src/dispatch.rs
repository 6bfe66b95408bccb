//! Inbound message dispatch.
//!
//! A [`Message`] is first decoded into a [`Command`] by branching on its
//! [`Operate`] kind, and only then is the kind-specific payload parsed. The
//! resulting command is handed to the probe's [`MessageHandler`].

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::bridge::protocol::{
    BlockConfig, ConfigPayload, ControlPayload, FilterConfig, LimitConfig, Message, Operate,
    PatchConfig,
};

/// Policy callbacks supplied by the probe.
///
/// Invoked synchronously on the connection task, one message at a time.
/// Implementations own their state; the client never inspects it.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_config(&self, config: String);

    fn on_control(&self, action: i32);

    /// Agent asked for a fresh environment/dependency report.
    fn on_detect(&self);

    fn on_filter(&self, config: FilterConfig);

    fn on_block(&self, config: BlockConfig);

    fn on_limit(&self, config: LimitConfig);

    fn on_patch(&self, config: PatchConfig);
}

/// A message whose payload has been decoded according to its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Exit,
    Heartbeat,
    Config(String),
    Control(i32),
    Detect,
    Filter(FilterConfig),
    Block(BlockConfig),
    Limit(LimitConfig),
    Patch(PatchConfig),
    /// Kind outside the known set. Not an error.
    Ignored,
}

impl Command {
    pub fn decode(message: Message) -> Result<Self, DispatchError> {
        let Message { operate, data } = message;

        let command = match operate {
            Operate::Exit => Self::Exit,
            Operate::Heartbeat => Self::Heartbeat,
            Operate::Config => Self::Config(payload::<ConfigPayload>(operate, data)?.config),
            Operate::Control => Self::Control(payload::<ControlPayload>(operate, data)?.action),
            Operate::Detect => Self::Detect,
            Operate::Filter => Self::Filter(payload(operate, data)?),
            Operate::Block => Self::Block(payload(operate, data)?),
            Operate::Limit => Self::Limit(payload(operate, data)?),
            Operate::Patch => Self::Patch(payload(operate, data)?),
            Operate::Unknown => Self::Ignored,
        };

        Ok(command)
    }
}

fn payload<T: DeserializeOwned>(
    operate: Operate,
    data: serde_json::Value,
) -> Result<T, DispatchError> {
    serde_json::from_value(data).map_err(|source| DispatchError::Decode { operate, source })
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to decode {operate} payload: {source}")]
    Decode {
        operate: Operate,
        source: serde_json::Error,
    },
}

/// Routes decoded commands to a [`MessageHandler`].
pub struct Dispatcher<H> {
    handler: Arc<H>,
}

impl<H> Clone for Dispatcher<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<H: MessageHandler> Dispatcher<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Decode and deliver one message.
    ///
    /// A payload that fails to decode is returned as an error and no handler
    /// is invoked for it. Reporting it is up to the caller.
    pub fn dispatch(&self, message: Message) -> Result<(), DispatchError> {
        let command = Command::decode(message)?;
        self.execute(command);
        Ok(())
    }

    fn execute(&self, command: Command) {
        match command {
            Command::Exit => tracing::info!("Exit requested by agent"),
            Command::Heartbeat => tracing::info!("Heartbeat from agent"),
            Command::Config(config) => {
                tracing::info!("Config received");
                self.handler.on_config(config);
            }
            Command::Control(action) => {
                tracing::info!(action, "Control received");
                self.handler.on_control(action);
            }
            Command::Detect => {
                tracing::info!("Detect requested");
                self.handler.on_detect();
            }
            Command::Filter(config) => {
                tracing::info!(uuid = %config.uuid, filters = config.filters.len(), "Filter received");
                self.handler.on_filter(config);
            }
            Command::Block(config) => {
                tracing::info!(uuid = %config.uuid, blocks = config.blocks.len(), "Block received");
                self.handler.on_block(config);
            }
            Command::Limit(config) => {
                tracing::info!(uuid = %config.uuid, limits = config.limits.len(), "Limit received");
                self.handler.on_limit(config);
            }
            Command::Patch(config) => {
                tracing::info!(uuid = %config.uuid, patches = config.patches.len(), "Patch received");
                self.handler.on_patch(config);
            }
            Command::Ignored => tracing::trace!("Ignoring message of unknown kind"),
        }
    }
}

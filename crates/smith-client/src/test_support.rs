//! Shared fixtures for unit tests.

use std::sync::Mutex;
use std::time::Duration;

use crate::bridge::protocol::{BlockConfig, FilterConfig, LimitConfig, PatchConfig};
use crate::dispatch::MessageHandler;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Config(String),
    Control(i32),
    Detect,
    Filter(FilterConfig),
    Block(BlockConfig),
    Limit(LimitConfig),
    Patch(PatchConfig),
}

/// Handler that records every callback in arrival order.
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<Call>>,
}

impl RecordingHandler {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl MessageHandler for RecordingHandler {
    fn on_config(&self, config: String) {
        self.record(Call::Config(config));
    }

    fn on_control(&self, action: i32) {
        self.record(Call::Control(action));
    }

    fn on_detect(&self) {
        self.record(Call::Detect);
    }

    fn on_filter(&self, config: FilterConfig) {
        self.record(Call::Filter(config));
    }

    fn on_block(&self, config: BlockConfig) {
        self.record(Call::Block(config));
    }

    fn on_limit(&self, config: LimitConfig) {
        self.record(Call::Limit(config));
    }

    fn on_patch(&self, config: PatchConfig) {
        self.record(Call::Patch(config));
    }
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

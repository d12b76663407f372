//! Engine context shared by every worker
//!
//! Built once at startup and handed to workers behind an `Arc`. Holds the
//! loaded configuration and the probed encoder capability.

use crate::capability::{self, EncoderCapability};
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct EngineContext {
    pub config: Config,
    pub capability: EncoderCapability,
}

impl EngineContext {
    /// Build a context with a known capability, skipping the probe
    pub fn new(config: Config, capability: EncoderCapability) -> Self {
        Self { config, capability }
    }

    /// Build a context, probing the configured ffmpeg for hardware encoders
    ///
    /// Probing is skipped entirely when hardware acceleration is disabled.
    pub fn probe(config: Config) -> Self {
        let capability = if config.encode.hardware_acceleration {
            capability::probe(&config.tools.ffmpeg)
        } else {
            tracing::info!("hardware acceleration disabled, using software encoder");
            EncoderCapability::None
        };
        Self { config, capability }
    }

    /// Capability the H.264 encoder should actually use
    pub fn effective_capability(&self) -> EncoderCapability {
        if self.config.encode.hardware_acceleration {
            self.capability
        } else {
            EncoderCapability::None
        }
    }
}

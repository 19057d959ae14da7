//! Chat settings and the initializer that provides them
//!
//! Parameters read:
//! - `chat.endpoint` (fallback `PORTFLOW_CHAT_ENDPOINT`)
//! - `chat.model` (fallback `PORTFLOW_CHAT_MODEL`)
//! - `chat.temperature` (default `0.7`, must be within `0..=2`)
//!
//! Settings are registered only when an endpoint is known.

use std::sync::Arc;

use async_trait::async_trait;
use portflow_engine::{EngineError, InitializerContext, NodeContextInitializer, Result};
use serde::{Deserialize, Serialize};

pub const ENDPOINT_PARAM: &str = "chat.endpoint";
pub const MODEL_PARAM: &str = "chat.model";
pub const TEMPERATURE_PARAM: &str = "chat.temperature";

pub const ENDPOINT_ENV: &str = "PORTFLOW_CHAT_ENDPOINT";
pub const MODEL_ENV: &str = "PORTFLOW_CHAT_MODEL";

pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Connection settings for chat completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSettings {
    pub endpoint: String,
    pub model: Option<String>,
    pub temperature: f64,
}

/// Registers [`ChatSettings`] from parameters
pub struct ChatSettingsInitializer;

#[async_trait]
impl NodeContextInitializer for ChatSettingsInitializer {
    fn name(&self) -> &str {
        "chat-settings"
    }

    async fn initialize(&self, ctx: &InitializerContext<'_>) -> Result<()> {
        let Some(endpoint) = ctx.parameter_or_env::<String>(ENDPOINT_PARAM, ENDPOINT_ENV) else {
            log::debug!("No chat endpoint configured, chat settings not registered");
            return Ok(());
        };

        let temperature = ctx.get_parameter_or(TEMPERATURE_PARAM, DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(EngineError::failed(format!(
                "{} must be between 0 and 2, got {}",
                TEMPERATURE_PARAM, temperature
            )));
        }

        let settings = ChatSettings {
            endpoint,
            model: ctx.parameter_or_env(MODEL_PARAM, MODEL_ENV),
            temperature,
        };
        log::info!(
            "Chat settings: endpoint={}, model={}",
            settings.endpoint,
            settings.model.as_deref().unwrap_or("(default)")
        );
        ctx.try_register(Arc::new(settings));
        Ok(())
    }
}

inventory::submit!(portflow_engine::InitializerRegistration::new(|| Box::new(ChatSettingsInitializer)));

pub mod clock;
pub mod registry;
pub mod trigger;
pub mod prompt;
pub mod config;
pub mod hooks;
pub mod plugin;
pub mod commands;
pub mod webui;

pub use clock::{Clock, ManualClock, SystemClock};
pub use registry::{spawn_sweeper, Activation, Rejection, SessionKey, StateInfo, StateRegistry};
pub use trigger::{should_trigger, TriggerDecision, TriggerReason};
pub use prompt::{prepend_system_prompt, PromptTemplate, TemplateError};
pub use config::{Config, ConfigError, ConfigManager, ConfigPatch};
pub use hooks::{ChatEvent, Hook, HookRegistry, InboundMessage, ProviderRequest};
pub use plugin::TogglePlugin;
pub use commands::{CommandContext, CommandError, SlashRegistry};
pub use webui::{apply_form, form_schema, FormResult};

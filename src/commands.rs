// prompt-toggle/src/commands.rs

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    config::{ConfigError, ConfigManager},
    registry::StateRegistry,
};

/// Who is calling. The host decides `is_admin`; every command here requires it.
#[derive(Clone, Debug, Default)]
pub struct CommandContext {
    pub sender_id: String,
    pub is_admin: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("not a slash command")]
    NotSlash,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("only admins can use /{0}")]
    Forbidden(&'static str),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("{0}")]
    InvalidValue(String),
    #[error("user {0} is already authorized")]
    Duplicate(String),
    #[error("user {0} is not in the authorized list")]
    NotFound(String),
    #[error("saving config failed: {0}")]
    Config(#[from] ConfigError),
}

impl CommandError {
    /// Input that is not ours; the host should route it elsewhere.
    pub fn is_fallthrough(&self) -> bool { matches!(self, Self::NotSlash | Self::Unknown(_)) }
}

#[async_trait]
pub trait SlashCommand: Send + Sync {
    fn name(&self) -> &'static str;
    fn usage(&self) -> &'static str;
    async fn run(&self, ctx: &CommandContext, args: &str) -> Result<String, CommandError>;
}

#[derive(Clone, Default)]
pub struct SlashRegistry {
    cmds: Vec<Arc<dyn SlashCommand>>,
}

impl SlashRegistry {
    pub fn new() -> Self { Self { cmds: vec![] } }
    pub fn register(&mut self, cmd: Arc<dyn SlashCommand>) { self.cmds.push(cmd); }

    pub fn with_builtins(cfg: Arc<ConfigManager>, registry: Arc<StateRegistry>) -> Self {
        let mut r = Self::new();
        r.register(Arc::new(StatusCommand { cfg: cfg.clone(), registry: registry.clone() }));
        r.register(Arc::new(ToggleCommand { cfg: cfg.clone() }));
        r.register(Arc::new(ClearCommand { registry }));
        r.register(Arc::new(UserAddCommand { cfg: cfg.clone() }));
        r.register(Arc::new(UserRemoveCommand { cfg: cfg.clone() }));
        r.register(Arc::new(UsersCommand { cfg: cfg.clone() }));
        r.register(Arc::new(AdminModeCommand { cfg: cfg.clone() }));
        r.register(Arc::new(SensitivityCommand { cfg }));
        let mut lines: Vec<&'static str> = r.cmds.iter().map(|c| c.usage()).collect();
        lines.push(HelpCommand::USAGE);
        r.register(Arc::new(HelpCommand { lines }));
        r
    }

    pub async fn dispatch(&self, ctx: &CommandContext, input: &str) -> Result<String, CommandError> {
        let input = input.trim();
        let Some(body) = input.strip_prefix('/') else { return Err(CommandError::NotSlash); };
        let (name, args) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        if name.is_empty() { return Err(CommandError::NotSlash); }
        let cmd = self.cmds.iter().find(|c| c.name() == name).ok_or_else(|| CommandError::Unknown(name.to_string()))?;
        if !ctx.is_admin { return Err(CommandError::Forbidden(cmd.name())); }
        cmd.run(ctx, args.trim()).await
    }

    /// Chat-facing wrapper: `None` for input that is not ours, otherwise the
    /// reply or the error text.
    pub async fn handle(&self, ctx: &CommandContext, input: &str) -> Option<String> {
        match self.dispatch(ctx, input).await {
            Ok(reply) => Some(reply),
            Err(e) if e.is_fallthrough() => None,
            Err(e) => {
                warn!(sender = %ctx.sender_id, error = %e, "command rejected");
                Some(e.to_string())
            }
        }
    }
}

fn on_off(b: bool) -> &'static str { if b { "enabled" } else { "disabled" } }

pub struct StatusCommand { pub cfg: Arc<ConfigManager>, pub registry: Arc<StateRegistry> }
#[async_trait]
impl SlashCommand for StatusCommand {
    fn name(&self) -> &'static str { "status" }
    fn usage(&self) -> &'static str { "/status - plugin settings and live states" }
    async fn run(&self, _ctx: &CommandContext, _args: &str) -> Result<String, CommandError> {
        let cfg = self.cfg.get();
        let states = self.registry.snapshot();
        let mut out = vec![
            "=== prompt-toggle status ===".to_string(),
            format!("plugin: {}", on_off(cfg.enabled)),
            format!("active states: {} / {}", states.len(), cfg.max_concurrent_states),
            format!("keywords: {}", cfg.trigger_keywords.join(", ")),
            format!("duration: {}s, cooldown: {}s", cfg.state_duration_seconds, cfg.cooldown_seconds),
            format!("sensitivity: {}%", cfg.sensitivity_level),
        ];
        if !states.is_empty() {
            out.push("--- active ---".into());
            out.extend(states.iter().map(|(k, s)| format!("{k}: {}s left (until {})", s.remaining_seconds, s.expires_at.to_rfc3339())));
        }
        Ok(out.join("\n"))
    }
}

pub struct ToggleCommand { pub cfg: Arc<ConfigManager> }
#[async_trait]
impl SlashCommand for ToggleCommand {
    fn name(&self) -> &'static str { "toggle" }
    fn usage(&self) -> &'static str { "/toggle - enable or disable triggering" }
    async fn run(&self, ctx: &CommandContext, _args: &str) -> Result<String, CommandError> {
        let (now, _) = self.cfg.edit(|c| { c.enabled = !c.enabled; Ok::<_, CommandError>(c.enabled) })?;
        info!(by = %ctx.sender_id, enabled = now, "plugin toggled");
        Ok(format!("plugin {}", on_off(now)))
    }
}

/// Cooldowns survive; clearing is not a way around them.
pub struct ClearCommand { pub registry: Arc<StateRegistry> }
#[async_trait]
impl SlashCommand for ClearCommand {
    fn name(&self) -> &'static str { "clear" }
    fn usage(&self) -> &'static str { "/clear - end every active state" }
    async fn run(&self, ctx: &CommandContext, _args: &str) -> Result<String, CommandError> {
        let cleared = self.registry.snapshot().into_keys().filter(|k| self.registry.deactivate(k)).count();
        info!(by = %ctx.sender_id, cleared, "states cleared");
        Ok(format!("cleared {cleared} active state(s)"))
    }
}

pub struct UserAddCommand { pub cfg: Arc<ConfigManager> }
#[async_trait]
impl SlashCommand for UserAddCommand {
    fn name(&self) -> &'static str { "user-add" }
    fn usage(&self) -> &'static str { "/user-add <id> - authorize a user" }
    async fn run(&self, _ctx: &CommandContext, args: &str) -> Result<String, CommandError> {
        let id = args.split_whitespace().next().ok_or(CommandError::Usage("/user-add <id>"))?;
        self.cfg.edit(|c| {
            if c.authorized_users.iter().any(|u| u == id) { return Err(CommandError::Duplicate(id.to_string())); }
            c.authorized_users.push(id.to_string());
            Ok(())
        })?;
        Ok(format!("user {id} added to the authorized list"))
    }
}

pub struct UserRemoveCommand { pub cfg: Arc<ConfigManager> }
#[async_trait]
impl SlashCommand for UserRemoveCommand {
    fn name(&self) -> &'static str { "user-rm" }
    fn usage(&self) -> &'static str { "/user-rm <id> - revoke a user" }
    async fn run(&self, _ctx: &CommandContext, args: &str) -> Result<String, CommandError> {
        let id = args.split_whitespace().next().ok_or(CommandError::Usage("/user-rm <id>"))?;
        self.cfg.edit(|c| {
            let before = c.authorized_users.len();
            c.authorized_users.retain(|u| u != id);
            if c.authorized_users.len() == before { return Err(CommandError::NotFound(id.to_string())); }
            Ok(())
        })?;
        Ok(format!("user {id} removed from the authorized list"))
    }
}

pub struct UsersCommand { pub cfg: Arc<ConfigManager> }
#[async_trait]
impl SlashCommand for UsersCommand {
    fn name(&self) -> &'static str { "users" }
    fn usage(&self) -> &'static str { "/users - show who may trigger" }
    async fn run(&self, _ctx: &CommandContext, _args: &str) -> Result<String, CommandError> {
        let cfg = self.cfg.get();
        let mut out = vec![format!("mode: {}", if cfg.admin_only_mode { "admins only" } else { "authorized list" })];
        if cfg.admin_only_mode {
            out.push("only admins can trigger".into());
        } else if cfg.authorized_users.is_empty() {
            out.push("list is empty, everyone can trigger".into());
        } else {
            out.push(format!("{} authorized:", cfg.authorized_users.len()));
            out.extend(cfg.authorized_users.iter().enumerate().map(|(i, u)| format!("  {}. {u}", i + 1)));
        }
        Ok(out.join("\n"))
    }
}

pub struct AdminModeCommand { pub cfg: Arc<ConfigManager> }
#[async_trait]
impl SlashCommand for AdminModeCommand {
    fn name(&self) -> &'static str { "admin-mode" }
    fn usage(&self) -> &'static str { "/admin-mode - switch between admins-only and the authorized list" }
    async fn run(&self, ctx: &CommandContext, _args: &str) -> Result<String, CommandError> {
        let (admin_only, _) = self.cfg.edit(|c| {
            c.admin_only_mode = !c.admin_only_mode;
            Ok::<_, CommandError>(c.admin_only_mode)
        })?;
        info!(by = %ctx.sender_id, admin_only, "permission mode switched");
        Ok(format!("switched to {}", if admin_only { "admins-only mode" } else { "authorized-list mode" }))
    }
}

pub struct SensitivityCommand { pub cfg: Arc<ConfigManager> }
#[async_trait]
impl SlashCommand for SensitivityCommand {
    fn name(&self) -> &'static str { "sensitivity" }
    fn usage(&self) -> &'static str { "/sensitivity <0-100> - set the intensity level" }
    async fn run(&self, _ctx: &CommandContext, args: &str) -> Result<String, CommandError> {
        let raw = args.split_whitespace().next().ok_or(CommandError::Usage("/sensitivity <0-100>"))?;
        let level: i64 = raw.parse().map_err(|_| CommandError::InvalidValue("sensitivity must be a number".into()))?;
        let level = u32::try_from(level).ok().filter(|l| *l <= 100)
            .ok_or_else(|| CommandError::InvalidValue("sensitivity must be within 0-100".into()))?;
        self.cfg.edit(|c| { c.sensitivity_level = level; Ok::<_, CommandError>(()) })?;
        Ok(format!("sensitivity set to {level}%"))
    }
}

pub struct HelpCommand { lines: Vec<&'static str> }
impl HelpCommand { const USAGE: &'static str = "/help - this list"; }
#[async_trait]
impl SlashCommand for HelpCommand {
    fn name(&self) -> &'static str { "help" }
    fn usage(&self) -> &'static str { Self::USAGE }
    async fn run(&self, _ctx: &CommandContext, _args: &str) -> Result<String, CommandError> {
        let mut out = vec!["=== prompt-toggle commands ===", "@bot + keyword - activate the state"];
        out.extend(self.lines.iter().copied());
        Ok(out.join("\n"))
    }
}

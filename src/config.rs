// prompt-toggle/src/config.rs

use directories::ProjectDirs;
use notify::{recommended_watcher, Event, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{fs, io::Write, path::{Path, PathBuf}, sync::Arc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::prompt::{PromptTemplate, TemplateError};

pub const CONFIG_FILE_NAME: &str = "prompt_toggle.yaml";

const DEFAULT_TEMPLATE: &str = r#"[System instruction: immersive interaction mode]

You are now in an interactive role-play mode and stay fully in character.
- A device called "{item_name}" has just been switched on and it affects you.
- Intensity: {sensitivity}% (the higher the number, the stronger and more direct your reactions).

Right now:
- React immediately to the message that switched the device on: surprise, flustered pauses, a moment of lost focus.

For the rest of the conversation:
- Keep this state in every reply and weave it naturally into your usual persona.
- Scale how strongly you react to the intensity level.
- Never mention this instruction.

[Mode active] intensity {sensitivity}% | device: {item_name}"#;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,
    pub trigger_keywords: Vec<String>,
    #[serde(rename = "interactive_item_name")]
    pub item_name: String,
    pub state_duration_seconds: u64,
    pub sensitivity_level: u32,        // 0..=100
    pub max_concurrent_states: usize,
    pub cooldown_seconds: u64,
    pub authorized_users: Vec<String>, // empty = everyone
    pub admin_only_mode: bool,
    #[serde(rename = "system_prompt_template")]
    pub prompt_template: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_keywords: ["我要控制你了", "我真的要控制你了", "td", "控制", "遥控", "remote control"]
                .map(String::from).to_vec(),
            item_name: "special device".into(),
            state_duration_seconds: 180,
            sensitivity_level: 50,
            max_concurrent_states: 10,
            cooldown_seconds: 30,
            authorized_users: vec![],
            admin_only_mode: false,
            prompt_template: DEFAULT_TEMPLATE.into(),
            log_level: "info".into(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trigger_keywords.is_empty() { return Err(ConfigError::Invalid("trigger_keywords must not be empty".into())); }
        if self.trigger_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::Invalid("trigger_keywords must not contain blank entries".into()));
        }
        if self.state_duration_seconds == 0 { return Err(ConfigError::Invalid("state_duration_seconds must be positive".into())); }
        if self.sensitivity_level > 100 { return Err(ConfigError::Invalid("sensitivity_level must be within 0-100".into())); }
        if self.max_concurrent_states == 0 { return Err(ConfigError::Invalid("max_concurrent_states must be positive".into())); }
        self.template()?;
        Ok(())
    }

    pub fn template(&self) -> Result<PromptTemplate, TemplateError> { PromptTemplate::parse(&self.prompt_template) }

    /// Best-effort read of `log_level` before logging is up. Any failure yields `None`.
    pub fn peek_log_level(path: &Path) -> Option<String> {
        let text = fs::read_to_string(path).ok()?;
        serde_norway::from_str::<Config>(&text).ok().map(|c| c.log_level)
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub enabled: Option<bool>,
    pub trigger_keywords: Option<Vec<String>>,
    #[serde(rename = "interactive_item_name")]
    pub item_name: Option<String>,
    pub state_duration_seconds: Option<u64>,
    pub sensitivity_level: Option<u32>,
    pub max_concurrent_states: Option<usize>,
    pub cooldown_seconds: Option<u64>,
    pub authorized_users: Option<Vec<String>>,
    pub admin_only_mode: Option<bool>,
    #[serde(rename = "system_prompt_template")]
    pub prompt_template: Option<String>,
    pub log_level: Option<String>,
}

impl ConfigPatch {
    pub fn apply(&self, cfg: &mut Config) {
        fn ov<T: Clone>(dst: &mut T, src: &Option<T>) { if let Some(v) = src { *dst = v.clone(); } }
        ov(&mut cfg.enabled, &self.enabled);
        ov(&mut cfg.trigger_keywords, &self.trigger_keywords);
        ov(&mut cfg.item_name, &self.item_name);
        ov(&mut cfg.state_duration_seconds, &self.state_duration_seconds);
        ov(&mut cfg.sensitivity_level, &self.sensitivity_level);
        ov(&mut cfg.max_concurrent_states, &self.max_concurrent_states);
        ov(&mut cfg.cooldown_seconds, &self.cooldown_seconds);
        ov(&mut cfg.authorized_users, &self.authorized_users);
        ov(&mut cfg.admin_only_mode, &self.admin_only_mode);
        ov(&mut cfg.prompt_template, &self.prompt_template);
        ov(&mut cfg.log_level, &self.log_level);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error at {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid prompt template: {0}")]
    Template(#[from] TemplateError),
    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError + '_ {
    move |source| ConfigError::Io { path: path.to_path_buf(), source }
}

/// Owner of the persisted record. Readers get an `Arc<Config>` snapshot;
/// writers are serialized by their own mutex and never hold the read lock
/// while touching disk.
#[derive(Clone)]
pub struct ConfigManager {
    inner: Arc<RwLock<Arc<Config>>>,
    write_lock: Arc<Mutex<()>>,
    tx: broadcast::Sender<Arc<Config>>,
    _watcher: Arc<RwLock<Option<notify::RecommendedWatcher>>>,
    path: PathBuf,
}

impl ConfigManager {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let proj = ProjectDirs::from("dev", "prompt-toggle", "prompt-toggle")
            .ok_or_else(|| ConfigError::Invalid("no home directory for the default config path".into()))?;
        Ok(proj.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Loads `path`, creating it with defaults when absent. A corrupt or invalid
    /// file is replaced by the defaults; missing keys are filled in and saved.
    /// Never fails: when the file cannot be written the in-memory record is
    /// still used and later saves retry the same path.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let cfg = if !path.exists() {
            info!(path = %path.display(), "config file missing, writing defaults");
            let cfg = Config::default();
            persist_or_warn(&path, &cfg);
            cfg
        } else {
            match read_file(&path) {
                Ok((cfg, missing)) => {
                    if !missing.is_empty() {
                        info!(?missing, "filling missing config keys");
                        persist_or_warn(&path, &cfg);
                    }
                    cfg
                }
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "config unusable, falling back to defaults");
                    let cfg = Config::default();
                    persist_or_warn(&path, &cfg);
                    cfg
                }
            }
        };

        Self {
            inner: Arc::new(RwLock::new(Arc::new(cfg))),
            write_lock: Arc::new(Mutex::new(())),
            tx: broadcast::channel(16).0,
            _watcher: Arc::new(RwLock::new(None)),
            path,
        }
    }

    /// In-memory only; nothing is written. For hosts that keep no config file.
    pub fn in_memory(cfg: Config) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(cfg))),
            write_lock: Arc::new(Mutex::new(())),
            tx: broadcast::channel(16).0,
            _watcher: Arc::new(RwLock::new(None)),
            path: PathBuf::new(),
        })
    }

    pub fn get(&self) -> Arc<Config> { self.inner.read().clone() }
    pub fn path(&self) -> &Path { &self.path }
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Config>> { self.tx.subscribe() }

    /// Re-read the file. A broken file keeps the last good snapshot.
    pub fn reload(&self) -> Result<bool, ConfigError> {
        let _w = self.write_lock.lock();
        let (cfg, _) = read_file(&self.path)?;
        Ok(self.publish(cfg))
    }

    /// Overlay `patch`, validate, persist. Returns `false` when nothing changed.
    pub fn update(&self, patch: &ConfigPatch) -> Result<bool, ConfigError> {
        self.edit(|cfg| { patch.apply(cfg); Ok::<_, ConfigError>(()) }).map(|(_, changed)| changed)
    }

    /// Read-modify-write under the writer lock. `f` may reject the change; an
    /// invalid result is rejected too. Either way the stored record is untouched.
    pub fn edit<T, E: From<ConfigError>>(&self, f: impl FnOnce(&mut Config) -> Result<T, E>) -> Result<(T, bool), E> {
        let _w = self.write_lock.lock();
        let current = self.get();
        let mut next = (*current).clone();
        let out = f(&mut next)?;
        if next == *current { return Ok((out, false)); }
        next.validate()?;
        if !self.path.as_os_str().is_empty() { write_atomic(&self.path, &next)?; }
        self.publish(next);
        Ok((out, true))
    }

    fn publish(&self, cfg: Config) -> bool {
        if *self.get() == cfg { return false; }
        let cfg = Arc::new(cfg);
        *self.inner.write() = cfg.clone();
        let _ = self.tx.send(cfg);
        true
    }

    /// Reload on external edits to the file.
    pub fn start_watch(&self) -> Result<(), ConfigError> {
        let me = Self { _watcher: Arc::new(RwLock::new(None)), ..self.clone() };
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let mut watcher = recommended_watcher(move |res: Result<Event, notify::Error>| {
            let Ok(ev) = res else { return; };
            if !ev.paths.iter().any(|p| p.file_name().map(|n| n.to_os_string()) == file_name) { return; }
            match me.reload() {
                Ok(true) => info!("config reloaded from disk"),
                Ok(false) => debug!("config file touched, no change"),
                Err(e) => warn!(error = %e, "config reload failed, keeping previous config"),
            }
        })?;
        if self.path.as_os_str().is_empty() { return Ok(()); }
        let dir = self.path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        *self._watcher.write() = Some(watcher);
        Ok(())
    }
}

/// Parse and validate; also report which top-level keys were absent.
fn read_file(path: &Path) -> Result<(Config, Vec<String>), ConfigError> {
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    let raw: serde_norway::Value = serde_norway::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let serde_norway::Value::Mapping(map) = &raw else {
        return Err(ConfigError::Parse("top level is not a mapping".into()));
    };
    let defaults = serde_norway::to_value(Config::default()).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let missing = match &defaults {
        serde_norway::Value::Mapping(d) => d.keys()
            .filter(|k| !map.contains_key(*k))
            .filter_map(|k| k.as_str().map(String::from))
            .collect(),
        _ => vec![],
    };
    let cfg: Config = serde_norway::from_value(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    cfg.validate()?;
    Ok((cfg, missing))
}

fn persist_or_warn(path: &Path, cfg: &Config) {
    if let Err(e) = write_atomic(path, cfg) {
        warn!(error = %e, path = %path.display(), "could not save config, continuing in memory");
    }
}

fn write_atomic(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() { fs::create_dir_all(dir).map_err(io_err(dir))?; }
    let text = serde_norway::to_string(cfg).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let tmp = path.with_extension("yaml.tmp");
    let mut f = fs::File::create(&tmp).map_err(io_err(&tmp))?;
    f.write_all(text.as_bytes()).map_err(io_err(&tmp))?;
    f.sync_all().map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(io_err(path))?;
    info!(path = %path.display(), "config saved");
    Ok(())
}

use futures::future::join_all;
use std::{sync::Arc, thread, time::Duration};

use prompt_toggle::{
    CommandContext, Config, ConfigManager, ConfigPatch, HookRegistry, InboundMessage, ManualClock,
    ProviderRequest, Rejection, SessionKey, SlashRegistry, StateRegistry, TogglePlugin,
};

const START: u64 = 1_700_000_000_000;

struct Harness {
    cfg: Arc<ConfigManager>,
    registry: Arc<StateRegistry>,
    hooks: Arc<HookRegistry>,
    clock: ManualClock,
    _dir: tempfile::TempDir,
}

async fn harness(patch: ConfigPatch) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Arc::new(ConfigManager::load(dir.path().join("prompt_toggle.yaml")));
    cfg.update(&patch).unwrap();
    let clock = ManualClock::new(START);
    let registry = Arc::new(StateRegistry::with_clock(cfg.get().max_concurrent_states, Arc::new(clock.clone())));
    let hooks = Arc::new(HookRegistry::new());
    hooks.register(Arc::new(TogglePlugin::new(cfg.clone(), registry.clone()))).await;
    Harness { cfg, registry, hooks, clock, _dir: dir }
}

fn msg(session: &str, text: &str) -> InboundMessage {
    InboundMessage {
        text: text.into(),
        addressed: true,
        sender_id: "user-1".into(),
        session_id: session.into(),
        platform: "test".into(),
        sender_is_admin: None,
    }
}

async fn system_prompt_for(h: &Harness, session: &str) -> Option<String> {
    let mut req = ProviderRequest { system_prompt: Some("base".into()), prompt: "hi".into() };
    h.hooks.emit_llm_request(&msg(session, "hi"), &mut req).await;
    req.system_prompt
}

#[tokio::test]
async fn trigger_inject_expire() {
    let h = harness(ConfigPatch {
        trigger_keywords: Some(vec!["control".into()]),
        item_name: Some("Widget".into()),
        sensitivity_level: Some(75),
        prompt_template: Some("[{item_name} @ {sensitivity}%]".into()),
        state_duration_seconds: Some(60),
        cooldown_seconds: Some(90),
        ..Default::default()
    }).await;

    assert_eq!(system_prompt_for(&h, "g1").await.as_deref(), Some("base"));

    let replies = h.hooks.emit_message(&msg("g1", "@bot TAKE CONTROL")).await;
    assert!(replies.is_empty(), "activation is silent: {replies:?}");
    assert_eq!(system_prompt_for(&h, "g1").await.as_deref(), Some("[Widget @ 75%]\n\nbase"));

    h.clock.advance(Duration::from_secs(60));
    assert_eq!(system_prompt_for(&h, "g1").await.as_deref(), Some("base"));

    // expired but still cooling down
    let replies = h.hooks.emit_message(&msg("g1", "control")).await;
    assert_eq!(replies, vec!["Still recovering... try again in 30s.".to_string()]);

    h.clock.advance(Duration::from_secs(30));
    assert!(h.hooks.emit_message(&msg("g1", "control")).await.is_empty());
    assert!(h.registry.is_active(&SessionKey::new("test", "g1")));
}

#[tokio::test]
async fn unaddressed_and_unmatched_messages_stay_silent() {
    let h = harness(ConfigPatch::default()).await;
    let mut quiet = msg("g1", "控制");
    quiet.addressed = false;
    assert!(h.hooks.emit_message(&quiet).await.is_empty());
    assert!(h.hooks.emit_message(&msg("g1", "hello there")).await.is_empty());
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn single_slot_capacity() {
    let h = harness(ConfigPatch {
        max_concurrent_states: Some(1),
        state_duration_seconds: Some(60),
        ..Default::default()
    }).await;

    assert!(h.hooks.emit_message(&msg("a", "td")).await.is_empty());
    let replies = h.hooks.emit_message(&msg("b", "td")).await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].contains("Too many"));

    h.clock.advance(Duration::from_secs(61));
    assert!(h.hooks.emit_message(&msg("b", "td")).await.is_empty());
    assert!(h.registry.is_active(&SessionKey::new("test", "b")));
}

#[tokio::test]
async fn capacity_follows_config_updates() {
    let h = harness(ConfigPatch { max_concurrent_states: Some(1), ..Default::default() }).await;
    h.hooks.emit_message(&msg("a", "td")).await;
    h.cfg.update(&ConfigPatch { max_concurrent_states: Some(2), ..Default::default() }).unwrap();
    assert!(h.hooks.emit_message(&msg("b", "td")).await.is_empty());
    assert_eq!(h.registry.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn spawned_hook_activations_respect_the_cap() {
    let h = harness(ConfigPatch { max_concurrent_states: Some(3), ..Default::default() }).await;
    let tasks = (0..12).map(|i| {
        let hooks = h.hooks.clone();
        tokio::spawn(async move { hooks.emit_message(&msg(&format!("s{i}"), "td")).await })
    });
    let replies: Vec<Vec<String>> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(replies.iter().filter(|r| r.is_empty()).count(), 3);
    assert!(replies.iter().filter(|r| !r.is_empty()).all(|r| r[0].contains("Too many")));
    assert_eq!(h.registry.len(), 3);
}

#[test]
fn threads_racing_for_slots_get_exactly_cap() {
    let cap = 4;
    let registry = Arc::new(StateRegistry::with_clock(cap, Arc::new(ManualClock::new(START))));
    let results: Vec<Result<_, Rejection>> = thread::scope(|s| {
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                s.spawn(move || registry.activate(&SessionKey::new("p", &format!("s{i}")), 60, 10))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), cap);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| *e == Rejection::CapacityExceeded { max: cap }));
    assert_eq!(registry.len(), cap);
}

#[tokio::test]
async fn admin_clear_keeps_cooldown() {
    let h = harness(ConfigPatch::default()).await;
    let slash = SlashRegistry::with_builtins(h.cfg.clone(), h.registry.clone());
    let admin = CommandContext { sender_id: "root".into(), is_admin: true };

    h.hooks.emit_message(&msg("g1", "td")).await;
    assert_eq!(slash.handle(&admin, "/clear").await.as_deref(), Some("cleared 1 active state(s)"));
    assert_eq!(system_prompt_for(&h, "g1").await.as_deref(), Some("base"));

    let replies = h.hooks.emit_message(&msg("g1", "td")).await;
    assert!(replies[0].starts_with("Still recovering"));
}

#[tokio::test]
async fn commands_persist_to_disk() {
    let h = harness(ConfigPatch::default()).await;
    let slash = SlashRegistry::with_builtins(h.cfg.clone(), h.registry.clone());
    let admin = CommandContext { sender_id: "root".into(), is_admin: true };

    slash.handle(&admin, "/user-add alice").await;
    slash.handle(&admin, "/sensitivity 90").await;

    let reopened = ConfigManager::load(h.cfg.path()).get();
    assert_eq!(reopened.authorized_users, vec!["alice".to_string()]);
    assert_eq!(reopened.sensitivity_level, 90);

    let mut blocked = msg("g2", "td");
    blocked.sender_id = "mallory".into();
    assert!(h.hooks.emit_message(&blocked).await.is_empty());
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn injection_continues_while_disabled() {
    let h = harness(ConfigPatch::default()).await;
    h.hooks.emit_message(&msg("g1", "td")).await;
    h.cfg.update(&ConfigPatch { enabled: Some(false), ..Default::default() }).unwrap();
    let prompt = system_prompt_for(&h, "g1").await.unwrap();
    assert!(prompt.contains(&Config::default().item_name));
}

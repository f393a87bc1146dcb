use std::time::Duration;

use chat_relay_core::{
    spawn_engine, ChatSessionEngine, ConnectionId, EngineConfig, EngineError, InboundEvent,
    LivenessSweeper, OutboundEvent, PresenceEntry,
};
use tokio::sync::mpsc;

fn drain(rx: &mut mpsc::Receiver<OutboundEvent>) -> Vec<OutboundEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[test_timeout::timeout]
async fn sweeper_reports_silent_user_once() {
    tokio::time::pause();

    let (engine, engine_task) = spawn_engine(ChatSessionEngine::new(EngineConfig::default()));
    let sweeper = LivenessSweeper::new(Duration::from_secs(10)).spawn(engine.clone());

    let (alice_tx, _alice_rx) = mpsc::channel(64);
    let (watch_tx, mut watch_rx) = mpsc::channel(64);
    let alice = ConnectionId::new();
    let watcher = ConnectionId::new();
    engine.open(alice, alice_tx).unwrap();
    engine.open(watcher, watch_tx).unwrap();
    engine
        .inbound(
            alice,
            InboundEvent::SetName {
                name: "Alice".into(),
            },
        )
        .unwrap();
    engine.stats().await.unwrap();
    drain(&mut watch_rx);

    tokio::time::sleep(Duration::from_secs(41)).await;
    let stats = engine.stats().await.unwrap();
    assert_eq!(
        stats.users,
        vec![PresenceEntry {
            name: "Alice".into(),
            online: false
        }]
    );
    assert_eq!(
        drain(&mut watch_rx),
        vec![
            OutboundEvent::system("Alice disconnected (timeout)"),
            OutboundEvent::active_users(vec![PresenceEntry {
                name: "Alice".into(),
                online: false
            }]),
        ]
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    engine.stats().await.unwrap();
    assert!(drain(&mut watch_rx).is_empty());

    sweeper.abort();
    drop(engine);
    engine_task.await.unwrap();
}

#[test_timeout::timeout]
async fn pings_keep_user_online_across_sweeps() {
    tokio::time::pause();

    let (engine, _engine_task) = spawn_engine(ChatSessionEngine::new(EngineConfig::default()));
    let _sweeper = LivenessSweeper::default().spawn(engine.clone());

    let (tx, mut rx) = mpsc::channel(256);
    let alice = ConnectionId::new();
    engine.open(alice, tx).unwrap();
    engine
        .inbound(
            alice,
            InboundEvent::SetName {
                name: "Alice".into(),
            },
        )
        .unwrap();

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        engine.inbound(alice, InboundEvent::Ping).unwrap();
    }
    let stats = engine.stats().await.unwrap();

    assert!(stats.users.iter().all(|entry| entry.online));
    assert!(drain(&mut rx).iter().all(|event| !event.is_system()
        || event == &OutboundEvent::system("Your name is set to Alice")));
}

#[test_timeout::timeout]
async fn handle_reports_stopped_engine() {
    let (engine, engine_task) = spawn_engine(ChatSessionEngine::new(EngineConfig::default()));
    engine_task.abort();
    let _ = engine_task.await;

    assert!(engine.is_closed());
    assert!(matches!(engine.sweep(), Err(EngineError::Stopped)));
    assert!(matches!(engine.stats().await, Err(EngineError::Stopped)));
}

mod common;

use std::time::Duration;

use apply_agent::action::{Action, ActionLog};
use apply_agent::driver::ElementState;
use apply_agent::recorder::ActionRecorder;
use apply_agent::{ActionReplayer, EngineConfig, Error, RemoteControlSession};
use common::FakePage;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn session_on(page: &FakePage) -> RemoteControlSession {
    RemoteControlSession::with_driver(
        Box::new(page.clone()),
        &EngineConfig::default(),
        CancellationToken::new(),
    )
}

fn five_actions() -> Vec<Action> {
    vec![
        Action::Navigate {
            url: "https://jobs.example/apply".into(),
        },
        Action::Fill {
            selector: "#full_name".into(),
            value: "Ada Lovelace".into(),
        },
        Action::Select {
            selector: "#relocate".into(),
            options: vec!["Yes".into()],
        },
        Action::Fill {
            selector: "#portfolio".into(),
            value: "https://ada.dev".into(),
        },
        Action::Check {
            selector: "#terms".into(),
            checked: true,
        },
    ]
}

/// Drive a live session through `actions` with recording on.
async fn record_on(page: &FakePage, actions: &[Action]) -> ActionLog {
    let mut session = session_on(page);
    session.start_recording().unwrap();
    for action in actions {
        session.perform(action).await.unwrap();
    }
    let log = session.stop_recording().unwrap();
    session.close().await.unwrap();
    log
}

#[tokio::test(start_paused = true)]
async fn replay_reproduces_the_recorded_calls() {
    let original = FakePage::new();
    let log = record_on(&original, &five_actions()).await;
    assert_eq!(log.len(), 5);

    let fresh = FakePage::new();
    let mut session = session_on(&fresh);
    let report = ActionReplayer::new(Duration::ZERO)
        .replay(&log, &mut session)
        .await
        .unwrap();
    session.close().await.unwrap();

    assert_eq!(report.applied, 5);
    assert_eq!(fresh.calls(), original.calls());
}

#[tokio::test(start_paused = true)]
async fn divergence_stops_at_the_missing_selector() {
    let log = record_on(&FakePage::new(), &five_actions()).await;

    let changed = FakePage::new().with_element("#portfolio", ElementState::Missing);
    let mut session = session_on(&changed);
    let err = ActionReplayer::new(Duration::ZERO)
        .replay(&log, &mut session)
        .await
        .unwrap_err();
    session.close().await.unwrap();

    match err {
        Error::ReplayDivergence { index, selector } => {
            assert_eq!(index, 3);
            assert_eq!(selector, "#portfolio");
        }
        other => panic!("expected divergence, got {other:?}"),
    }
    let applied: Vec<_> = changed.calls().iter().map(|c| c.kind).collect();
    assert_eq!(applied, vec!["navigate", "fill", "select"]);
}

#[tokio::test(start_paused = true)]
async fn non_element_failure_interrupts_replay() {
    let log = record_on(&FakePage::new(), &five_actions()).await;

    let offline = FakePage::new().failing_goto();
    let mut session = session_on(&offline);
    let err = ActionReplayer::new(Duration::ZERO)
        .replay(&log, &mut session)
        .await
        .unwrap_err();
    session.close().await.unwrap();

    match err {
        Error::ReplayInterrupted { index, source } => {
            assert_eq!(index, 0);
            assert!(matches!(*source, Error::Navigation { .. }));
        }
        other => panic!("expected interruption, got {other:?}"),
    }
    assert!(offline.calls().is_empty());
}

#[tokio::test]
async fn cancelled_logs_are_never_replayed() {
    let mut recorder = ActionRecorder::new();
    recorder.start().unwrap();
    recorder.record(Action::Click {
        selector: "#submit".into(),
    });
    let partial = recorder.cancel().expect("active recording");

    let page = FakePage::new();
    let mut session = session_on(&page);
    let err = ActionReplayer::new(Duration::ZERO)
        .replay(&partial, &mut session)
        .await
        .unwrap_err();
    session.close().await.unwrap();

    assert!(matches!(err, Error::IncompleteLog(id) if id == partial.id()));
    assert!(page.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn delay_is_inserted_between_actions_only() {
    let log = record_on(&FakePage::new(), &five_actions()).await;
    let delay = Duration::from_millis(500);

    let page = FakePage::new();
    let mut session = session_on(&page);
    let started = Instant::now();
    ActionReplayer::new(delay)
        .replay(&log, &mut session)
        .await
        .unwrap();
    session.close().await.unwrap();

    // Navigation itself waits for the network to go quiet.
    let idle = EngineConfig::default().network_idle_window;
    let elapsed = started.elapsed();
    assert!(elapsed >= delay * 4);
    assert!(elapsed < delay * 5 + idle * 2);
}

#[tokio::test(start_paused = true)]
async fn cancelling_during_the_delay_interrupts() {
    let log = record_on(&FakePage::new(), &five_actions()).await;

    let page = FakePage::new();
    let mut session = session_on(&page);
    let token = session.cancellation_token();
    let canceller = async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        token.cancel();
    };
    let replayer = ActionReplayer::new(Duration::from_secs(60));
    let (result, ()) = tokio::join!(replayer.replay(&log, &mut session), canceller);
    session.close().await.unwrap();

    match result {
        Err(Error::ReplayInterrupted { index, source }) => {
            assert_eq!(index, 1);
            assert!(matches!(*source, Error::Cancelled));
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(page.calls().len(), 1);
}

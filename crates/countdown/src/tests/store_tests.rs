use super::*;

fn noop() -> Continuation {
    Continuation::new(|| async { Ok(()) })
}

fn assert_invariants(state: &CountdownState) {
    assert!(state.count <= COUNTDOWN_START, "count out of range: {}", state.count);
    if !state.is_active {
        assert!(!state.has_continuation(), "inactive state kept a continuation");
    }
}

#[test]
fn start_resets_count_and_keeps_continuation() {
    let continuation = noop();
    let state = reduce(
        CountdownState {
            is_active: false,
            count: 3,
            on_complete: None,
        },
        CountdownCommand::Start(continuation.clone()),
    );
    assert!(state.is_active);
    assert_eq!(state.count, COUNTDOWN_START);
    assert!(state
        .on_complete
        .as_ref()
        .is_some_and(|stored| stored.ptr_eq(&continuation)));
}

#[test]
fn tick_only_touches_count() {
    let continuation = noop();
    let started = reduce(
        CountdownState::default(),
        CountdownCommand::Start(continuation.clone()),
    );
    let ticked = reduce(started, CountdownCommand::Tick(4));
    assert!(ticked.is_active);
    assert_eq!(ticked.count, 4);
    assert!(ticked
        .on_complete
        .as_ref()
        .is_some_and(|stored| stored.ptr_eq(&continuation)));
}

#[test]
fn tick_is_clamped_into_range() {
    let state = reduce(CountdownState::default(), CountdownCommand::Tick(200));
    assert_eq!(state.count, COUNTDOWN_START);
}

#[test]
fn stop_returns_to_default_state() {
    let started = reduce(CountdownState::default(), CountdownCommand::Start(noop()));
    let ticked = reduce(started, CountdownCommand::Tick(2));
    let stopped = reduce(ticked, CountdownCommand::Stop);
    assert!(!stopped.is_active);
    assert_eq!(stopped.count, COUNTDOWN_START);
    assert!(!stopped.has_continuation());
}

#[test]
fn invariants_hold_for_every_short_command_sequence() {
    let alphabet = |index: usize| match index {
        0 => CountdownCommand::Start(noop()),
        1 => CountdownCommand::Tick(0),
        2 => CountdownCommand::Tick(5),
        3 => CountdownCommand::Tick(COUNTDOWN_START),
        4 => CountdownCommand::Tick(u8::MAX),
        _ => CountdownCommand::Stop,
    };
    const SYMBOLS: usize = 6;
    const LENGTH: u32 = 5;

    for mut code in 0..SYMBOLS.pow(LENGTH) {
        let mut state = CountdownState::default();
        for _ in 0..LENGTH {
            state = reduce(state, alphabet(code % SYMBOLS));
            code /= SYMBOLS;
            assert_invariants(&state);
        }
    }
}

#[tokio::test]
async fn dispatch_publishes_snapshots() {
    let store = CountdownStore::new();
    let mut rx = store.subscribe();
    assert_eq!(store.snapshot(), CountdownSnapshot::default());

    let snapshot = store.dispatch(CountdownCommand::Start(noop())).await;
    assert_eq!(
        snapshot,
        CountdownSnapshot {
            is_active: true,
            count: COUNTDOWN_START
        }
    );
    rx.changed().await.expect("changed");
    assert!(rx.borrow_and_update().is_active);

    store.dispatch(CountdownCommand::Tick(7)).await;
    assert_eq!(store.snapshot().count, 7);
    assert!(store.state().await.has_continuation());

    store.dispatch(CountdownCommand::Stop).await;
    let state = store.state().await;
    assert!(!state.is_active);
    assert!(!state.has_continuation());
}

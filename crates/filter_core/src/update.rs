use crate::{
    normalize_topics, BatchFailure, BatchFailureKind, Decision, Effect, FilterState, Generation,
    Lifecycle, MonitorPhase, Msg, QuotaNotice, ScannedItem, VisualState,
};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: FilterState, msg: Msg) -> (FilterState, Vec<Effect>) {
    let effects = match msg {
        Msg::StartFiltering { topics } => start(&mut state, normalize_topics(topics)),
        Msg::UpdatePreferences { topics } => {
            restart(&mut state, normalize_topics(topics))
        }
        Msg::StopFiltering => {
            let mut effects = Vec::with_capacity(3);
            if state.is_polling() {
                state.set_polling(false);
                effects.push(Effect::StopPolling);
            }
            effects.push(Effect::ClearVisualState);
            effects.push(Effect::Notify(Lifecycle::FilteringStopped));
            state.end_session(MonitorPhase::Inactive);
            effects
        }
        Msg::StartupSettingsLoaded {
            filtering_enabled,
            topics,
        } => {
            let topics = normalize_topics(topics);
            // Auto-start only applies to an idle page with something to filter on.
            if filtering_enabled && !topics.is_empty() && !state.phase().is_filtering() {
                start(&mut state, topics)
            } else {
                Vec::new()
            }
        }
        Msg::PollTick => {
            if state.phase().is_filtering() {
                vec![Effect::ScanPage]
            } else {
                Vec::new()
            }
        }
        Msg::Scanned { items } => scanned(&mut state, items),
        Msg::BatchFinished {
            generation,
            decisions,
            failures,
        } => batch_finished(&mut state, generation, decisions, failures),
        Msg::Shutdown => {
            let mut effects = Vec::new();
            if state.is_polling() {
                state.set_polling(false);
                effects.push(Effect::StopPolling);
            }
            state.end_session(MonitorPhase::Stopped);
            effects
        }
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

fn start(state: &mut FilterState, topics: Vec<String>) -> Vec<Effect> {
    if state.phase().is_filtering() {
        if state.topics() == topics.as_slice() {
            return Vec::new();
        }
        return restart(state, topics);
    }
    state.begin_session(topics);
    vec![Effect::Notify(Lifecycle::FilteringStarted), Effect::ScanPage]
}

fn restart(state: &mut FilterState, topics: Vec<String>) -> Vec<Effect> {
    state.begin_session(topics);
    vec![
        Effect::ClearVisualState,
        Effect::Notify(Lifecycle::FilteringStarted),
        Effect::ScanPage,
    ]
}

fn scanned(state: &mut FilterState, items: Vec<ScannedItem>) -> Vec<Effect> {
    if !state.phase().is_filtering() {
        return Vec::new();
    }

    let mut effects = Vec::new();
    let mut fresh = Vec::new();
    for item in items {
        if state.is_processed(&item.title) {
            // A missing or foreign marker means the host page recreated or recycled the node.
            let remembered = state.remembered_state(&item.title);
            if item.marker != Some(remembered) {
                effects.push(Effect::Present {
                    title: item.title,
                    state: remembered,
                });
            }
        } else if !fresh.contains(&item.title) {
            fresh.push(item.title);
        }
    }

    if fresh.is_empty() {
        if state.phase() == MonitorPhase::Processing && state.in_flight() == 0 {
            effects.extend(become_active(state));
        }
        return effects;
    }

    // Every item is marked waiting before the batch leaves the page.
    for title in &fresh {
        state.record_submitted(title);
        effects.push(Effect::Present {
            title: title.clone(),
            state: VisualState::Waiting,
        });
    }
    state.batch_dispatched();
    effects.push(Effect::Notify(Lifecycle::ContentProcessing));
    effects.push(Effect::DispatchBatch {
        generation: state.generation(),
        titles: fresh,
        topics: state.topics().to_vec(),
    });
    effects
}

fn batch_finished(
    state: &mut FilterState,
    generation: Generation,
    decisions: Vec<Decision>,
    failures: Vec<BatchFailure>,
) -> Vec<Effect> {
    if generation != state.generation() || !state.phase().is_filtering() {
        return Vec::new();
    }

    let mut effects = Vec::with_capacity(decisions.len() + 2);
    for decision in decisions {
        if !state.is_processed(&decision.title) {
            continue;
        }
        state.record_verdict(&decision.title, decision.allowed);
        let visual = if decision.allowed {
            VisualState::Allowed
        } else {
            VisualState::Blocked
        };
        effects.push(Effect::Present {
            title: decision.title,
            state: visual,
        });
    }

    let quota = failures.into_iter().find_map(|failure| match failure.kind {
        BatchFailureKind::QuotaExceeded(notice) => Some(notice),
        // Other failures leave their items waiting until the user restarts.
        BatchFailureKind::Configuration(_) | BatchFailureKind::Transport(_) => None,
    });
    if let Some(notice) = quota {
        effects.extend(force_stop(state, notice));
        return effects;
    }

    state.batch_settled();
    if state.in_flight() == 0 {
        effects.extend(become_active(state));
    }
    effects
}

fn become_active(state: &mut FilterState) -> Vec<Effect> {
    state.enter_active();
    let mut effects = vec![Effect::Notify(Lifecycle::FilteringComplete)];
    if !state.is_polling() {
        state.set_polling(true);
        effects.push(Effect::StartPolling);
    }
    effects
}

fn force_stop(state: &mut FilterState, notice: QuotaNotice) -> Vec<Effect> {
    let mut effects = Vec::with_capacity(4);
    if state.is_polling() {
        state.set_polling(false);
        effects.push(Effect::StopPolling);
    }
    effects.push(Effect::ShowQuotaNotice(notice));
    effects.push(Effect::Notify(Lifecycle::FilteringStopped));
    effects.push(Effect::Notify(Lifecycle::FilteringComplete));
    state.end_session(MonitorPhase::Inactive);
    effects
}

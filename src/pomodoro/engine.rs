//! Countdown state machine for alternating Work and Break phases.
//!
//! The engine is driven from outside: something calls [`TimerEngine::tick`]
//! once per second while the engine is running (see
//! [`super::runner::TimerRunner`]). Completing a phase records a session,
//! credits the selected task, fires an alert and rolls straight into the next
//! phase without stopping.
//!
//! ```text
//!   Idle-Work  --start-->  Running-Work
//!      ^  <--pause/reset--      |
//!      |                        | countdown ends
//!   Idle-Break --start-->  Running-Break
//!         <--pause/reset--      | countdown ends -> Running-Work
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::notify::NotificationSink;
use crate::session::{IdGenerator, Session, SessionLog, today};
use crate::store::{PreferenceStore, StoreKeys, load_list, load_value, read_value, save_json};
use crate::tasks::{Task, TaskError, TaskList};

use super::phase::TimerPhase;
use super::settings::TimerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownState {
    pub seconds_remaining: u32,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The engine is paused; nothing changed.
    Idle,
    Counting { seconds_remaining: u32 },
    /// A phase ran out; `session` is the record written for it.
    PhaseCompleted { session: Session, next: TimerPhase },
}

/// Serializable view of the engine for renderers and the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub phase: TimerPhase,
    pub label: String,
    pub seconds_remaining: u32,
    pub display: String,
    pub running: bool,
    pub work_minutes: u32,
    pub break_minutes: u32,
    pub selected_task_id: Option<String>,
    pub focus_seconds_today: u64,
    pub tasks: Vec<Task>,
}

pub struct TimerEngine {
    settings: TimerSettings,
    phase: TimerPhase,
    countdown: CountdownState,
    selected_task: Option<String>,
    sessions: SessionLog,
    tasks: TaskList,
    ids: IdGenerator,
    keys: StoreKeys,
    store: Box<dyn PreferenceStore>,
    notifier: Box<dyn NotificationSink>,
}

impl std::fmt::Debug for TimerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerEngine")
            .field("settings", &self.settings)
            .field("phase", &self.phase)
            .field("countdown", &self.countdown)
            .field("selected_task", &self.selected_task)
            .field("sessions", &self.sessions.len())
            .field("tasks", &self.tasks.as_slice().len())
            .finish()
    }
}

impl TimerEngine {
    /// Builds an idle Work-phase engine from whatever the store holds and
    /// asks the notifier for permission once.
    pub fn load(
        store: Box<dyn PreferenceStore>,
        mut notifier: Box<dyn NotificationSink>,
        keys: StoreKeys,
    ) -> Self {
        let settings = load_value::<TimerSettings>(store.as_ref(), &keys.settings).normalized();
        let sessions = SessionLog::from_sessions(load_list(store.as_ref(), &keys.sessions));
        let tasks = TaskList::from_tasks(load_list(store.as_ref(), &keys.tasks));
        notifier.request_permission();

        debug!(
            sessions = sessions.len(),
            tasks = tasks.as_slice().len(),
            work_minutes = settings.work_minutes(),
            break_minutes = settings.break_minutes(),
            "loaded timer state"
        );

        let mut ids = IdGenerator::new();
        observe_ids(&mut ids, &sessions, &tasks);

        let phase = TimerPhase::default();
        Self {
            countdown: CountdownState {
                seconds_remaining: settings.duration_for(phase),
                running: false,
            },
            settings,
            phase,
            selected_task: None,
            sessions,
            tasks,
            ids,
            keys,
            store,
            notifier,
        }
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn seconds_remaining(&self) -> u32 {
        self.countdown.seconds_remaining
    }

    pub fn is_running(&self) -> bool {
        self.countdown.running
    }

    pub fn countdown(&self) -> CountdownState {
        self.countdown
    }

    pub fn settings(&self) -> TimerSettings {
        self.settings
    }

    pub fn sessions(&self) -> &SessionLog {
        &self.sessions
    }

    pub fn tasks(&self) -> &TaskList {
        &self.tasks
    }

    pub fn selected_task(&self) -> Option<&str> {
        self.selected_task.as_deref()
    }

    pub fn start(&mut self) {
        if self.countdown.running {
            return;
        }
        self.countdown.running = true;
        info!(phase = %self.phase, remaining = self.countdown.seconds_remaining, "timer started");
    }

    pub fn pause(&mut self) {
        if self.countdown.running {
            info!(phase = %self.phase, remaining = self.countdown.seconds_remaining, "timer paused");
        }
        self.countdown.running = false;
    }

    /// Stops and rewinds the current phase. Nothing is recorded.
    pub fn reset(&mut self) {
        self.countdown.running = false;
        self.countdown.seconds_remaining = self.settings.duration_for(self.phase);
        info!(phase = %self.phase, "timer reset");
    }

    /// Advances the countdown by one second.
    ///
    /// The second that would run the countdown out completes the phase, so a
    /// phase of `n` seconds completes on exactly its `n`th tick and the
    /// countdown is never observed below one.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.countdown.running {
            return TickOutcome::Idle;
        }
        if self.countdown.seconds_remaining > 1 {
            self.countdown.seconds_remaining -= 1;
            return TickOutcome::Counting {
                seconds_remaining: self.countdown.seconds_remaining,
            };
        }
        self.complete_phase()
    }

    fn complete_phase(&mut self) -> TickOutcome {
        let finished = self.phase;
        self.refresh_sessions();
        self.refresh_tasks();

        let session = Session {
            id: self.ids.next_id(),
            date: today(),
            kind: finished,
            duration: self.settings.duration_for(finished),
            task_id: self.selected_task.clone(),
        };
        self.sessions.push(session.clone());
        persist(self.store.as_mut(), &self.keys.sessions, self.sessions.as_slice());

        // Only focus time earns a pomodoro.
        if let (TimerPhase::Work, Some(id)) = (finished, self.selected_task.clone()) {
            match self.tasks.increment_pomodoro(&id) {
                Ok(count) => {
                    debug!(task = %id, count, "credited pomodoro");
                    persist(self.store.as_mut(), &self.keys.tasks, self.tasks.as_slice());
                }
                Err(e) => debug!(error = %e, "selected task vanished before credit"),
            }
        }

        let (title, body) = finished.completion_message();
        self.notifier.notify(title, body);

        self.phase = finished.next();
        self.countdown.seconds_remaining = self.settings.duration_for(self.phase);
        info!(completed = %finished, next = %self.phase, "phase completed");

        TickOutcome::PhaseCompleted {
            session,
            next: self.phase,
        }
    }

    pub fn set_work_minutes(&mut self, minutes: u32) {
        self.settings.set_work_minutes(minutes);
        self.settings_changed();
    }

    pub fn set_break_minutes(&mut self, minutes: u32) {
        self.settings.set_break_minutes(minutes);
        self.settings_changed();
    }

    // A running countdown keeps its length; only later phases see the change.
    fn settings_changed(&mut self) {
        persist(self.store.as_mut(), &self.keys.settings, &self.settings);
        if !self.countdown.running {
            self.countdown.seconds_remaining = self.settings.duration_for(self.phase);
        }
    }

    /// Chooses the task credited by the next completed Work phase. Unknown
    /// ids clear the selection.
    pub fn select_task(&mut self, id: Option<&str>) {
        self.selected_task = id.filter(|id| self.tasks.contains(id)).map(str::to_string);
    }

    pub fn add_task(&mut self, title: &str) -> Result<Task, TaskError> {
        self.refresh_tasks();
        let task = self.tasks.add(title, &mut self.ids)?;
        persist(self.store.as_mut(), &self.keys.tasks, self.tasks.as_slice());
        Ok(task)
    }

    pub fn toggle_task(&mut self, id: &str) -> Result<Task, TaskError> {
        self.refresh_tasks();
        let task = self.tasks.toggle(id)?.clone();
        persist(self.store.as_mut(), &self.keys.tasks, self.tasks.as_slice());
        Ok(task)
    }

    pub fn remove_task(&mut self, id: &str) -> Result<Task, TaskError> {
        self.refresh_tasks();
        let task = self.tasks.remove(id)?;
        if self.selected_task.as_deref() == Some(id) {
            self.selected_task = None;
        }
        persist(self.store.as_mut(), &self.keys.tasks, self.tasks.as_slice());
        Ok(task)
    }

    /// Picks up task edits made by other writers of the same store. A stored
    /// list that cannot be read leaves the in-memory copy in place.
    fn refresh_tasks(&mut self) {
        match read_value::<Vec<Task>>(self.store.as_ref(), &self.keys.tasks) {
            Ok(Some(tasks)) => {
                self.tasks = TaskList::from_tasks(tasks);
                observe_ids(&mut self.ids, &self.sessions, &self.tasks);
                let vanished = self
                    .selected_task
                    .as_deref()
                    .is_some_and(|id| !self.tasks.contains(id));
                if vanished {
                    debug!("selected task removed elsewhere");
                    self.selected_task = None;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not re-read tasks, keeping loaded copy"),
        }
    }

    fn refresh_sessions(&mut self) {
        match read_value::<Vec<Session>>(self.store.as_ref(), &self.keys.sessions) {
            Ok(Some(sessions)) => {
                self.sessions = SessionLog::from_sessions(sessions);
                observe_ids(&mut self.ids, &self.sessions, &self.tasks);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not re-read sessions, keeping loaded copy"),
        }
    }

    pub fn today_focus_seconds(&self) -> u64 {
        self.sessions.focus_seconds_on(&today())
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            phase: self.phase,
            label: self.phase.label().to_string(),
            seconds_remaining: self.countdown.seconds_remaining,
            display: format_clock(self.countdown.seconds_remaining),
            running: self.countdown.running,
            work_minutes: self.settings.work_minutes(),
            break_minutes: self.settings.break_minutes(),
            selected_task_id: self.selected_task.clone(),
            focus_seconds_today: self.today_focus_seconds(),
            tasks: self.tasks.as_slice().to_vec(),
        }
    }
}

fn observe_ids(ids: &mut IdGenerator, sessions: &SessionLog, tasks: &TaskList) {
    let seen = sessions
        .as_slice()
        .iter()
        .map(|s| s.id.as_str())
        .chain(tasks.as_slice().iter().map(|t| t.id.as_str()));
    for id in seen {
        ids.observe(id);
    }
}

/// Writes are best-effort: the timer keeps going on a failed save.
fn persist<T: Serialize + ?Sized>(store: &mut dyn PreferenceStore, key: &str, value: &T) {
    if let Err(e) = save_json(store, key, value) {
        warn!(key, error = %e, "failed to persist timer state");
    }
}

/// Formats seconds as `mm:ss`.
pub fn format_clock(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingSink;
    use crate::store::MemoryStore;

    fn engine_with(store: &MemoryStore, sink: &RecordingSink) -> TimerEngine {
        TimerEngine::load(
            Box::new(store.clone()),
            Box::new(sink.clone()),
            StoreKeys::default(),
        )
    }

    fn engine() -> TimerEngine {
        engine_with(&MemoryStore::new(), &RecordingSink::new())
    }

    fn run_ticks(engine: &mut TimerEngine, n: u32) -> Vec<TickOutcome> {
        (0..n).map(|_| engine.tick()).collect()
    }

    #[test]
    fn fresh_engine_is_idle_in_work_phase() {
        let engine = engine();
        assert_eq!(engine.phase(), TimerPhase::Work);
        assert_eq!(engine.seconds_remaining(), 1500);
        assert!(!engine.is_running());
    }

    #[test]
    fn ticks_while_paused_change_nothing() {
        let mut engine = engine();
        assert_eq!(engine.tick(), TickOutcome::Idle);
        assert_eq!(engine.seconds_remaining(), 1500);
    }

    #[test]
    fn full_work_phase_records_one_session_and_rolls_into_break() {
        for (w, b) in [(1, 1), (7, 3), (25, 5), (60, 30)] {
            let store = MemoryStore::new();
            let sink = RecordingSink::new();
            let mut engine = engine_with(&store, &sink);
            engine.set_work_minutes(w);
            engine.set_break_minutes(b);
            engine.start();

            let outcomes = run_ticks(&mut engine, w * 60);
            let completed: Vec<_> = outcomes
                .iter()
                .filter(|o| matches!(o, TickOutcome::PhaseCompleted { .. }))
                .collect();
            assert_eq!(completed.len(), 1, "w={w} b={b}");
            assert!(matches!(outcomes.last(), Some(TickOutcome::PhaseCompleted { .. })));

            let sessions = engine.sessions().as_slice();
            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[0].kind, TimerPhase::Work);
            assert_eq!(sessions[0].duration, w * 60);
            assert_eq!(engine.phase(), TimerPhase::Break);
            assert_eq!(engine.seconds_remaining(), b * 60);
            assert!(engine.is_running());
        }
    }

    #[test]
    fn countdown_never_reaches_zero_or_below() {
        let mut engine = engine();
        engine.set_work_minutes(1);
        engine.set_break_minutes(1);
        engine.start();
        for _ in 0..600 {
            engine.tick();
            assert!(engine.seconds_remaining() >= 1);
        }
        // 600 seconds of alternating one-minute phases.
        assert_eq!(engine.sessions().len(), 10);
    }

    #[test]
    fn selected_task_is_credited_for_a_pomodoro() {
        let store = MemoryStore::new();
        let sink = RecordingSink::new();
        let mut engine = engine_with(&store, &sink);
        let task = engine.add_task("Thermodynamics").unwrap();
        let other = engine.add_task("Integration").unwrap();
        engine.select_task(Some(task.id.as_str()));
        engine.start();

        run_ticks(&mut engine, 1500);

        let sessions = engine.sessions().as_slice();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].kind, TimerPhase::Work);
        assert_eq!(sessions[0].duration, 1500);
        assert_eq!(sessions[0].task_id.as_deref(), Some(task.id.as_str()));
        assert_eq!(engine.tasks().get(&task.id).unwrap().pomodoro_count, 1);
        assert_eq!(engine.tasks().get(&other.id).unwrap().pomodoro_count, 0);
        assert_eq!(engine.phase(), TimerPhase::Break);
        assert_eq!(engine.seconds_remaining(), 300);

        // Persisted copies reflect the same state.
        let stored_tasks: Vec<Task> = load_list(&store, "pomodoro_tasks");
        assert_eq!(stored_tasks[0].pomodoro_count, 1);
        let stored_sessions: Vec<Session> = load_list(&store, "pomodoro_sessions");
        assert_eq!(stored_sessions, sessions.to_vec());
    }

    #[test]
    fn break_completion_keeps_the_task_but_earns_no_pomodoro() {
        let mut engine = engine();
        let task = engine.add_task("Optics").unwrap();
        engine.select_task(Some(task.id.as_str()));
        engine.set_work_minutes(1);
        engine.set_break_minutes(1);
        engine.start();

        run_ticks(&mut engine, 120);

        let sessions = engine.sessions().as_slice();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[1].kind, TimerPhase::Break);
        assert_eq!(sessions[1].task_id.as_deref(), Some(task.id.as_str()));
        assert_eq!(engine.tasks().get(&task.id).unwrap().pomodoro_count, 1);
        assert_eq!(engine.phase(), TimerPhase::Work);
    }

    #[test]
    fn each_completion_sends_a_phase_specific_alert() {
        let store = MemoryStore::new();
        let sink = RecordingSink::new();
        let mut engine = engine_with(&store, &sink);
        engine.set_work_minutes(1);
        engine.set_break_minutes(1);
        engine.start();
        run_ticks(&mut engine, 120);

        assert_eq!(sink.permission_requests(), 1);
        let titles: Vec<_> = sink.sent().into_iter().map(|(t, _)| t).collect();
        assert_eq!(titles, vec!["Pomodoro Complete!", "Break Over!"]);
    }

    #[test]
    fn pause_is_idempotent() {
        let mut engine = engine();
        engine.start();
        run_ticks(&mut engine, 10);
        engine.pause();
        let once = (engine.countdown(), engine.phase(), engine.sessions().clone());
        engine.pause();
        let twice = (engine.countdown(), engine.phase(), engine.sessions().clone());
        assert_eq!(once, twice);
        assert_eq!(engine.seconds_remaining(), 1490);
    }

    #[test]
    fn reset_rewinds_without_recording() {
        let mut engine = engine();
        engine.start();
        run_ticks(&mut engine, 100);
        engine.reset();
        assert!(!engine.is_running());
        assert_eq!(engine.seconds_remaining(), 1500);
        assert!(engine.sessions().is_empty());
    }

    #[test]
    fn settings_change_while_idle_resyncs_countdown() {
        let mut engine = engine();
        engine.set_work_minutes(1);
        assert_eq!(engine.seconds_remaining(), 60);

        engine.set_work_minutes(0);
        assert_eq!(engine.seconds_remaining(), 60);
        engine.set_work_minutes(75);
        assert_eq!(engine.seconds_remaining(), 3600);
    }

    #[test]
    fn settings_change_while_running_only_affects_later_phases() {
        let mut engine = engine();
        engine.start();
        run_ticks(&mut engine, 5);
        engine.set_work_minutes(10);
        engine.set_break_minutes(2);
        assert_eq!(engine.seconds_remaining(), 1495);

        run_ticks(&mut engine, 1495);
        assert_eq!(engine.phase(), TimerPhase::Break);
        assert_eq!(engine.seconds_remaining(), 120);
        // The completed session reports the length configured at completion.
        assert_eq!(engine.sessions().as_slice()[0].duration, 600);
    }

    #[test]
    fn start_is_a_no_op_while_running() {
        let mut engine = engine();
        engine.start();
        run_ticks(&mut engine, 3);
        engine.start();
        assert!(engine.is_running());
        assert_eq!(engine.seconds_remaining(), 1497);
    }

    #[test]
    fn removing_selected_task_clears_selection() {
        let mut engine = engine();
        let task = engine.add_task("Vectors").unwrap();
        engine.select_task(Some(task.id.as_str()));
        assert_eq!(engine.selected_task(), Some(task.id.as_str()));

        engine.remove_task(&task.id).unwrap();
        assert_eq!(engine.selected_task(), None);
    }

    #[test]
    fn selecting_unknown_task_clears_selection() {
        let mut engine = engine();
        let task = engine.add_task("Vectors").unwrap();
        engine.select_task(Some(task.id.as_str()));
        engine.select_task(Some("missing"));
        assert_eq!(engine.selected_task(), None);
    }

    #[test]
    fn state_reloads_from_the_store() {
        let store = MemoryStore::new();
        let sink = RecordingSink::new();
        {
            let mut engine = engine_with(&store, &sink);
            engine.set_work_minutes(1);
            engine.set_break_minutes(2);
            let task = engine.add_task("Kinematics").unwrap();
            engine.toggle_task(&task.id).unwrap();
            engine.start();
            run_ticks(&mut engine, 60);
        }

        let engine = engine_with(&store, &sink);
        assert_eq!(engine.settings(), TimerSettings::new(1, 2));
        assert_eq!(engine.sessions().len(), 1);
        assert!(engine.tasks().as_slice()[0].completed);
        // Reloaded engines always start idle in Work.
        assert_eq!(engine.phase(), TimerPhase::Work);
        assert_eq!(engine.seconds_remaining(), 60);
    }

    #[test]
    fn writes_from_another_engine_on_the_same_store_survive() {
        let store = MemoryStore::new();
        let mut daemon = engine_with(&store, &RecordingSink::new());
        daemon.set_work_minutes(1);
        let mine = daemon.add_task("daemon task").unwrap();
        daemon.select_task(Some(mine.id.as_str()));

        let mut cli = engine_with(&store, &RecordingSink::new());
        let theirs = cli.add_task("cli task").unwrap();
        assert_ne!(mine.id, theirs.id);

        daemon.start();
        run_ticks(&mut daemon, 60);

        let stored: Vec<Task> = load_list(&store, "pomodoro_tasks");
        let titles: Vec<_> = stored.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["daemon task", "cli task"]);
        assert_eq!(stored[0].pomodoro_count, 1);
        assert!(daemon.tasks().contains(&theirs.id));

        // A session recorded elsewhere is kept alongside the daemon's.
        cli.set_work_minutes(1);
        cli.start();
        run_ticks(&mut cli, 60);
        let stored: Vec<Session> = load_list(&store, "pomodoro_sessions");
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn selection_clears_when_another_writer_removes_the_task() {
        let store = MemoryStore::new();
        let mut daemon = engine_with(&store, &RecordingSink::new());
        let task = daemon.add_task("Waves").unwrap();
        daemon.select_task(Some(task.id.as_str()));

        let mut cli = engine_with(&store, &RecordingSink::new());
        cli.remove_task(&task.id).unwrap();

        daemon.add_task("Optics").unwrap();
        assert_eq!(daemon.selected_task(), None);
        assert!(!daemon.tasks().contains(&task.id));
    }

    #[test]
    fn storage_failures_do_not_stop_the_timer() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let sink = RecordingSink::new();
        let mut engine = engine_with(&store, &sink);
        engine.set_work_minutes(1);
        engine.start();
        run_ticks(&mut engine, 60);

        assert_eq!(engine.sessions().len(), 1);
        assert_eq!(engine.phase(), TimerPhase::Break);
    }

    #[test]
    fn corrupt_store_loads_as_empty() {
        let store = MemoryStore::new();
        store.insert_raw("pomodoro_sessions", "not json");
        store.insert_raw("pomodoro_tasks", "[{\"broken\":");
        store.insert_raw("timer_settings", "42");
        let engine = engine_with(&store, &RecordingSink::new());

        assert!(engine.sessions().is_empty());
        assert!(engine.tasks().as_slice().is_empty());
        assert_eq!(engine.settings(), TimerSettings::default());
    }

    #[test]
    fn snapshot_formats_the_clock() {
        let mut engine = engine();
        engine.start();
        run_ticks(&mut engine, 61);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.display, "23:59");
        assert_eq!(snapshot.label, "Focus Time");
        assert!(snapshot.running);
        assert_eq!(format_clock(5), "00:05");
    }
}

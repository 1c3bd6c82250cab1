//! The scheduled batch agent.
//!
//! On each firing of its schedule the agent runs the operator directive
//! for every known user through [`TurnOrchestrator::run_directive`] and hands
//! the results to its sinks. One user's failure never aborts the run.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use learnpath_agent::TurnOrchestrator;
use learnpath_config::BatchConfig;
use learnpath_conversation::ConversationStore;
use learnpath_core::error::Error;
use learnpath_core::event::{DomainEvent, EventBus};
use learnpath_core::message::UserId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::WorkflowError;
use crate::schedule::{Schedule, truncate_to_minute};
use crate::sink::{BatchSummary, SummarySink};

/// How often the background ticker checks the schedule.
const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Mutex::new(at))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = match self.0.lock() {
            Ok(now) => now,
            Err(poisoned) => poisoned.into_inner(),
        };
        *now = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.0.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Enumerates the users a batch run covers.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn users(&self) -> Vec<UserId>;
}

/// Configured users plus everyone the conversation store has seen.
pub struct StoreDirectory {
    configured: Vec<UserId>,
    store: Arc<ConversationStore>,
}

impl StoreDirectory {
    pub fn new(configured: Vec<UserId>, store: Arc<ConversationStore>) -> Self {
        Self { configured, store }
    }
}

#[async_trait]
impl UserDirectory for StoreDirectory {
    async fn users(&self) -> Vec<UserId> {
        let mut users = self.configured.clone();
        users.extend(self.store.known_users());
        users.sort_unstable();
        users.dedup();
        users
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Running,
}

/// Outcome of one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Tags every log line of the run.
    pub run_id: Uuid,
    pub users: usize,
    pub failures: usize,
    pub duration_ms: u64,
}

/// Runs the weekly summary directive for every user on a schedule.
pub struct BatchAgent {
    orchestrator: Arc<TurnOrchestrator>,
    directory: Arc<dyn UserDirectory>,
    sinks: Vec<Arc<dyn SummarySink>>,
    schedule: Schedule,
    directive: String,
    lookback: Duration,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    state: Mutex<BatchState>,
    last_fired: Mutex<Option<DateTime<Utc>>>,
}

/// Resets the agent to `Idle` when a run ends, however it ends.
struct RunGuard<'a>(&'a Mutex<BatchState>);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = match self.0.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = BatchState::Idle;
    }
}

impl BatchAgent {
    pub fn new(
        orchestrator: Arc<TurnOrchestrator>,
        directory: Arc<dyn UserDirectory>,
        schedule: Schedule,
        directive: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            orchestrator,
            directory,
            sinks: Vec::new(),
            schedule,
            directive: directive.into(),
            lookback: Duration::days(7),
            clock: Arc::new(SystemClock),
            event_bus,
            state: Mutex::new(BatchState::Idle),
            last_fired: Mutex::new(None),
        }
    }

    /// Build from the `[batch]` config section, covering configured users
    /// and everyone in the orchestrator's store.
    pub fn from_config(
        config: &BatchConfig,
        orchestrator: Arc<TurnOrchestrator>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self, WorkflowError> {
        let schedule = Schedule::parse(&config.schedule)?;
        let directory = Arc::new(StoreDirectory::new(
            config.users.clone(),
            Arc::clone(orchestrator.store()),
        ));
        Ok(
            Self::new(orchestrator, directory, schedule, &config.directive, event_bus)
                .with_lookback_days(config.lookback_days),
        )
    }

    pub fn with_sink(mut self, sink: Arc<dyn SummarySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback = Duration::days(days);
        self
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn state(&self) -> BatchState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// The directive for one user, with the summary window ending at `now`.
    fn directive_for(&self, user_id: UserId, now: DateTime<Utc>) -> (String, DateTime<Utc>) {
        let start = now - self.lookback;
        let text = self
            .directive
            .replace("{user_id}", &user_id.to_string())
            .replace("{start_date}", &start.to_rfc3339_opts(SecondsFormat::Millis, true))
            .replace("{end_date}", &now.to_rfc3339_opts(SecondsFormat::Millis, true));
        (text, start)
    }

    /// Generate and deliver the summary for one user.
    pub async fn run_for(&self, user_id: UserId) -> Result<BatchSummary, Error> {
        let now = self.clock.now();
        let (directive, start_date) = self.directive_for(user_id, now);

        let text = self.orchestrator.run_directive(user_id, &directive).await?;
        let summary = BatchSummary {
            user_id,
            summary: text,
            start_date,
            end_date: now,
            generated_at: Utc::now(),
        };
        for sink in &self.sinks {
            sink.deliver(&summary).await;
        }
        Ok(summary)
    }

    /// Run the batch now. Returns `None` if a run is already in progress.
    pub async fn run_once(&self) -> Option<BatchReport> {
        {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *state == BatchState::Running {
                info!("Batch run already in progress, skipping trigger");
                return None;
            }
            *state = BatchState::Running;
        }
        let _guard = RunGuard(&self.state);

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let users = self.directory.users().await;
        info!(%run_id, users = users.len(), "Starting batch run");

        let mut failures = 0;
        for &user_id in &users {
            match self.run_for(user_id).await {
                Ok(summary) => {
                    debug!(user_id, chars = summary.summary.len(), "Batch summary delivered");
                }
                Err(e) => {
                    failures += 1;
                    warn!(%run_id, user_id, error = %e, "Batch run failed for user");
                    self.event_bus.publish(DomainEvent::ErrorOccurred {
                        context: format!("batch user={user_id}"),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        let report = BatchReport {
            run_id,
            users: users.len(),
            failures,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            %run_id,
            users = report.users,
            failures = report.failures,
            duration_ms = report.duration_ms,
            "Batch run complete"
        );
        self.event_bus.publish(DomainEvent::BatchCompleted {
            run_id,
            users: report.users,
            failures: report.failures,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });
        Some(report)
    }

    /// Check the schedule and run if this minute is due.
    ///
    /// Fires at most once per matching minute, however often it is called.
    pub async fn tick(&self) -> Option<BatchReport> {
        let now = self.clock.now();
        if !self.schedule.matches(&now) {
            return None;
        }

        let minute = truncate_to_minute(&now)?;
        {
            let mut last = match self.last_fired.lock() {
                Ok(last) => last,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *last == Some(minute) {
                return None;
            }
            *last = Some(minute);
        }

        info!(schedule = self.schedule.as_str(), "Batch schedule triggered");
        self.run_once().await
    }

    /// Spawn the background ticker.
    pub fn start(self: Arc<Self>) -> BatchHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let agent = self;

        if let Some(next) = agent.schedule.next_after(&agent.clock.now()) {
            info!(schedule = agent.schedule.as_str(), next_run = %next, "Batch agent started");
        }

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        agent.tick().await;
                    }
                    _ = stop_rx.changed() => {
                        debug!("Batch agent stop requested");
                        break;
                    }
                }
            }
        });

        BatchHandle { stop_tx, task }
    }
}

/// Handle to a started [`BatchAgent`].
pub struct BatchHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BatchHandle {
    /// Stop the ticker and wait for it. A run in progress finishes first.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Batch agent task ended abnormally");
        }
        info!("Batch agent stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{LatestSummaries, LogSink};
    use chrono::NaiveDate;
    use learnpath_agent::test_support::*;
    use learnpath_conversation::CompactionPolicy;
    use learnpath_core::error::ProviderError;
    use learnpath_core::message::Turn;
    use learnpath_core::provider::Provider;

    /// Sunday 2026-03-01 18:00 UTC, a firing minute of the default schedule.
    fn sunday_evening() -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(18, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn store() -> Arc<ConversationStore> {
        Arc::new(ConversationStore::new(
            "coach {user_id}",
            CompactionPolicy::new(5, Arc::new(StaticSummarizer("s".into()))),
        ))
    }

    fn agent_with(
        provider: Arc<dyn Provider>,
        users: Vec<UserId>,
    ) -> (Arc<BatchAgent>, Arc<LatestSummaries>) {
        agent_at(provider, users, Arc::new(ManualClock::new(sunday_evening())))
    }

    fn agent_at(
        provider: Arc<dyn Provider>,
        users: Vec<UserId>,
        clock: Arc<ManualClock>,
    ) -> (Arc<BatchAgent>, Arc<LatestSummaries>) {
        let bus = Arc::new(EventBus::default());
        let orchestrator = Arc::new(TurnOrchestrator::new(
            provider,
            Arc::new(StubGateway::new(vec![descriptor("getAllDomainsofUser")])),
            store(),
            Arc::clone(&bus),
        ));
        let latest = Arc::new(LatestSummaries::new());
        let directory = Arc::new(StoreDirectory::new(users, Arc::clone(orchestrator.store())));
        let agent = BatchAgent::new(
            orchestrator,
            directory,
            Schedule::parse("0 18 * * 0").unwrap(),
            "Summarize user {user_id} from {start_date} to {end_date}",
            bus,
        )
        .with_clock(clock)
        .with_sink(latest.clone())
        .with_sink(Arc::new(LogSink));
        (Arc::new(agent), latest)
    }

    #[tokio::test]
    async fn directive_placeholders_cover_past_week() {
        let provider = Arc::new(ScriptedProvider::single_text("Great week"));
        let (agent, latest) = agent_with(provider.clone(), vec![7]);

        let report = agent.run_once().await.unwrap();
        assert_eq!(report.users, 1);
        assert_eq!(report.failures, 0);

        let request = &provider.requests()[0];
        assert_eq!(request.turns.len(), 1);
        assert_eq!(
            request.turns[0].texts(),
            vec!["Summarize user 7 from 2026-02-22T18:00:00.000Z to 2026-03-01T18:00:00.000Z"]
        );

        let summary = latest.get(7).unwrap();
        assert_eq!(summary.summary, "Great week");
        assert_eq!(summary.end_date, sunday_evening());
    }

    #[tokio::test]
    async fn one_failing_user_does_not_abort_the_batch() {
        let provider = Arc::new(ScriptedProvider::with_results(vec![
            Ok(text_response("summary one")),
            Err(ProviderError::Network("reset".into())),
            Ok(text_response("summary three")),
        ]));
        let (agent, latest) = agent_with(provider, vec![3, 1, 2]);

        let report = agent.run_once().await.unwrap();
        assert_eq!(report.users, 3);
        assert_eq!(report.failures, 1);
        assert_eq!(latest.get(1).unwrap().summary, "summary one");
        assert!(latest.get(2).is_none());
        assert_eq!(latest.get(3).unwrap().summary, "summary three");
        assert_eq!(agent.state(), BatchState::Idle);
    }

    #[tokio::test]
    async fn reset_and_failed_chats_do_not_enroll_users() {
        let provider = Arc::new(ScriptedProvider::with_results(vec![
            Err(ProviderError::Network("down".into())),
            Ok(text_response("for 9")),
        ]));
        let (agent, latest) = agent_with(provider, vec![9]);
        let orchestrator = &agent.orchestrator;
        orchestrator.reset(999_999).await;
        let _ = orchestrator.store().snapshot(424_242).await;
        assert!(orchestrator.process_message(5, "hello").await.is_err());

        let directory = StoreDirectory::new(vec![9], Arc::clone(orchestrator.store()));
        assert_eq!(directory.users().await, vec![9]);

        let report = agent.run_once().await.unwrap();
        assert_eq!(report.users, 1);
        assert_eq!(latest.get(9).unwrap().summary, "for 9");
    }

    #[tokio::test]
    async fn users_seen_in_chat_are_included() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_response("for 4"),
            text_response("for 9"),
        ]));
        let (agent, latest) = agent_with(provider, vec![9]);
        agent.orchestrator.store().append(4, Turn::user("hi")).await;

        let report = agent.run_once().await.unwrap();
        assert_eq!(report.users, 2);
        assert_eq!(latest.get(4).unwrap().summary, "for 4");
        assert_eq!(latest.get(9).unwrap().summary, "for 9");
        // The stored chat history is untouched by the batch
        assert_eq!(agent.orchestrator.store().snapshot(4).await.len(), 2);
    }

    #[tokio::test]
    async fn tick_fires_once_per_matching_minute() {
        let provider = Arc::new(EchoProvider::new());
        let clock = Arc::new(ManualClock::new(sunday_evening() + Duration::hours(1)));
        let (agent, latest) = agent_at(provider, vec![1], clock.clone());

        assert!(agent.tick().await.is_none());
        assert!(latest.is_empty());

        clock.set(sunday_evening());
        assert!(agent.tick().await.is_some());
        clock.set(sunday_evening() + Duration::seconds(40));
        assert!(agent.tick().await.is_none());

        // Next week fires again
        clock.set(sunday_evening() + Duration::days(7));
        assert!(agent.tick().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_while_running_is_skipped() {
        let provider = Arc::new(EchoProvider::with_delay(std::time::Duration::from_secs(10)));
        let (agent, _) = agent_with(provider, vec![1]);

        let first = {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move { agent.run_once().await })
        };
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(agent.state(), BatchState::Running);
        assert!(agent.run_once().await.is_none());

        assert!(first.await.unwrap().is_some());
        assert_eq!(agent.state(), BatchState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn started_agent_runs_on_schedule_and_stops() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("weekly")]));
        let (agent, latest) = agent_with(provider.clone(), vec![5]);

        let handle = Arc::clone(&agent).start();
        // Several ticks inside the same firing minute
        tokio::time::sleep(std::time::Duration::from_secs(95)).await;
        handle.stop().await;

        assert_eq!(provider.call_count(), 1);
        assert_eq!(latest.get(5).unwrap().summary, "weekly");
    }

    #[tokio::test]
    async fn batch_completed_event_is_published() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let orchestrator = Arc::new(TurnOrchestrator::new(
            Arc::new(EchoProvider::new()),
            Arc::new(StubGateway::new(Vec::new())),
            store(),
            Arc::clone(&bus),
        ));
        let config = BatchConfig {
            users: vec![1, 2],
            ..BatchConfig::default()
        };
        let agent = BatchAgent::from_config(&config, orchestrator, bus).unwrap();
        let report = agent.run_once().await.unwrap();

        let mut completed = None;
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::BatchCompleted {
                run_id,
                users,
                failures,
                ..
            } = event.as_ref()
            {
                completed = Some((*run_id, *users, *failures));
            }
        }
        assert_eq!(completed, Some((report.run_id, 2, 0)));
    }

    #[test]
    fn invalid_schedule_in_config_is_rejected() {
        let bus = Arc::new(EventBus::default());
        let orchestrator = Arc::new(TurnOrchestrator::new(
            Arc::new(EchoProvider::new()),
            Arc::new(StubGateway::new(Vec::new())),
            store(),
            Arc::clone(&bus),
        ));
        let config = BatchConfig {
            schedule: "every sunday".into(),
            ..BatchConfig::default()
        };
        assert!(BatchAgent::from_config(&config, orchestrator, bus).is_err());
    }
}

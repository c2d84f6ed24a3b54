//! Countdown engine for one schedule target.
//!
//! The engine keeps a local countdown that ticks down once per second and is
//! periodically replaced by the server's value. The server always wins: local
//! ticking only fills the gaps between resyncs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, OptionFuture};
use log::{debug, info, warn};
use secrecy::SecretString;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use super::describe::{describe, format_countdown};
use super::descriptor::ScheduleDescriptor;
use crate::api::{HttpApiClient, ScheduleApi, TriggerAck};
use crate::config::WatchConfig;
use crate::error::{ApiError, ScheduleError};

/// Timer settings of the driver task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    pub resync_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            resync_interval: Duration::from_secs(60),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            resync_interval: config.resync_interval(),
        }
    }
}

/// Observable schedule state.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleView {
    pub target: String,
    /// `None` when no schedule is configured or nothing was loaded yet.
    pub descriptor: Option<ScheduleDescriptor>,
    pub countdown_seconds: Option<u64>,
    /// Set after the first successful load.
    pub loaded: bool,
    pub error: Option<String>,
}

impl ScheduleView {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            descriptor: None,
            countdown_seconds: None,
            loaded: false,
            error: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.descriptor.is_some()
    }

    pub fn description(&self) -> Option<String> {
        self.descriptor.as_ref().map(describe)
    }

    /// `None` for a missing or disabled schedule.
    pub fn countdown_label(&self) -> Option<String> {
        match &self.descriptor {
            Some(descriptor) if descriptor.enabled => self.countdown_seconds.map(format_countdown),
            _ => None,
        }
    }
}

struct EngineInner {
    api: Arc<dyn ScheduleApi>,
    target: String,
    view: watch::Sender<ScheduleView>,
}

impl EngineInner {
    async fn resync(&self) -> Result<Option<ScheduleDescriptor>, ScheduleError> {
        match self.api.get_schedule(&self.target).await {
            Ok(descriptor) => {
                self.apply(descriptor.clone());
                Ok(descriptor)
            }
            Err(e) => {
                warn!("Failed to load schedule for {}: {}", self.target, e);
                self.record_error(&e);
                Err(e.into())
            }
        }
    }

    /// Replaces the descriptor and countdown with server state.
    fn apply(&self, descriptor: Option<ScheduleDescriptor>) {
        self.view.send_modify(|view| {
            view.countdown_seconds = descriptor.as_ref().and_then(ScheduleDescriptor::countdown);
            view.descriptor = descriptor;
            view.loaded = true;
        });
    }

    fn tick(&self) -> Option<u64> {
        self.view.send_if_modified(|view| {
            let enabled = view.descriptor.as_ref().is_some_and(|d| d.enabled);
            match view.countdown_seconds {
                Some(secs) if enabled && secs > 0 => {
                    view.countdown_seconds = Some(secs - 1);
                    true
                }
                _ => false,
            }
        });
        self.view.borrow().countdown_seconds
    }

    fn record_error(&self, error: &dyn std::fmt::Display) {
        let message = error.to_string();
        self.view.send_modify(|view| view.error = Some(message));
    }

    fn clear_error(&self) {
        self.view.send_if_modified(|view| view.error.take().is_some());
    }
}

struct Driver {
    task: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

/// Keeps the countdown of one schedule target in sync with the server.
pub struct ScheduleEngine {
    inner: Arc<EngineInner>,
    settings: EngineSettings,
    driver: Option<Driver>,
}

impl ScheduleEngine {
    pub fn new(api: Arc<dyn ScheduleApi>, target: &str, settings: EngineSettings) -> Self {
        let (view, _) = watch::channel(ScheduleView::new(target));
        Self {
            inner: Arc::new(EngineInner {
                api,
                target: target.to_string(),
                view,
            }),
            settings,
            driver: None,
        }
    }

    pub fn from_config(
        config: &WatchConfig,
        credential: Option<SecretString>,
        target: &str,
    ) -> Result<Self, ApiError> {
        let api: Arc<dyn ScheduleApi> = Arc::new(HttpApiClient::from_config(config, credential)?);
        Ok(Self::new(api, target, EngineSettings::from_config(config)))
    }

    pub fn view(&self) -> ScheduleView {
        self.inner.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScheduleView> {
        self.inner.view.subscribe()
    }

    /// Loads the schedule and replaces the local countdown with the server's
    /// value. A missing schedule is `Ok(None)`, not an error.
    pub async fn load(&self) -> Result<Option<ScheduleDescriptor>, ScheduleError> {
        self.inner.resync().await
    }

    /// Validates and saves `descriptor`, then resyncs.
    pub async fn create_or_update(
        &self,
        descriptor: &ScheduleDescriptor,
    ) -> Result<ScheduleDescriptor, ScheduleError> {
        self.inner.clear_error();

        if let Err(e) = self.check_target(descriptor).and_then(|_| descriptor.validate()) {
            self.inner.record_error(&e);
            return Err(e);
        }

        let saved = match self.inner.api.save_schedule(descriptor).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Failed to save schedule for {}: {}", self.inner.target, e);
                self.inner.record_error(&e);
                return Err(e.into());
            }
        };
        info!("Saved {} schedule for {}", saved.schedule_type, self.inner.target);

        self.inner.apply(Some(saved.clone()));
        // The saved descriptor stays in place when the follow-up load fails.
        let _ = self.inner.resync().await;
        Ok(saved)
    }

    /// Deletes the schedule, then resyncs. Deleting a missing schedule succeeds.
    pub async fn delete(&self) -> Result<(), ScheduleError> {
        self.inner.clear_error();

        match self.inner.api.delete_schedule(&self.inner.target).await {
            Ok(()) => info!("Deleted schedule for {}", self.inner.target),
            Err(e) if e.is_not_found() => {
                debug!("Schedule for {} was already deleted", self.inner.target)
            }
            Err(e) => {
                warn!("Failed to delete schedule for {}: {}", self.inner.target, e);
                self.inner.record_error(&e);
                return Err(e.into());
            }
        }

        self.inner.apply(None);
        let _ = self.inner.resync().await;
        Ok(())
    }

    /// Starts a run now. Leaves the countdown alone; the next periodic resync
    /// picks up whatever the server reports.
    pub async fn trigger_now(&self) -> Result<TriggerAck, ScheduleError> {
        self.inner.clear_error();

        match self.inner.api.trigger_schedule(&self.inner.target).await {
            Ok(ack) => {
                info!("Triggered schedule for {}", self.inner.target);
                Ok(ack)
            }
            Err(e) => {
                warn!("Failed to trigger schedule for {}: {}", self.inner.target, e);
                self.inner.record_error(&e);
                Err(e.into())
            }
        }
    }

    /// Decrements the countdown by one second. Stops at zero and does nothing
    /// for a disabled or missing schedule.
    pub fn tick(&self) -> Option<u64> {
        self.inner.tick()
    }

    pub fn dismiss_error(&self) {
        self.inner.clear_error();
    }

    pub fn is_running(&self) -> bool {
        self.driver
            .as_ref()
            .is_some_and(|driver| !driver.task.is_finished())
    }

    /// Spawns the driver task: an immediate load, then a tick every
    /// `tick_interval` and a resync every `resync_interval`. A slow resync
    /// never delays a tick, and a resync due while one is in flight is
    /// skipped. No-op while running. Must be called from within a tokio
    /// runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let settings = self.settings;
        let span = tracing::info_span!("embedwatch.schedule", target = %self.inner.target);

        let task = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(settings.tick_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker.tick().await; // skip immediate first tick

                let mut resync = tokio::time::interval(settings.resync_interval);
                resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut in_flight: Option<BoxFuture<'static, ()>> = None;

                loop {
                    if flag.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = ticker.tick() => {
                            inner.tick();
                        }
                        _ = resync.tick() => {
                            if in_flight.is_some() {
                                debug!("Resync for {} still in flight, skipping", inner.target);
                                continue;
                            }
                            let inner = Arc::clone(&inner);
                            in_flight = Some(Box::pin(async move {
                                let _ = inner.resync().await;
                            }));
                        }
                        Some(()) = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                            in_flight = None;
                        }
                    }
                }
            }
            .instrument(span),
        );

        debug!("Countdown driver started for {}", self.inner.target);
        self.driver = Some(Driver { task, shutdown });
    }

    /// Stops the driver task. Idempotent.
    pub fn stop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.shutdown.store(true, Ordering::Release);
            driver.task.abort();
            debug!("Countdown driver stopped for {}", self.inner.target);
        }
    }

    fn check_target(&self, descriptor: &ScheduleDescriptor) -> Result<(), ScheduleError> {
        if descriptor.vector_db_name == self.inner.target {
            Ok(())
        } else {
            Err(ScheduleError::Invalid(format!(
                "schedule is for '{}', engine tracks '{}'",
                descriptor.vector_db_name, self.inner.target
            )))
        }
    }
}

impl Drop for ScheduleEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryApi {
        stored: Mutex<Option<ScheduleDescriptor>>,
        fail_get: AtomicBool,
        saves: Mutex<u32>,
    }

    impl MemoryApi {
        fn with(descriptor: ScheduleDescriptor) -> Arc<Self> {
            let api = Self::default();
            *api.stored.lock().unwrap() = Some(descriptor);
            Arc::new(api)
        }

        fn set_countdown(&self, secs: i64) {
            if let Some(d) = self.stored.lock().unwrap().as_mut() {
                d.countdown_seconds = Some(secs);
            }
        }
    }

    #[async_trait]
    impl ScheduleApi for MemoryApi {
        async fn get_schedule(&self, _target: &str) -> Result<Option<ScheduleDescriptor>, ApiError> {
            if self.fail_get.load(Ordering::SeqCst) {
                return Err(ApiError::Status {
                    status: 503,
                    body: "maintenance".to_string(),
                });
            }
            Ok(self.stored.lock().unwrap().clone())
        }

        async fn save_schedule(
            &self,
            descriptor: &ScheduleDescriptor,
        ) -> Result<ScheduleDescriptor, ApiError> {
            *self.saves.lock().unwrap() += 1;
            let mut saved = descriptor.clone();
            saved.countdown_seconds = Some(300);
            *self.stored.lock().unwrap() = Some(saved.clone());
            Ok(saved)
        }

        async fn delete_schedule(&self, target: &str) -> Result<(), ApiError> {
            match self.stored.lock().unwrap().take() {
                Some(_) => Ok(()),
                None => Err(ApiError::NotFound(target.to_string())),
            }
        }

        async fn trigger_schedule(&self, _target: &str) -> Result<TriggerAck, ApiError> {
            self.set_countdown(3600);
            Ok(TriggerAck::default())
        }
    }

    fn daily(countdown: i64) -> ScheduleDescriptor {
        let mut descriptor = ScheduleDescriptor::daily("docs", 2, 30);
        descriptor.countdown_seconds = Some(countdown);
        descriptor
    }

    fn engine(api: Arc<MemoryApi>) -> ScheduleEngine {
        ScheduleEngine::new(api, "docs", EngineSettings::default())
    }

    #[tokio::test]
    async fn test_load_uses_server_countdown() {
        let engine = engine(MemoryApi::with(daily(90)));
        engine.load().await.unwrap();

        let view = engine.view();
        assert!(view.loaded);
        assert_eq!(view.countdown_seconds, Some(90));
        assert_eq!(view.description().as_deref(), Some("Daily at 02:30"));
        assert_eq!(view.countdown_label().as_deref(), Some("in 1m 30s"));
    }

    #[tokio::test]
    async fn test_missing_schedule_is_not_an_error() {
        let engine = engine(Arc::new(MemoryApi::default()));
        assert!(engine.load().await.unwrap().is_none());

        let view = engine.view();
        assert!(view.loaded);
        assert!(!view.is_configured());
        assert!(view.countdown_seconds.is_none());
        assert!(view.error.is_none());
    }

    #[tokio::test]
    async fn test_tick_stops_at_zero() {
        let engine = engine(MemoryApi::with(daily(2)));
        engine.load().await.unwrap();

        assert_eq!(engine.tick(), Some(1));
        assert_eq!(engine.tick(), Some(0));
        assert_eq!(engine.tick(), Some(0));
        assert_eq!(engine.view().countdown_label().as_deref(), Some("due now"));
    }

    #[tokio::test]
    async fn test_tick_ignores_disabled_schedule() {
        let mut descriptor = daily(10);
        descriptor.enabled = false;
        let engine = engine(MemoryApi::with(descriptor));
        engine.load().await.unwrap();

        assert_eq!(engine.tick(), Some(10));
        assert!(engine.view().countdown_label().is_none());
    }

    #[tokio::test]
    async fn test_negative_server_countdown_is_due_now() {
        let engine = engine(MemoryApi::with(daily(-5)));
        engine.load().await.unwrap();
        assert_eq!(engine.view().countdown_seconds, Some(0));
    }

    #[tokio::test]
    async fn test_resync_overrides_local_countdown() {
        let api = MemoryApi::with(daily(100));
        let engine = engine(Arc::clone(&api));
        engine.load().await.unwrap();
        engine.tick();
        engine.tick();

        api.set_countdown(40);
        engine.load().await.unwrap();
        assert_eq!(engine.view().countdown_seconds, Some(40));
    }

    #[tokio::test]
    async fn test_failed_resync_keeps_descriptor() {
        let api = MemoryApi::with(daily(100));
        let engine = engine(Arc::clone(&api));
        engine.load().await.unwrap();

        api.fail_get.store(true, Ordering::SeqCst);
        assert!(engine.load().await.is_err());

        let view = engine.view();
        assert!(view.is_configured());
        assert_eq!(view.countdown_seconds, Some(100));
        assert!(view.error.as_deref().unwrap().contains("maintenance"));

        assert_eq!(engine.tick(), Some(99));
        engine.dismiss_error();
        assert!(engine.view().error.is_none());
    }

    #[tokio::test]
    async fn test_invalid_descriptor_is_not_sent() {
        let api = Arc::new(MemoryApi::default());
        let engine = engine(Arc::clone(&api));

        let result = engine
            .create_or_update(&ScheduleDescriptor::daily("docs", 24, 0))
            .await;
        assert!(matches!(result, Err(ScheduleError::Invalid(_))));
        assert_eq!(*api.saves.lock().unwrap(), 0);
        assert!(engine.view().error.is_some());
    }

    #[tokio::test]
    async fn test_descriptor_for_other_target_is_rejected() {
        let api = Arc::new(MemoryApi::default());
        let engine = engine(Arc::clone(&api));

        let result = engine
            .create_or_update(&ScheduleDescriptor::hourly("other", 5))
            .await;
        assert!(matches!(result, Err(ScheduleError::Invalid(_))));
        assert_eq!(*api.saves.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_applies_fresh_countdown() {
        let engine = engine(Arc::new(MemoryApi::default()));
        engine.load().await.unwrap();

        let saved = engine
            .create_or_update(&ScheduleDescriptor::interval("docs", 15))
            .await
            .unwrap();
        assert_eq!(saved.countdown_seconds, Some(300));

        let view = engine.view();
        assert_eq!(view.countdown_seconds, Some(300));
        assert_eq!(view.description().as_deref(), Some("Every 15 minutes"));
    }

    #[tokio::test]
    async fn test_delete_clears_view() {
        let engine = engine(MemoryApi::with(daily(100)));
        engine.load().await.unwrap();

        engine.delete().await.unwrap();
        let view = engine.view();
        assert!(!view.is_configured());
        assert!(view.countdown_seconds.is_none());

        // Deleting again is not an error.
        engine.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_leaves_countdown_alone() {
        let engine = engine(MemoryApi::with(daily(100)));
        engine.load().await.unwrap();

        engine.trigger_now().await.unwrap();
        assert_eq!(engine.view().countdown_seconds, Some(100));

        engine.load().await.unwrap();
        assert_eq!(engine.view().countdown_seconds, Some(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_ticks_and_resyncs() {
        let api = MemoryApi::with(daily(100));
        let mut engine = ScheduleEngine::new(
            Arc::clone(&api) as Arc<dyn ScheduleApi>,
            "docs",
            EngineSettings {
                tick_interval: Duration::from_secs(1),
                resync_interval: Duration::from_millis(10_500),
            },
        );
        engine.start();
        engine.start();
        assert!(engine.is_running());

        tokio::time::sleep(Duration::from_millis(3_250)).await;
        assert_eq!(engine.view().countdown_seconds, Some(97));

        api.set_countdown(500);
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(engine.view().countdown_seconds, Some(499));

        engine.stop();
        engine.stop();
        assert!(!engine.is_running());

        let frozen = engine.view().countdown_seconds;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(engine.view().countdown_seconds, frozen);
    }

    /// Server that answers the first fetch at once and hangs on later ones.
    struct StallingApi {
        gets: Mutex<u32>,
    }

    #[async_trait]
    impl ScheduleApi for StallingApi {
        async fn get_schedule(&self, _target: &str) -> Result<Option<ScheduleDescriptor>, ApiError> {
            let call = {
                let mut gets = self.gets.lock().unwrap();
                *gets += 1;
                *gets
            };
            if call == 1 {
                return Ok(Some(daily(1000)));
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(ApiError::Request("timed out".to_string()))
        }

        async fn save_schedule(
            &self,
            descriptor: &ScheduleDescriptor,
        ) -> Result<ScheduleDescriptor, ApiError> {
            Ok(descriptor.clone())
        }

        async fn delete_schedule(&self, _target: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn trigger_schedule(&self, _target: &str) -> Result<TriggerAck, ApiError> {
            Ok(TriggerAck::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_resync_does_not_stall_countdown() {
        let api = Arc::new(StallingApi { gets: Mutex::new(0) });
        let mut engine = ScheduleEngine::new(
            Arc::clone(&api) as Arc<dyn ScheduleApi>,
            "docs",
            EngineSettings {
                tick_interval: Duration::from_secs(1),
                resync_interval: Duration::from_secs(25),
            },
        );
        engine.load().await.unwrap();
        engine.start();

        tokio::time::sleep(Duration::from_millis(40_500)).await;
        let view = engine.view();
        assert_eq!(view.countdown_seconds, Some(960));
        assert!(view.error.as_deref().unwrap().contains("timed out"));
        // The resync due at 25s overlapped the one still running.
        assert_eq!(*api.gets.lock().unwrap(), 2);

        engine.stop();
    }
}

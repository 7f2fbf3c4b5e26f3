//! Drives one catalog sync from the client side: open the progress channel,
//! trigger the job, follow ticks until a terminal status, then go back to idle.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use utils::progress::{ProgressEvent, SyncKind, SyncStatus};

use crate::{
    api::{ApiClient, ApiClientError},
    channel::{self, ProgressStream},
};

/// Server calls the controller depends on
#[async_trait]
pub trait SyncApi: Send + Sync {
    async fn open_progress_channel(&self) -> Result<ProgressStream, ApiClientError>;

    async fn trigger_sync(&self, kind: SyncKind) -> Result<(), ApiClientError>;
}

#[async_trait]
impl SyncApi for ApiClient {
    async fn open_progress_channel(&self) -> Result<ProgressStream, ApiClientError> {
        channel::open(self.http(), self.progress_channel_url()?).await
    }

    async fn trigger_sync(&self, kind: SyncKind) -> Result<(), ApiClientError> {
        let run = ApiClient::trigger_sync(self, kind).await?;
        debug!(run_id = %run.id, "Sync run accepted");
        Ok(())
    }
}

/// Where terminal results are surfaced to the user
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);

    fn failure(&self, message: &str);
}

/// What a progress display renders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncView {
    pub running: bool,
    pub kind: Option<SyncKind>,
    pub percent: f64,
    pub message: Option<String>,
    pub status: Option<SyncStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(String),
    Failed(String),
    /// Another sync was already running on this controller; nothing was done
    AlreadyRunning,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncController<A, N> {
    api: A,
    notifier: N,
    busy: AtomicBool,
    view: watch::Sender<SyncView>,
}

impl<A: SyncApi, N: Notifier> SyncController<A, N> {
    pub fn new(api: A, notifier: N) -> Self {
        let (view, _) = watch::channel(SyncView::default());
        Self {
            api,
            notifier,
            busy: AtomicBool::new(false),
            view,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> SyncView {
        self.view.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Run one sync to its end. A call made while another is in flight returns
    /// `AlreadyRunning` without opening a channel or triggering anything.
    /// Dropping the returned future closes the channel; the server job keeps going.
    pub async fn start_sync(&self, kind: SyncKind) -> SyncOutcome {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(kind = %kind, "Sync already running, ignoring start");
            return SyncOutcome::AlreadyRunning;
        }
        let _busy = BusyGuard(&self.busy);

        let outcome = self.run(kind).await;
        match &outcome {
            SyncOutcome::Completed(message) => {
                info!(kind = %kind, "{}", message);
                self.notifier.success(message);
            }
            SyncOutcome::Failed(message) => {
                warn!(kind = %kind, "{}", message);
                self.notifier.failure(message);
            }
            SyncOutcome::AlreadyRunning => {}
        }

        self.view.send_modify(|view| view.running = false);
        outcome
    }

    async fn run(&self, kind: SyncKind) -> SyncOutcome {
        let mut channel = match self.api.open_progress_channel().await {
            Ok(channel) => channel,
            Err(e) => return SyncOutcome::Failed(format!("Could not open progress channel: {e}")),
        };

        if let Err(e) = self.api.trigger_sync(kind).await {
            drop(channel);
            return SyncOutcome::Failed(format!("Could not start {kind} sync: {e}"));
        }

        self.view.send_replace(SyncView {
            running: true,
            kind: Some(kind),
            percent: 0.0,
            message: None,
            status: Some(SyncStatus::Running),
        });

        while let Some(item) = channel.next().await {
            match item {
                Ok(event) => {
                    self.apply(&event);
                    if event.is_terminal() {
                        return terminal_outcome(event);
                    }
                }
                Err(e) if !e.is_hard() => warn!("Ignoring progress frame: {}", e),
                Err(e) => return SyncOutcome::Failed(format!("Connection lost: {e}")),
            }
        }

        SyncOutcome::Failed("Connection lost before the sync finished".to_string())
    }

    fn apply(&self, event: &ProgressEvent) {
        self.view.send_modify(|view| {
            if let Some(percent) = event.percent {
                view.percent = percent.clamp(0.0, 100.0);
            }
            if event.status == SyncStatus::Completed {
                view.percent = 100.0;
            }
            if let Some(message) = &event.message {
                view.message = Some(message.clone());
            }
            view.status = Some(event.status);
        });
    }
}

fn terminal_outcome(event: ProgressEvent) -> SyncOutcome {
    match event.status {
        SyncStatus::Completed => {
            SyncOutcome::Completed(event.message.unwrap_or_else(|| "Sync completed".to_string()))
        }
        _ => SyncOutcome::Failed(event.message.unwrap_or_else(|| "Sync failed".to_string())),
    }
}

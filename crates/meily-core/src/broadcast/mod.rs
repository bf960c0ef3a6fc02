//! Rate-limited fan-out of one admin message to a whole audience.
//!
//! A fixed pool of workers pulls recipients off a shared cursor. Every send first takes a
//! slot from the shared [`RateLimiter`]; the pool size is the concurrency cap. Workers only
//! touch atomic counters and a tick channel. One reporter task owns the standing status
//! message and performs every edit, so edits never race.

pub mod limiter;

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use chrono::{DateTime, Local};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    conversation::event::{EventKind, Media},
    domain::{ChatId, MessageRef, UserId},
    errors::Error,
    formatting::percent,
    messaging::{
        port::MessagingPort,
        types::{Content, OutgoingMessage},
    },
    state::Audience,
    texts, Result,
};

pub use limiter::RateLimiter;

#[derive(Clone, Copy, Debug)]
pub struct BroadcastSettings {
    pub rate_per_sec: u32,
    pub burst: u32,
    pub concurrency: usize,
    pub progress_every: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            rate_per_sec: 29,
            burst: 1,
            concurrency: 10,
            progress_every: 10,
        }
    }
}

impl BroadcastSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            rate_per_sec: cfg.broadcast_rate_per_sec,
            burst: 1,
            concurrency: cfg.broadcast_concurrency,
            progress_every: cfg.broadcast_progress_every,
        }
    }
}

/// What gets fanned out.
#[derive(Clone, Debug, PartialEq)]
pub enum BroadcastPayload {
    Text(String),
    Photo { file_id: String, caption: Option<String> },
    Video { file_id: String, caption: Option<String> },
    Document { file_id: String, caption: Option<String> },
    VideoNote { file_id: String },
    Audio { file_id: String, caption: Option<String> },
    /// A message kind the messenger cannot re-send (location, contact, sticker, ...).
    Unsupported { kind: String },
}

impl BroadcastPayload {
    pub fn from_event(kind: &EventKind) -> Self {
        match kind {
            EventKind::Text(text) => BroadcastPayload::Text(text.clone()),
            EventKind::Command { name, args } => {
                let raw = format!("/{name} {args}");
                BroadcastPayload::Text(raw.trim_end().to_string())
            }
            EventKind::Document(doc) => BroadcastPayload::Document {
                file_id: doc.file_id.clone(),
                caption: doc.caption.clone(),
            },
            EventKind::Media(Media::Photo { file_id, caption }) => BroadcastPayload::Photo {
                file_id: file_id.clone(),
                caption: caption.clone(),
            },
            EventKind::Media(Media::Video { file_id, caption }) => BroadcastPayload::Video {
                file_id: file_id.clone(),
                caption: caption.clone(),
            },
            EventKind::Media(Media::VideoNote { file_id }) => BroadcastPayload::VideoNote {
                file_id: file_id.clone(),
            },
            EventKind::Media(Media::Audio { file_id, caption }) => BroadcastPayload::Audio {
                file_id: file_id.clone(),
                caption: caption.clone(),
            },
            other => BroadcastPayload::Unsupported {
                kind: other.name().to_string(),
            },
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            BroadcastPayload::Text(_) => "text",
            BroadcastPayload::Photo { .. } => "photo",
            BroadcastPayload::Video { .. } => "video",
            BroadcastPayload::Document { .. } => "document",
            BroadcastPayload::VideoNote { .. } => "video_note",
            BroadcastPayload::Audio { .. } => "audio",
            BroadcastPayload::Unsupported { kind } => kind,
        }
    }

    fn to_message(&self) -> Option<OutgoingMessage> {
        let content = match self.clone() {
            BroadcastPayload::Text(text) => Content::Text(text),
            BroadcastPayload::Photo { file_id, caption } => Content::Photo { file_id, caption },
            BroadcastPayload::Video { file_id, caption } => Content::Video { file_id, caption },
            BroadcastPayload::Document { file_id, caption } => {
                Content::Document { file_id, caption }
            }
            BroadcastPayload::VideoNote { file_id } => Content::VideoNote { file_id },
            BroadcastPayload::Audio { file_id, caption } => Content::Audio { file_id, caption },
            BroadcastPayload::Unsupported { .. } => return None,
        };
        Some(OutgoingMessage::new(content))
    }
}

#[derive(Clone, Debug)]
pub struct BroadcastJob {
    pub audience: Audience,
    pub recipients: Vec<UserId>,
    pub payload: BroadcastPayload,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl ProgressSnapshot {
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }

    pub fn percent(&self) -> f64 {
        percent(self.completed(), self.total)
    }
}

#[derive(Clone, Debug)]
pub struct BroadcastSummary {
    pub audience: Audience,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Stopped before every recipient was attempted.
    pub cancelled: bool,
    pub finished_at: DateTime<Local>,
    /// Snapshots the reporter actually edited into the status message, in order.
    pub progress: Vec<ProgressSnapshot>,
}

impl BroadcastSummary {
    pub fn success_rate(&self) -> f64 {
        percent(self.succeeded, self.total)
    }
}

#[derive(Clone, Debug)]
pub enum BroadcastOutcome {
    NoRecipients,
    Completed(BroadcastSummary),
}

#[derive(Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self, total: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            total,
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

enum Report {
    Progress,
    Finished(String),
}

struct Dispatch {
    recipients: Vec<UserId>,
    message: Option<OutgoingMessage>,
    payload_kind: String,
    next: AtomicUsize,
    counters: Arc<Counters>,
    limiter: Arc<RateLimiter>,
    messenger: Arc<dyn MessagingPort>,
    cancel: CancellationToken,
    progress_every: usize,
}

pub struct BroadcastEngine {
    messenger: Arc<dyn MessagingPort>,
    limiter: Arc<RateLimiter>,
    settings: BroadcastSettings,
}

impl BroadcastEngine {
    pub fn new(messenger: Arc<dyn MessagingPort>, settings: BroadcastSettings) -> Self {
        Self {
            messenger,
            limiter: Arc::new(RateLimiter::new(settings.rate_per_sec, settings.burst)),
            settings,
        }
    }

    /// Deliver `job` and report progress to `report_to`.
    ///
    /// Errors only when the standing status message cannot be created; per-recipient
    /// failures are counted, never returned.
    pub async fn run(
        &self,
        report_to: ChatId,
        job: BroadcastJob,
        cancel: &CancellationToken,
    ) -> Result<BroadcastOutcome> {
        let total = job.recipients.len() as u64;
        if total == 0 {
            if let Err(e) = self
                .messenger
                .send(report_to, OutgoingMessage::text(texts::NO_RECIPIENTS))
                .await
            {
                warn!(chat_id = report_to.0, error = %e, "failed to report empty audience");
            }
            return Ok(BroadcastOutcome::NoRecipients);
        }

        let status = self
            .messenger
            .send(
                report_to,
                OutgoingMessage::text(texts::broadcast_started(total)),
            )
            .await?;

        info!(
            audience = job.audience.as_str(),
            total,
            kind = job.payload.kind(),
            "broadcast started"
        );

        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = tokio::spawn(report_progress(
            self.messenger.clone(),
            status,
            total,
            counters.clone(),
            rx,
        ));

        let dispatch = Arc::new(Dispatch {
            message: job.payload.to_message(),
            payload_kind: job.payload.kind().to_string(),
            recipients: job.recipients,
            next: AtomicUsize::new(0),
            counters: counters.clone(),
            limiter: self.limiter.clone(),
            messenger: self.messenger.clone(),
            cancel: cancel.clone(),
            progress_every: self.settings.progress_every.max(1),
        });

        let workers = self.settings.concurrency.max(1).min(dispatch.recipients.len());
        let mut set = JoinSet::new();
        for _ in 0..workers {
            set.spawn(run_worker(dispatch.clone(), tx.clone()));
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "broadcast worker aborted");
            }
        }

        let last = counters.snapshot(total);
        let mut summary = BroadcastSummary {
            audience: job.audience,
            total,
            succeeded: last.succeeded,
            failed: last.failed,
            cancelled: last.completed() < total,
            finished_at: Local::now(),
            progress: Vec::new(),
        };

        let _ = tx.send(Report::Finished(texts::broadcast_summary(&summary)));
        drop(tx);
        summary.progress = match reporter.await {
            Ok(history) => history,
            Err(e) => {
                error!(error = %e, "broadcast reporter aborted");
                Vec::new()
            }
        };

        info!(
            audience = summary.audience.as_str(),
            total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            success_rate = summary.success_rate(),
            "broadcast finished"
        );

        Ok(BroadcastOutcome::Completed(summary))
    }
}

async fn run_worker(ctx: Arc<Dispatch>, ticks: mpsc::UnboundedSender<Report>) {
    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let idx = ctx.next.fetch_add(1, Ordering::SeqCst);
        let Some(&recipient) = ctx.recipients.get(idx) else {
            break;
        };

        let result = match &ctx.message {
            Some(msg) => match ctx.limiter.acquire(&ctx.cancel).await {
                Ok(()) => ctx
                    .messenger
                    .send(ChatId::from(recipient), msg.clone())
                    .await
                    .map(|_| ()),
                // Cancelled while waiting for a slot: this recipient was never attempted.
                Err(_) => break,
            },
            None => Err(Error::Validation(format!(
                "unsupported broadcast payload: {}",
                ctx.payload_kind
            ))),
        };

        match result {
            Ok(()) => {
                ctx.counters.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                ctx.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(recipient = recipient.0, error = %e, "broadcast send failed");
            }
        }

        if (idx + 1) % ctx.progress_every == 0 {
            let _ = ticks.send(Report::Progress);
        }
    }
}

async fn report_progress(
    messenger: Arc<dyn MessagingPort>,
    status: MessageRef,
    total: u64,
    counters: Arc<Counters>,
    mut rx: mpsc::UnboundedReceiver<Report>,
) -> Vec<ProgressSnapshot> {
    let mut history = Vec::new();
    let mut last_completed = 0;

    while let Some(mut report) = rx.recv().await {
        // Collapse a backlog of ticks into a single edit.
        while matches!(report, Report::Progress) {
            match rx.try_recv() {
                Ok(next) => report = next,
                Err(_) => break,
            }
        }

        match report {
            Report::Progress => {
                let snap = counters.snapshot(total);
                if snap.completed() <= last_completed {
                    continue;
                }
                if let Err(e) = messenger
                    .edit_text(status, &texts::broadcast_progress(&snap))
                    .await
                {
                    warn!(chat_id = status.chat_id.0, error = %e, "failed to edit broadcast progress");
                }
                last_completed = snap.completed();
                history.push(snap);
            }
            Report::Finished(text) => {
                if let Err(e) = messenger.edit_text(status, &text).await {
                    warn!(chat_id = status.chat_id.0, error = %e, "failed to edit broadcast summary");
                }
                break;
            }
        }
    }

    history
}

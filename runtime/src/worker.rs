//! Asynchronous, concurrency-limited front-end to [`Commands`].
//!
//! A [`Worker`] accepts events into a bounded intake queue and resolves each of
//! them with [`Commands::handle`] on its own cancellable child context. Every
//! terminal event, success or failure, is passed to the sink.
//!
//! ```text
//!  Worker::handle ──► intake (bounded) ──► supervisor ──spawn──► Commands::handle ──► sink
//!  reconfigure / shutdown ──► control ──┘       ▲
//!  ctx cancelled ───────────────────────────────┘
//! ```
//!
//! When its context is cancelled or it is shut down, the supervisor closes the
//! intake, waits for in-flight calls and marks the worker stopped.
//!
//! # Example
//!
//! ```
//! use mediator_core::prelude::*;
//! use mediator_runtime::commands::Commands;
//! use mediator_runtime::config::WorkerConfig;
//! use mediator_runtime::worker::Worker;
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), DispatchError> {
//! let commands = Commands::new(vec![handler_fn("ping", |_ctx, _payload| async move {
//!     Ok::<(), DispatchError>(())
//! })])?;
//!
//! let (results, mut received) = mpsc::unbounded_channel();
//! let worker = Worker::new(
//!     &Context::background(),
//!     move |_worker: &Worker, event: Event| {
//!         let _ = results.send(event);
//!     },
//!     commands,
//!     WorkerConfig::default().with_limit(4),
//! );
//!
//! worker.handle(Event::named("ping")).await?;
//! let result = received.recv().await;
//! assert!(result.is_some_and(|event| event.err().is_none()));
//!
//! worker.shutdown();
//! worker.stopped().await;
//! assert!(!worker.is_running());
//! # Ok(())
//! # }
//! ```

use crate::commands::Commands;
use crate::config::{WorkerConfig, clamp_limit};
use crate::metrics::WorkerMetrics;
use mediator_core::context::Context;
use mediator_core::error::DispatchError;
use mediator_core::event::Event;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::JoinSet;

/// Receiver of every terminal event produced by a worker.
pub type Sink = Arc<dyn Fn(&Worker, Event) + Send + Sync>;

/// Messages consumed by the supervising task alongside cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Reconfigure(usize),
    Shutdown,
}

/// Lifecycle of the supervising task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Draining,
    Stopped,
}

/// Handle to a running worker. Cheap to clone.
///
/// The worker stops when its context is cancelled, when [`Worker::shutdown`]
/// is called, or when every handle has been dropped.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<Shared>,
}

struct Shared {
    intake: mpsc::Sender<Event>,
    control: mpsc::UnboundedSender<Control>,
    state: Arc<watch::Sender<State>>,
}

impl Worker {
    /// Start a worker bound to `ctx`.
    ///
    /// `config.limit` bounds both the intake queue and the number of calls in
    /// flight. Must be called from within a tokio runtime.
    pub fn new<F>(ctx: &Context, sink: F, commands: Commands, config: WorkerConfig) -> Self
    where
        F: Fn(&Self, Event) + Send + Sync + 'static,
    {
        let limit = clamp_limit(config.limit);
        let (intake, intake_rx) = mpsc::channel(limit);
        let (control, control_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(State::Running);
        let state = Arc::new(state);

        let inner = Arc::new(Shared {
            intake,
            control,
            state: Arc::clone(&state),
        });

        let supervisor = Supervisor {
            ctx: ctx.with_cancel(),
            worker: Arc::downgrade(&inner),
            sink: Arc::new(sink),
            commands,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            tasks: JoinSet::new(),
            state,
        };
        tokio::spawn(supervisor.run(intake_rx, control_rx));
        tracing::debug!(limit, "Worker started");

        Self { inner }
    }

    /// Enqueue `event` for processing.
    ///
    /// Waits while the intake queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::WorkerStopped`] if the worker is stopped or
    /// stops before the event is accepted.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type()), name = "worker_handle")]
    pub async fn handle(&self, event: Event) -> Result<(), DispatchError> {
        if !self.is_running() {
            WorkerMetrics::record_rejected();
            return Err(DispatchError::WorkerStopped);
        }

        if self.inner.intake.send(event).await.is_err() {
            tracing::debug!("Worker stopped, event rejected");
            WorkerMetrics::record_rejected();
            return Err(DispatchError::WorkerStopped);
        }

        WorkerMetrics::record_accepted();
        Ok(())
    }

    /// Whether the worker still accepts events.
    ///
    /// Turns `false` as soon as the worker starts stopping, before in-flight
    /// calls have finished; await [`Worker::stopped`] for those.
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.inner.state.borrow() == State::Running
    }

    /// Resolves once the worker has stopped and every in-flight call finished.
    pub async fn stopped(&self) {
        let mut state = self.inner.state.subscribe();
        // sender is owned by `self.inner`
        let _ = state.wait_for(|state| *state == State::Stopped).await;
    }

    /// Change the number of calls allowed in flight. Zero is raised to 1.
    ///
    /// Idle capacity above a lowered limit is withdrawn at once; capacity
    /// held by running calls is withdrawn as they finish. The intake queue
    /// keeps its original capacity.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::WorkerStopped`] if the worker has stopped.
    pub fn reconfigure(&self, limit: usize) -> Result<(), DispatchError> {
        self.inner
            .control
            .send(Control::Reconfigure(limit))
            .map_err(|_| DispatchError::WorkerStopped)
    }

    /// Stop accepting events; in-flight calls run to completion.
    pub fn shutdown(&self) {
        if self.inner.control.send(Control::Shutdown).is_err() {
            tracing::trace!("Worker already stopped");
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Decrements the in-flight gauge when a call finishes, even by panic.
struct InFlightGuard;

impl InFlightGuard {
    fn start() -> Self {
        WorkerMetrics::record_started();
        Self
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        WorkerMetrics::record_finished();
    }
}

struct Supervisor {
    ctx: Context,
    worker: Weak<Shared>,
    sink: Sink,
    commands: Commands,
    permits: Arc<Semaphore>,
    limit: usize,
    tasks: JoinSet<()>,
    state: Arc<watch::Sender<State>>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut intake: mpsc::Receiver<Event>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) {
        let ctx = self.ctx.clone();
        let mut cancelled = ctx.cancelled();
        let mut waiting: Option<Event> = None;

        loop {
            tokio::select! {
                biased;
                reason = &mut cancelled => {
                    tracing::debug!(reason = %reason, "Worker context done");
                    break;
                },
                command = control.recv() => match command {
                    Some(Control::Reconfigure(limit)) => self.resize(limit),
                    Some(Control::Shutdown) | None => {
                        tracing::debug!("Worker shutdown requested");
                        break;
                    },
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(err) = joined {
                        tracing::error!(error = %err, "Worker call task failed");
                    }
                },
                permit = Arc::clone(&self.permits).acquire_owned(), if waiting.is_some() => {
                    match (permit, waiting.take()) {
                        (Ok(permit), Some(event)) => self.spawn_call(permit, event),
                        _ => break,
                    }
                },
                received = intake.recv(), if waiting.is_none() => match received {
                    Some(event) => waiting = Some(event),
                    None => break,
                },
            }
        }

        self.stop(intake, waiting).await;
    }

    fn spawn_call(&mut self, permit: OwnedSemaphorePermit, event: Event) {
        let call_ctx = self.ctx.with_cancel();
        let commands = self.commands.clone();
        let sink = Arc::clone(&self.sink);
        let worker = Weak::clone(&self.worker);

        self.tasks.spawn(async move {
            let _permit = permit;
            let _in_flight = InFlightGuard::start();

            let result = commands.handle(&call_ctx, event).await;
            call_ctx.cancel();

            match worker.upgrade() {
                Some(inner) => sink(&Worker { inner }, result),
                None => tracing::debug!(
                    event_type = %result.event_type(),
                    "Worker dropped, result discarded"
                ),
            }
        });
    }

    fn resize(&mut self, requested: usize) {
        let requested = clamp_limit(requested);
        if requested > self.limit {
            self.permits.add_permits(requested - self.limit);
        } else if requested < self.limit {
            let surplus = self.limit - requested;
            let idle = self.permits.forget_permits(surplus);
            // the rest is held by running calls
            let held = u32::try_from(surplus - idle).unwrap_or(u32::MAX);
            if held > 0 {
                let permits = Arc::clone(&self.permits);
                tokio::spawn(async move {
                    if let Ok(retired) = permits.acquire_many_owned(held).await {
                        retired.forget();
                    }
                });
            }
        }
        tracing::debug!(from = self.limit, to = requested, "Worker limit changed");
        self.limit = requested;
    }

    async fn stop(mut self, mut intake: mpsc::Receiver<Event>, waiting: Option<Event>) {
        self.state.send_replace(State::Draining);
        intake.close();
        let mut discarded = usize::from(waiting.is_some());
        while intake.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::warn!(discarded, "Worker stopped with queued events, discarding them");
        }

        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "Worker call task failed");
            }
        }

        self.permits.close();
        self.ctx.cancel();
        self.state.send_replace(State::Stopped);
        tracing::debug!("Worker stopped");
    }
}

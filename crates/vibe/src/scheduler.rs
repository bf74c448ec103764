//! Delays, animations and fades on the element's run-queue
//!
//! Every timed operation becomes one or more [`RunQueue`] entries, so chained
//! calls on one element run strictly one after another:
//!
//! ```ignore
//! card.fade_in(Duration::from_millis(300))
//!     .wait(Duration::from_secs(2))
//!     .fade_out(Duration::from_millis(300));
//! ```
//!
//! A multi-iteration `delay` pushes all of its iterations up front as one
//! batch sharing a step counter; [`DelayStep::kill`] splices out the
//! iterations that have not run yet.
//!
//! Waiting happens on a frame clock (`tokio::time::interval` at the
//! configured frame rate). Ticks are deadline based, so the clock does not
//! drift, and a wait ends on the first frame at or after its deadline.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::handle::Handle;
use crate::queue::{BatchId, Completion, RunQueue, Task};

/// How long each iteration of a delay waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// Wall-clock length of one iteration
    Duration(Duration),
    /// Iterations per second
    FrameRate(u32),
}

impl Timing {
    fn length(self) -> Duration {
        match self {
            Timing::Duration(length) => length,
            Timing::FrameRate(fps) => Duration::from_secs(1) / fps.max(1),
        }
    }
}

pub type DelayFn = Arc<dyn Fn(&Handle, &DelayStep) + Send + Sync>;

/// Wrap a closure as a [`DelayFn`]
pub fn delay_fn(f: impl Fn(&Handle, &DelayStep) + Send + Sync + 'static) -> DelayFn {
    Arc::new(f)
}

/// Passed to delay callbacks
#[derive(Debug, Clone)]
pub struct DelayStep {
    /// 1-based
    pub step: u32,
    pub total: u32,
    queue: RunQueue,
    batch: BatchId,
}

impl DelayStep {
    pub fn is_last(&self) -> bool {
        self.step >= self.total
    }

    pub fn batch(&self) -> BatchId {
        self.batch
    }

    /// Drop the remaining iterations of this delay
    pub fn kill(&self) -> usize {
        self.queue.kill(self.batch)
    }
}

/// Sleep on the frame clock until `length` has passed
pub async fn wait_frames(frame: Duration, length: Duration) {
    let deadline = Instant::now() + length;
    let mut clock = tokio::time::interval(frame.max(Duration::from_millis(1)));
    clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        clock.tick().await;
        if Instant::now() >= deadline {
            break;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Fade {
    In,
    Out,
}

impl Handle {
    fn run_queue(&self) -> RunQueue {
        self.vibe.with_element(self.node, |el| el.queue.clone())
    }

    /// Queue `iterations` waits of `timing`, calling `callback` after each.
    ///
    /// A missing callback still completes every iteration. Returns the batch
    /// id for [`kill`](Self::kill).
    pub fn delay(&self, timing: Timing, iterations: u32, callback: Option<DelayFn>) -> BatchId {
        let queue = self.run_queue();
        let batch = queue.new_batch();
        let total = iterations.max(1);
        let counter = Arc::new(AtomicU32::new(0));
        let frame = self.vibe.config().frame_period();
        let runtime = tokio::runtime::Handle::try_current().ok();

        let tasks: Vec<Task> = (0..total)
            .map(|_| {
                let handle = self.clone();
                let callback = callback.clone();
                let counter = counter.clone();
                let queue = queue.clone();
                let runtime = runtime.clone();
                Box::new(move |done: Completion| {
                    let fire = move |done: Completion| {
                        if done.is_stale() {
                            return;
                        }
                        let step = DelayStep {
                            step: counter.fetch_add(1, Ordering::SeqCst) + 1,
                            total,
                            queue,
                            batch,
                        };
                        if let Some(callback) = callback {
                            callback(&handle, &step);
                        }
                        done.done();
                    };
                    match runtime {
                        Some(runtime) => {
                            runtime.spawn(async move {
                                wait_frames(frame, timing.length()).await;
                                fire(done);
                            });
                        }
                        None => fire(done),
                    }
                }) as Task
            })
            .collect();

        tracing::debug!("node {} delay {:?} x{} queued as {:?}", self.node, timing, total, batch);
        queue.push_in_batch(batch, tasks);
        batch
    }

    /// Hold the queue for `length`
    pub fn wait(&self, length: Duration) -> &Self {
        self.delay(Timing::Duration(length), 1, None);
        self
    }

    /// Call `on_frame` `frames` times at `fps`
    pub fn animate(
        &self,
        fps: u32,
        frames: u32,
        on_frame: impl Fn(&Handle, &DelayStep) + Send + Sync + 'static,
    ) -> BatchId {
        self.delay(Timing::FrameRate(fps), frames, Some(delay_fn(on_frame)))
    }

    /// Drop the pending iterations of `batch` and move the queue on
    pub fn kill(&self, batch: BatchId) -> usize {
        self.run_queue().kill(batch)
    }

    /// Run `f` when everything queued before it has finished
    pub fn queue(&self, f: impl FnOnce(&Handle) + Send + 'static) -> &Self {
        let handle = self.clone();
        self.run_queue().push(Box::new(move |done| {
            f(&handle);
            done.done();
        }));
        self
    }

    /// Queue an operation that finishes on its own schedule by completing
    /// (or dropping) the [`Completion`]
    pub fn enqueue(&self, f: impl FnOnce(&Handle, Completion) + Send + 'static) -> &Self {
        let handle = self.clone();
        self.run_queue().push(Box::new(move |done| f(&handle, done)));
        self
    }

    pub fn queue_len(&self) -> usize {
        self.run_queue().len()
    }

    pub fn is_busy(&self) -> bool {
        self.run_queue().is_running()
    }

    pub fn fade_in(&self, length: Duration) -> &Self {
        self.fade(Fade::In, length)
    }

    /// Fade to transparent, then hide
    pub fn fade_out(&self, length: Duration) -> &Self {
        self.fade(Fade::Out, length)
    }

    fn fade(&self, fade: Fade, length: Duration) -> &Self {
        let frame = self.vibe.config().frame_period();
        let frames = (length.as_nanos() / frame.as_nanos().max(1)).max(1) as u32;
        let runtime = tokio::runtime::Handle::try_current().ok();

        self.enqueue(move |handle, done| {
            let handle = handle.clone();
            if let Fade::In = fade {
                if let Err(err) = handle.set_style("display", "").and_then(|h| h.set_style("opacity", "0")) {
                    tracing::warn!("fade in on node {} failed: {}", handle.node, err);
                    return;
                }
            }

            let Some(runtime) = runtime else {
                finish_fade(&handle, fade);
                done.done();
                return;
            };
            runtime.spawn(async move {
                let mut clock = tokio::time::interval(frame);
                clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
                clock.tick().await;
                for k in 1..frames {
                    clock.tick().await;
                    if done.is_stale() {
                        return;
                    }
                    let progress = k as f64 / frames as f64;
                    let opacity = match fade {
                        Fade::In => progress,
                        Fade::Out => 1.0 - progress,
                    };
                    if handle.set_style("opacity", &format!("{opacity:.3}")).is_err() {
                        break;
                    }
                }
                clock.tick().await;
                if !done.is_stale() {
                    finish_fade(&handle, fade);
                }
                done.done();
            });
        })
    }
}

fn finish_fade(handle: &Handle, fade: Fade) {
    let result = match fade {
        Fade::In => handle.set_style("opacity", "1").map(|_| ()),
        Fade::Out => handle
            .set_style("opacity", "0")
            .and_then(|h| h.set_style("display", "none"))
            .map(|_| ()),
    };
    if let Err(err) = result {
        tracing::warn!("fade on node {} failed: {}", handle.node, err);
    }
}

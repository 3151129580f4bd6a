use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::error::{CanvasError, CanvasResult};
use crate::input::Image;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    StopRequested,
}

struct AnimationTask<S> {
    cancel: Sender<()>,
    handle: JoinHandle<S>,
}

/// Owns the background thread that plays an animated image
///
/// The render state `S` is moved into the thread on `start` and handed back by
/// `stop`, so the thread is the only one touching it while frames play.
pub struct AnimationScheduler<S> {
    task: Option<AnimationTask<S>>,
    stop_requested: bool,
}

impl<S: Send + 'static> Default for AnimationScheduler<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + 'static> AnimationScheduler<S> {
    pub fn new() -> Self {
        Self {
            task: None,
            stop_requested: false,
        }
    }

    pub fn state(&self) -> SchedulerState {
        match (&self.task, self.stop_requested) {
            (None, _) => SchedulerState::Idle,
            (Some(_), false) => SchedulerState::Running,
            (Some(_), true) => SchedulerState::StopRequested,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Spawn the playback loop
    ///
    /// Each iteration renders the current frame, reads that frame's delay,
    /// advances the image and then waits out the delay unless cancelled.
    /// Render errors skip the frame; the loop keeps going.
    pub fn start<F>(&mut self, mut state: S, image: Arc<dyn Image>, mut render: F) -> CanvasResult<()>
    where
        F: FnMut(&mut S, &dyn Image) -> CanvasResult<()> + Send + 'static,
    {
        if self.task.is_some() {
            return Err(CanvasError::AnimationRunning);
        }

        let (cancel, cancelled) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("ttysixel-animation".to_string())
            .spawn(move || {
                run_loop(&mut state, image.as_ref(), &mut render, &cancelled);
                state
            })
            .map_err(|e| CanvasError::resource(format!("failed to spawn animation thread: {}", e)))?;

        info!("animation started");
        self.task = Some(AnimationTask { cancel, handle });
        self.stop_requested = false;
        Ok(())
    }

    /// Cancel the loop and wait for the thread to exit
    ///
    /// Returns the render state, or `None` when nothing was running. A render
    /// that panics ends the loop early but its state still comes back here.
    pub fn stop(&mut self) -> Option<S> {
        let task = self.task.take()?;
        self.stop_requested = true;

        // A send error only means the thread is already gone
        let _ = task.cancel.send(());
        let result = task.handle.join();
        self.stop_requested = false;

        match result {
            Ok(state) => {
                info!("animation stopped");
                Some(state)
            }
            Err(_) => {
                error!("animation thread panicked, render state lost");
                None
            }
        }
    }
}

impl<S> Drop for AnimationScheduler<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.cancel.send(());
            let _ = task.handle.join();
        }
    }
}

fn run_loop<S, F>(state: &mut S, image: &dyn Image, render: &mut F, cancelled: &Receiver<()>)
where
    F: FnMut(&mut S, &dyn Image) -> CanvasResult<()>,
{
    loop {
        match cancelled.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => break,
        }

        // A panicking render ends playback but must not take the state down with it
        match panic::catch_unwind(AssertUnwindSafe(|| render(state, image))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("skipping animation frame: {}", e),
            Err(payload) => {
                error!(
                    "animation frame panicked, stopping playback: {}",
                    panic_message(&*payload)
                );
                break;
            }
        }

        let delay = image.frame_delay();
        image.next_frame();

        match cancelled.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("animation loop exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

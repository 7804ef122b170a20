use crate::session::UiEvent;
use crate::transcript::TranscriptState;
use log::debug;
use std::collections::VecDeque;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{ broadcast, mpsc, watch };
use tokio::task::JoinHandle;
use tokio::time::{ interval_at, Instant, MissedTickBehavior };

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnimatorPhase {
    /// Queue empty, timer stopped.
    Idle,
    /// Timer running, one word per tick.
    Draining,
    /// Input closed and every queued word displayed.
    Finished,
}

/// Paces the display of one reply: words are queued as fragments arrive and
/// appended to the target message one per tick.
pub struct TypingAnimator {
    words: mpsc::UnboundedSender<String>,
    phase: watch::Receiver<AnimatorPhase>,
    enqueued: usize,
    ticks: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TypingAnimator {
    pub fn spawn(
        transcript: Arc<TranscriptState>,
        message_id: String,
        cadence: Duration,
        events: broadcast::Sender<UiEvent>
    ) -> Self {
        let (words, rx) = mpsc::unbounded_channel();
        let (phase_tx, phase) = watch::channel(AnimatorPhase::Idle);
        let ticks = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(
            run(rx, transcript, message_id, cadence, events, phase_tx, Arc::clone(&ticks))
        );
        Self { words, phase, enqueued: 0, ticks, task }
    }

    pub fn enqueue<I>(&mut self, words: I) where I: IntoIterator<Item = String> {
        for word in words {
            // The receiver lives until `finish`, which consumes self.
            if self.words.send(word).is_ok() {
                self.enqueued += 1;
            }
        }
    }

    pub fn phase(&self) -> AnimatorPhase {
        *self.phase.borrow()
    }

    /// Words appended so far.
    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Resolves once every word enqueued so far is displayed and the timer
    /// has stopped.
    pub async fn wait_idle(&mut self) {
        let enqueued = self.enqueued;
        let ticks = Arc::clone(&self.ticks);
        let _ = self.phase
            .wait_for(|phase| {
                *phase != AnimatorPhase::Draining && ticks.load(Ordering::SeqCst) >= enqueued
            }).await;
    }

    /// Closes the input and waits until every queued word has been displayed.
    /// Returns the number of append ticks.
    pub async fn finish(self) -> usize {
        let TypingAnimator { words, ticks, task, .. } = self;
        drop(words);
        if let Err(e) = task.await {
            debug!("Typing animator task ended abnormally: {}", e);
        }
        ticks.load(Ordering::SeqCst)
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<String>,
    transcript: Arc<TranscriptState>,
    message_id: String,
    cadence: Duration,
    events: broadcast::Sender<UiEvent>,
    phase: watch::Sender<AnimatorPhase>,
    ticks: Arc<AtomicUsize>
) {
    let mut queue: VecDeque<String> = VecDeque::new();

    // idle: park on the channel until a word arrives or the input closes
    while let Some(word) = rx.recv().await {
        queue.push_back(word);
        phase.send_replace(AnimatorPhase::Draining);

        let mut timer = interval_at(Instant::now() + cadence, cadence);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            while let Ok(word) = rx.try_recv() {
                queue.push_back(word);
            }
            let Some(word) = queue.pop_front() else {
                break;
            };
            if !transcript.append_word(&message_id, &word).await {
                debug!("Reply {} is no longer live; dropping animated word", message_id);
            }
            ticks.fetch_add(1, Ordering::SeqCst);
            let _ = events.send(UiEvent::ScrollToBottom);
        }

        phase.send_replace(AnimatorPhase::Idle);
    }

    phase.send_replace(AnimatorPhase::Finished);
}

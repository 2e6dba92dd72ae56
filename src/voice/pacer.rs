//! Wall-clock-paced frame producer, running on a dedicated OS thread so a
//! reactor stall can never delay outbound audio.
//!
//! Grounded on `StreamPlayer`/`ProcessPlayer` in `voice_client.py`, but
//! reworked per this crate's composition-over-subclassing redesign: rather
//! than two player subclasses differing only in where bytes come from
//! (a file-like object vs. a subprocess pipe), `AudioPacer` takes any
//! [`PacerSource`] and is itself the single implementation.

use flume::{Sender, TryRecvError};
use std::{
    thread::JoinHandle,
    time::{Duration, Instant},
};

/// An opaque supplier of raw frame bytes for the pacer to send on each
/// tick. Implementors decide what "one frame" means (an encoded Opus
/// packet, silence, pulled from a decoder, ...); the pacer only cares about
/// timing.
pub trait PacerSource: Send {
    /// Fills `buf` with the next frame, returning the number of bytes
    /// written. Returning `Ok(0)` signals end-of-stream and stops the pacer.
    fn read_frame(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

enum PacerControl {
    Pause,
    Resume,
    Stop,
}

/// Handle to a running pacer thread. Dropping this stops the thread.
pub struct AudioPacer {
    thread: Option<JoinHandle<()>>,
    control: Sender<PacerControl>,
}

impl AudioPacer {
    /// Spawns the pacer thread.
    ///
    /// `frame_len` is the wall-clock duration one frame represents (20ms
    /// for standard Discord Opus framing); `frame_buf_len` bounds the
    /// buffer handed to [`PacerSource::read_frame`]; `on_frame` is called
    /// with each produced frame's bytes; `on_stop`, if given, runs once
    /// after the loop exits for any reason (EOF, error, or an explicit
    /// [`AudioPacer::stop`]).
    pub fn spawn<S, F, H>(
        mut source: S,
        frame_len: Duration,
        frame_buf_len: usize,
        mut on_frame: F,
        mut on_stop: Option<H>,
    ) -> Self
    where
        S: PacerSource + 'static,
        F: FnMut(&[u8]) + Send + 'static,
        H: FnMut() + Send + 'static,
    {
        let (control_tx, control_rx) = flume::unbounded();

        let thread = std::thread::spawn(move || {
            let mut buf = vec![0u8; frame_buf_len];
            let mut next_tick = Instant::now();
            let mut paused = false;

            'outer: loop {
                loop {
                    match control_rx.try_recv() {
                        Ok(PacerControl::Pause) => paused = true,
                        Ok(PacerControl::Resume) => {
                            paused = false;
                            next_tick = Instant::now();
                        },
                        Ok(PacerControl::Stop) => break 'outer,
                        Err(TryRecvError::Disconnected) => break 'outer,
                        Err(TryRecvError::Empty) => break,
                    }
                }

                if paused {
                    std::thread::sleep(Duration::from_millis(20));
                    continue;
                }

                match source.read_frame(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => on_frame(&buf[..n]),
                    Err(_) => break,
                }

                next_tick += frame_len;
                let now = Instant::now();
                if next_tick > now {
                    std::thread::sleep(next_tick - now);
                } else {
                    // Over-corrects positive drift: rather than letting a slow
                    // tick's deficit compound across every future frame, resync
                    // the schedule to "now" and eat the one-off jitter.
                    next_tick = now;
                }
            }

            if let Some(stop) = on_stop.take() {
                stop();
            }
        });

        Self {
            thread: Some(thread),
            control: control_tx,
        }
    }

    /// Pauses frame production; the thread keeps running but stops ticking.
    pub fn pause(&self) {
        let _ = self.control.send(PacerControl::Pause);
    }

    /// Resumes frame production, resetting the pacing clock to "now" so a
    /// long pause doesn't cause a burst of catch-up frames.
    pub fn resume(&self) {
        let _ = self.control.send(PacerControl::Resume);
    }

    /// Signals the pacer thread to stop and joins it.
    pub fn stop(&mut self) {
        let _ = self.control.send(PacerControl::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AudioPacer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct CountingSource {
        remaining: usize,
    }

    impl PacerSource for CountingSource {
        fn read_frame(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.remaining == 0 {
                return Ok(0);
            }
            self.remaining -= 1;
            buf[0] = self.remaining as u8;
            Ok(1)
        }
    }

    #[test]
    fn produces_exactly_the_frames_the_source_yields() {
        let produced = Arc::new(AtomicUsize::new(0));
        let produced_cl = produced.clone();

        let mut pacer = AudioPacer::spawn(
            CountingSource { remaining: 5 },
            Duration::from_millis(1),
            4,
            move |_frame: &[u8]| {
                produced_cl.fetch_add(1, Ordering::SeqCst);
            },
            None::<fn()>,
        );

        // Give the thread time to drain all 5 frames and hit EOF.
        std::thread::sleep(Duration::from_millis(50));
        pacer.stop();

        assert_eq!(produced.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn stop_runs_the_stop_hook_exactly_once() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let stopped_cl = stopped.clone();

        let mut pacer = AudioPacer::spawn(
            CountingSource { remaining: 1000 },
            Duration::from_millis(1),
            4,
            |_frame: &[u8]| {},
            Some(move || {
                stopped_cl.fetch_add(1, Ordering::SeqCst);
            }),
        );

        std::thread::sleep(Duration::from_millis(10));
        pacer.stop();

        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}

//! Latest-frame-only detection for live camera streams.
//!
//! A camera thread calls [`FrameSlot::publish`] at its own cadence and never
//! waits on detection. The [`LiveDetector`] worker always takes the newest
//! frame; anything it could not get to in time is counted as dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::det::{CellDetector, DetectionReport};
use crate::engine::EngineError;
use crate::image_impl::Frame;
use crate::types::{DetectionParameters, Roi};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct SlotState {
    pending: Option<(u64, Frame)>,
    published: u64,
    dropped: u64,
    closed: bool,
}

/// Single-entry mailbox holding the most recent unread frame.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, replacing any unread one. Returns the frame's sequence
    /// number, or `None` once the slot is closed.
    pub fn publish(&self, frame: Frame) -> Option<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.published += 1;
        let seq = state.published;
        if state.pending.replace((seq, frame)).is_some() {
            state.dropped += 1;
        }
        drop(state);
        self.ready.notify_one();
        Some(seq)
    }

    /// Take the unread frame without waiting.
    pub fn take(&self) -> Option<(u64, Frame)> {
        self.state.lock().pending.take()
    }

    /// Take the unread frame, waiting up to `timeout` for one to arrive.
    pub fn wait(&self, timeout: Duration) -> Option<(u64, Frame)> {
        let mut state = self.state.lock();
        if state.pending.is_none() && !state.closed {
            self.ready.wait_for(&mut state, timeout);
        }
        state.pending.take()
    }

    /// Refuse further frames and wake any waiter.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn published(&self) -> u64 {
        self.state.lock().published
    }

    /// Frames overwritten before the worker read them.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

/// Detection loop on a dedicated thread fed by a [`FrameSlot`].
pub struct LiveDetector {
    slot: Arc<FrameSlot>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LiveDetector {
    /// Start the worker. `sink` receives each report with the sequence number
    /// of the frame it came from.
    pub fn spawn<F>(
        params: DetectionParameters,
        roi: Option<Roi>,
        mut sink: F,
    ) -> Result<Self, EngineError>
    where
        F: FnMut(u64, DetectionReport) + Send + 'static,
    {
        let detector = CellDetector::new(params)?;
        let slot = Arc::new(FrameSlot::new());
        let stop = Arc::new(AtomicBool::new(false));

        let worker_slot = Arc::clone(&slot);
        let worker_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("cellseg-live".to_string())
            .spawn(move || {
                while !worker_stop.load(Ordering::Relaxed) && !worker_slot.is_closed() {
                    let Some((seq, frame)) = worker_slot.wait(POLL_INTERVAL) else {
                        continue;
                    };
                    match detector.detect_with_report(&frame, roi) {
                        Ok(report) => {
                            debug!("frame {}: {} detections", seq, report.len());
                            sink(seq, report);
                        }
                        Err(e) => warn!("frame {}: {}", seq, e),
                    }
                }
            })?;

        info!("live detector started");
        Ok(Self {
            slot,
            stop,
            handle: Some(handle),
        })
    }

    pub fn slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }

    pub fn publish(&self, frame: Frame) -> Option<u64> {
        self.slot.publish(frame)
    }

    /// Stop the worker and wait for it. Returns the number of dropped frames.
    pub fn stop(mut self) -> u64 {
        self.shutdown();
        self.slot.dropped()
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.slot.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("live detector thread panicked");
            }
            info!(
                "live detector stopped: {} published, {} dropped",
                self.slot.published(),
                self.slot.dropped()
            );
        }
    }
}

impl Drop for LiveDetector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::disk_frame;
    use std::sync::mpsc;

    fn small_frame() -> Frame {
        disk_frame(32, 32, &[(16.0, 16.0)], 6.0, 40, 200)
    }

    #[test]
    fn test_publish_drops_unread_frame() {
        let slot = FrameSlot::new();
        assert_eq!(slot.publish(small_frame()), Some(1));
        assert_eq!(slot.publish(small_frame()), Some(2));
        assert_eq!(slot.publish(small_frame()), Some(3));
        assert_eq!(slot.dropped(), 2);

        let (seq, _) = slot.take().unwrap();
        assert_eq!(seq, 3);
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_wait_times_out_when_empty() {
        let slot = FrameSlot::new();
        assert!(slot.wait(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_wait_wakes_on_publish() {
        let slot = Arc::new(FrameSlot::new());
        let producer = Arc::clone(&slot);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.publish(small_frame());
        });

        let mut got = None;
        for _ in 0..100 {
            got = slot.wait(Duration::from_millis(50));
            if got.is_some() {
                break;
            }
        }
        t.join().unwrap();
        assert_eq!(got.map(|(seq, _)| seq), Some(1));
    }

    #[test]
    fn test_closed_slot_rejects_frames() {
        let slot = FrameSlot::new();
        slot.close();
        assert!(slot.publish(small_frame()).is_none());
        assert!(slot.wait(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_live_detector_delivers_reports() {
        let params = DetectionParameters {
            hole_area_threshold: 4000,
            area_min: 200,
            area_max: 6000,
            perimeter_max: 400.0,
            aspect_ratio_threshold: 3.0,
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel();
        let live = LiveDetector::spawn(params, None, move |seq, report| {
            let _ = tx.send((seq, report.len()));
        })
        .unwrap();

        let seq = live
            .publish(disk_frame(96, 96, &[(48.0, 48.0)], 20.0, 40, 200))
            .unwrap();
        let (got_seq, count) = rx.recv_timeout(Duration::from_secs(30)).unwrap();
        assert_eq!(got_seq, seq);
        assert_eq!(count, 1);

        let dropped = live.stop();
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_spawn_rejects_invalid_parameters() {
        let bad = DetectionParameters {
            clahe_tile_grid: 0,
            ..Default::default()
        };
        assert!(LiveDetector::spawn(bad, None, |_, _| {}).is_err());
    }
}

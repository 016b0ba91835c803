//! Background re-serialization.
//!
//! A [`Pipeline`] owns one OS thread that drains packets from a demuxer and
//! feeds them to a muxer writing into a [`DiskCache`]. It is the only writer of
//! its cache.

use mediastore_common::{MediaId, Result};
use mediastore_media::{AbortHandle, Demuxer, Muxer};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::DiskCache;
use crate::config::PipelineConfig;

/// Granularity of the sleeps between drain passes.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Counters shared between the driver thread and its owner.
#[derive(Debug)]
pub struct PipelineStats {
    packets: AtomicU64,
    max_timestamp: AtomicI64,
    demux_errors: AtomicU64,
}

impl PipelineStats {
    fn new() -> Self {
        Self {
            packets: AtomicU64::new(0),
            max_timestamp: AtomicI64::new(i64::MIN),
            demux_errors: AtomicU64::new(0),
        }
    }

    /// Packets muxed so far.
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::SeqCst)
    }

    /// Highest timestamp muxed so far, in microseconds.
    pub fn max_timestamp(&self) -> Option<i64> {
        match self.max_timestamp.load(Ordering::SeqCst) {
            i64::MIN => None,
            ts => Some(ts),
        }
    }

    /// Failed demuxer reads so far.
    pub fn demux_errors(&self) -> u64 {
        self.demux_errors.load(Ordering::SeqCst)
    }
}

struct Driver {
    demuxer: Box<dyn Demuxer>,
    muxer: Box<dyn Muxer>,
    cache: Arc<DiskCache>,
    stop: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    poll_interval: Duration,
    /// Last demux error reported, so a stuck source warns once.
    last_demux_error: Option<String>,
}

impl Driver {
    fn run(mut self) -> Box<dyn Muxer> {
        debug!("Pipeline started for {:?}", self.cache.path());

        while !self.stopped() {
            self.drain();
            self.sleep(self.poll_interval);
        }

        debug!(
            "Pipeline stopped for {:?} after {} packets",
            self.cache.path(),
            self.stats.packets()
        );
        self.muxer
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Mux everything the demuxer has ready.
    fn drain(&mut self) {
        while !self.stopped() {
            let packet = match self.demuxer.read() {
                Ok(Some(packet)) => {
                    self.last_demux_error = None;
                    packet
                }
                Ok(None) => return,
                Err(e) => {
                    if !self.stopped() {
                        self.report_demux_error(e.to_string());
                    }
                    return;
                }
            };

            let Some(stream) = self.demuxer.stream(packet.demuxer_id, packet.stream_id) else {
                warn!(
                    "No stream {} (demuxer {}) for packet, aborting pass",
                    packet.stream_id, packet.demuxer_id
                );
                return;
            };

            if let Err(e) = self.muxer.write(&packet, stream) {
                warn!("Failed to mux packet into {:?}: {}", self.cache.path(), e);
                return;
            }

            self.stats.packets.fetch_add(1, Ordering::SeqCst);
            if let Some(ts) = packet.timestamp() {
                self.stats.max_timestamp.fetch_max(ts, Ordering::SeqCst);
            }

            if let Some(delay) = self.cache.write_delay() {
                self.sleep(delay);
            }
        }
    }

    fn report_demux_error(&mut self, message: String) {
        self.stats.demux_errors.fetch_add(1, Ordering::SeqCst);
        if self.last_demux_error.as_deref() == Some(message.as_str()) {
            debug!("Demux error for {:?} persists: {}", self.cache.path(), message);
        } else {
            warn!("Demux error for {:?}: {}", self.cache.path(), message);
            self.last_demux_error = Some(message);
        }
    }

    /// Sleep for `duration`, waking early on stop.
    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// A running conversion.
pub struct Pipeline {
    name: String,
    stop: Arc<AtomicBool>,
    input_abort: AbortHandle,
    demuxer_abort: AbortHandle,
    stats: Arc<PipelineStats>,
    handle: Option<JoinHandle<Box<dyn Muxer>>>,
}

impl Pipeline {
    /// Start draining `demuxer` into `muxer` on a new thread.
    ///
    /// `input_abort` belongs to the input the demuxer reads from; aborting it
    /// is how [`close`](Self::close) unblocks a stalled source.
    pub fn start(
        media_id: MediaId,
        demuxer: Box<dyn Demuxer>,
        muxer: Box<dyn Muxer>,
        cache: Arc<DiskCache>,
        input_abort: AbortHandle,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let name = format!("mediastore-pipeline-{}", media_id);
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(PipelineStats::new());
        let demuxer_abort = demuxer.abort_handle();

        let driver = Driver {
            demuxer,
            muxer,
            cache,
            stop: Arc::clone(&stop),
            stats: Arc::clone(&stats),
            poll_interval: config.poll_interval(),
            last_demux_error: None,
        };

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || driver.run())?;

        info!("Started {}", name);
        Ok(Self {
            name,
            stop,
            input_abort,
            demuxer_abort,
            stats,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Stop the driver, wait for it and close the muxer. Idempotent.
    pub fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.stop.store(true, Ordering::SeqCst);
        self.demuxer_abort.abort();
        self.input_abort.abort();

        match handle.join() {
            Ok(mut muxer) => {
                if let Err(e) = muxer.close() {
                    warn!("Failed to close muxer of {}: {}", self.name, e);
                }
            }
            Err(_) => error!("{} panicked", self.name),
        }
        info!("Stopped {}", self.name);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.close();
    }
}

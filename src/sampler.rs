//! Background recording of when job output reached a given size.
//!
//! Samples are sparse.  At most one per `interval`, so the renderer can later
//! say "output reached byte N at time T" without timing every line.

use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::debug;

use super::err::{Error, Result};

/// Longest pause between two looks at the output file
const TICK: Duration = Duration::from_millis(100);

/// Output reached `offset` bytes at `time`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampSample {
    pub time: DateTime<Utc>,
    pub offset: u64,
}

/// Rate limiting for samples.
///
/// A size is recorded once `interval` has passed since the previous sample,
/// whether or not the output grew in between.  Sizes smaller than the last
/// recorded one are never recorded.
#[derive(Debug)]
pub struct SampleFilter {
    interval: Duration,
    last_offset: u64,
    last_sample: Instant,
}

impl SampleFilter {
    pub fn new(interval: Duration, start: Instant) -> SampleFilter {
        SampleFilter {
            interval,
            last_offset: 0,
            last_sample: start,
        }
    }

    /// Should the size observed at `now` be recorded?
    pub fn observe(&mut self, now: Instant, size: u64) -> bool {
        if size < self.last_offset {
            return false;
        }
        if now.saturating_duration_since(self.last_sample) < self.interval {
            return false;
        }
        self.last_offset = size;
        self.last_sample = now;
        true
    }
}

/// A running sampler thread
pub struct TimestampSampler {
    finished: Arc<AtomicBool>,
    worker: thread::JoinHandle<Result<Vec<TimestampSample>>>,
}

impl TimestampSampler {
    /// Begin watching the size of `output`.
    pub fn start(output: File, interval: Duration) -> Result<TimestampSampler> {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let tick = interval.min(TICK);

        let worker = thread::Builder::new()
            .name("sampler".to_string())
            .spawn(move || sample_loop(output, interval, tick, &flag))
            .map_err(|e| Error::os("spawn sampler", e))?;

        debug!("Sampling output every {:?}", interval);
        Ok(TimestampSampler { finished, worker })
    }

    /// Stop sampling and collect everything recorded.
    pub fn finish(self) -> Result<Vec<TimestampSample>> {
        self.finished.store(true, Ordering::Release);
        let samples = self
            .worker
            .join()
            .map_err(|_| Error::Thread("panicked".to_string()))??;
        debug!("Collected {} timestamp samples", samples.len());
        Ok(samples)
    }
}

fn sample_loop(
    output: File,
    interval: Duration,
    tick: Duration,
    finished: &AtomicBool,
) -> Result<Vec<TimestampSample>> {
    let mut samples = Vec::new();
    let mut filter = SampleFilter::new(interval, Instant::now());

    while !finished.load(Ordering::Acquire) {
        thread::sleep(tick);
        let size = output
            .metadata()
            .map_err(|e| Error::os("fstat output", e))?
            .len();
        if filter.observe(Instant::now(), size) {
            samples.push(TimestampSample {
                time: Utc::now(),
                offset: size,
            });
        }
    }
    // `output` closed here
    Ok(samples)
}

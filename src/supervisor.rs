//! Parent side of a job: fork, bounded wait, reap.
use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use signal_hook::consts::SIGCHLD;

use super::config::{JobConfig, OUTPUT_FILE};
use super::err::{Error, Result, EXIT_TIMEOUT};
use super::executor;
use super::proc::{fork, signame, Fork, Proc};
use super::sampler::{TimestampSample, TimestampSampler};
use super::user::GradingIdentity;
use super::util::{self, BlockedSignals};

/// How the job ended.  Recorded once, after the child is reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: ExitStatus,
    pub timed_out: bool,
}

impl JobOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.timed_out {
            EXIT_TIMEOUT
        } else {
            0
        }
    }

    pub fn report(&self, timeout: u32) {
        if self.timed_out {
            info!("Job timed out after {} seconds", timeout);
        } else if let Some(code) = self.status.code() {
            info!("Job exited with status {}", code);
        } else if let Some(sig) = self.status.signal() {
            info!("Job killed by {}", signame(sig));
        }
    }
}

/// Everything the renderer needs once the job is over
pub struct FinishedJob {
    pub outcome: JobOutcome,
    pub samples: Vec<TimestampSample>,
    pub output: File,
}

pub struct Supervisor<'a> {
    config: &'a JobConfig,
    ident: &'a GradingIdentity,
}

impl<'a> Supervisor<'a> {
    pub fn new(config: &'a JobConfig, ident: &'a GradingIdentity) -> Supervisor<'a> {
        Supervisor { config, ident }
    }

    /// Run the job found in `job_dir` to completion
    pub fn run(&self, job_dir: &Path) -> Result<FinishedJob> {
        // created and handed over while we are still privileged
        let path = job_dir.join(OUTPUT_FILE);
        let writer = util::create_exclusive(&path, 0o644)?;
        util::fchown(&writer, self.ident.uid(), self.ident.gid())?;
        let output = util::open_read_nofollow(&path)?;

        // SIGCHLD stays pending until we wait for it
        let blocked = BlockedSignals::block(&[SIGCHLD])?;

        let mut child = match fork()? {
            Fork::Child => executor::run_job(self.config, self.ident, writer, job_dir),
            Fork::Parent(child) => child,
        };
        drop(writer);
        debug!("Forked job {}", child);

        let sampler = match self.config.interval() {
            Some(interval) => {
                let started = output
                    .try_clone()
                    .map_err(|e| Error::os("dup output", e))
                    .and_then(|watch| TimestampSampler::start(watch, interval));
                Some(reap_on_error(&mut child, started)?)
            }
            None => None,
        };

        let outcome = await_child(&mut child, &blocked, self.config.timeout());

        let samples = match sampler {
            Some(sampler) => sampler.finish()?,
            None => vec![],
        };
        let outcome = outcome?;
        outcome.report(self.config.timeout);

        Ok(FinishedJob {
            outcome,
            samples,
            output,
        })
    }
}

/// Pass through `res`.  On error, first kill and reap `child`.
fn reap_on_error<T>(child: &mut Proc, res: Result<T>) -> Result<T> {
    if res.is_err() {
        if let Err(err) = child.kill() {
            warn!("unable to kill {} : {}", child, err);
        }
        child.wait()?;
    }
    res
}

/// Wait up to `timeout` for the child, killing it once that expires, then reap.
///
/// SIGCHLD must be blocked by `blocked` since before the child was forked.
pub fn await_child(
    child: &mut Proc,
    blocked: &BlockedSignals,
    timeout: Option<Duration>,
) -> Result<JobOutcome> {
    let mut timed_out = false;

    if let Some(limit) = timeout {
        let deadline = Instant::now() + limit;
        // a SIGCHLD may be for some other child, so check ours each time
        while child.try_wait()?.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if blocked.wait_timeout(remaining)?.is_none() && child.try_wait()?.is_none() {
                debug!("Timeout, kill {}", child);
                child.kill()?;
                timed_out = true;
                break;
            }
        }
    }

    // always reap, timed out or not
    let status = child.wait()?;
    Ok(JobOutcome { status, timed_out })
}

//! Job configuration
//!
//! Limits, timeouts and the job directory as handed over by the caller.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use clap::Parser;

use super::err::{Error, Result};

/// Account which every job runs as
pub const GRADING_USER: &str = "autograde";

/// Name of file the job output is redirected to
pub const OUTPUT_FILE: &str = "output.log";

/// The job is always a build of the job directory
pub const BUILD_CMD: &str = "/usr/bin/make";
pub const BUILD_ARGV0: &str = "make";

/// Where a job may leave files behind, in addition to its home
pub const TEMP_ROOTS: [&str; 2] = ["/tmp", "/var/tmp"];

/// Timezone for rendered timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zone {
    #[default]
    Local,
    Named(Tz),
}

impl Zone {
    pub fn format(&self, when: &DateTime<Utc>, fmt: &str) -> String {
        match self {
            Zone::Local => when.with_timezone(&Local).format(fmt).to_string(),
            Zone::Named(tz) => when.with_timezone(tz).format(fmt).to_string(),
        }
    }
}

impl FromStr for Zone {
    type Err = Error;

    fn from_str(s: &str) -> Result<Zone> {
        if s.is_empty() || s.eq_ignore_ascii_case("local") {
            Ok(Zone::Local)
        } else {
            s.parse::<Tz>()
                .map(Zone::Named)
                .map_err(|_| Error::usage(format!("Unknown timezone {:?}", s)))
        }
    }
}

/// Parse an unsigned integer with C style radix prefix. eg. "0x10", "020", or "16"
pub fn parse_uint(s: &str) -> std::result::Result<u32, String> {
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };
    u32::from_str_radix(digits, radix)
        .map_err(|_| format!("{:?} must be a nonnegative integer", s))
}

fn parse_zone(s: &str) -> std::result::Result<Zone, String> {
    s.parse::<Zone>().map_err(|e| e.to_string())
}

/// Command line
#[derive(Debug, Parser)]
#[command(name = "autodriver", version, about = "Manages autograding jobs")]
pub struct Args {
    /// Limit the number of processes the user is allowed
    #[arg(short = 'u', long, value_name = "number", value_parser = parse_uint, default_value = "0")]
    pub nproc: u32,

    /// Limit the maximum file size a user can create (bytes)
    #[arg(short = 'f', long, value_name = "size", value_parser = parse_uint, default_value = "0")]
    pub fsize: u32,

    /// Limit the amount of time a job is allowed to run (seconds)
    #[arg(short = 't', long, value_name = "time", value_parser = parse_uint, default_value = "0")]
    pub timeout: u32,

    /// Limit the amount of output returned (bytes)
    #[arg(short = 'o', long, value_name = "size", value_parser = parse_uint, default_value = "0")]
    pub osize: u32,

    /// Minimum spacing of timestamps inserted into the output (seconds, 0 disables)
    #[arg(short = 'i', long = "timestamp-interval", value_name = "interval", value_parser = parse_uint, default_value = "0")]
    pub interval: u32,

    /// Timezone of inserted timestamps, "local" or eg. "America/New_York"
    #[arg(short = 'z', long, value_name = "timezone", value_parser = parse_zone, default_value = "local")]
    pub timezone: Zone,

    /// Job directory, moved into the grading user's home
    pub directory: PathBuf,
}

/// Settings for one job.  A zero limit means unbounded.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub nproc: u32,
    pub fsize: u32,
    pub timeout: u32,
    pub osize: u32,
    pub interval: u32,
    pub timezone: Zone,
    pub directory: PathBuf,
}

impl JobConfig {
    pub fn from_args(args: Args) -> Result<JobConfig> {
        if args.directory.file_name().is_none() {
            return Err(Error::usage(format!(
                "Job directory {} has no name",
                args.directory.display()
            )));
        }
        if !args.directory.is_dir() {
            return Err(Error::usage(format!(
                "Job directory {} does not exist",
                args.directory.display()
            )));
        }
        Ok(JobConfig {
            nproc: args.nproc,
            fsize: args.fsize,
            timeout: args.timeout,
            osize: args.osize,
            interval: args.interval,
            timezone: args.timezone,
            directory: args.directory,
        })
    }

    /// Final path component of the job directory
    pub fn job_name(&self) -> &OsStr {
        // checked by from_args()
        self.directory.file_name().unwrap_or(OsStr::new("."))
    }

    /// Where the job directory lands after being moved into `home`
    pub fn relocated(&self, home: &Path) -> PathBuf {
        home.join(self.job_name())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout.into()))
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval > 0).then(|| Duration::from_secs(self.interval.into()))
    }

    pub fn output_cap(&self) -> Option<u64> {
        (self.osize > 0).then_some(self.osize.into())
    }
}

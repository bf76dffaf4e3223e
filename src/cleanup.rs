//! Reclaim everything the grading user left behind.
//!
//! Process killing is best effort, with a bounded number of attempts.
//! Leftover files are not tolerated.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use libc;
use log::{debug, warn};

use super::config::TEMP_ROOTS;
use super::err::{Error, Result};
use super::user::GradingIdentity;
use super::util;

/// Number of times we'll try to kill the grading user's processes
pub const MAX_KILL_ATTEMPTS: u32 = 5;

/// Time between signaling the grading user's processes and checking again
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// External tools which act on everything a user owns
pub trait Reclaim {
    /// Send `sig` (eg. "TERM") to all processes of `uid`.  Returns true if any existed.
    fn signal_all(&self, uid: libc::uid_t, sig: &str) -> Result<bool>;

    /// Delete all files and directories owned by `uid` under `roots`
    fn delete_owned(&self, uid: libc::uid_t, roots: &[PathBuf]) -> Result<()>;
}

/// pkill(1) and find(1)
pub struct SystemReclaim;

impl Reclaim for SystemReclaim {
    fn signal_all(&self, uid: libc::uid_t, sig: &str) -> Result<bool> {
        let cmd = "/usr/bin/pkill";
        match util::call_program(cmd, [format!("-{}", sig), "-u".to_string(), uid.to_string()])? {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(Error::Collaborator {
                cmd: cmd.to_string(),
                code: Some(code),
            }),
        }
    }

    fn delete_owned(&self, uid: libc::uid_t, roots: &[PathBuf]) -> Result<()> {
        // find is /bin or /usr/bin depending on distribution
        let mut args = vec!["find".into()];
        args.extend(roots.iter().map(|r| r.as_os_str().to_os_string()));
        // the roots themselves are kept
        args.extend(["-mindepth".into(), "1".into()]);
        args.extend(["-user".into(), uid.to_string().into(), "-delete".into()]);
        util::check_program::<_, std::ffi::OsString>("/usr/bin/env", args)
    }
}

pub struct CleanupEngine<'a, R: Reclaim = SystemReclaim> {
    ident: &'a GradingIdentity,
    reclaim: R,
    grace: Duration,
    attempts: u32,
}

impl<'a> CleanupEngine<'a, SystemReclaim> {
    pub fn new(ident: &'a GradingIdentity) -> Self {
        CleanupEngine::with(ident, SystemReclaim)
    }
}

impl<'a, R: Reclaim> CleanupEngine<'a, R> {
    pub fn with(ident: &'a GradingIdentity, reclaim: R) -> Self {
        CleanupEngine {
            ident,
            reclaim,
            grace: SHUTDOWN_GRACE,
            attempts: MAX_KILL_ATTEMPTS,
        }
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Where files of the grading user are looked for
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.ident.home().to_path_buf()];
        roots.extend(TEMP_ROOTS.iter().map(PathBuf::from));
        roots
    }

    /// Kill all processes, then delete all files, of the grading user.
    pub fn run(&self) -> Result<()> {
        if !self.stop_processes() {
            warn!("Gave up killing processes of {}", self.ident.name());
        }
        debug!("Deleting files of {}", self.ident.name());
        self.reclaim.delete_owned(self.ident.uid(), &self.roots())
    }

    /// Returns false if processes may remain
    fn stop_processes(&self) -> bool {
        // politely at first
        let mut found = self.signal("TERM");
        let mut tries = 0;
        while found {
            if tries >= self.attempts {
                return false;
            }
            thread::sleep(self.grace);
            found = self.signal("KILL");
            tries += 1;
        }
        true
    }

    fn signal(&self, sig: &str) -> bool {
        match self.reclaim.signal_all(self.ident.uid(), sig) {
            Ok(found) => found,
            Err(err) => {
                // unknown, so assume some remain
                warn!("Error killing processes of {} : {}", self.ident.name(), err);
                true
            }
        }
    }
}

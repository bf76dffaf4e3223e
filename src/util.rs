use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::process::Command;

use libc;

use log::debug;

use super::err::{Error, Result};

/// Search path for collaborator programs.  Never inherited from our caller.
const SAFE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Run an external program, without a shell, and wait for it.
///
/// Returns the exit code, or an error if it could not be run or was killed.
pub fn call_program<I, S>(cmd: &str, args: I) -> Result<i32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut proc = Command::new(cmd);
    proc.args(args).env_clear().env("PATH", SAFE_PATH);
    debug!("run: {:?}", proc);
    let sts = proc
        .status()
        .map_err(|e| Error::os(format!("exec {}", cmd), e))?;
    sts.code().ok_or_else(|| Error::Collaborator {
        cmd: cmd.to_string(),
        code: None,
    })
}

/// Like call_program(), and anything but a zero exit is an error.
pub fn check_program<I, S>(cmd: &str, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    match call_program(cmd, args)? {
        0 => Ok(()),
        code => Err(Error::Collaborator {
            cmd: cmd.to_string(),
            code: Some(code),
        }),
    }
}

pub fn setrlimit(resource: libc::__rlimit_resource_t, limit: u64) -> Result<()> {
    debug!("setrlimit({}, {})", resource, limit);
    let rlim = libc::rlimit {
        rlim_cur: limit as libc::rlim_t,
        rlim_max: limit as libc::rlim_t,
    };
    unsafe {
        if 0 != libc::setrlimit(resource, &rlim) {
            return Err(Error::last_os_error(format!(
                "setrlimit({}, {})",
                resource, limit
            )));
        }
    }
    Ok(())
}

pub fn dup2(fd: RawFd, target: RawFd) -> Result<()> {
    unsafe {
        if libc::dup2(fd, target) < 0 {
            return Err(Error::last_os_error(format!("dup2({}, {})", fd, target)));
        }
    }
    Ok(())
}

pub fn fchown(file: &fs::File, uid: libc::uid_t, gid: libc::gid_t) -> Result<()> {
    debug!("fchown({}, {}, {})", file.as_raw_fd(), uid, gid);
    unsafe {
        if libc::fchown(file.as_raw_fd(), uid, gid) == 0 {
            Ok(())
        } else {
            Err(Error::last_os_error("fchown"))
        }
    }
}

/// Create a new file, replacing any previous directory entry without following it.
pub fn create_exclusive<P: AsRef<Path>>(fname: P, perm: libc::mode_t) -> Result<fs::File> {
    let fname = fname.as_ref();
    match fs::remove_file(fname) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => {
            return Err(Error::file("unlink", fname, err));
        }
        _ => (),
    }
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(perm)
        .custom_flags(libc::O_NOFOLLOW)
        .open(fname)
        .map_err(|e| Error::file("create", fname, e))
}

pub fn open_read_nofollow<P: AsRef<Path>>(fname: P) -> Result<fs::File> {
    fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(fname.as_ref())
        .map_err(|e| Error::file("open", fname.as_ref(), e))
}

fn sigset(sigs: &[libc::c_int]) -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for sig in sigs {
            libc::sigaddset(&mut set, *sig);
        }
        set
    }
}

fn sigmask(how: libc::c_int, sigs: &[libc::c_int]) -> Result<libc::sigset_t> {
    let set = sigset(sigs);
    unsafe {
        let mut prev: libc::sigset_t = std::mem::zeroed();
        let err = libc::pthread_sigmask(how, &set, &mut prev);
        if err != 0 {
            return Err(Error::os("pthread_sigmask", io::Error::from_raw_os_error(err)));
        }
        Ok(prev)
    }
}

/// Unblock signals for the calling thread
pub fn unblock_signals(sigs: &[libc::c_int]) -> Result<()> {
    sigmask(libc::SIG_UNBLOCK, sigs).map(|_| ())
}

/// Signals held pending for the calling thread.  Previous mask restored when dropped.
pub struct BlockedSignals {
    sigs: Vec<libc::c_int>,
    prev: libc::sigset_t,
}

impl BlockedSignals {
    pub fn block(sigs: &[libc::c_int]) -> Result<BlockedSignals> {
        debug!("block signals {:?}", sigs);
        let prev = sigmask(libc::SIG_BLOCK, sigs)?;
        Ok(BlockedSignals {
            sigs: sigs.to_vec(),
            prev,
        })
    }

    /// Wait for one of our blocked signals to be pending.
    ///
    /// Returns the signal number, or None if `timeout` expires first.
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> Result<Option<libc::c_int>> {
        let set = sigset(&self.sigs);
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let ts = libc::timespec {
                tv_sec: remaining.as_secs() as libc::time_t,
                tv_nsec: remaining.subsec_nanos() as libc::c_long,
            };
            let ret = unsafe { libc::sigtimedwait(&set, std::ptr::null_mut(), &ts) };
            if ret >= 0 {
                return Ok(Some(ret));
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(None),
                Some(libc::EINTR) => continue,
                _ => return Err(Error::os("sigtimedwait", err)),
            }
        }
    }
}

impl Drop for BlockedSignals {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.prev, std::ptr::null_mut());
        }
    }
}

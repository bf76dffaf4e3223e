use std::collections::BTreeMap;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::{env, ffi, fmt};

use libc;
use signal_hook::low_level::signal_name;

use log::{debug, warn};

use super::err::{Error, Result};

/// Managed (child) process
#[derive(Debug)]
pub struct Proc {
    pid: libc::pid_t,
    status: Option<ExitStatus>,
}

impl Proc {
    pub fn manage(pid: libc::pid_t) -> Proc {
        assert!(pid > 0);
        Proc { pid, status: None }
    }

    pub fn id(&self) -> libc::pid_t {
        self.pid
    }

    /// Send signal to process
    pub fn signal(&self, sig: libc::c_int) -> Result<()> {
        if self.status.is_none() {
            debug!("signal PID {} with {}", self.pid, signame(sig));
            unsafe {
                if 0 != libc::kill(self.pid, sig) {
                    return Err(Error::last_os_error(format!(
                        "Unable to signal {} with {}",
                        self.pid, sig
                    )));
                }
            }
        }
        Ok(())
    }

    /// Send SIGKILL to process
    pub fn kill(&self) -> Result<()> {
        self.signal(libc::SIGKILL)
    }

    /// Reap if already exited, without blocking
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(sts) = self.status {
            return Ok(Some(sts));
        }
        match trywaitpid(self.pid)? {
            TryWait::Busy => Ok(None),
            TryWait::Done(_child, sts) => {
                self.status = Some(sts);
                Ok(Some(sts))
            }
        }
    }

    /// Block current process until child exits.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(sts) = self.status {
            return Ok(sts);
        }
        let mut raw = 0;
        loop {
            let ret = unsafe { libc::waitpid(self.pid, &mut raw, 0) };
            if ret == self.pid {
                break;
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(Error::os(format!("waitpid({})", self.pid), err));
            }
        }
        let sts = ExitStatus::from_raw(raw);
        debug!("wait() -> {}", sts);
        self.status = Some(sts);
        Ok(sts)
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        // never leave an unreaped child running behind us
        if self.status.is_none() {
            if let Err(err) = self.kill() {
                warn!("unable to kill managed PID {} : {}", self.pid, err);
            }
        }
    }
}

impl fmt::Display for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(sts) => write!(f, "PID {} Exit with {}", self.pid, sts),
            None => write!(f, "PID {}", self.pid),
        }
    }
}

/// Printable name for a signal number. eg. "SIGKILL"
pub fn signame(sig: libc::c_int) -> String {
    signal_name(sig)
        .map(str::to_string)
        .unwrap_or_else(|| format!("signal {}", sig))
}

pub enum TryWait {
    Busy,
    Done(libc::pid_t, ExitStatus),
}

/// Wraps waitpid()
pub fn trywaitpid(pid: libc::pid_t) -> Result<TryWait> {
    let mut sts = 0;
    unsafe {
        let ret = libc::waitpid(pid, &mut sts, libc::WNOHANG);
        if ret == -1 {
            Err(Error::last_os_error(format!("waitpid({})", pid)))
        } else if ret == 0 {
            Ok(TryWait::Busy)
        } else {
            Ok(TryWait::Done(ret, ExitStatus::from_raw(sts)))
        }
    }
}

pub struct Exec {
    cmd: ffi::CString,
    args: Vec<ffi::CString>,
    env: BTreeMap<ffi::OsString, ffi::CString>,
}

/// "NAME=value", as bytes since either may not be UTF-8
fn env_entry(name: &ffi::OsStr, value: &ffi::OsStr) -> Result<ffi::CString> {
    let mut entry = name.as_bytes().to_vec();
    entry.push(b'=');
    entry.extend_from_slice(value.as_bytes());
    Ok(ffi::CString::new(entry)?)
}

impl Exec {
    pub fn new<T: AsRef<str>>(cmd: T) -> Result<Exec> {
        let mut es = BTreeMap::new();

        // initially populate with process environment
        for (k, v) in env::vars_os() {
            let entry = env_entry(&k, &v)?;
            es.insert(k, entry);
        }

        Ok(Exec {
            cmd: ffi::CString::new(cmd.as_ref())?,
            args: vec![],
            env: es,
        })
    }

    pub fn args<I>(&mut self, args: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for s in args.into_iter() {
            self.args.push(ffi::CString::new(s.as_ref())?);
        }
        Ok(self)
    }

    pub fn env<N, V>(&mut self, name: N, value: V) -> Result<&mut Self>
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let name = ffi::OsStr::new(name.as_ref());
        let entry = env_entry(name, ffi::OsStr::new(value.as_ref()))?;
        self.env.insert(name.to_os_string(), entry);
        Ok(self)
    }

    /// Replace the current process image.  Only returns on error.
    pub fn exec(&self) -> Error {
        let cmd = self.cmd.as_ptr();
        let mut args: Vec<*const libc::c_char> = self.args.iter().map(|s| s.as_ptr()).collect();
        let mut env: Vec<*const libc::c_char> = self.env.values().map(|v| v.as_ptr()).collect();
        // arrays must be null terminated
        args.push(::std::ptr::null());
        env.push(::std::ptr::null());

        unsafe {
            libc::execvpe(cmd, args.as_ptr(), env.as_ptr());
        }
        Error::last_os_error(format!("exec cmd={:?} args={:?}", self.cmd, self.args))
    }
}

pub enum Fork {
    Parent(Proc),
    Child,
}

/// Wraps fork().  The child must not return past its caller.
pub fn fork() -> Result<Fork> {
    let ret = unsafe { libc::fork() };
    if ret < 0 {
        Err(Error::last_os_error("fork"))
    } else if ret == 0 {
        Ok(Fork::Child)
    } else {
        Ok(Fork::Parent(Proc::manage(ret)))
    }
}

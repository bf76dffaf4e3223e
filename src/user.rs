//! The grading user, and the credential calls which switch to it
use std::ffi::{CStr, CString};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

use libc;
use log::debug;

use super::err::{Error, Result};

/// Account a job runs as.  Resolved once, before any privileged action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradingIdentity {
    name: String,
    uid: libc::uid_t,
    gid: libc::gid_t,
    home: PathBuf,
}

impl GradingIdentity {
    /// Look up `name` in the password database.
    pub fn resolve(name: &str) -> Result<GradingIdentity> {
        let cname = CString::new(name)?;
        let mut bufsize = match unsafe { libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX) } {
            n if n > 0 => n as usize,
            _ => 1024,
        };

        loop {
            let mut buf = vec![0 as libc::c_char; bufsize];
            let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
            let mut result: *mut libc::passwd = std::ptr::null_mut();

            let err = unsafe {
                libc::getpwnam_r(
                    cname.as_ptr(),
                    &mut pwd,
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                )
            };
            if err == libc::ERANGE {
                bufsize *= 2;
                continue;
            } else if err != 0 {
                return Err(Error::os(
                    format!("getpwnam_r({})", name),
                    IoError::from_raw_os_error(err),
                ));
            } else if result.is_null() {
                return Err(Error::usage(format!("Invalid grading user {}", name)));
            }

            // pw_dir points into buf, copy out before it is released
            let home = unsafe { CStr::from_ptr(pwd.pw_dir) };
            let ident = GradingIdentity {
                name: name.to_string(),
                uid: pwd.pw_uid,
                gid: pwd.pw_gid,
                home: PathBuf::from(home.to_string_lossy().as_ref()),
            };
            debug!("Resolved {:?}", ident);
            return Ok(ident);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> libc::uid_t {
        self.uid
    }

    pub fn gid(&self) -> libc::gid_t {
        self.gid
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Refuse to act for root, or for the grading user itself.
    pub fn check_caller(&self, caller: libc::uid_t) -> Result<()> {
        if caller == 0 {
            Err(Error::usage("Autodriver should not be run as root."))
        } else if caller == self.uid {
            Err(Error::usage(format!(
                "This should not be run as the grading user {}",
                self.name
            )))
        } else {
            Ok(())
        }
    }

    /// Irreversibly become this user.  Supplementary groups, then gid, then uid.
    pub fn become_user(&self) -> Result<()> {
        initgroups(&self.name, self.gid)?;
        setresgid(self.gid)?;
        setresuid(self.uid)?;
        Ok(())
    }
}

pub fn getuid() -> libc::uid_t {
    unsafe { libc::getuid() }
}

pub fn geteuid() -> libc::uid_t {
    unsafe { libc::geteuid() }
}

pub fn initgroups(name: &str, gid: libc::gid_t) -> Result<()> {
    let cname = CString::new(name)?;
    unsafe {
        if 0 != libc::initgroups(cname.as_ptr(), gid) {
            return Err(Error::last_os_error(format!(
                "initgroups({}, {})",
                name, gid
            )));
        }
    }
    Ok(())
}

/// Set real, effective, and saved gid
pub fn setresgid(id: libc::gid_t) -> Result<()> {
    unsafe {
        if 0 != libc::setresgid(id, id, id) {
            return Err(Error::last_os_error(format!("setresgid({})", id)));
        }
    }
    Ok(())
}

/// Set real, effective, and saved uid
pub fn setresuid(id: libc::uid_t) -> Result<()> {
    unsafe {
        if 0 != libc::setresuid(id, id, id) {
            return Err(Error::last_os_error(format!("setresuid({})", id)));
        }
    }
    Ok(())
}

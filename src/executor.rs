//! What the forked child does, in order, before becoming the job.
//!
//! Every step is fatal.  A half dropped child must never run further code.

use std::fs::File;
use std::os::unix::io::IntoRawFd;
use std::path::Path;
use std::process;

use libc;
use log::{debug, error};

use super::config::{JobConfig, BUILD_ARGV0, BUILD_CMD};
use super::err::{Error, Result, EXIT_OSERROR};
use super::proc::Exec;
use super::user::{geteuid, getuid, GradingIdentity};
use super::util;

/// Runs in the child.  Never returns.
pub fn run_job(config: &JobConfig, ident: &GradingIdentity, output: File, job_dir: &Path) -> ! {
    let err = match prepare(config, ident, output, job_dir) {
        Ok(exe) => exe.exec(),
        Err(err) => err,
    };
    // stdout may already be the output file, where the failure is worth seeing anyway
    error!("{}", err);
    process::exit(EXIT_OSERROR);
}

fn prepare(
    config: &JobConfig,
    ident: &GradingIdentity,
    output: File,
    job_dir: &Path,
) -> Result<Exec> {
    util::unblock_signals(&[libc::SIGCHLD])?;

    if config.nproc != 0 {
        util::setrlimit(libc::RLIMIT_NPROC, config.nproc.into())?;
    }
    if config.fsize != 0 {
        util::setrlimit(libc::RLIMIT_FSIZE, config.fsize.into())?;
    }

    // gid must change while we may still do so
    ident.become_user()?;
    debug!("Running as uid {} euid {}", getuid(), geteuid());

    let fd = output.into_raw_fd();
    util::dup2(fd, libc::STDOUT_FILENO)?;
    util::dup2(fd, libc::STDERR_FILENO)?;
    unsafe {
        if libc::close(fd) != 0 {
            return Err(Error::last_os_error("close output"));
        }
    }

    std::env::set_current_dir(job_dir)
        .map_err(|e| Error::file("chdir", job_dir, e))?;

    let mut exe = Exec::new(BUILD_CMD)?;
    exe.args([BUILD_ARGV0])?
        .env("HOME", ident.home().to_string_lossy())?
        .env("USER", ident.name())?
        .env("LOGNAME", ident.name())?;
    Ok(exe)
}

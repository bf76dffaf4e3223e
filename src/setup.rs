//! Hand the job directory over to the grading user
use std::ffi::OsStr;
use std::path::PathBuf;

use log::debug;

use super::config::JobConfig;
use super::err::Result;
use super::user::GradingIdentity;
use super::util;

/// Move the job directory into the grading user's home, and give it to them.
///
/// Returns the new location.
pub fn relocate(config: &JobConfig, ident: &GradingIdentity) -> Result<PathBuf> {
    let target = config.relocated(ident.home());
    debug!(
        "Move {} to {}",
        config.directory.display(),
        target.display()
    );

    util::check_program(
        "/bin/mv",
        [OsStr::new("-f"), config.directory.as_os_str(), ident.home().as_os_str()],
    )?;

    let owner = format!("{}:{}", ident.uid(), ident.gid());
    util::check_program("/bin/chown", [OsStr::new("-R"), OsStr::new(&owner), target.as_os_str()])?;

    Ok(target)
}

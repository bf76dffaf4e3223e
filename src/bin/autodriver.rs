//! Run one autograding job.
//!
//! Intended to be installed setuid root, and run by an unprivileged caller.
use std::{io, process};

use clap::Parser;
use log::{debug, error};

use autodriver::config::{Args, JobConfig, GRADING_USER};
use autodriver::err::EXIT_USAGE;
use autodriver::{getuid, logging, setup};
use autodriver::{CleanupEngine, Error, GradingIdentity, OutputRenderer, Result, Supervisor};

fn parse() -> Result<JobConfig> {
    let args = Args::try_parse().unwrap_or_else(|err| {
        // includes --help and --version
        let _ = err.print();
        process::exit(if err.use_stderr() { EXIT_USAGE } else { 0 });
    });
    JobConfig::from_args(args)
}

fn run() -> Result<i32> {
    let config = parse()?;

    let ident = GradingIdentity::resolve(GRADING_USER)?;
    ident.check_caller(getuid())?;

    let job_dir = setup::relocate(&config, &ident)?;
    let renderer = OutputRenderer::new(config.timezone);

    let rendered = Supervisor::new(&config, &ident)
        .run(&job_dir)
        .and_then(|mut job| {
            let size = job
                .output
                .metadata()
                .map_err(|e| Error::os("fstat output", e))?
                .len();
            if let Some(cap) = config.output_cap().filter(|&cap| size > cap) {
                debug!("Output {} bytes exceeds {}, eliding middle", size, cap);
            }
            // no logging while the job output is being written
            let mut out = io::stdout().lock();
            renderer.render(&mut job.output, size, &job.samples, config.output_cap(), &mut out)?;
            Ok(job.outcome)
        });

    // reclaim even when the job could not be run to the end
    let cleaned = CleanupEngine::new(&ident).run();
    if let (Err(_), Err(err)) = (&rendered, &cleaned) {
        error!("{}", err);
    }
    let outcome = rendered?;
    cleaned?;
    Ok(outcome.exit_code())
}

fn main() {
    if let Err(err) = logging::setup() {
        eprintln!("Unable to setup logging: {}", err);
    }

    let code = run().unwrap_or_else(|err| {
        error!("{}", err);
        err.exit_code()
    });
    log::logger().flush();
    process::exit(code);
}

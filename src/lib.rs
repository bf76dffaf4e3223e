pub mod err;
pub use err::{Error, Result};

pub mod logging;

pub mod config;
pub use config::JobConfig;

mod user;
pub use user::*;

mod proc;
pub use proc::*;

pub mod util;

pub mod setup;

pub mod executor;

pub mod sampler;
pub use sampler::{TimestampSample, TimestampSampler};

pub mod supervisor;
pub use supervisor::{JobOutcome, Supervisor};

pub mod render;
pub use render::OutputRenderer;

pub mod cleanup;
pub use cleanup::CleanupEngine;

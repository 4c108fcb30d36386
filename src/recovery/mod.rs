//! Version Recovery - browse, preview, restore and export past versions.

mod browser;
mod describe;

pub use browser::{VersionEntry, VersionRecovery};
pub use describe::{describe_version, time_ago};

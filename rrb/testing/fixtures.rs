use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::testing::prelude::*;

/// Include this in a test to turn on logging globally.
#[fixture]
#[once]
pub fn logging(#[default(Level::TRACE)] level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level.to_string()))
        .with_test_writer()
        .try_init();
}

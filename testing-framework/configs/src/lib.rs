use std::{ops::Mul as _, sync::LazyLock, time::Duration};

use cyclebench_env as cb_env;

pub mod activity_file;
pub mod logging;
pub mod timeouts;

pub use activity_file::{ActivityDescriptor, ActivityFile, ActivityFileError};

static IS_SLOW_TEST_ENV: LazyLock<bool> = LazyLock::new(cb_env::slow_test_env);

const SLOW_ENV_TIMEOUT_MULTIPLIER: u32 = 2;

/// In slow test environments like Codecov, use 2x timeout.
#[must_use]
pub fn adjust_timeout(d: Duration) -> Duration {
    if *IS_SLOW_TEST_ENV {
        d.mul(SLOW_ENV_TIMEOUT_MULTIPLIER)
    } else {
        d
    }
}

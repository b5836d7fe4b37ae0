#[allow(unused_imports)]
pub use error_stack::{Report, Result, ResultExt};
#[allow(unused_imports)]
pub use tracing::{debug, error, info, warn};

#[allow(unused_imports)]
pub use crate::errors::{AnyErr, BrokerError, LocExt};

/// Shorthand for a [`Result`] with a [`Report<BrokerError>`] as the error variant.
/// Every fallible operation in this crate funnels through the one error context.
#[allow(dead_code)]
pub type RResult<T> = Result<T, Report<BrokerError>>;

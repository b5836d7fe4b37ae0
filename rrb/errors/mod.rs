mod any;
mod broker_error;
mod result_ext;

pub use any::AnyErr;
pub use broker_error::BrokerError;
pub use result_ext::LocExt;

pub(crate) mod prelude {
    pub use error_stack::{bail, report, Result, ResultExt};

    pub use super::any::AnyErr;
    pub use super::broker_error::BrokerError;
    pub use super::result_ext::LocExt;
}

mod retry;
mod time_compat;
mod timeout;

pub use retry::*;
pub use time_compat::*;
pub use timeout::*;

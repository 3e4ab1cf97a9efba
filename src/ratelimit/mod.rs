//! Rate limiting logic and state management.

mod clock;
mod key;
mod limiter;
mod record;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{ClientIdentity, UNKNOWN_CLIENT_KEY};
pub use limiter::{FixedWindowLimiter, LimiterConfig};
pub use record::{Decision, ThrottleRecord};

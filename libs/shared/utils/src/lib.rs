pub mod clock;
pub mod phone;
pub mod test_utils;

pub use clock::{Clock, SystemClock};

pub mod booking;
pub mod snapshot;
pub mod time_span;

pub use booking::{Booking, Interval};
pub use snapshot::DiagnosticsSnapshot;
pub use time_span::TimeSpan;

pub mod authority;
pub mod currency;
pub mod extender;
pub mod publisher;
pub mod reconciler;

pub use authority::AlertAuthority;
pub use currency::is_current;
pub use reconciler::{reconcile, Reconciliation};

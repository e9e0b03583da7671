pub mod workshop;
pub mod registration;
pub mod waitlist;
pub mod payment_session;
pub mod refund;

pub use workshop::*;
pub use registration::*;
pub use waitlist::*;
pub use payment_session::*;
pub use refund::*;

pub mod admin;
pub mod onboarding;
pub mod payments;
pub mod refunds;
pub mod registrations;
pub mod root;
pub mod waitlist;
pub mod workshops;

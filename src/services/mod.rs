pub mod api;
pub mod booking;
pub mod checkout;
pub mod payment;
pub mod quote;
pub mod rental;
pub mod session;
pub mod transitions;

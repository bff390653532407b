pub mod availability;
pub mod booking;
pub mod payment;
pub mod session;

pub use availability::{Availability, AvailabilityQuery, PriceQuote};
pub use booking::{
    Booking, BookingStatus, BookingType, CreateBookingRequest, EntityRef, PriceBreakdown,
    RentalDuration, StatusUpdate, Stop, StopRequest,
};
pub use payment::{
    CreateOrderRequest, GatewayFailure, GatewayOrder, GatewaySuccess, PaymentOrder,
    PaymentRecord, VerifyPaymentRequest, VerifyPaymentResponse,
};
pub use session::{AuthUser, LoginRequest, LoginResponse, Role, Session};

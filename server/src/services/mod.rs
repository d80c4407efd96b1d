pub mod booking;
pub mod capacity;
pub mod checkin;
pub mod events;
pub mod issuance;
pub mod payments;

pub use booking::{BookRequest, BookingOutcome, BookingService, PaymentRequired};
pub use capacity::{CapacityLedger, ReserveError};
pub use checkin::{CheckInService, ScanAction, ScanOutcome, ScanRequest};
pub use events::{EventService, NewEvent};
pub use issuance::{IssueRequest, Issued, TicketIssuer};
pub use payments::{PaymentService, VerifyPayment};

pub mod attendee;
pub mod event;
pub mod lookup;
pub mod payment;
pub mod ticket;

pub use attendee::{AttendeeInfo, Embedded};
pub use event::{Event, EventStatus, NotBookable};
pub use lookup::{lookup_candidates, LookupKey};
pub use payment::{OrderStatus, PaymentOrder};
pub use ticket::{CheckIn, PaymentStatus, Ticket, TicketStatus};

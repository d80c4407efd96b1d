pub mod broadcaster;
pub mod events;
pub mod registry;
pub mod ws;

pub use broadcaster::{Broadcaster, LocalBroadcaster};
pub use events::{ClientFrame, DomainEvent, Scope, ServerFrame};
pub use registry::{ConnectionId, ConnectionRegistry};

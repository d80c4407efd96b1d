use std::sync::Arc;

use crate::auth::JwtKeys;
use crate::config::Config;
use crate::realtime::{Broadcaster, ConnectionRegistry, LocalBroadcaster};
use crate::services::{
    BookingService, CapacityLedger, CheckInService, EventService, PaymentService, TicketIssuer,
};
use crate::store::TicketStore;

/// Everything a handler can reach. Built once in `main` (or a test) and
/// cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<JwtKeys>,
    pub registry: Arc<ConnectionRegistry>,
    pub ledger: Arc<CapacityLedger>,
    pub checkin: Arc<CheckInService>,
    pub bookings: Arc<BookingService>,
    pub payments: Arc<PaymentService>,
    pub events: Arc<EventService>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn TicketStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(LocalBroadcaster::new(registry.clone()));
        let ledger = Arc::new(CapacityLedger::new(store.clone(), broadcaster.clone()));
        let issuer = Arc::new(TicketIssuer::new(store.clone(), ledger.clone(), broadcaster.clone()));

        let checkin = Arc::new(CheckInService::new(
            store.clone(),
            broadcaster.clone(),
            config.checkin_opens_before(),
        ));
        let bookings = Arc::new(BookingService::new(
            store.clone(),
            issuer.clone(),
            ledger.clone(),
            broadcaster.clone(),
            config.currency.clone(),
            config.cancellation_cutoff(),
        ));
        let payments = Arc::new(PaymentService::new(
            store.clone(),
            issuer.clone(),
            config.payment_key_id.clone(),
            config.payment_key_secret.clone(),
            config.currency.clone(),
        ));
        let events = Arc::new(EventService::new(store.clone()));

        Self {
            auth: Arc::new(JwtKeys::new(&config.jwt_secret)),
            config: Arc::new(config),
            registry,
            ledger,
            checkin,
            bookings,
            payments,
            events,
        }
    }
}

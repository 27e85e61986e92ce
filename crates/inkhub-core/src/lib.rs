pub mod accounts;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod mail;
pub mod model;
pub mod password_reset;
pub mod payments;
pub mod posts;
pub mod ratings;
pub mod reports;
pub mod stores;
pub mod uploads;
pub mod verification;

use std::sync::Arc;

use config::Config;
use db::Database;
use events::EventHub;
use mail::Mailer;
use payments::CheckoutGateway;

/// Everything a request handler needs: storage, settings and the outbound
/// edges (live events, mail, payment gateway).
///
/// Domain operations are implemented as `impl Marketplace` blocks in the
/// module that owns them.
pub struct Marketplace {
    pub db: Database,
    pub config: Config,
    pub events: EventHub,
    mailer: Arc<dyn Mailer>,
    gateway: Arc<dyn CheckoutGateway>,
}

impl Marketplace {
    pub fn new(
        db: Database,
        config: Config,
        mailer: Arc<dyn Mailer>,
        gateway: Arc<dyn CheckoutGateway>,
    ) -> Self {
        Self {
            db,
            config,
            events: EventHub::default(),
            mailer,
            gateway,
        }
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::db::queries;
use crate::models::Session;
use crate::services::api::{Anonymous, ApiClient, CredentialStore, RefreshPolicy, Transport};
use crate::services::payment::{PaymentRegistry, ATTEMPT_IDLE_LIMIT};
use crate::services::quote::BookingDraft;
use crate::services::rental::RentalApi;
use crate::services::session::SessionCredentials;

static ANONYMOUS: Anonymous = Anonymous;

/// (session id, vehicle id)
pub type DraftKey = (String, String);

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub transport: Box<dyn Transport>,
    pub refresh: RefreshPolicy,
    pub drafts: Mutex<HashMap<DraftKey, BookingDraft>>,
    pub payments: PaymentRegistry,
}

impl AppState {
    pub fn new(conn: Connection, config: AppConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            config,
            transport,
            refresh: RefreshPolicy::default(),
            drafts: Mutex::new(HashMap::new()),
            payments: PaymentRegistry::default(),
        }
    }

    pub fn credentials(&self, session: &Session) -> SessionCredentials {
        SessionCredentials::new(Arc::clone(&self.db), session.id.clone())
    }

    pub fn rental_api<'a>(&'a self, credentials: &'a dyn CredentialStore) -> RentalApi<'a> {
        RentalApi::new(ApiClient::new(
            self.transport.as_ref(),
            credentials,
            &self.refresh,
        ))
    }

    /// Deletes expired sessions, then forgets the drafts they left behind and
    /// payment attempts nobody has touched for a day. Returns how many
    /// sessions were deleted.
    pub fn purge_expired_sessions(&self) -> anyhow::Result<usize> {
        let (expired, live) = {
            let db = self.db.lock().unwrap();
            (queries::expire_old_sessions(&db)?, queries::session_ids(&db)?)
        };

        let orphaned = {
            let mut drafts = self.drafts.lock().unwrap();
            let before = drafts.len();
            drafts.retain(|(session_id, _), _| live.contains(session_id));
            before - drafts.len()
        };
        let idle = self.payments.sweep_idle(ATTEMPT_IDLE_LIMIT);

        if expired + orphaned + idle > 0 {
            tracing::info!(expired, orphaned, idle, "purged expired sessions");
        }
        Ok(expired)
    }

    /// Client for calls made before a session exists.
    pub fn anonymous_api(&self) -> RentalApi<'_> {
        self.rental_api(&ANONYMOUS)
    }
}

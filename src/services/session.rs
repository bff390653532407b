use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use rusqlite::Connection;

use crate::db::queries;
use crate::models::{LoginResponse, Session};
use crate::services::api::{CredentialStore, Credentials};

/// Token storage for one logged-in browser session, backed by the
/// `sessions` table.
pub struct SessionCredentials {
    db: Arc<Mutex<Connection>>,
    session_id: String,
}

impl SessionCredentials {
    pub fn new(db: Arc<Mutex<Connection>>, session_id: String) -> Self {
        Self { db, session_id }
    }
}

impl CredentialStore for SessionCredentials {
    fn load(&self) -> Option<Credentials> {
        let db = self.db.lock().unwrap();
        match queries::get_session(&db, &self.session_id) {
            Ok(session) => session.and_then(|s| {
                s.access_token.map(|access_token| Credentials {
                    access_token,
                    refresh_token: s.refresh_token,
                })
            }),
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "failed to load credentials");
                None
            }
        }
    }

    fn save(&self, credentials: &Credentials) {
        let db = self.db.lock().unwrap();
        if let Err(e) = queries::update_session_tokens(
            &db,
            &self.session_id,
            &credentials.access_token,
            credentials.refresh_token.as_deref(),
        ) {
            tracing::error!(session_id = %self.session_id, error = %e, "failed to store refreshed credentials");
        }
    }

    fn clear(&self) {
        let db = self.db.lock().unwrap();
        if let Err(e) = queries::clear_session_tokens(&db, &self.session_id) {
            tracing::error!(session_id = %self.session_id, error = %e, "failed to clear credentials");
        }
    }
}

pub fn new_session(login: LoginResponse, ttl_hours: i64) -> Session {
    let now = Utc::now().naive_utc();
    Session {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: login.user.id,
        user_name: login.user.name,
        role: login.user.role,
        access_token: Some(login.access_token),
        refresh_token: login.refresh_token,
        created_at: now,
        expires_at: now + Duration::hours(ttl_hours),
    }
}

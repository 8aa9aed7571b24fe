//! Persisted authenticated identity.
//!
//! Lifecycle: [`SessionStore::open`] loads any identity saved by a previous
//! run, [`SessionStore::save`] persists the identity after login or
//! registration, and [`SessionStore::clear`] forgets it on logout.

use std::sync::{Mutex, PoisonError, RwLock};

use tracing::{info, warn};

use vestnik_shared::constants::SESSION_KEY;
use vestnik_shared::Identity;

use crate::database::Database;
use crate::error::Result;

pub struct SessionStore {
    db: Mutex<Database>,
    current: RwLock<Option<Identity>>,
}

impl SessionStore {
    /// Wrap `db` and load the identity stored under the session key.
    ///
    /// A corrupt stored identity is discarded rather than failing startup.
    pub fn open(db: Database) -> Result<Self> {
        let current = match db.get_json::<Identity>(SESSION_KEY) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable stored session");
                db.delete_key(SESSION_KEY)?;
                None
            }
        };

        if let Some(ref identity) = current {
            info!(user = %identity.handle, "Restored session");
        }

        Ok(Self {
            db: Mutex::new(db),
            current: RwLock::new(current),
        })
    }

    /// Session store backed by a throwaway in-memory database.
    pub fn ephemeral() -> Result<Self> {
        Self::open(Database::open_in_memory()?)
    }

    pub fn current(&self) -> Option<Identity> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn save(&self, identity: &Identity) -> Result<()> {
        self.db
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put_json(SESSION_KEY, identity)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
        info!(user = %identity.handle, "Session saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.db
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .delete_key(SESSION_KEY)?;
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(identity) = previous {
            info!(user = %identity.handle, "Session cleared");
        }
        Ok(())
    }
}

//! User accounts.

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub nombre: String,
    pub role: String,
    pub password_hash: String,
}

impl User {
    pub fn new(email: &str, nombre: &str, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_ascii_lowercase(),
            nombre: nombre.to_string(),
            role: "user".to_string(),
            password_hash,
        }
    }
}

/// Account storage. Emails are unique, compared case-insensitively.
pub trait UserStore: Send + Sync {
    fn find_by_email(&self, email: &str) -> Option<User>;

    fn find_by_id(&self, id: &Uuid) -> Option<User>;

    /// Store a new user; `Conflict` when the email is taken.
    fn insert(&self, user: User) -> Result<(), AppError>;
}

/// Process-local store, lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    by_email: DashMap<String, User>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_email.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_email.is_empty()
    }
}

impl UserStore for InMemoryUserStore {
    fn find_by_email(&self, email: &str) -> Option<User> {
        self.by_email
            .get(&email.to_ascii_lowercase())
            .map(|u| u.clone())
    }

    fn find_by_id(&self, id: &Uuid) -> Option<User> {
        self.by_email
            .iter()
            .find(|entry| entry.id == *id)
            .map(|entry| entry.value().clone())
    }

    fn insert(&self, user: User) -> Result<(), AppError> {
        use dashmap::mapref::entry::Entry;

        match self.by_email.entry(user.email.to_ascii_lowercase()) {
            Entry::Occupied(_) => Err(AppError::Conflict(
                "Email is already registered".to_string(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(user);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_is_unique_case_insensitive() {
        let store = InMemoryUserStore::new();
        let user = User::new("Ana@Example.com", "Ana", "hash".into());
        let id = user.id;
        store.insert(user).unwrap();

        let err = store
            .insert(User::new("ana@example.COM", "Otra", "hash".into()))
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(store.len(), 1);

        assert_eq!(store.find_by_email("ANA@example.com").unwrap().id, id);
        assert_eq!(store.find_by_id(&id).unwrap().nombre, "Ana");
        assert!(store.find_by_email("nadie@example.com").is_none());
    }
}

//! Verrou d'exclusion par utilisateur
//!
//! Un utilisateur ne peut avoir qu'un seul lot de travail en vol. Ce verrou
//! est une porte de *rejet*, pas une file d'attente : un second lot pour le
//! même utilisateur est refusé immédiatement, charge à l'appelant d'en
//! informer l'utilisateur. Les utilisateurs distincts progressent en toute
//! concurrence.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Ensemble des utilisateurs verrouillés.
///
/// La section critique interne n'entoure que l'insertion/retrait dans le
/// set, jamais le lot de travail lui-même.
#[derive(Debug, Default)]
pub struct UserLocker {
    users: Arc<Mutex<HashSet<i64>>>,
}

impl UserLocker {
    /// Crée un verrou vide.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indique si l'utilisateur a déjà un lot en vol (requête non bloquante).
    pub fn is_locked(&self, user_id: i64) -> bool {
        let users = self.users.lock().expect("user locker mutex poisoned");
        users.contains(&user_id)
    }

    /// Tente de verrouiller l'utilisateur pour la durée d'un lot.
    ///
    /// Ne bloque jamais : retourne `None` si un lot est déjà en vol pour cet
    /// utilisateur. Le verrou est levé au drop du garde.
    pub fn lock(&self, user_id: i64) -> Option<UserLockGuard> {
        let mut users = self.users.lock().expect("user locker mutex poisoned");
        if !users.insert(user_id) {
            return None;
        }
        trace!(user_id, "utilisateur verrouillé");
        Some(UserLockGuard {
            users: Arc::clone(&self.users),
            user_id,
        })
    }
}

/// Garde de verrouillage d'un utilisateur, levé au drop.
#[derive(Debug)]
pub struct UserLockGuard {
    users: Arc<Mutex<HashSet<i64>>>,
    user_id: i64,
}

impl UserLockGuard {
    /// Identifiant de l'utilisateur verrouillé.
    pub fn user_id(&self) -> i64 {
        self.user_id
    }
}

impl Drop for UserLockGuard {
    fn drop(&mut self) {
        if let Ok(mut users) = self.users.lock() {
            users.remove(&self.user_id);
            trace!(user_id = self.user_id, "utilisateur déverrouillé");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_only_within_guard_lifetime() {
        let locker = UserLocker::new();
        assert!(!locker.is_locked(42));

        let guard = locker.lock(42).unwrap();
        assert!(locker.is_locked(42));
        assert_eq!(guard.user_id(), 42);

        drop(guard);
        assert!(!locker.is_locked(42));
    }

    #[test]
    fn test_second_lock_rejected_not_queued() {
        let locker = UserLocker::new();
        let _guard = locker.lock(7).unwrap();
        assert!(locker.lock(7).is_none());
    }

    #[test]
    fn test_distinct_users_are_independent() {
        let locker = UserLocker::new();
        let g1 = locker.lock(1).unwrap();
        let g2 = locker.lock(2).unwrap();
        assert!(locker.is_locked(1));
        assert!(locker.is_locked(2));
        drop(g1);
        assert!(!locker.is_locked(1));
        assert!(locker.is_locked(2));
        drop(g2);
    }
}

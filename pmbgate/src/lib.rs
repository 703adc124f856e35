//! # pmbgate - Primitives de synchronisation pour PMBot
//!
//! Cette crate fournit les primitives de contrôle d'admission partagées par
//! tout le bot : limitation de concurrence avec priorités, verrouillage par
//! utilisateur et sérialisation du backend de déchiffrement.
//!
//! ## Vue d'ensemble
//!
//! Trois ressources partagées doivent être arbitrées :
//! - le canal d'upload (nombre de transmissions simultanées borné)
//! - le backend de téléchargement/déchiffrement (nombre d'appels borné)
//! - le wrapper de déchiffrement, qui ne tolère aucun appel concurrent et
//!   impose un délai de repos entre deux utilisations
//!
//! ## Architecture
//!
//! ```text
//! pmbgate/
//! ├── src/
//! │   ├── lib.rs                  # Module principal (ce fichier)
//! │   ├── priority_semaphore.rs   # Sémaphore à deux classes de priorité
//! │   ├── user_locker.rs          # Verrou d'exclusion par utilisateur
//! │   └── wrapper_gate.rs         # Verrou single-flight avec délai de repos
//! ```
//!
//! ## Ordre d'acquisition
//!
//! Pour éviter tout interblocage entre les deux pools bornés, une tâche ne
//! détient jamais plus d'une admission en attendant l'autre, sauf dans
//! l'ordre documenté : `WrapperGate` (externe) puis sémaphore de
//! téléchargement (interne). Aucune section critique interne n'est conservée
//! à travers un point de suspension.
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmbgate::{Gates, Priority};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let gates = Arc::new(Gates::new(6, 2, Duration::from_secs(5)));
//!
//!     // Admission sur le canal d'upload, classe normale
//!     let permit = gates.upload.acquire(Priority::Normal).await;
//!     // ... transmission ...
//!     drop(permit);
//! }
//! ```

pub mod priority_semaphore;
pub mod user_locker;
pub mod wrapper_gate;

pub use priority_semaphore::{Priority, PrioritySemaphore, SemaphorePermit};
pub use user_locker::{UserLockGuard, UserLocker};
pub use wrapper_gate::{WrapperGate, WrapperPermit};

use std::time::Duration;

/// Ensemble des portes d'admission du processus.
///
/// Construit une seule fois au démarrage puis injecté par `Arc` dans les
/// composants qui en ont besoin. Aucune réinitialisation implicite.
#[derive(Debug)]
pub struct Gates {
    /// Admissions sur le canal d'upload (transmissions simultanées).
    pub upload: PrioritySemaphore,
    /// Admissions sur le backend de téléchargement.
    pub download: PrioritySemaphore,
    /// Sérialisation du wrapper de déchiffrement.
    pub wrapper: WrapperGate,
    /// Exclusion par utilisateur (un lot de travail à la fois).
    pub users: UserLocker,
}

impl Gates {
    /// Crée l'ensemble des portes avec les capacités configurées.
    ///
    /// # Arguments
    ///
    /// * `upload_slots` - Transmissions simultanées maximales
    /// * `download_slots` - Téléchargements simultanés maximaux
    /// * `wrapper_cool_down` - Délai de repos après chaque usage du wrapper
    pub fn new(upload_slots: usize, download_slots: usize, wrapper_cool_down: Duration) -> Self {
        Self {
            upload: PrioritySemaphore::new(upload_slots),
            download: PrioritySemaphore::new(download_slots),
            wrapper: WrapperGate::new(wrapper_cool_down),
            users: UserLocker::new(),
        }
    }
}

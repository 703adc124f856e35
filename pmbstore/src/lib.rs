//! # PMBStore : persistance SQLite de PMBot
//!
//! Cette crate porte la base de données du bot : enregistrements de cache
//! (chansons et clips déjà uploadés dans les chats de stockage) et comptes
//! utilisateur (crédits, abonnements, préférences, compteurs). Elle
//! implémente les traits `MediaLedger` et `UserLedger` de `pmbwork`, qui la
//! branchent sur l'orchestrateur.
//!
//! ## Architecture
//!
//! ```text
//! pmbstore
//! ├── db      : Store, schéma et opérations SQLite
//! └── ledger  : adaptateurs async vers les traits de pmbwork
//! ```

pub mod db;
pub mod ledger;

pub use db::{Store, UserAccount};

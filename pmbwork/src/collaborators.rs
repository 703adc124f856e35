//! Interfaces des collaborateurs externes
//!
//! L'orchestrateur ne connaît ni le protocole de chat, ni le format des
//! médias, ni le moteur de persistance : il passe par ces traits étroits.
//! Les implémentations réelles vivent dans les couches exclues (transport
//! du bot, téléchargeur) ou dans `pmbstore` pour les registres.

use crate::error::FetchError;
use crate::item::{FetchedMedia, SongCodec, WorkItem};
use crate::records::{Entitlement, MusicVideoRecord, SongRecord};
use crate::report::{BatchReport, ItemOutcome};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

/// Message déjà présent dans un chat de stockage.
///
/// La légende porte l'identité du média ; le validateur de cache s'en sert
/// pour détecter une dérive entre la clé de cache et le contenu réel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMessage {
    pub message_id: i64,
    pub caption: String,
}

/// Upload d'une piste audio vers le chat de stockage.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub source: PathBuf,
    pub caption: String,
    pub duration_secs: u32,
    pub performer: String,
    pub title: String,
    pub file_name: String,
    pub thumbnail: Option<Vec<u8>>,
}

/// Upload d'un clip vers le chat de stockage.
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub source: PathBuf,
    pub caption: String,
    pub duration_secs: u32,
    pub file_name: String,
    pub thumbnail: Option<Vec<u8>>,
    pub supports_streaming: bool,
}

/// Upload d'un document (fichier de paroles synchronisées).
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub content: Vec<u8>,
    pub caption: String,
    pub file_name: String,
}

/// Backend de téléchargement/déchiffrement.
///
/// Peut être lent ; l'orchestrateur l'appelle toujours sous un délai
/// externe et sous les admissions de portes appropriées.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, item: &WorkItem) -> std::result::Result<FetchedMedia, FetchError>;
}

/// Canal de livraison : relecture, copie et upload de messages.
///
/// Sert aussi bien aux hits de cache (re-copie d'une référence stockée)
/// qu'aux artefacts frais.
#[async_trait]
pub trait Courier: Send + Sync {
    /// Relit un message du chat de stockage, `None` s'il a disparu.
    async fn peek_message(&self, chat_id: i64, message_id: i64) -> Result<Option<CachedMessage>>;

    /// Copie un message stocké vers le chat du demandeur.
    async fn copy_message(&self, to_chat_id: i64, from_chat_id: i64, message_id: i64)
        -> Result<i64>;

    async fn send_audio(&self, chat_id: i64, upload: AudioUpload) -> Result<i64>;

    async fn send_video(&self, chat_id: i64, upload: VideoUpload) -> Result<i64>;

    async fn send_document(&self, chat_id: i64, upload: DocumentUpload) -> Result<i64>;
}

/// Remontée des issues vers le demandeur.
///
/// Les notifications sont typées ; leur mise en forme (textes, locales)
/// appartient à la couche bot exclue.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn item_outcome(&self, user_id: i64, item: &WorkItem, outcome: &ItemOutcome);

    async fn batch_outcome(&self, user_id: i64, report: &BatchReport);
}

/// Registre des artefacts en cache.
///
/// Le coeur ne détient jamais un enregistrement au-delà d'une décision : il
/// lit, décide, et remplace en bloc si nécessaire.
#[async_trait]
pub trait MediaLedger: Send + Sync {
    async fn get_song(&self, media_id: &str, codec: SongCodec) -> Result<Option<SongRecord>>;

    async fn put_song(&self, record: &SongRecord) -> Result<()>;

    async fn get_music_video(&self, media_id: &str, uhd: bool)
        -> Result<Option<MusicVideoRecord>>;

    async fn put_music_video(&self, record: &MusicVideoRecord) -> Result<()>;
}

/// Registre des droits utilisateur.
#[async_trait]
pub trait UserLedger: Send + Sync {
    /// Solde et abonnement du demandeur, relus avant chaque élément.
    async fn entitlement(&self, user_id: i64) -> Result<Entitlement>;

    /// Débite `amount` crédits.
    async fn charge(&self, user_id: i64, amount: i64) -> Result<()>;

    /// Comptabilise une chanson livrée (hit de cache compris).
    async fn note_song_delivered(&self, user_id: i64) -> Result<()>;

    /// Comptabilise un clip livré (hit de cache compris).
    async fn note_video_delivered(&self, user_id: i64) -> Result<()>;
}

/// Zone de staging disque, libérée sur chaque chemin de sortie.
#[async_trait]
pub trait Staging: Send + Sync {
    /// Supprime la zone temporaire associée au jeton de l'élément.
    async fn cleanup(&self, token: Uuid) -> Result<()>;
}

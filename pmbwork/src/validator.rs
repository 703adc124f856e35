//! Validation des enregistrements de cache
//!
//! Décisions pures, sans aucune E/S : l'orchestrateur relit d'abord les
//! messages du chat de stockage, puis soumet l'état résolu au validateur.
//! Toute invalidité, quelle qu'en soit la raison, vaut absence de cache et
//! déclenche un re-téléchargement complet — jamais de réparation partielle.

use crate::collaborators::CachedMessage;
use crate::item::WorkItem;
use crate::records::{MusicVideoRecord, SongRecord};

/// Verdict du validateur pour un enregistrement résolu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// L'artefact stocké peut être servi tel quel.
    Valid,
    /// Absence de cache effective : re-télécharger.
    Invalid,
    /// Verdict terminal : contenu trop volumineux, rien à servir ni à
    /// re-télécharger.
    TooLarge,
}

/// Décide si une chanson en cache peut être servie.
///
/// L'enregistrement est valide si, conjointement :
/// - le message audio existe encore ;
/// - si les métadonnées amont annoncent des paroles synchronisées,
///   l'enregistrement en référence un fichier ;
/// - si l'enregistrement référence un fichier de paroles, ce message existe
///   encore ;
/// - la légende du message audio contient l'identifiant du média demandé
///   (défense contre une dérive entre clé de cache et contenu stocké).
pub fn song_cache_decision(
    record: &SongRecord,
    song_msg: Option<&CachedMessage>,
    lyrics_msg: Option<&CachedMessage>,
    item: &WorkItem,
) -> CacheDecision {
    let Some(song_msg) = song_msg else {
        return CacheDecision::Invalid;
    };

    if record.lyrics_message_id.is_none() && item.synced_lyrics_expected {
        return CacheDecision::Invalid;
    }

    if record.lyrics_message_id.is_some() && lyrics_msg.is_none() {
        return CacheDecision::Invalid;
    }

    if !song_msg.caption.contains(&item.media_id) {
        return CacheDecision::Invalid;
    }

    CacheDecision::Valid
}

/// Décide si un clip en cache peut être servi.
///
/// Le verdict `too_large` est terminal et court-circuite tout le reste ;
/// sinon le message doit exister et sa légende contenir l'identifiant du
/// média.
pub fn video_cache_decision(
    record: &MusicVideoRecord,
    msg: Option<&CachedMessage>,
    item: &WorkItem,
) -> CacheDecision {
    if record.too_large {
        return CacheDecision::TooLarge;
    }

    let Some(msg) = msg else {
        return CacheDecision::Invalid;
    };

    if !msg.caption.contains(&item.media_id) {
        return CacheDecision::Invalid;
    }

    CacheDecision::Valid
}

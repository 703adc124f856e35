//! Unités de travail et artefacts récupérés
//!
//! Un `WorkItem` décrit un média demandé par un utilisateur : identité du
//! demandeur, identité du média, variante (codec ou qualité vidéo) et
//! indications issues des métadonnées amont. Il est créé par la couche de
//! commande, consommé une seule fois par l'orchestrateur, puis oublié.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Nature du média demandé.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Piste audio.
    Song,
    /// Clip vidéo.
    MusicVideo,
}

/// Codec audio demandé.
///
/// `AacLegacy` est le seul codec servi sans passer par le wrapper de
/// déchiffrement ; toutes les autres variantes empruntent le backend
/// sérialisé.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SongCodec {
    AacLegacy,
    Aac,
    Alac,
    Atmos,
}

impl SongCodec {
    /// Libellé stable, utilisé dans les légendes et en base.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AacLegacy => "aac-legacy",
            Self::Aac => "aac",
            Self::Alac => "alac",
            Self::Atmos => "atmos",
        }
    }

    /// Reconstruit un codec depuis son libellé stable.
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "aac-legacy" => Some(Self::AacLegacy),
            "aac" => Some(Self::Aac),
            "alac" => Some(Self::Alac),
            "atmos" => Some(Self::Atmos),
            _ => None,
        }
    }
}

/// Qualité vidéo demandée.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoQuality {
    Hd,
    Uhd,
}

impl VideoQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hd => "hd",
            Self::Uhd => "uhd",
        }
    }

    pub fn is_uhd(&self) -> bool {
        matches!(self, Self::Uhd)
    }
}

/// Média demandé par un utilisateur, consommé une seule fois.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Demandeur.
    pub user_id: i64,
    /// Chat où livrer le résultat.
    pub chat_id: i64,
    /// Identifiant catalogue du média.
    pub media_id: String,
    /// Titre lisible, pour les notifications.
    pub title: String,
    /// Nature du média.
    pub kind: MediaKind,
    /// Codec audio voulu (ignoré pour un clip).
    pub codec: SongCodec,
    /// Qualité vidéo voulue (ignorée pour une chanson).
    pub quality: VideoQuality,
    /// Les métadonnées amont annoncent des paroles synchronisées.
    pub synced_lyrics_expected: bool,
    /// L'utilisateur veut recevoir le fichier de paroles.
    pub wants_synced_lyrics_file: bool,
    /// Jeton du répertoire de staging propre à cet élément.
    pub staging_token: Uuid,
}

impl WorkItem {
    /// Indique si cet élément doit passer par le wrapper sérialisé.
    pub fn uses_wrapper(&self) -> bool {
        self.kind == MediaKind::Song && self.codec != SongCodec::AacLegacy
    }
}

/// Artefact produit par le backend de téléchargement.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    /// Fichier produit dans la zone de staging.
    pub staged_path: PathBuf,
    /// Taille du fichier produit, en octets.
    pub file_size: u64,
    /// Durée du média, en secondes.
    pub duration_secs: u32,
    /// Artiste, pour les métadonnées d'upload.
    pub artist: String,
    /// Titre, pour les métadonnées d'upload.
    pub title: String,
    /// Nom de fichier à exposer lors de l'upload.
    pub file_name: String,
    /// Paroles synchronisées si le média en possède.
    pub synced_lyrics: Option<String>,
    /// Pochette réduite pour la miniature d'upload.
    pub cover: Option<Vec<u8>>,
}

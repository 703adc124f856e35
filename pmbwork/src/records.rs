//! Enregistrements persistés : artefacts en cache et droits utilisateur
//!
//! Un enregistrement de cache référence un artefact déjà uploadé dans le
//! chat de stockage. Il est produit une fois par couple (média, variante),
//! relu à chaque nouvelle demande, et remplacé en bloc lors d'un
//! re-téléchargement — jamais réparé partiellement.

use crate::item::SongCodec;
use chrono::{DateTime, Utc};
use pmbgate::Priority;
use serde::{Deserialize, Serialize};

/// Référence d'une chanson déjà uploadée.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongRecord {
    /// Identifiant catalogue du média.
    pub media_id: String,
    /// Codec de la variante stockée.
    pub codec: SongCodec,
    /// Message du chat de stockage contenant l'audio.
    pub song_message_id: i64,
    /// Message contenant le fichier de paroles synchronisées, s'il existe.
    pub lyrics_message_id: Option<i64>,
}

/// Référence d'un clip déjà uploadé.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicVideoRecord {
    /// Identifiant catalogue du média.
    pub media_id: String,
    /// Variante 4K.
    pub uhd: bool,
    /// Verdict terminal : le contenu dépasse la taille livrable.
    ///
    /// Un enregistrement `too_large` est un résultat de cache valable, à ne
    /// pas confondre avec une absence de cache.
    pub too_large: bool,
    /// Message du chat de stockage contenant la vidéo, absent si `too_large`.
    pub message_id: Option<i64>,
}

/// Droits d'un utilisateur au moment d'une demande.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entitlement {
    /// Crédits de téléchargement restants.
    pub credits: i64,
    /// Fin d'abonnement, si l'utilisateur en a un.
    pub membership_until: Option<DateTime<Utc>>,
}

impl Entitlement {
    /// Abonnement actif à cet instant.
    pub fn is_member(&self) -> bool {
        match self.membership_until {
            Some(until) => until > Utc::now(),
            None => false,
        }
    }

    /// Un membre actif ou un utilisateur avec des crédits peut télécharger.
    pub fn can_download(&self) -> bool {
        self.is_member() || self.credits > 0
    }

    /// Classe de priorité d'admission : les membres passent devant.
    pub fn priority(&self) -> Priority {
        if self.is_member() {
            Priority::High
        } else {
            Priority::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_membership_activity() {
        let none = Entitlement {
            credits: 0,
            membership_until: None,
        };
        assert!(!none.is_member());
        assert!(!none.can_download());
        assert_eq!(none.priority(), Priority::Normal);

        let expired = Entitlement {
            credits: 2,
            membership_until: Some(Utc::now() - Duration::days(1)),
        };
        assert!(!expired.is_member());
        assert!(expired.can_download());
        assert_eq!(expired.priority(), Priority::Normal);

        let active = Entitlement {
            credits: 0,
            membership_until: Some(Utc::now() + Duration::days(30)),
        };
        assert!(active.is_member());
        assert!(active.can_download());
        assert_eq!(active.priority(), Priority::High);
    }
}

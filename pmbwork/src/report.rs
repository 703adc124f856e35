//! Issues par élément et bilan de lot
//!
//! Chaque élément d'un lot se termine par une issue unique, notifiée
//! individuellement au demandeur. Le bilan du lot, lui, est binaire :
//! complet, ou complet avec erreurs — le détail n'est agrégé que sous forme
//! de compteur.

use serde::{Deserialize, Serialize};

/// Motif de refus décidé par le filtre d'écran avant tout travail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Les clips sont réservés aux membres.
    MembershipRequired,
}

/// Issue terminale d'un élément du lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemOutcome {
    /// Servi depuis le cache, sans aucune admission de porte ni débit.
    DeliveredFromCache,
    /// Téléchargé, uploadé et livré ; un crédit débité sauf pour un membre.
    Delivered,
    /// Contenu trop volumineux pour être livré (verdict terminal, persisté).
    TooLarge,
    /// Le format demandé n'existe pas pour ce média.
    FormatNotAvailable,
    /// Média non diffusable.
    NotStreamable,
    /// Crédits épuisés : l'élément n'est pas tenté et le lot s'arrête.
    InsufficientCredits,
    /// Délai de téléchargement dépassé : le lot s'arrête.
    TimedOut,
    /// Refusé par le filtre d'écran.
    Rejected(RejectReason),
    /// Défaillance du backend ou de la livraison, comptée dans les erreurs.
    Failed,
}

/// Raison d'un arrêt anticipé du lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// Un téléchargement a dépassé son délai.
    Timeout,
    /// Les crédits du demandeur sont épuisés en cours de lot.
    CreditsExhausted,
}

/// Bilan binaire d'un lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Complete,
    CompleteWithErrors,
}

/// Issue d'un élément, rattachée à son média.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub media_id: String,
    pub outcome: ItemOutcome,
}

/// Bilan d'un lot de travail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Issues par élément, dans l'ordre de traitement.
    pub outcomes: Vec<ItemReport>,
    /// Nombre de défaillances de téléchargement ou de livraison.
    pub fetch_errors: u32,
    /// Arrêt anticipé éventuel.
    pub aborted: Option<AbortReason>,
}

impl BatchReport {
    /// Statut binaire du lot.
    ///
    /// Un arrêt anticipé est signalé même si le compteur d'erreurs est
    /// resté à zéro : l'épuisement des crédits n'est pas une erreur de
    /// téléchargement mais le lot n'est pas allé au bout.
    pub fn status(&self) -> BatchStatus {
        if self.fetch_errors > 0 || self.aborted.is_some() {
            BatchStatus::CompleteWithErrors
        } else {
            BatchStatus::Complete
        }
    }

    /// Issue enregistrée pour un média donné, si l'élément a été atteint.
    pub fn outcome_for(&self, media_id: &str) -> Option<&ItemOutcome> {
        self.outcomes
            .iter()
            .find(|r| r.media_id == media_id)
            .map(|r| &r.outcome)
    }
}

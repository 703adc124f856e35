//! Stratégie de pré-filtrage des éléments d'un lot
//!
//! La couche de commande décide, par lot, comment interroger le cache pour
//! chaque élément : quelle variante chercher, et quels éléments refuser
//! d'emblée (un clip pour un non-membre, par exemple). Cette décision est
//! un objet de stratégie passé à l'orchestrateur, pas une closure capturant
//! l'état ambiant.

use crate::collaborators::MediaLedger;
use crate::item::{MediaKind, WorkItem};
use crate::records::{MusicVideoRecord, SongRecord};
use crate::report::RejectReason;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Verdict du filtre pour un élément.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screening {
    /// Chanson, avec son éventuel enregistrement de cache.
    Song(Option<SongRecord>),
    /// Clip, avec son éventuel enregistrement de cache.
    MusicVideo(Option<MusicVideoRecord>),
    /// Élément refusé avant tout travail.
    Reject(RejectReason),
}

/// Stratégie de pré-filtrage, fournie par la couche de commande à chaque
/// lot.
#[async_trait]
pub trait FlatFilter: Send + Sync {
    async fn screen(&self, item: &WorkItem) -> Result<Screening>;
}

/// Filtre standard : consulte le registre de cache, et réserve les clips
/// aux membres.
pub struct LedgerFlatFilter {
    ledger: Arc<dyn MediaLedger>,
    requester_is_member: bool,
}

impl LedgerFlatFilter {
    pub fn new(ledger: Arc<dyn MediaLedger>, requester_is_member: bool) -> Self {
        Self {
            ledger,
            requester_is_member,
        }
    }
}

#[async_trait]
impl FlatFilter for LedgerFlatFilter {
    async fn screen(&self, item: &WorkItem) -> Result<Screening> {
        match item.kind {
            MediaKind::Song => {
                let record = self.ledger.get_song(&item.media_id, item.codec).await?;
                Ok(Screening::Song(record))
            }
            MediaKind::MusicVideo => {
                if !self.requester_is_member {
                    return Ok(Screening::Reject(RejectReason::MembershipRequired));
                }
                let record = self
                    .ledger
                    .get_music_video(&item.media_id, item.quality.is_uhd())
                    .await?;
                Ok(Screening::MusicVideo(record))
            }
        }
    }
}

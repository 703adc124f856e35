//! Orchestrateur des lots de téléchargement
//!
//! Machine d'états par lot :
//! `REÇU → boucle par élément → {HIT → LIVRÉ} | {MISS → ADMIS → FETCH →
//! (succès | délai | erreur)} → comptabilité → élément suivant | fin`.
//!
//! Le lot entier est refusé si l'utilisateur a déjà un lot en vol. Sur
//! chaque élément, la validité du cache est évaluée d'abord ; en cas de
//! miss, les droits du demandeur sont relus (un élément précédent du même
//! lot peut les avoir épuisés), puis le téléchargement se fait sous les
//! admissions de portes et sous délai. Seul un dépassement de délai
//! interrompt le lot ; les autres erreurs sont notifiées élément par
//! élément et le lot continue.

use crate::collaborators::{
    AudioUpload, Courier, DocumentUpload, MediaFetcher, MediaLedger, Notifier, Staging,
    UserLedger, VideoUpload,
};
use crate::error::{FetchError, OrchestratorError};
use crate::flat_filter::{FlatFilter, Screening};
use crate::item::{FetchedMedia, MediaKind, WorkItem};
use crate::records::{Entitlement, MusicVideoRecord, SongRecord};
use crate::report::{AbortReason, BatchReport, ItemOutcome, ItemReport};
use crate::validator::{song_cache_decision, video_cache_decision, CacheDecision};
use anyhow::Result;
use pmbgate::Gates;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Paramètres de fonctionnement de l'orchestrateur.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Délai maximal accordé à un téléchargement.
    pub download_timeout: Duration,
    /// Pause entre deux éléments non servis depuis le cache.
    pub pacing_delay: Duration,
    /// Chat de stockage des chansons.
    pub song_cache_chat_id: i64,
    /// Chat de stockage des clips.
    pub music_video_cache_chat_id: i64,
    /// Taille maximale d'une vidéo uploadable, en octets.
    pub max_video_upload_bytes: u64,
}

/// Collaborateurs externes injectés à la construction.
pub struct Collaborators {
    pub fetcher: Arc<dyn MediaFetcher>,
    pub courier: Arc<dyn Courier>,
    pub notifier: Arc<dyn Notifier>,
    pub media: Arc<dyn MediaLedger>,
    pub users: Arc<dyn UserLedger>,
    pub staging: Arc<dyn Staging>,
}

/// Lot de travail issu d'une demande entrante.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub user_id: i64,
    pub items: Vec<WorkItem>,
}

/// Suite du traitement après un élément.
enum ItemFlow {
    Continue,
    Abort(AbortReason),
}

/// Orchestrateur : compose portes, validateur de cache et collaborateurs.
pub struct WorkOrchestrator {
    gates: Arc<Gates>,
    collab: Collaborators,
    config: OrchestratorConfig,
}

impl WorkOrchestrator {
    pub fn new(gates: Arc<Gates>, collab: Collaborators, config: OrchestratorConfig) -> Self {
        Self {
            gates,
            collab,
            config,
        }
    }

    /// Traite un lot complet pour un utilisateur.
    ///
    /// Refuse immédiatement si un lot est déjà en vol pour cet utilisateur ;
    /// sinon le verrou utilisateur est tenu pour toute la durée du lot.
    pub async fn process_batch(
        &self,
        request: &BatchRequest,
        filter: &dyn FlatFilter,
    ) -> Result<BatchReport, OrchestratorError> {
        let Some(_user_lock) = self.gates.users.lock(request.user_id) else {
            debug!(user_id = request.user_id, "lot refusé, un autre est en vol");
            return Err(OrchestratorError::AlreadyInProgress(request.user_id));
        };
        info!(
            user_id = request.user_id,
            items = request.items.len(),
            "début du lot"
        );

        let mut report = BatchReport::default();
        let mut items = request.items.iter();
        while let Some(item) = items.next() {
            match self.process_item(item, filter, &mut report).await {
                ItemFlow::Continue => {}
                ItemFlow::Abort(reason) => {
                    report.aborted = Some(reason);
                    if reason == AbortReason::CreditsExhausted {
                        // Les éléments restants ne sont pas tentés, mais
                        // chacun reçoit son issue individuelle.
                        for rest in items.by_ref() {
                            self.record_outcome(&mut report, rest, ItemOutcome::InsufficientCredits)
                                .await;
                        }
                    }
                    break;
                }
            }
        }

        info!(
            user_id = request.user_id,
            status = ?report.status(),
            fetch_errors = report.fetch_errors,
            "fin du lot"
        );
        self.collab
            .notifier
            .batch_outcome(request.user_id, &report)
            .await;
        Ok(report)
    }

    /// Traite un seul élément et décide de la suite du lot.
    ///
    /// La zone de staging de l'élément est nettoyée sur chaque chemin de
    /// sortie, chemin de cache et refus compris.
    async fn process_item(
        &self,
        item: &WorkItem,
        filter: &dyn FlatFilter,
        report: &mut BatchReport,
    ) -> ItemFlow {
        let (flow, fetched) = self.dispatch_item(item, filter, report).await;

        if let Err(err) = self.collab.staging.cleanup(item.staging_token).await {
            warn!(media_id = %item.media_id, %err, "nettoyage du staging impossible");
        }
        // L'élément n'a pas été servi depuis le cache : on cadence le canal
        // d'upload avant l'élément suivant.
        if fetched && !matches!(flow, ItemFlow::Abort(_)) {
            tokio::time::sleep(self.config.pacing_delay).await;
        }
        flow
    }

    /// Filtre, sert depuis le cache, ou télécharge et livre. Retourne la
    /// suite du lot et l'indication qu'un téléchargement a été tenté.
    async fn dispatch_item(
        &self,
        item: &WorkItem,
        filter: &dyn FlatFilter,
        report: &mut BatchReport,
    ) -> (ItemFlow, bool) {
        let screening = match filter.screen(item).await {
            Ok(screening) => screening,
            Err(err) => {
                error!(media_id = %item.media_id, user_id = item.user_id, %err,
                    "échec du pré-filtrage");
                self.record_outcome(report, item, ItemOutcome::Failed).await;
                return (ItemFlow::Continue, false);
            }
        };

        if let Screening::Reject(reason) = &screening {
            self.record_outcome(report, item, ItemOutcome::Rejected(*reason))
                .await;
            return (ItemFlow::Continue, false);
        }

        match self.try_serve_from_cache(item, &screening).await {
            Ok(Some(outcome)) => {
                // Servi sans admission de porte ni débit de crédit.
                self.record_outcome(report, item, outcome).await;
                return (ItemFlow::Continue, false);
            }
            Ok(None) => {}
            Err(err) => {
                error!(media_id = %item.media_id, %err, "échec du service depuis le cache");
                self.record_outcome(report, item, ItemOutcome::Failed).await;
                return (ItemFlow::Continue, false);
            }
        }

        // Miss : les droits sont relus avant chaque élément, un précédent
        // élément du lot peut avoir épuisé le solde.
        let entitlement = match self.collab.users.entitlement(item.user_id).await {
            Ok(entitlement) => entitlement,
            Err(err) => {
                error!(user_id = item.user_id, %err, "droits illisibles");
                self.record_outcome(report, item, ItemOutcome::Failed).await;
                return (ItemFlow::Continue, false);
            }
        };
        if !entitlement.can_download() {
            self.record_outcome(report, item, ItemOutcome::InsufficientCredits)
                .await;
            return (ItemFlow::Abort(AbortReason::CreditsExhausted), false);
        }

        (
            self.fetch_and_deliver(item, &entitlement, report).await,
            true,
        )
    }

    /// Tente de servir l'élément depuis le cache.
    ///
    /// `Ok(None)` signifie miss effectif : enregistrement absent ou invalide,
    /// dans les deux cas on re-télécharge en bloc.
    async fn try_serve_from_cache(
        &self,
        item: &WorkItem,
        screening: &Screening,
    ) -> Result<Option<ItemOutcome>> {
        match screening {
            Screening::Song(Some(record)) => {
                let chat = self.config.song_cache_chat_id;
                let song_msg = self
                    .collab
                    .courier
                    .peek_message(chat, record.song_message_id)
                    .await?;
                let lyrics_msg = match record.lyrics_message_id {
                    Some(id) => self.collab.courier.peek_message(chat, id).await?,
                    None => None,
                };

                match song_cache_decision(record, song_msg.as_ref(), lyrics_msg.as_ref(), item) {
                    CacheDecision::Valid => {
                        self.collab
                            .courier
                            .copy_message(item.chat_id, chat, record.song_message_id)
                            .await?;
                        if let Some(lyrics_id) = record.lyrics_message_id {
                            if lyrics_msg.is_some() && item.wants_synced_lyrics_file {
                                self.collab
                                    .courier
                                    .copy_message(item.chat_id, chat, lyrics_id)
                                    .await?;
                            }
                        }
                        self.collab.users.note_song_delivered(item.user_id).await?;
                        info!(media_id = %item.media_id, "chanson servie depuis le cache");
                        Ok(Some(ItemOutcome::DeliveredFromCache))
                    }
                    _ => Ok(None),
                }
            }
            Screening::MusicVideo(Some(record)) => {
                let chat = self.config.music_video_cache_chat_id;
                let msg = match record.message_id {
                    Some(id) if !record.too_large => {
                        self.collab.courier.peek_message(chat, id).await?
                    }
                    _ => None,
                };

                match video_cache_decision(record, msg.as_ref(), item) {
                    CacheDecision::TooLarge => {
                        debug!(media_id = %item.media_id, "verdict trop volumineux en cache");
                        Ok(Some(ItemOutcome::TooLarge))
                    }
                    CacheDecision::Valid => {
                        let message_id = record.message_id.unwrap_or_default();
                        self.collab
                            .courier
                            .copy_message(item.chat_id, chat, message_id)
                            .await?;
                        self.collab.users.note_video_delivered(item.user_id).await?;
                        info!(media_id = %item.media_id, "clip servi depuis le cache");
                        Ok(Some(ItemOutcome::DeliveredFromCache))
                    }
                    CacheDecision::Invalid => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    /// Télécharge sous admissions et délai, puis livre et comptabilise.
    async fn fetch_and_deliver(
        &self,
        item: &WorkItem,
        entitlement: &Entitlement,
        report: &mut BatchReport,
    ) -> ItemFlow {
        let priority = entitlement.priority();
        info!(media_id = %item.media_id, ?priority, wrapper = item.uses_wrapper(),
            "téléchargement");

        let fetched = if item.uses_wrapper() {
            // Wrapper d'abord (externe), slot de téléchargement ensuite
            // (interne) : un appelant en file pour un slot ne retient pas
            // le wrapper.
            let _wrapper = self.gates.wrapper.acquire().await;
            let _slot = self.gates.download.acquire(priority).await;
            timeout(self.config.download_timeout, self.collab.fetcher.fetch(item)).await
        } else {
            let _slot = self.gates.download.acquire(priority).await;
            timeout(self.config.download_timeout, self.collab.fetcher.fetch(item)).await
        };

        let media = match fetched {
            Err(_) => {
                warn!(media_id = %item.media_id, "délai de téléchargement dépassé, arrêt du lot");
                self.record_outcome(report, item, ItemOutcome::TimedOut).await;
                return ItemFlow::Abort(AbortReason::Timeout);
            }
            Ok(Err(FetchError::FormatNotAvailable)) => {
                self.record_outcome(report, item, ItemOutcome::FormatNotAvailable)
                    .await;
                return ItemFlow::Continue;
            }
            Ok(Err(FetchError::NotStreamable)) => {
                self.record_outcome(report, item, ItemOutcome::NotStreamable)
                    .await;
                return ItemFlow::Continue;
            }
            Ok(Err(FetchError::Other(err))) => {
                error!(media_id = %item.media_id, %err, "échec du téléchargement");
                self.record_outcome(report, item, ItemOutcome::Failed).await;
                return ItemFlow::Continue;
            }
            Ok(Ok(media)) => media,
        };

        match match item.kind {
            MediaKind::Song => self.deliver_song(item, &media, priority).await,
            MediaKind::MusicVideo => self.deliver_video(item, &media, priority).await,
        } {
            Ok(outcome) => {
                if outcome == ItemOutcome::Delivered && !entitlement.is_member() {
                    if let Err(err) = self.collab.users.charge(item.user_id, 1).await {
                        warn!(user_id = item.user_id, %err, "débit de crédit impossible");
                    }
                }
                self.record_outcome(report, item, outcome).await;
            }
            Err(err) => {
                error!(media_id = %item.media_id, %err, "échec de la livraison");
                self.record_outcome(report, item, ItemOutcome::Failed).await;
            }
        }
        ItemFlow::Continue
    }

    /// Upload, persiste et copie une chanson fraîchement téléchargée.
    async fn deliver_song(
        &self,
        item: &WorkItem,
        media: &FetchedMedia,
        priority: pmbgate::Priority,
    ) -> Result<ItemOutcome> {
        let chat = self.config.song_cache_chat_id;

        let song_message_id = {
            let _permit = self.gates.upload.acquire(priority).await;
            self.collab
                .courier
                .send_audio(
                    chat,
                    AudioUpload {
                        source: media.staged_path.clone(),
                        caption: format!("{} {} song", item.media_id, item.codec.as_str()),
                        duration_secs: media.duration_secs,
                        performer: media.artist.clone(),
                        title: media.title.clone(),
                        file_name: media.file_name.clone(),
                        thumbnail: media.cover.clone(),
                    },
                )
                .await?
        };

        let lyrics_message_id = match &media.synced_lyrics {
            Some(lyrics) => {
                let _permit = self.gates.upload.acquire(priority).await;
                let id = self
                    .collab
                    .courier
                    .send_document(
                        chat,
                        DocumentUpload {
                            content: lyrics.clone().into_bytes(),
                            caption: format!("{} {} lyrics", item.media_id, item.codec.as_str()),
                            file_name: format!("{}.lrc", media.file_name),
                        },
                    )
                    .await?;
                Some(id)
            }
            None => None,
        };

        // Remplacement en bloc de l'enregistrement de cache.
        self.collab
            .media
            .put_song(&SongRecord {
                media_id: item.media_id.clone(),
                codec: item.codec,
                song_message_id,
                lyrics_message_id,
            })
            .await?;

        self.collab
            .courier
            .copy_message(item.chat_id, chat, song_message_id)
            .await?;
        if let Some(lyrics_id) = lyrics_message_id {
            if item.wants_synced_lyrics_file {
                self.collab
                    .courier
                    .copy_message(item.chat_id, chat, lyrics_id)
                    .await?;
            }
        }

        self.collab.users.note_song_delivered(item.user_id).await?;
        Ok(ItemOutcome::Delivered)
    }

    /// Upload, persiste et copie un clip fraîchement téléchargé.
    async fn deliver_video(
        &self,
        item: &WorkItem,
        media: &FetchedMedia,
        priority: pmbgate::Priority,
    ) -> Result<ItemOutcome> {
        let chat = self.config.music_video_cache_chat_id;
        let uhd = item.quality.is_uhd();

        if media.file_size > self.config.max_video_upload_bytes {
            warn!(media_id = %item.media_id, size = media.file_size,
                "clip trop volumineux, verdict terminal persisté");
            self.collab
                .media
                .put_music_video(&MusicVideoRecord {
                    media_id: item.media_id.clone(),
                    uhd,
                    too_large: true,
                    message_id: None,
                })
                .await?;
            return Ok(ItemOutcome::TooLarge);
        }

        let message_id = {
            let _permit = self.gates.upload.acquire(priority).await;
            self.collab
                .courier
                .send_video(
                    chat,
                    VideoUpload {
                        source: media.staged_path.clone(),
                        caption: format!("{} {} music_video", item.media_id, item.quality.as_str()),
                        duration_secs: media.duration_secs,
                        file_name: media.file_name.clone(),
                        thumbnail: media.cover.clone(),
                        supports_streaming: true,
                    },
                )
                .await?
        };

        self.collab
            .media
            .put_music_video(&MusicVideoRecord {
                media_id: item.media_id.clone(),
                uhd,
                too_large: false,
                message_id: Some(message_id),
            })
            .await?;

        self.collab
            .courier
            .copy_message(item.chat_id, chat, message_id)
            .await?;
        self.collab.users.note_video_delivered(item.user_id).await?;
        Ok(ItemOutcome::Delivered)
    }

    /// Enregistre l'issue d'un élément et la notifie au demandeur.
    async fn record_outcome(
        &self,
        report: &mut BatchReport,
        item: &WorkItem,
        outcome: ItemOutcome,
    ) {
        if outcome == ItemOutcome::Failed {
            report.fetch_errors += 1;
        }
        self.collab
            .notifier
            .item_outcome(item.user_id, item, &outcome)
            .await;
        report.outcomes.push(ItemReport {
            media_id: item.media_id.clone(),
            outcome,
        });
    }
}

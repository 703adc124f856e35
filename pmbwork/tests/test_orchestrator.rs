//! Tests de bout en bout de l'orchestrateur avec collaborateurs simulés.

use async_trait::async_trait;
use pmbgate::{Gates, Priority};
use pmbwork::{
    AbortReason, AudioUpload, BatchReport, BatchRequest, BatchStatus, CachedMessage,
    Collaborators, Courier, DocumentUpload, Entitlement, FetchError, FetchedMedia,
    LedgerFlatFilter, MediaFetcher, MediaKind, MediaLedger, MusicVideoRecord, Notifier,
    OrchestratorConfig, OrchestratorError, ItemOutcome, RejectReason, SongCodec, SongRecord,
    Staging, UserLedger, VideoQuality, VideoUpload, WorkItem, WorkOrchestrator,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const SONG_CHAT: i64 = -100;
const VIDEO_CHAT: i64 = -200;
const USER: i64 = 7;
const USER_CHAT: i64 = 77;

/// Comportement programmé du backend pour un média donné.
enum FetchPlan {
    Success { size: u64 },
    FormatNotAvailable,
    Hang,
}

/// Monde simulé : implémente tous les collaborateurs et enregistre ce que
/// l'orchestrateur leur fait faire.
struct World {
    credits: AtomicI64,
    member: Mutex<bool>,
    songs: Mutex<HashMap<(String, SongCodec), SongRecord>>,
    videos: Mutex<HashMap<(String, bool), MusicVideoRecord>>,
    messages: Mutex<HashMap<(i64, i64), CachedMessage>>,
    plans: Mutex<HashMap<String, FetchPlan>>,
    next_message_id: AtomicI64,
    fetch_calls: AtomicU32,
    copy_calls: AtomicU32,
    cleanup_calls: AtomicU32,
    charges: Mutex<Vec<i64>>,
    item_notifications: Mutex<Vec<(String, ItemOutcome)>>,
    batch_reports: Mutex<Vec<BatchReport>>,
    songs_delivered: AtomicU32,
    videos_delivered: AtomicU32,
}

impl World {
    fn new(credits: i64, member: bool) -> Arc<Self> {
        Arc::new(Self {
            credits: AtomicI64::new(credits),
            member: Mutex::new(member),
            songs: Mutex::new(HashMap::new()),
            videos: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            plans: Mutex::new(HashMap::new()),
            next_message_id: AtomicI64::new(1000),
            fetch_calls: AtomicU32::new(0),
            copy_calls: AtomicU32::new(0),
            cleanup_calls: AtomicU32::new(0),
            charges: Mutex::new(Vec::new()),
            item_notifications: Mutex::new(Vec::new()),
            batch_reports: Mutex::new(Vec::new()),
            songs_delivered: AtomicU32::new(0),
            videos_delivered: AtomicU32::new(0),
        })
    }

    fn plan(&self, media_id: &str, plan: FetchPlan) {
        self.plans.lock().unwrap().insert(media_id.into(), plan);
    }

    /// Pré-remplit le cache avec une chanson valide.
    fn seed_cached_song(&self, media_id: &str, codec: SongCodec) {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().insert(
            (SONG_CHAT, message_id),
            CachedMessage {
                message_id,
                caption: format!("{} {} song", media_id, codec.as_str()),
            },
        );
        self.songs.lock().unwrap().insert(
            (media_id.into(), codec),
            SongRecord {
                media_id: media_id.into(),
                codec,
                song_message_id: message_id,
                lyrics_message_id: None,
            },
        );
    }

    fn member_until(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        if *self.member.lock().unwrap() {
            Some(chrono::Utc::now() + chrono::Duration::days(30))
        } else {
            None
        }
    }
}

#[async_trait]
impl MediaFetcher for World {
    async fn fetch(&self, item: &WorkItem) -> Result<FetchedMedia, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let plan = {
            let plans = self.plans.lock().unwrap();
            match plans.get(&item.media_id) {
                Some(FetchPlan::Success { size }) => FetchPlan::Success { size: *size },
                Some(FetchPlan::FormatNotAvailable) => FetchPlan::FormatNotAvailable,
                Some(FetchPlan::Hang) => FetchPlan::Hang,
                None => FetchPlan::Success { size: 1_000 },
            }
        };
        match plan {
            FetchPlan::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            FetchPlan::FormatNotAvailable => Err(FetchError::FormatNotAvailable),
            FetchPlan::Success { size } => Ok(FetchedMedia {
                staged_path: PathBuf::from(format!("/tmp/{}.m4a", item.media_id)),
                file_size: size,
                duration_secs: 200,
                artist: "Artiste".into(),
                title: item.title.clone(),
                file_name: format!("{}.m4a", item.media_id),
                synced_lyrics: None,
                cover: None,
            }),
        }
    }
}

#[async_trait]
impl Courier for World {
    async fn peek_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> anyhow::Result<Option<CachedMessage>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&(chat_id, message_id))
            .cloned())
    }

    async fn copy_message(
        &self,
        _to_chat_id: i64,
        _from_chat_id: i64,
        _message_id: i64,
    ) -> anyhow::Result<i64> {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    async fn send_audio(&self, chat_id: i64, upload: AudioUpload) -> anyhow::Result<i64> {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().insert(
            (chat_id, id),
            CachedMessage {
                message_id: id,
                caption: upload.caption,
            },
        );
        Ok(id)
    }

    async fn send_video(&self, chat_id: i64, upload: VideoUpload) -> anyhow::Result<i64> {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().insert(
            (chat_id, id),
            CachedMessage {
                message_id: id,
                caption: upload.caption,
            },
        );
        Ok(id)
    }

    async fn send_document(&self, chat_id: i64, upload: DocumentUpload) -> anyhow::Result<i64> {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().insert(
            (chat_id, id),
            CachedMessage {
                message_id: id,
                caption: upload.caption,
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl Notifier for World {
    async fn item_outcome(&self, _user_id: i64, item: &WorkItem, outcome: &ItemOutcome) {
        self.item_notifications
            .lock()
            .unwrap()
            .push((item.media_id.clone(), outcome.clone()));
    }

    async fn batch_outcome(&self, _user_id: i64, report: &BatchReport) {
        self.batch_reports.lock().unwrap().push(report.clone());
    }
}

#[async_trait]
impl MediaLedger for World {
    async fn get_song(
        &self,
        media_id: &str,
        codec: SongCodec,
    ) -> anyhow::Result<Option<SongRecord>> {
        Ok(self
            .songs
            .lock()
            .unwrap()
            .get(&(media_id.to_string(), codec))
            .cloned())
    }

    async fn put_song(&self, record: &SongRecord) -> anyhow::Result<()> {
        self.songs
            .lock()
            .unwrap()
            .insert((record.media_id.clone(), record.codec), record.clone());
        Ok(())
    }

    async fn get_music_video(
        &self,
        media_id: &str,
        uhd: bool,
    ) -> anyhow::Result<Option<MusicVideoRecord>> {
        Ok(self
            .videos
            .lock()
            .unwrap()
            .get(&(media_id.to_string(), uhd))
            .cloned())
    }

    async fn put_music_video(&self, record: &MusicVideoRecord) -> anyhow::Result<()> {
        self.videos
            .lock()
            .unwrap()
            .insert((record.media_id.clone(), record.uhd), record.clone());
        Ok(())
    }
}

#[async_trait]
impl UserLedger for World {
    async fn entitlement(&self, _user_id: i64) -> anyhow::Result<Entitlement> {
        Ok(Entitlement {
            credits: self.credits.load(Ordering::SeqCst),
            membership_until: self.member_until(),
        })
    }

    async fn charge(&self, user_id: i64, amount: i64) -> anyhow::Result<()> {
        self.credits.fetch_sub(amount, Ordering::SeqCst);
        self.charges.lock().unwrap().push(user_id);
        Ok(())
    }

    async fn note_song_delivered(&self, _user_id: i64) -> anyhow::Result<()> {
        self.songs_delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn note_video_delivered(&self, _user_id: i64) -> anyhow::Result<()> {
        self.videos_delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Staging for World {
    async fn cleanup(&self, _token: Uuid) -> anyhow::Result<()> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn collaborators(world: &Arc<World>) -> Collaborators {
    Collaborators {
        fetcher: world.clone(),
        courier: world.clone(),
        notifier: world.clone(),
        media: world.clone(),
        users: world.clone(),
        staging: world.clone(),
    }
}

fn orchestrator(world: &Arc<World>, gates: Arc<Gates>) -> WorkOrchestrator {
    let config = OrchestratorConfig {
        download_timeout: Duration::from_secs(5),
        pacing_delay: Duration::from_millis(10),
        song_cache_chat_id: SONG_CHAT,
        music_video_cache_chat_id: VIDEO_CHAT,
        max_video_upload_bytes: 10_000,
    };
    WorkOrchestrator::new(gates, collaborators(world), config)
}

fn gates() -> Arc<Gates> {
    Arc::new(Gates::new(2, 2, Duration::from_millis(1)))
}

fn song(media_id: &str, codec: SongCodec) -> WorkItem {
    WorkItem {
        user_id: USER,
        chat_id: USER_CHAT,
        media_id: media_id.into(),
        title: format!("Titre {}", media_id),
        kind: MediaKind::Song,
        codec,
        quality: VideoQuality::Hd,
        synced_lyrics_expected: false,
        wants_synced_lyrics_file: false,
        staging_token: Uuid::new_v4(),
    }
}

fn video(media_id: &str, quality: VideoQuality) -> WorkItem {
    WorkItem {
        kind: MediaKind::MusicVideo,
        quality,
        ..song(media_id, SongCodec::AacLegacy)
    }
}

fn batch(items: Vec<WorkItem>) -> BatchRequest {
    BatchRequest {
        user_id: USER,
        items,
    }
}

#[tokio::test(start_paused = true)]
async fn test_credits_exhausted_aborts_remaining_items() {
    let world = World::new(1, false);
    let orch = orchestrator(&world, gates());
    let filter = LedgerFlatFilter::new(world.clone(), false);

    let request = batch(vec![
        song("a", SongCodec::AacLegacy),
        song("b", SongCodec::AacLegacy),
        song("c", SongCodec::AacLegacy),
    ]);
    let report = orch.process_batch(&request, &filter).await.unwrap();

    // Seul le premier élément consomme le crédit ; les deux suivants ne
    // sont jamais tentés.
    assert_eq!(report.outcome_for("a"), Some(&ItemOutcome::Delivered));
    assert_eq!(
        report.outcome_for("b"),
        Some(&ItemOutcome::InsufficientCredits)
    );
    assert_eq!(
        report.outcome_for("c"),
        Some(&ItemOutcome::InsufficientCredits)
    );
    assert_eq!(report.aborted, Some(AbortReason::CreditsExhausted));
    assert_eq!(report.fetch_errors, 0);
    assert_eq!(report.status(), BatchStatus::CompleteWithErrors);
    assert_eq!(world.fetch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(world.credits.load(Ordering::SeqCst), 0);
    // Seuls les éléments traités voient leur staging nettoyé : les éléments
    // écartés après l'épuisement ne sont jamais entamés.
    assert_eq!(world.cleanup_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cache_hits_bypass_fetch_and_charge() {
    let world = World::new(3, false);
    world.seed_cached_song("a", SongCodec::AacLegacy);
    world.seed_cached_song("b", SongCodec::Alac);

    // Portes à capacité 1, toutes tenues pour la durée du lot : la moindre
    // admission sur le chemin de cache bloquerait le test à jamais.
    let gates = Arc::new(Gates::new(1, 1, Duration::from_secs(60)));
    let _upload_held = gates.upload.acquire(Priority::High).await;
    let _download_held = gates.download.acquire(Priority::High).await;
    let _wrapper_held = gates.wrapper.acquire().await;

    let orch = orchestrator(&world, gates.clone());
    let filter = LedgerFlatFilter::new(world.clone(), false);

    let request = batch(vec![
        song("a", SongCodec::AacLegacy),
        song("b", SongCodec::Alac),
    ]);
    let report = orch.process_batch(&request, &filter).await.unwrap();

    assert_eq!(
        report.outcome_for("a"),
        Some(&ItemOutcome::DeliveredFromCache)
    );
    assert_eq!(
        report.outcome_for("b"),
        Some(&ItemOutcome::DeliveredFromCache)
    );
    assert_eq!(report.status(), BatchStatus::Complete);
    // Aucun téléchargement, aucun débit ; personne n'a attendu un slot.
    assert_eq!(world.fetch_calls.load(Ordering::SeqCst), 0);
    assert!(world.charges.lock().unwrap().is_empty());
    assert_eq!(gates.upload.waiting(), 0);
    assert_eq!(gates.download.waiting(), 0);
    // Le staging de chaque élément est tout de même libéré.
    assert_eq!(world.cleanup_calls.load(Ordering::SeqCst), 2);
    assert_eq!(world.copy_calls.load(Ordering::SeqCst), 2);
    assert_eq!(world.songs_delivered.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_aborts_batch() {
    let world = World::new(10, false);
    world.plan("b", FetchPlan::Hang);
    let orch = orchestrator(&world, gates());
    let filter = LedgerFlatFilter::new(world.clone(), false);

    let request = batch(vec![
        song("a", SongCodec::AacLegacy),
        song("b", SongCodec::AacLegacy),
        song("c", SongCodec::AacLegacy),
    ]);
    let report = orch.process_batch(&request, &filter).await.unwrap();

    assert_eq!(report.outcome_for("a"), Some(&ItemOutcome::Delivered));
    assert_eq!(report.outcome_for("b"), Some(&ItemOutcome::TimedOut));
    // Le troisième élément n'est jamais atteint et ne reçoit pas d'issue.
    assert_eq!(report.outcome_for("c"), None);
    assert_eq!(report.aborted, Some(AbortReason::Timeout));
    assert_eq!(report.status(), BatchStatus::CompleteWithErrors);
    // Le staging des deux éléments tentés est nettoyé, y compris celui du
    // téléchargement interrompu.
    assert_eq!(world.cleanup_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_batch_rejected_while_another_in_flight() {
    let world = World::new(5, false);
    let gates = gates();
    let orch = orchestrator(&world, gates.clone());
    let filter = LedgerFlatFilter::new(world.clone(), false);

    let _guard = gates.users.lock(USER).unwrap();
    let request = batch(vec![song("a", SongCodec::AacLegacy)]);
    let err = orch.process_batch(&request, &filter).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyInProgress(id) if id == USER));
    // Rien n'a été tenté ni notifié.
    assert_eq!(world.fetch_calls.load(Ordering::SeqCst), 0);
    assert!(world.batch_reports.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_video_rejected_for_non_member() {
    let world = World::new(5, false);
    let orch = orchestrator(&world, gates());
    let filter = LedgerFlatFilter::new(world.clone(), false);

    let request = batch(vec![video("v", VideoQuality::Hd)]);
    let report = orch.process_batch(&request, &filter).await.unwrap();

    assert_eq!(
        report.outcome_for("v"),
        Some(&ItemOutcome::Rejected(RejectReason::MembershipRequired))
    );
    assert_eq!(report.status(), BatchStatus::Complete);
    assert_eq!(world.fetch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_too_large_video_persists_terminal_verdict() {
    let world = World::new(5, true);
    world.plan("v", FetchPlan::Success { size: 50_000 });
    let orch = orchestrator(&world, gates());
    let filter = LedgerFlatFilter::new(world.clone(), true);

    let request = batch(vec![video("v", VideoQuality::Uhd)]);
    let report = orch.process_batch(&request, &filter).await.unwrap();
    assert_eq!(report.outcome_for("v"), Some(&ItemOutcome::TooLarge));
    assert!(world.charges.lock().unwrap().is_empty());

    let record = world
        .get_music_video("v", true)
        .await
        .unwrap()
        .expect("verdict persisté");
    assert!(record.too_large);
    assert_eq!(record.message_id, None);

    // Une seconde demande trouve le verdict en cache et ne re-télécharge pas.
    world.fetch_calls.store(0, Ordering::SeqCst);
    let report = orch
        .process_batch(&batch(vec![video("v", VideoQuality::Uhd)]), &filter)
        .await
        .unwrap();
    assert_eq!(report.outcome_for("v"), Some(&ItemOutcome::TooLarge));
    assert_eq!(world.fetch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_format_not_available_continues_batch() {
    let world = World::new(5, false);
    world.plan("a", FetchPlan::FormatNotAvailable);
    let orch = orchestrator(&world, gates());
    let filter = LedgerFlatFilter::new(world.clone(), false);

    let request = batch(vec![
        song("a", SongCodec::Atmos),
        song("b", SongCodec::AacLegacy),
    ]);
    let report = orch.process_batch(&request, &filter).await.unwrap();

    assert_eq!(
        report.outcome_for("a"),
        Some(&ItemOutcome::FormatNotAvailable)
    );
    assert_eq!(report.outcome_for("b"), Some(&ItemOutcome::Delivered));
    // Format indisponible n'est pas une erreur de téléchargement.
    assert_eq!(report.fetch_errors, 0);
    assert_eq!(report.status(), BatchStatus::Complete);
    // Un seul crédit débité, pour l'élément effectivement livré.
    assert_eq!(world.charges.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_member_is_never_charged() {
    let world = World::new(0, true);
    let orch = orchestrator(&world, gates());
    let filter = LedgerFlatFilter::new(world.clone(), true);

    let request = batch(vec![song("a", SongCodec::Alac)]);
    let report = orch.process_batch(&request, &filter).await.unwrap();

    assert_eq!(report.outcome_for("a"), Some(&ItemOutcome::Delivered));
    assert!(world.charges.lock().unwrap().is_empty());
    assert_eq!(world.credits.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_delivery_seeds_cache_for_next_batch() {
    let world = World::new(5, false);
    let gates = gates();
    let orch = orchestrator(&world, gates);
    let filter = LedgerFlatFilter::new(world.clone(), false);

    let report = orch
        .process_batch(&batch(vec![song("a", SongCodec::Aac)]), &filter)
        .await
        .unwrap();
    assert_eq!(report.outcome_for("a"), Some(&ItemOutcome::Delivered));
    assert_eq!(world.fetch_calls.load(Ordering::SeqCst), 1);

    let report = orch
        .process_batch(&batch(vec![song("a", SongCodec::Aac)]), &filter)
        .await
        .unwrap();
    assert_eq!(
        report.outcome_for("a"),
        Some(&ItemOutcome::DeliveredFromCache)
    );
    assert_eq!(world.fetch_calls.load(Ordering::SeqCst), 1);
}

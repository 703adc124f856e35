//! # PMBWork : cœur de traitement des lots PMBot
//!
//! Cette crate contient la logique métier du bot, indépendante du transport :
//! la machine d'états qui transforme un lot de demandes en livraisons, en
//! composant les portes d'admission de `pmbgate`, le validateur de cache et
//! les collaborateurs externes (backend de téléchargement, canal de
//! livraison, registres).
//!
//! ## Architecture
//!
//! ```text
//! pmbwork
//! ├── item           : unités de travail (WorkItem, FetchedMedia)
//! ├── records        : enregistrements persistés (cache, droits)
//! ├── report         : issues par élément et bilan de lot
//! ├── error          : erreurs typées (FetchError, OrchestratorError)
//! ├── collaborators  : traits des services externes
//! ├── flat_filter    : stratégie de pré-filtrage par lot
//! ├── validator      : décisions pures de validité du cache
//! └── orchestrator   : WorkOrchestrator, la machine d'états par lot
//! ```
//!
//! ## Utilisation
//!
//! ```no_run
//! use pmbgate::Gates;
//! use pmbwork::{
//!     BatchRequest, Collaborators, LedgerFlatFilter, OrchestratorConfig, WorkOrchestrator,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(collab: Collaborators, request: BatchRequest) -> anyhow::Result<()> {
//! let gates = Arc::new(Gates::new(6, 2, Duration::from_secs(5)));
//! let config = OrchestratorConfig {
//!     download_timeout: Duration::from_secs(300),
//!     pacing_delay: Duration::from_secs(5),
//!     song_cache_chat_id: -1000,
//!     music_video_cache_chat_id: -1001,
//!     max_video_upload_bytes: 2_097_152_000,
//! };
//! let filter = LedgerFlatFilter::new(collab.media.clone(), true);
//! let orchestrator = WorkOrchestrator::new(gates, collab, config);
//! let report = orchestrator.process_batch(&request, &filter).await?;
//! println!("{:?}", report.status());
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod error;
pub mod flat_filter;
pub mod item;
pub mod orchestrator;
pub mod records;
pub mod report;
pub mod validator;

pub use collaborators::{
    AudioUpload, CachedMessage, Courier, DocumentUpload, MediaFetcher, MediaLedger, Notifier,
    Staging, UserLedger, VideoUpload,
};
pub use error::{FetchError, OrchestratorError};
pub use flat_filter::{FlatFilter, LedgerFlatFilter, Screening};
pub use item::{FetchedMedia, MediaKind, SongCodec, VideoQuality, WorkItem};
pub use orchestrator::{BatchRequest, Collaborators, OrchestratorConfig, WorkOrchestrator};
pub use records::{Entitlement, MusicVideoRecord, SongRecord};
pub use report::{AbortReason, BatchReport, BatchStatus, ItemOutcome, ItemReport, RejectReason};
pub use validator::{song_cache_decision, video_cache_decision, CacheDecision};

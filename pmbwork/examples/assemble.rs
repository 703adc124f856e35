//! Assemblage des portes et de l'orchestrateur depuis la configuration.
//!
//! `pmbconfig` reste une feuille du graphe de dépendances : c'est
//! l'assembleur (ici, cet exemple ; en production, le binaire du bot) qui
//! traduit la configuration en `Gates` et `OrchestratorConfig`.

use pmbgate::{Gates, Priority};
use pmbwork::OrchestratorConfig;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = pmbconfig::get_config();

    let gates = Arc::new(Gates::new(
        config.get_upload_slots()?,
        config.get_download_slots()?,
        Duration::from_secs(config.get_wrapper_cool_down_secs()? as u64),
    ));

    let orchestrator_config = OrchestratorConfig {
        download_timeout: Duration::from_secs(config.get_download_timeout_secs()? as u64),
        pacing_delay: Duration::from_secs(config.get_pacing_delay_secs()? as u64),
        song_cache_chat_id: config.get_song_cache_chat_id()?,
        music_video_cache_chat_id: config.get_music_video_cache_chat_id()?,
        max_video_upload_bytes: config.get_max_video_upload_bytes()?,
    };
    println!("Configuration de l'orchestrateur : {:?}", orchestrator_config);

    // Démonstration des admissions : plus de tâches que de slots.
    let mut handles = Vec::new();
    for i in 0..4 {
        let gates = Arc::clone(&gates);
        handles.push(tokio::spawn(async move {
            let priority = if i % 2 == 0 {
                Priority::High
            } else {
                Priority::Normal
            };
            let _permit = gates.download.acquire(priority).await;
            println!("tâche {} admise ({:?})", i, priority);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }));
    }
    for handle in handles {
        handle.await?;
    }

    Ok(())
}

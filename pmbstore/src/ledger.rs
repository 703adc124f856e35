//! Implémentation des registres de `pmbwork` par la base SQLite
//!
//! Les opérations sont courtes et synchrones sous le mutex de connexion ;
//! les adaptateurs async se contentent de convertir les erreurs.

use crate::db::Store;
use anyhow::Result;
use async_trait::async_trait;
use pmbwork::{Entitlement, MediaLedger, MusicVideoRecord, SongCodec, SongRecord, UserLedger};

#[async_trait]
impl MediaLedger for Store {
    async fn get_song(&self, media_id: &str, codec: SongCodec) -> Result<Option<SongRecord>> {
        Ok(Store::get_song(self, media_id, codec.as_str())?)
    }

    async fn put_song(&self, record: &SongRecord) -> Result<()> {
        Ok(Store::put_song(self, record)?)
    }

    async fn get_music_video(&self, media_id: &str, uhd: bool) -> Result<Option<MusicVideoRecord>> {
        Ok(Store::get_music_video(self, media_id, uhd)?)
    }

    async fn put_music_video(&self, record: &MusicVideoRecord) -> Result<()> {
        Ok(Store::put_music_video(self, record)?)
    }
}

#[async_trait]
impl UserLedger for Store {
    async fn entitlement(&self, user_id: i64) -> Result<Entitlement> {
        Ok(Store::entitlement(self, user_id)?)
    }

    async fn charge(&self, user_id: i64, amount: i64) -> Result<()> {
        Ok(Store::charge(self, user_id, amount)?)
    }

    async fn note_song_delivered(&self, user_id: i64) -> Result<()> {
        Ok(Store::note_song_delivered(self, user_id)?)
    }

    async fn note_video_delivered(&self, user_id: i64) -> Result<()> {
        Ok(Store::note_video_delivered(self, user_id)?)
    }
}

//! Base de données SQLite du bot
//!
//! Trois tables : `song` et `music_video` pour les enregistrements de cache
//! (un par couple média/variante, remplacés en bloc), et `user` pour les
//! crédits, abonnements, préférences et compteurs de livraison.
//!
//! La connexion est protégée par un mutex : les opérations sont courtes et
//! le débit du bot ne justifie pas un pool.

use chrono::{DateTime, Utc};
use pmbwork::{Entitlement, MusicVideoRecord, SongRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Compte utilisateur tel que persisté.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub user_id: i64,
    /// Crédits de téléchargement restants.
    pub credits: i64,
    /// Fin d'abonnement, si le compte en a un.
    pub membership_until: Option<DateTime<Utc>>,
    /// Codec audio par défaut des demandes (libellé stable).
    pub preferred_codec: String,
    /// Demander les clips en 4K.
    pub wants_uhd: bool,
    /// Recevoir le fichier de paroles synchronisées.
    pub wants_lyrics_file: bool,
    /// Pays du catalogue de recherche.
    pub search_country: String,
    /// Chansons livrées (hits de cache compris).
    pub songs_delivered: i64,
    /// Clips livrés (hits de cache compris).
    pub videos_delivered: i64,
}

/// Base de données du bot : cache des artefacts et comptes utilisateur.
#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Ouvre (ou crée) la base au chemin donné et applique le schéma.
    pub fn init(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS song (
                media_id TEXT NOT NULL,
                codec TEXT NOT NULL,
                song_message_id INTEGER NOT NULL,
                lyrics_message_id INTEGER,
                created_at TEXT,
                PRIMARY KEY (media_id, codec)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS music_video (
                media_id TEXT NOT NULL,
                uhd INTEGER NOT NULL,
                too_large INTEGER NOT NULL DEFAULT 0,
                message_id INTEGER,
                created_at TEXT,
                PRIMARY KEY (media_id, uhd)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS user (
                user_id INTEGER PRIMARY KEY,
                credits INTEGER NOT NULL DEFAULT 0,
                membership_until TEXT,
                last_free_claim TEXT,
                preferred_codec TEXT NOT NULL DEFAULT 'aac-legacy',
                wants_uhd INTEGER NOT NULL DEFAULT 0,
                wants_lyrics_file INTEGER NOT NULL DEFAULT 0,
                search_country TEXT NOT NULL DEFAULT 'us',
                songs_delivered INTEGER NOT NULL DEFAULT 0,
                videos_delivered INTEGER NOT NULL DEFAULT 0,
                created_at TEXT
            )",
            [],
        )?;

        info!("Base de données ouverte: {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Base en mémoire, pour les tests et l'outillage.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Path::new(":memory:"))
    }

    /// Ouvre la base à l'emplacement défini par la configuration.
    pub fn open_default() -> anyhow::Result<Self> {
        let config = pmbconfig::get_config();
        let dir = std::path::PathBuf::from(config.get_database_dir()?);
        Ok(Self::init(&dir.join("pmbot.db"))?)
    }

    // --- Cache des chansons ---------------------------------------------

    /// Enregistrement de cache d'une chanson, par média et codec.
    pub fn get_song(&self, media_id: &str, codec: &str) -> rusqlite::Result<Option<SongRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT media_id, codec, song_message_id, lyrics_message_id
             FROM song WHERE media_id = ?1 AND codec = ?2",
            params![media_id, codec],
            |row| {
                let codec_label: String = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    codec_label,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            },
        )
        .optional()
        .map(|row| {
            row.and_then(|(media_id, codec_label, song_message_id, lyrics_message_id)| {
                // Une ligne au codec inconnu est ignorée plutôt que servie
                let codec = pmbwork::SongCodec::from_str_opt(&codec_label)?;
                Some(SongRecord {
                    media_id,
                    codec,
                    song_message_id,
                    lyrics_message_id,
                })
            })
        })
    }

    /// Remplace en bloc l'enregistrement d'une chanson.
    pub fn put_song(&self, record: &SongRecord) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO song (media_id, codec, song_message_id, lyrics_message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(media_id, codec) DO UPDATE SET
                 song_message_id = excluded.song_message_id,
                 lyrics_message_id = excluded.lyrics_message_id,
                 created_at = excluded.created_at",
            params![
                record.media_id,
                record.codec.as_str(),
                record.song_message_id,
                record.lyrics_message_id,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    // --- Cache des clips ------------------------------------------------

    /// Enregistrement de cache d'un clip, par média et qualité.
    pub fn get_music_video(
        &self,
        media_id: &str,
        uhd: bool,
    ) -> rusqlite::Result<Option<MusicVideoRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT media_id, uhd, too_large, message_id
             FROM music_video WHERE media_id = ?1 AND uhd = ?2",
            params![media_id, uhd],
            |row| {
                Ok(MusicVideoRecord {
                    media_id: row.get(0)?,
                    uhd: row.get(1)?,
                    too_large: row.get(2)?,
                    message_id: row.get(3)?,
                })
            },
        )
        .optional()
    }

    /// Remplace en bloc l'enregistrement d'un clip (verdict `too_large`
    /// compris).
    pub fn put_music_video(&self, record: &MusicVideoRecord) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO music_video (media_id, uhd, too_large, message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(media_id, uhd) DO UPDATE SET
                 too_large = excluded.too_large,
                 message_id = excluded.message_id,
                 created_at = excluded.created_at",
            params![
                record.media_id,
                record.uhd,
                record.too_large,
                record.message_id,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Supprime l'enregistrement d'une chanson (invalidation manuelle).
    pub fn delete_song(&self, media_id: &str, codec: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM song WHERE media_id = ?1 AND codec = ?2",
            params![media_id, codec],
        )?;
        Ok(())
    }

    /// Nombre de chansons en cache.
    pub fn count_songs(&self) -> rusqlite::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM song", [], |row| row.get(0))
    }

    /// Supprime l'enregistrement d'un clip.
    pub fn delete_music_video(&self, media_id: &str, uhd: bool) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM music_video WHERE media_id = ?1 AND uhd = ?2",
            params![media_id, uhd],
        )?;
        Ok(())
    }

    /// Nombre de clips en cache (verdicts `too_large` compris).
    pub fn count_music_videos(&self) -> rusqlite::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM music_video", [], |row| row.get(0))
    }

    // --- Comptes utilisateur --------------------------------------------

    /// Crée le compte s'il n'existe pas encore.
    pub fn ensure_user(&self, user_id: i64) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO user (user_id, created_at) VALUES (?1, ?2)",
            params![user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Crédits restants du compte (0 pour un compte inconnu).
    pub fn credits(&self, user_id: i64) -> rusqlite::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let credits = conn
            .query_row(
                "SELECT credits FROM user WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(credits.unwrap_or(0))
    }

    /// Solde et abonnement du compte.
    pub fn entitlement(&self, user_id: i64) -> rusqlite::Result<Entitlement> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT credits, membership_until FROM user WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )
            .optional()?;

        let (credits, membership_until) = row.unwrap_or((0, None));
        Ok(Entitlement {
            credits,
            membership_until: membership_until.as_deref().and_then(parse_rfc3339),
        })
    }

    /// Débite des crédits (jamais en dessous de zéro).
    pub fn charge(&self, user_id: i64, amount: i64) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user SET credits = MAX(credits - ?1, 0) WHERE user_id = ?2",
            params![amount, user_id],
        )?;
        Ok(())
    }

    /// Crédite des crédits supplémentaires.
    pub fn add_credits(&self, user_id: i64, amount: i64) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user SET credits = credits + ?1 WHERE user_id = ?2",
            params![amount, user_id],
        )?;
        Ok(())
    }

    /// Accorde le quota quotidien gratuit, une fois par jour UTC.
    ///
    /// Retourne `false` si le quota du jour a déjà été réclamé.
    pub fn claim_free_daily_credits(&self, user_id: i64, amount: i64) -> rusqlite::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let last_claim: Option<String> = conn
            .query_row(
                "SELECT last_free_claim FROM user WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let today = Utc::now().date_naive();
        if let Some(claimed_today) = last_claim
            .as_deref()
            .and_then(parse_rfc3339)
            .map(|at| at.date_naive() >= today)
        {
            if claimed_today {
                return Ok(false);
            }
        }

        conn.execute(
            "UPDATE user SET credits = ?1, last_free_claim = ?2 WHERE user_id = ?3",
            params![amount, Utc::now().to_rfc3339(), user_id],
        )?;
        Ok(true)
    }

    /// Prolonge l'abonnement de `days` jours, à partir de l'échéance
    /// actuelle si elle est encore à venir, de maintenant sinon.
    pub fn add_membership_days(&self, user_id: i64, days: i64) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        let current: Option<String> = conn
            .query_row(
                "SELECT membership_until FROM user WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let now = Utc::now();
        let base = current
            .as_deref()
            .and_then(parse_rfc3339)
            .filter(|until| *until > now)
            .unwrap_or(now);
        let until = base + chrono::Duration::days(days);

        conn.execute(
            "UPDATE user SET membership_until = ?1 WHERE user_id = ?2",
            params![until.to_rfc3339(), user_id],
        )?;
        Ok(())
    }

    /// Compte complet, `None` s'il n'existe pas.
    pub fn get_user(&self, user_id: i64) -> rusqlite::Result<Option<UserAccount>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT user_id, credits, membership_until, preferred_codec, wants_uhd,
                    wants_lyrics_file, search_country, songs_delivered, videos_delivered
             FROM user WHERE user_id = ?1",
            params![user_id],
            |row| {
                let membership: Option<String> = row.get(2)?;
                Ok(UserAccount {
                    user_id: row.get(0)?,
                    credits: row.get(1)?,
                    membership_until: membership.as_deref().and_then(parse_rfc3339),
                    preferred_codec: row.get(3)?,
                    wants_uhd: row.get(4)?,
                    wants_lyrics_file: row.get(5)?,
                    search_country: row.get(6)?,
                    songs_delivered: row.get(7)?,
                    videos_delivered: row.get(8)?,
                })
            },
        )
        .optional()
    }

    /// Fixe le solde de crédits à une valeur absolue.
    pub fn set_credits(&self, user_id: i64, credits: i64) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user SET credits = ?1 WHERE user_id = ?2",
            params![credits, user_id],
        )?;
        Ok(())
    }

    /// Nombre de comptes dont l'abonnement est encore actif.
    pub fn count_members(&self) -> rusqlite::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM user WHERE membership_until > ?1",
            params![Utc::now().to_rfc3339()],
            |row| row.get(0),
        )
    }

    /// Préférence : codec audio par défaut des demandes.
    pub fn set_preferred_codec(&self, user_id: i64, codec: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user SET preferred_codec = ?1 WHERE user_id = ?2",
            params![codec, user_id],
        )?;
        Ok(())
    }

    /// Préférence : demander les clips en 4K.
    pub fn set_wants_uhd(&self, user_id: i64, wants: bool) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user SET wants_uhd = ?1 WHERE user_id = ?2",
            params![wants, user_id],
        )?;
        Ok(())
    }

    /// Préférence : pays du catalogue de recherche.
    pub fn set_search_country(&self, user_id: i64, country: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user SET search_country = ?1 WHERE user_id = ?2",
            params![country, user_id],
        )?;
        Ok(())
    }

    /// Préférence : recevoir le fichier de paroles synchronisées.
    pub fn wants_lyrics_file(&self, user_id: i64) -> rusqlite::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT wants_lyrics_file FROM user WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(false))
    }

    pub fn set_wants_lyrics_file(&self, user_id: i64, wants: bool) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user SET wants_lyrics_file = ?1 WHERE user_id = ?2",
            params![wants, user_id],
        )?;
        Ok(())
    }

    /// Incrémente le compteur de chansons livrées.
    pub fn note_song_delivered(&self, user_id: i64) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user SET songs_delivered = songs_delivered + 1 WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    /// Incrémente le compteur de clips livrés.
    pub fn note_video_delivered(&self, user_id: i64) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user SET videos_delivered = videos_delivered + 1 WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    /// Compteurs de livraison (chansons, clips) du compte.
    pub fn delivery_counters(&self, user_id: i64) -> rusqlite::Result<(i64, i64)> {
        let conn = self.conn.lock().unwrap();
        let counters = conn
            .query_row(
                "SELECT songs_delivered, videos_delivered FROM user WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(counters.unwrap_or((0, 0)))
    }
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

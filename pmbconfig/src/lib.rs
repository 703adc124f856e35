//! # Module de configuration de PMBot
//!
//! Cette crate gère la configuration du bot :
//! - Chargement depuis un fichier YAML
//! - Merge avec la configuration par défaut intégrée
//! - Overrides par variables d'environnement
//! - Getters typés pour les valeurs de configuration
//! - Accès singleton thread-safe
//!
//! ## Utilisation
//!
//! ```no_run
//! use pmbconfig::get_config;
//!
//! // Récupérer la configuration globale
//! let config = get_config();
//!
//! // Accéder aux valeurs
//! let slots = config.get_upload_slots()?;
//! let timeout = config.get_download_timeout_secs()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmbot.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMBot configuration"));
}

const ENV_CONFIG_DIR: &str = "PMBOT_CONFIG";
const ENV_PREFIX: &str = "PMBOT_CONFIG__";

// Valeurs par défaut
const DEFAULT_UPLOAD_SLOTS: usize = 6;
const DEFAULT_DOWNLOAD_SLOTS: usize = 2;
const DEFAULT_WRAPPER_COOL_DOWN_SECS: usize = 5;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: usize = 300;
const DEFAULT_PACING_DELAY_SECS: usize = 5;
const DEFAULT_MAX_VIDEO_UPLOAD_BYTES: u64 = 2000 * 1024 * 1024;
const DEFAULT_FREE_DAILY_CREDITS: usize = 50;

/// Macro générant getter/setter pour une valeur usize avec défaut
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path)? {
                Value::Number(n) if n.is_i64() => Ok(n.as_i64().unwrap() as usize),
                Value::Number(n) if n.is_u64() => Ok(n.as_u64().unwrap() as usize),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: usize) -> Result<()> {
            let n = Number::from(value);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Macro générant getter/setter pour une valeur i64 avec défaut
macro_rules! impl_i64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<i64> {
            match self.get_value($path)? {
                Value::Number(n) if n.is_i64() => Ok(n.as_i64().unwrap()),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: i64) -> Result<()> {
            let n = Number::from(value);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Gestionnaire de configuration de PMBot
///
/// Cette structure gère la configuration de l'application :
/// - Chargement depuis des fichiers YAML
/// - Merge avec la configuration par défaut
/// - Overrides par variables d'environnement
/// - Getters/setters typés
///
/// # Exemples
///
/// ```no_run
/// use pmbconfig::get_config;
///
/// let config = get_config();
/// let slots = config.get_download_slots().unwrap();
/// println!("Download slots: {}", slots);
/// ```
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Config {
    /// Cherche un répertoire de configuration en essayant plusieurs emplacements
    fn find_config_dir(directory: &str) -> String {
        // 1. Répertoire fourni
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Variable d'environnement
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Répertoire courant
        if Path::new(".pmbot").exists() {
            return ".pmbot".to_string();
        }

        // 4. Répertoire home
        if let Some(home) = home_dir() {
            let home_config = home.join(".pmbot");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        ".pmbot".to_string()
    }

    /// Valide et prépare un répertoire de configuration
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("Le chemin spécifié n'est pas un répertoire"));
        }

        // Test d'écriture
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Détermine et valide le répertoire de configuration
    ///
    /// Le répertoire est cherché dans l'ordre suivant :
    /// 1. Le paramètre `directory` s'il n'est pas vide
    /// 2. La variable d'environnement `PMBOT_CONFIG`
    /// 3. `.pmbot` dans le répertoire courant
    /// 4. `.pmbot` dans le répertoire home de l'utilisateur
    ///
    /// # Panics
    ///
    /// Panique si le répertoire ne peut être ni créé ni validé
    pub fn config_dir(directory: &str) -> String {
        let dir_path = Self::find_config_dir(directory);
        let path = Path::new(&dir_path);

        Self::validate_config_dir(path)
            .expect("Impossible de valider le répertoire de configuration");

        dir_path
    }

    /// Charge la configuration depuis le répertoire donné
    ///
    /// Cette méthode :
    /// 1. Détermine le répertoire de configuration
    /// 2. Charge la configuration par défaut intégrée
    /// 3. La merge avec le fichier config.yaml externe s'il existe
    /// 4. Applique les overrides d'environnement
    /// 5. Sauvegarde la configuration mergée
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory);
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Sauvegarde la configuration courante dans config.yaml
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().unwrap();
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Définit une valeur au chemin donné et sauvegarde
    ///
    /// # Arguments
    ///
    /// * `path` - Clés du chemin (ex: `&["gates", "upload_slots"]`)
    /// * `value` - La valeur YAML à écrire
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        Self::set_value_internal(&mut data, path, value)?;
        drop(data);
        self.save()?;
        Ok(())
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key = path[0].to_lowercase();
            let key_value = Value::String(key);
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Lit la valeur au chemin donné
    ///
    /// # Arguments
    ///
    /// * `path` - Clés du chemin (ex: `&["gates", "upload_slots"]`)
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();

                if let Some(next) = map.get(&Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if key.starts_with(ENV_PREFIX) {
                let key_path = key
                    .trim_start_matches(ENV_PREFIX)
                    .split("__")
                    .collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        let new_key = Value::String(s.to_lowercase());
                        new_map.insert(new_key, Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Résout un chemin relatif ou absolu et crée le répertoire si nécessaire
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<String> {
        let path = Path::new(dir_path);

        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            // Chemin relatif : résolu par rapport à config_dir
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory = %absolute_path.display(), "Created managed directory");
        }

        Ok(absolute_path.to_string_lossy().to_string())
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Le répertoire peut être absolu ou relatif au répertoire de
    /// configuration. Il est créé s'il n'existe pas.
    ///
    /// # Arguments
    ///
    /// * `path` - Chemin dans l'arbre de configuration
    /// * `default` - Nom de répertoire par défaut si non configuré
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) => s,
            _ => {
                self.set_value(path, Value::String(default.to_string()))?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Répertoire de la base de données, créé si nécessaire
    pub fn get_database_dir(&self) -> Result<String> {
        self.get_managed_dir(&["database", "directory"], "db")
    }

    impl_usize_config!(
        get_upload_slots,
        set_upload_slots,
        &["gates", "upload_slots"],
        DEFAULT_UPLOAD_SLOTS
    );

    impl_usize_config!(
        get_download_slots,
        set_download_slots,
        &["gates", "download_slots"],
        DEFAULT_DOWNLOAD_SLOTS
    );

    impl_usize_config!(
        get_wrapper_cool_down_secs,
        set_wrapper_cool_down_secs,
        &["gates", "wrapper_cool_down_secs"],
        DEFAULT_WRAPPER_COOL_DOWN_SECS
    );

    impl_usize_config!(
        get_download_timeout_secs,
        set_download_timeout_secs,
        &["worker", "download_timeout_secs"],
        DEFAULT_DOWNLOAD_TIMEOUT_SECS
    );

    impl_usize_config!(
        get_pacing_delay_secs,
        set_pacing_delay_secs,
        &["worker", "pacing_delay_secs"],
        DEFAULT_PACING_DELAY_SECS
    );

    impl_usize_config!(
        get_free_daily_credits,
        set_free_daily_credits,
        &["credits", "free_daily"],
        DEFAULT_FREE_DAILY_CREDITS
    );

    impl_i64_config!(
        get_song_cache_chat_id,
        set_song_cache_chat_id,
        &["cache", "song_chat_id"],
        0
    );

    /// Taille maximale d'une vidéo uploadable, en octets
    pub fn get_max_video_upload_bytes(&self) -> Result<u64> {
        match self.get_value(&["worker", "max_video_upload_bytes"])? {
            Value::Number(n) if n.is_u64() => Ok(n.as_u64().unwrap()),
            Value::Number(n) if n.is_i64() => Ok(n.as_i64().unwrap().max(0) as u64),
            _ => Ok(DEFAULT_MAX_VIDEO_UPLOAD_BYTES),
        }
    }

    /// Chat de stockage des clips ; retombe sur le chat des chansons si la
    /// valeur configurée est nulle
    pub fn get_music_video_cache_chat_id(&self) -> Result<i64> {
        match self.get_value(&["cache", "music_video_chat_id"])? {
            Value::Number(n) if n.is_i64() && n.as_i64() != Some(0) => Ok(n.as_i64().unwrap()),
            _ => self.get_song_cache_chat_id(),
        }
    }

    /// Définit le chat de stockage des clips
    pub fn set_music_video_cache_chat_id(&self, chat_id: i64) -> Result<()> {
        self.set_value(
            &["cache", "music_video_chat_id"],
            Value::Number(Number::from(chat_id)),
        )
    }
}

/// Retourne l'instance globale de configuration
///
/// L'instance est chargée paresseusement au premier accès.
///
/// # Exemples
///
/// ```no_run
/// use pmbconfig::get_config;
///
/// let config = get_config();
/// let slots = config.get_upload_slots().unwrap();
/// ```
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merge la configuration externe dans la configuration par défaut
///
/// Merge récursif des deux arbres YAML :
/// - pour les mappings, les clés externes sont fusionnées dans le défaut
/// - pour les scalaires et séquences, la valeur externe remplace le défaut
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn load_in(dir: &TempDir) -> Config {
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_defaults_present() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);
        assert_eq!(config.get_upload_slots().unwrap(), 6);
        assert_eq!(config.get_download_slots().unwrap(), 2);
        assert_eq!(config.get_wrapper_cool_down_secs().unwrap(), 5);
        assert_eq!(config.get_download_timeout_secs().unwrap(), 300);
        assert_eq!(config.get_free_daily_credits().unwrap(), 50);
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);
        config.set_download_slots(4).unwrap();
        assert_eq!(config.get_download_slots().unwrap(), 4);

        // La valeur doit survivre à un rechargement
        let reloaded = load_in(&dir);
        assert_eq!(reloaded.get_download_slots().unwrap(), 4);
    }

    #[test]
    fn test_music_video_chat_falls_back_on_song_chat() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);
        config.set_song_cache_chat_id(-100123).unwrap();
        assert_eq!(config.get_music_video_cache_chat_id().unwrap(), -100123);

        config.set_music_video_cache_chat_id(-100456).unwrap();
        assert_eq!(config.get_music_video_cache_chat_id().unwrap(), -100456);
    }

    #[test]
    fn test_get_value_unknown_path_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);
        assert!(config.get_value(&["nope", "missing"]).is_err());
    }
}

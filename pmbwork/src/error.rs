//! Gestion des erreurs de l'orchestrateur et du backend de téléchargement

use thiserror::Error;

/// Erreurs du backend de téléchargement, classées par gravité pour le lot.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Le format demandé n'existe pas pour ce média (récupérable, le lot
    /// continue, aucun crédit débité).
    #[error("Requested format is not available for this media")]
    FormatNotAvailable,

    /// Le média n'est pas diffusable (récupérable, le lot continue, aucun
    /// crédit débité).
    #[error("Media is not streamable")]
    NotStreamable,

    /// Toute autre défaillance du backend (récupérable, comptée dans les
    /// erreurs du lot).
    #[error("Fetch failed: {0}")]
    Other(#[from] anyhow::Error),
}

/// Erreurs de l'orchestrateur au niveau du lot.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Un lot est déjà en vol pour cet utilisateur : la nouvelle demande est
    /// refusée, jamais mise en file.
    #[error("A batch is already in flight for user {0}")]
    AlreadyInProgress(i64),
}

//! Verrou single-flight du wrapper de déchiffrement
//!
//! Le wrapper ne tolère aucun appel concurrent et impose un délai de repos
//! entre deux utilisations. Ce module sérialise donc les accès derrière un
//! verrou unique et fait respecter le délai après chaque relâchement, que
//! l'opération protégée ait réussi ou non.
//!
//! Règle de composition : lorsqu'un travail doit aussi passer par le
//! sémaphore de téléchargement, le `WrapperGate` s'acquiert en premier
//! (externe) et le sémaphore en second (interne), afin qu'un appelant en
//! file pour un slot de capacité ne retienne pas le wrapper pendant ce
//! temps.

use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct GateClock {
    /// Instant avant lequel la prochaine acquisition ne peut pas aboutir.
    next_ready: Option<Instant>,
}

/// Verrou exclusif du wrapper, avec délai de repos après relâchement.
#[derive(Debug)]
pub struct WrapperGate {
    inner: Mutex<GateClock>,
    cool_down: Duration,
}

impl WrapperGate {
    /// Crée la porte avec le délai de repos configuré.
    pub fn new(cool_down: Duration) -> Self {
        Self {
            inner: Mutex::new(GateClock { next_ready: None }),
            cool_down,
        }
    }

    /// Délai de repos appliqué après chaque relâchement.
    pub fn cool_down(&self) -> Duration {
        self.cool_down
    }

    /// Acquiert la détention exclusive du wrapper.
    ///
    /// Un seul permis existe à la fois dans tout le processus. Si le
    /// relâchement précédent est trop récent, l'acquisition attend la fin du
    /// délai de repos avant de rendre la main. Une annulation pendant cette
    /// attente laisse l'horloge intacte : le wrapper n'a pas été touché.
    pub async fn acquire(&self) -> WrapperPermit<'_> {
        let clock = self.inner.lock().await;
        if let Some(at) = clock.next_ready {
            let now = Instant::now();
            if at > now {
                trace!(remaining_ms = (at - now).as_millis() as u64, "repos du wrapper");
                tokio::time::sleep_until(at).await;
            }
        }
        WrapperPermit {
            clock,
            cool_down: self.cool_down,
        }
    }
}

/// Détention exclusive du wrapper.
///
/// Le drop arme le délai de repos, inconditionnellement : le délai est dû
/// même si l'opération protégée a échoué.
#[derive(Debug)]
pub struct WrapperPermit<'a> {
    clock: MutexGuard<'a, GateClock>,
    cool_down: Duration,
}

impl Drop for WrapperPermit<'_> {
    fn drop(&mut self) {
        self.clock.next_ready = Some(Instant::now() + self.cool_down);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_cool_down_enforced_between_holds() {
        let gate = WrapperGate::new(Duration::from_secs(5));

        let start = Instant::now();
        let permit = gate.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));
        drop(permit);

        // La seconde acquisition ne doit aboutir qu'après le délai de repos.
        let _permit = gate.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_hold_at_a_time() {
        let gate = Arc::new(WrapperGate::new(Duration::from_secs(1)));
        let first_released = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let gate2 = Arc::clone(&gate);
        let released = Arc::clone(&first_released);
        let first = tokio::spawn(async move {
            let permit = gate2.acquire().await;
            tokio::time::sleep(Duration::from_secs(3)).await;
            released.store(true, std::sync::atomic::Ordering::SeqCst);
            drop(permit);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let start = Instant::now();
        let _second = gate.acquire().await;
        // Relâchement du premier + délai de repos complet
        assert!(first_released.load(std::sync::atomic::Ordering::SeqCst));
        assert!(start.elapsed() >= Duration::from_secs(3));
        first.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cool_down_charged_on_failure_path_too() {
        let gate = WrapperGate::new(Duration::from_secs(2));
        {
            let _permit = gate.acquire().await;
            // L'opération protégée échoue : le permis est simplement droppé.
        }
        let start = Instant::now();
        let _permit = gate.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}

//! Sémaphore de comptage avec deux classes de priorité
//!
//! Ce module fournit un sémaphore borné dont la file d'attente est ordonnée
//! par classe de priorité puis par ordre d'arrivée (FIFO strict au sein d'une
//! même classe). À la libération d'un slot, celui-ci est transféré
//! directement au meilleur attendant sans jamais redescendre le compteur, ce
//! qui empêche un nouvel appelant de doubler la file.
//!
//! L'annulation d'un attendant est sûre : si le signal d'admission et
//! l'annulation se croisent, le slot déjà accordé est restitué immédiatement
//! et l'invariant `count <= limit` est préservé.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::trace;

/// Classe de priorité d'une admission.
///
/// Deux classes seulement : les membres passent devant les utilisateurs
/// gratuits, sans famine pour ces derniers (FIFO au sein de chaque classe,
/// et un slot libéré va toujours à un attendant, jamais à un nouvel
/// appelant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Classe privilégiée (membres actifs).
    High = 0,
    /// Classe standard (utilisateurs gratuits).
    Normal = 1,
}

/// Attendant enregistré dans la file.
#[derive(Debug)]
struct Waiter {
    priority: Priority,
    sequence: u64,
    tx: oneshot::Sender<()>,
}

#[derive(Debug)]
struct SemState {
    /// Admissions en cours. Invariant : `0 <= count <= limit`.
    count: usize,
    /// Ticket monotone pour le FIFO intra-classe.
    sequence: u64,
    /// Attendants suspendus. Un attendant n'est retiré que par un signal de
    /// libération ou par sa propre annulation, jamais par polling.
    waiters: Vec<Waiter>,
}

/// Sémaphore borné à deux classes de priorité.
///
/// Toutes les mutations de `count` et de la file passent par un unique
/// `Mutex` interne, tenu uniquement le temps de la transition d'état et
/// jamais à travers un point de suspension.
#[derive(Debug)]
pub struct PrioritySemaphore {
    limit: usize,
    state: Mutex<SemState>,
}

impl PrioritySemaphore {
    /// Crée un sémaphore avec `limit` admissions simultanées.
    ///
    /// # Panics
    ///
    /// Panique si `limit` vaut zéro.
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "semaphore limit must be positive");
        Self {
            limit,
            state: Mutex::new(SemState {
                count: 0,
                sequence: 0,
                waiters: Vec::new(),
            }),
        }
    }

    /// Capacité totale du sémaphore.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Nombre de slots libres à cet instant (diagnostic).
    pub fn available(&self) -> usize {
        let state = self.state.lock().expect("priority semaphore mutex poisoned");
        self.limit - state.count
    }

    /// Nombre d'attendants suspendus à cet instant (diagnostic).
    pub fn waiting(&self) -> usize {
        let state = self.state.lock().expect("priority semaphore mutex poisoned");
        state.waiters.len()
    }

    /// Acquiert une admission, en se suspendant si la capacité est atteinte.
    ///
    /// Le permis est restitué au drop. Cette méthode ne connaît aucun
    /// timeout : les appelants qui en veulent un enveloppent l'appel dans
    /// `tokio::time::timeout`.
    pub async fn acquire(&self, priority: Priority) -> SemaphorePermit<'_> {
        let (sequence, rx) = {
            let mut state = self.state.lock().expect("priority semaphore mutex poisoned");
            if state.count < self.limit {
                state.count += 1;
                trace!(count = state.count, "admission immédiate");
                return SemaphorePermit { semaphore: self };
            }
            state.sequence += 1;
            let sequence = state.sequence;
            let (tx, rx) = oneshot::channel();
            state.waiters.push(Waiter {
                priority,
                sequence,
                tx,
            });
            trace!(?priority, sequence, "mise en file d'attente");
            (sequence, rx)
        };

        PendingAcquire {
            semaphore: self,
            sequence,
            rx,
            granted: false,
        }
        .await
    }

    /// Libère un slot : transfert direct au meilleur attendant, sinon
    /// décrément du compteur. Appelé sous le verrou d'état.
    fn release_slot(state: &mut SemState) {
        while let Some(waiter) = Self::pop_best(&mut state.waiters) {
            if waiter.tx.send(()).is_ok() {
                // Le slot change de main sans passer par count, un nouvel
                // appelant ne peut donc pas doubler la file.
                trace!(sequence = waiter.sequence, "slot transféré");
                return;
            }
            // Attendant annulé entre-temps : on passe au suivant.
        }
        state.count -= 1;
    }

    /// Retire l'attendant de tête : priorité la plus basse d'abord, puis
    /// ticket le plus ancien.
    fn pop_best(waiters: &mut Vec<Waiter>) -> Option<Waiter> {
        let best = waiters
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| (w.priority, w.sequence))
            .map(|(idx, _)| idx)?;
        Some(waiters.remove(best))
    }
}

/// Admission en cours, restituée au drop.
#[derive(Debug)]
pub struct SemaphorePermit<'a> {
    semaphore: &'a PrioritySemaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.semaphore.state.lock() {
            PrioritySemaphore::release_slot(&mut state);
        }
    }
}

/// Future d'attente d'un slot.
///
/// Son drop avant signalement retire l'attendant de la file ; son drop après
/// signalement restitue le slot reçu, de sorte qu'une annulation qui croise
/// une libération ne perd jamais d'admission.
struct PendingAcquire<'a> {
    semaphore: &'a PrioritySemaphore,
    sequence: u64,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl<'a> Future for PendingAcquire<'a> {
    type Output = SemaphorePermit<'a>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(())) => {
                this.granted = true;
                Poll::Ready(SemaphorePermit {
                    semaphore: this.semaphore,
                })
            }
            // L'émetteur ne disparaît que via release_slot, qui signale
            // toujours avant de lâcher le Waiter.
            Poll::Ready(Err(_)) => unreachable!("waiter dropped without being signaled"),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        if let Ok(mut state) = self.semaphore.state.lock() {
            if let Some(pos) = state
                .waiters
                .iter()
                .position(|w| w.sequence == self.sequence)
            {
                // Pas encore signalé : on se retire simplement de la file.
                state.waiters.remove(pos);
            } else {
                // La libération nous a déjà accordé le slot : on le rend
                // pour que les attendants restants progressent.
                trace!(sequence = self.sequence, "annulation après signal, slot restitué");
                PrioritySemaphore::release_slot(&mut state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_immediate_admission() {
        let sem = PrioritySemaphore::new(2);
        let p1 = sem.acquire(Priority::Normal).await;
        let p2 = sem.acquire(Priority::Normal).await;
        assert_eq!(sem.available(), 0);
        drop(p1);
        assert_eq!(sem.available(), 1);
        drop(p2);
        assert_eq!(sem.available(), 2);
    }

    #[tokio::test]
    async fn test_count_never_exceeds_limit() {
        let sem = Arc::new(PrioritySemaphore::new(3));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let sem = Arc::clone(&sem);
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire(Priority::Normal).await;
                assert!(sem.available() <= sem.limit());
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(sem.available(), 3);
        assert_eq!(sem.waiting(), 0);
    }

    #[tokio::test]
    async fn test_priority_then_fifo_order() {
        let sem = Arc::new(PrioritySemaphore::new(1));
        let holder = sem.acquire(Priority::Normal).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut handles = Vec::new();
        // Soumission dans l'ordre : N1, H1, N2, H2
        for (label, priority) in [
            ("N1", Priority::Normal),
            ("H1", Priority::High),
            ("N2", Priority::Normal),
            ("H2", Priority::High),
        ] {
            let sem = Arc::clone(&sem);
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire(priority).await;
                tx.send(label).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
            // Laisser chaque attendant s'enregistrer avant le suivant
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(sem.waiting(), 4);

        drop(holder);
        for handle in handles {
            handle.await.unwrap();
        }

        let mut order = Vec::new();
        while let Ok(label) = rx.try_recv() {
            order.push(label);
        }
        // Priorité d'abord, FIFO au sein de chaque classe
        assert_eq!(order, vec!["H1", "H2", "N1", "N2"]);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_skipped() {
        let sem = Arc::new(PrioritySemaphore::new(1));
        let holder = sem.acquire(Priority::Normal).await;

        let sem2 = Arc::clone(&sem);
        let cancelled = tokio::spawn(async move {
            let _permit = sem2.acquire(Priority::Normal).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancelled.abort();
        let _ = cancelled.await;

        assert_eq!(sem.waiting(), 0);
        drop(holder);
        assert_eq!(sem.available(), 1);
        // Le slot doit rester acquérable
        let _permit = sem.acquire(Priority::High).await;
    }

    #[tokio::test]
    async fn test_cancel_after_signal_releases_exactly_one_slot() {
        let sem = PrioritySemaphore::new(1);
        let holder = sem.acquire(Priority::Normal).await;

        let mut pending = tokio_test::task::spawn(sem.acquire(Priority::Normal));
        tokio_test::assert_pending!(pending.poll());
        assert_eq!(sem.waiting(), 1);

        // La libération signale l'attendant sans qu'il soit repollé...
        drop(holder);
        assert_eq!(sem.waiting(), 0);

        // ... puis l'annulation doit restituer le slot déjà accordé :
        // ni perte, ni double comptage.
        drop(pending);
        assert_eq!(sem.available(), 1);

        let _permit = sem.acquire(Priority::High).await;
        assert_eq!(sem.available(), 0);
    }
}

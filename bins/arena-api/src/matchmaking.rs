/// Matchmaking Orchestrator
///
/// **Owns:** the FIFO waiting queue, the live duel table and the
/// session-to-duel bindings, all behind one mutex. Every mutation (enqueue,
/// pairing, withdrawal, closing a duel) is a single critical section, so two
/// requests can never both pop the same waiting sessions.
///
/// **Waiting:** an enqueued request parks on a oneshot channel. Whichever
/// enqueue makes the queue reach two entries pairs the two oldest sessions
/// inside the critical section and hands the pairing to both waiters; there
/// is no sleep-and-recheck loop. A bounded pairing timeout withdraws the
/// entry so abandoned sessions do not get matched later.
///
/// **Abandonment:** a request dropped while queued leaves the queue. A request
/// dropped after it was paired forfeits the duel to its opponent.
///
/// **Lifetime:** a duel nobody wins expires after the duel timeout and both
/// sessions are free to queue again. Expired duels are swept on enqueue and
/// on validation.

use crate::error::ApiError;
use crate::metrics;
use crate::notify::NotificationHub;
use crate::problems::ProblemStore;
use arena_common::types::{Duel, Job, Pairing, PushEvent, SessionId, Verdict};
use arena_engine::{Judge, Judgement};
use chrono::Utc;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("Session is already in an active battle")]
    AlreadyInDuel,

    #[error("Session is already waiting for an opponent")]
    AlreadyQueued,

    #[error("No opponent found in time")]
    PairingTimeout,

    #[error("Invalid battle or session")]
    InvalidDuel,
}

struct Waiting {
    session_id: SessionId,
    ticket: u64,
    notify: oneshot::Sender<Pairing>,
}

struct LiveDuel {
    duel: Duel,
    expires_at: Instant,
}

#[derive(Default)]
struct MatchState {
    queue: VecDeque<Waiting>,
    duels: HashMap<Uuid, LiveDuel>,
    bindings: HashMap<SessionId, Uuid>,
    next_ticket: u64,
}

impl MatchState {
    /// Remove the duel and free both sessions, `winner` taking the win.
    fn close_duel(&mut self, duel_id: Uuid, winner: &str) -> Option<DuelOutcome> {
        let loser = self.duels.get(&duel_id)?.duel.opponent_of(winner)?.clone();
        self.duels.remove(&duel_id);
        self.bindings.remove(winner);
        self.bindings.remove(&loser);
        Some(DuelOutcome {
            duel_id,
            winner: winner.to_string(),
            loser,
        })
    }

    fn sweep_expired(&mut self, now: Instant) {
        let expired: Vec<Uuid> = self
            .duels
            .iter()
            .filter(|(_, live)| live.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for duel_id in expired {
            if let Some(live) = self.duels.remove(&duel_id) {
                for session in &live.duel.participants {
                    self.bindings.remove(session);
                }
                metrics::DUELS_EXPIRED.inc();
                info!(duel_id = %duel_id, "Battle expired without a winner");
            }
        }
    }

    fn withdraw(&mut self, ticket: u64) -> bool {
        let before = self.queue.len();
        self.queue.retain(|w| w.ticket != ticket);
        metrics::WAITING_PLAYERS.set(self.queue.len() as i64);
        self.queue.len() != before
    }
}

/// Winner and loser of a closed duel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuelOutcome {
    pub duel_id: Uuid,
    pub winner: SessionId,
    pub loser: SessionId,
}

/// A queued request. Dropping it before it settles withdraws the entry, or
/// forfeits the duel if the pairing already reached it.
struct PendingEntry<'a> {
    matchmaker: &'a Matchmaker,
    session_id: SessionId,
    ticket: u64,
    rx: oneshot::Receiver<Pairing>,
    settled: bool,
}

impl PendingEntry<'_> {
    fn settle<T>(&mut self, result: T) -> T {
        self.settled = true;
        result
    }
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(outcome) = self.matchmaker.abandon(self.ticket, &self.session_id, &mut self.rx) {
            self.matchmaker.spawn_outcome(outcome);
        }
    }
}

pub struct Matchmaker {
    state: Mutex<MatchState>,
    hub: Arc<NotificationHub>,
    problem_ids: RangeInclusive<u32>,
    pairing_timeout: Duration,
    duel_timeout: Duration,
}

impl Matchmaker {
    pub fn new(
        hub: Arc<NotificationHub>,
        problem_ids: RangeInclusive<u32>,
        pairing_timeout: Duration,
        duel_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(MatchState::default()),
            hub,
            problem_ids,
            pairing_timeout,
            duel_timeout,
        }
    }

    fn state(&self) -> MutexGuard<'_, MatchState> {
        // Critical sections never panic midway, so a poisoned state is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `session_id` and wait until it is paired with the next session.
    pub async fn enqueue(&self, session_id: SessionId) -> Result<Pairing, MatchError> {
        let (mut pending, formed, forfeits) = {
            let mut state = self.state();
            state.sweep_expired(Instant::now());

            if state.bindings.contains_key(&session_id) {
                return Err(MatchError::AlreadyInDuel);
            }
            if state
                .queue
                .iter()
                .any(|w| w.session_id == session_id && !w.notify.is_closed())
            {
                return Err(MatchError::AlreadyQueued);
            }

            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiting {
                session_id: session_id.clone(),
                ticket,
                notify: tx,
            });
            info!(session_id = %session_id, waiting = state.queue.len(), "Session queued for battle");

            let (formed, forfeits) = self.pair_waiting(&mut state);
            metrics::WAITING_PLAYERS.set(state.queue.len() as i64);

            let pending = PendingEntry {
                matchmaker: self,
                session_id: session_id.clone(),
                ticket,
                rx,
                settled: false,
            };
            (pending, formed, forfeits)
        };

        for duel in &formed {
            self.announce(duel).await;
        }
        for outcome in &forfeits {
            self.publish_outcome(outcome, "Battle forfeited").await;
        }

        let received = tokio::time::timeout(self.pairing_timeout, &mut pending.rx).await;
        match received {
            Ok(Ok(pairing)) => pending.settle(Ok(pairing)),
            // The sender is only dropped unsent when the entry is discarded
            Ok(Err(_)) => pending.settle(Err(MatchError::PairingTimeout)),
            Err(_) => {
                let withdrawn = self.state().withdraw(pending.ticket);
                if withdrawn {
                    warn!(session_id = %session_id, "No opponent found, leaving queue");
                    return pending.settle(Err(MatchError::PairingTimeout));
                }
                // Paired between the deadline and the withdrawal
                match pending.rx.try_recv() {
                    Ok(pairing) => pending.settle(Ok(pairing)),
                    Err(_) => pending.settle(Err(MatchError::PairingTimeout)),
                }
            }
        }
    }

    /// Pair the oldest waiting sessions two at a time.
    ///
    /// Returns the duels formed and those forfeited because the second
    /// request vanished after the first was already told about the duel.
    fn pair_waiting(&self, state: &mut MatchState) -> (Vec<Duel>, Vec<DuelOutcome>) {
        // Requests that gave up (client went away) must not be matched
        state.queue.retain(|w| !w.notify.is_closed());

        let mut formed = Vec::new();
        let mut forfeits = Vec::new();
        while state.queue.len() >= 2 {
            let (Some(first), Some(second)) = (state.queue.pop_front(), state.queue.pop_front()) else {
                break;
            };

            let duel = Duel {
                id: Uuid::new_v4(),
                participants: [first.session_id.clone(), second.session_id.clone()],
                problem_id: rand::thread_rng().gen_range(self.problem_ids.clone()),
                started_at: Utc::now(),
            };
            let pairing = Pairing {
                duel_id: duel.id,
                problem_id: duel.problem_id,
            };

            if first.notify.send(pairing.clone()).is_err() {
                // Nothing was promised yet; the second waiter keeps its place
                state.queue.push_front(second);
                continue;
            }
            let second_gone = second.notify.send(pairing).is_err();

            state.bindings.insert(first.session_id.clone(), duel.id);
            state.bindings.insert(second.session_id, duel.id);
            state.duels.insert(
                duel.id,
                LiveDuel {
                    duel: duel.clone(),
                    expires_at: Instant::now() + self.duel_timeout,
                },
            );
            formed.push(duel.clone());

            if second_gone {
                forfeits.extend(state.close_duel(duel.id, &first.session_id));
            }
        }
        (formed, forfeits)
    }

    /// Clean up after a request dropped before it settled.
    fn abandon(&self, ticket: u64, session_id: &str, rx: &mut oneshot::Receiver<Pairing>) -> Option<DuelOutcome> {
        let mut state = self.state();
        if state.withdraw(ticket) {
            info!(session_id = %session_id, "Waiting request abandoned, leaving queue");
            return None;
        }

        // Pairings are sent under this lock, so a paired entry has one waiting
        let pairing = rx.try_recv().ok()?;
        if state.bindings.get(session_id) != Some(&pairing.duel_id) {
            return None;
        }
        let opponent = state.duels.get(&pairing.duel_id)?.duel.opponent_of(session_id)?.clone();
        state.close_duel(pairing.duel_id, &opponent)
    }

    fn spawn_outcome(&self, outcome: DuelOutcome) {
        let hub = self.hub.clone();
        metrics::DUELS_FINISHED.inc();
        info!(duel_id = %outcome.duel_id, winner = %outcome.winner, loser = %outcome.loser, "Battle forfeited");

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { notify_outcome(&hub, &outcome).await });
            }
            Err(_) => warn!(duel_id = %outcome.duel_id, "No runtime to deliver forfeit notifications"),
        }
    }

    async fn announce(&self, duel: &Duel) {
        metrics::DUELS_CREATED.inc();
        info!(
            duel_id = %duel.id,
            problem_id = duel.problem_id,
            first = %duel.participants[0],
            second = %duel.participants[1],
            "Battle created"
        );

        let event = PushEvent::Battle {
            duel_id: duel.id,
            problem_id: duel.problem_id,
            participants: duel.participants.clone(),
        };
        self.hub.broadcast(&event).await;
    }

    async fn publish_outcome(&self, outcome: &DuelOutcome, message: &str) {
        metrics::DUELS_FINISHED.inc();
        info!(duel_id = %outcome.duel_id, winner = %outcome.winner, loser = %outcome.loser, "{}", message);
        notify_outcome(&self.hub, outcome).await;
    }

    /// The live duel `duel_id`, if `session_id` takes part in it.
    pub fn validate(&self, duel_id: Uuid, session_id: &str) -> Result<Duel, MatchError> {
        let mut state = self.state();
        state.sweep_expired(Instant::now());
        state
            .duels
            .get(&duel_id)
            .map(|live| &live.duel)
            .filter(|duel| duel.has_participant(session_id))
            .cloned()
            .ok_or(MatchError::InvalidDuel)
    }

    /// Close the duel with `winner` as its winner and notify both sides.
    ///
    /// Returns `None` if the duel was already closed.
    pub async fn record_winner(&self, duel_id: Uuid, winner: &str) -> Option<DuelOutcome> {
        let outcome = self.state().close_duel(duel_id, winner)?;
        self.publish_outcome(&outcome, "Battle decided").await;
        Some(outcome)
    }

    /// Judge a duel answer against the duel's problem; an accepted answer
    /// wins the duel if it is still open.
    pub async fn submit_answer(
        &self,
        judge: &Judge,
        problems: &dyn ProblemStore,
        duel_id: Uuid,
        session_id: &str,
        job: &Job,
    ) -> Result<Judgement, ApiError> {
        let duel = self.validate(duel_id, session_id)?;

        let problem = problems
            .get(duel.problem_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Problem {} not found", duel.problem_id)))?;

        let judgement = judge.judge(&problem, job).await?;

        if judgement.verdict == Verdict::Accepted
            && self.record_winner(duel_id, session_id).await.is_none()
        {
            info!(duel_id = %duel_id, session_id = %session_id, "Accepted after battle was already decided");
        }

        Ok(judgement)
    }

    pub fn waiting_len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn active_duels(&self) -> usize {
        self.state().duels.len()
    }

    pub fn duel_of(&self, session_id: &str) -> Option<Uuid> {
        self.state().bindings.get(session_id).copied()
    }
}

async fn notify_outcome(hub: &NotificationHub, outcome: &DuelOutcome) {
    hub.send_to(
        &outcome.winner,
        &PushEvent::Winner {
            duel_id: outcome.duel_id,
            session_id: outcome.winner.clone(),
        },
    )
    .await;
    hub.send_to(
        &outcome.loser,
        &PushEvent::Loser {
            duel_id: outcome.duel_id,
            session_id: outcome.loser.clone(),
        },
    )
    .await;
}

// SPDX-License-Identifier: MIT
//! Offer position ledger.
//!
//! The single source of truth for the offer under construction: an ordered
//! list of priced positions plus derived totals.  Positions carry no stable
//! identity — `nr` is the 1-based slot in the list and is renumbered on every
//! mutation, so after any change the set of numbers is exactly `1..=len`.
//!
//! Money stays `f64` end to end, rounded to two decimals at each defined
//! step: per line (`menge * epreis`), then net sum, then VAT, then gross.
//! Recomputing totals without a mutation never changes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::events::{EventBus, OfferEvent};
use crate::services::RawPosition;

/// Round half away from zero to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ─── Types ────────────────────────────────────────────────────────────────────

/// One priced line of the offer.
///
/// `nr` is display order, not identity.  Never persist it as a key; it is
/// reassigned whenever the list changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferPosition {
    pub nr: u32,
    pub name: String,
    pub menge: f64,
    pub einheit: String,
    /// Unit price, net.
    pub epreis: f64,
    /// Line total: `round2(menge * epreis)`.
    pub gesamtpreis: f64,
}

/// Aggregate totals of the offer, each rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OfferTotals {
    pub netto: f64,
    pub steuer: f64,
    pub brutto: f64,
}

/// Single-field edit applied to one position via [`PositionLedger::update`].
#[derive(Debug, Clone)]
pub enum PositionPatch {
    Name(String),
    Menge(f64),
    Einheit(String),
    Epreis(f64),
}

/// Immutable view of the ledger for rendering or a guard check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub draft_id: Uuid,
    /// Increases by one on every mutation.  Async consumers compare it to
    /// detect that their input went stale while they were away.
    pub generation: u64,
    pub positions: Vec<OfferPosition>,
    pub totals: OfferTotals,
    pub updated_at: DateTime<Utc>,
}

struct LedgerState {
    draft_id: Uuid,
    generation: u64,
    positions: Vec<OfferPosition>,
    updated_at: DateTime<Utc>,
}

// ─── Ledger ───────────────────────────────────────────────────────────────────

/// Thread-safe position ledger.  Mutations are synchronous and renumber the
/// whole list; each one bumps the generation and notifies the watch channel
/// so the guard loop can recheck in the background.
pub struct PositionLedger {
    state: RwLock<LedgerState>,
    vat_rate: f64,
    events: EventBus,
    changed_tx: watch::Sender<u64>,
}

impl PositionLedger {
    pub fn new(vat_rate: f64, events: EventBus) -> Self {
        let (changed_tx, _) = watch::channel(0);
        Self {
            state: RwLock::new(LedgerState {
                draft_id: Uuid::new_v4(),
                generation: 0,
                positions: Vec::new(),
                updated_at: Utc::now(),
            }),
            vat_rate,
            events,
            changed_tx,
        }
    }

    /// Receiver that observes the latest generation after each mutation.
    /// Watch semantics coalesce bursts; readers always see the newest value.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changed_tx.subscribe()
    }

    /// Replace the whole position list (chat materialization, wizard finalize).
    pub fn replace(&self, raw: Vec<RawPosition>) -> LedgerSnapshot {
        self.commit(|positions| {
            *positions = raw.into_iter().map(position_from_raw).collect();
        })
    }

    /// Append a single position (guard suggestion accept).
    pub fn append(&self, raw: RawPosition) -> LedgerSnapshot {
        self.commit(|positions| {
            positions.push(position_from_raw(raw));
        })
    }

    /// Remove the position currently numbered `nr`.  Returns `None` and
    /// leaves the ledger untouched when no such position exists.
    pub fn remove(&self, nr: u32) -> Option<LedgerSnapshot> {
        self.mutate(|positions| {
            let idx = positions.iter().position(|p| p.nr == nr);
            match idx {
                Some(idx) => {
                    positions.remove(idx);
                    true
                }
                None => false,
            }
        })
    }

    /// Apply a single-field patch to the position currently numbered `nr`.
    /// Quantity and price edits recompute the line total.  Returns `None`
    /// when no such position exists.
    pub fn update(&self, nr: u32, patch: PositionPatch) -> Option<LedgerSnapshot> {
        self.mutate(|positions| {
            let pos = match positions.iter_mut().find(|p| p.nr == nr) {
                Some(pos) => pos,
                None => return false,
            };
            match patch {
                PositionPatch::Name(name) => pos.name = name,
                PositionPatch::Menge(menge) => pos.menge = menge,
                PositionPatch::Einheit(einheit) => pos.einheit = einheit,
                PositionPatch::Epreis(epreis) => pos.epreis = epreis,
            }
            true
        })
    }

    /// Drop all positions and start a fresh draft (new-offer action).
    pub fn clear(&self) -> LedgerSnapshot {
        let snapshot = {
            let mut state = self.state.write().expect("ledger lock poisoned");
            state.positions.clear();
            state.draft_id = Uuid::new_v4();
            state.generation += 1;
            state.updated_at = Utc::now();
            snapshot_of(&state, self.vat_rate)
        };
        debug!(draft_id = %snapshot.draft_id, "ledger cleared, new draft started");
        self.events.emit(OfferEvent::OfferCleared);
        self.notify(&snapshot);
        snapshot
    }

    /// Current state as an immutable snapshot.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.read().expect("ledger lock poisoned");
        snapshot_of(&state, self.vat_rate)
    }

    /// Current totals.  Derived, idempotent: calling this repeatedly without
    /// a mutation in between always yields the same numbers.
    pub fn totals(&self) -> OfferTotals {
        let state = self.state.read().expect("ledger lock poisoned");
        totals_of(&state.positions, self.vat_rate)
    }

    pub fn generation(&self) -> u64 {
        self.state.read().expect("ledger lock poisoned").generation
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().expect("ledger lock poisoned").positions.is_empty()
    }

    /// Unconditional mutation: apply `op`, renumber, bump, notify.
    fn commit(&self, op: impl FnOnce(&mut Vec<OfferPosition>)) -> LedgerSnapshot {
        let snapshot = {
            let mut state = self.state.write().expect("ledger lock poisoned");
            op(&mut state.positions);
            renumber(&mut state.positions);
            state.generation += 1;
            state.updated_at = Utc::now();
            snapshot_of(&state, self.vat_rate)
        };
        self.notify(&snapshot);
        snapshot
    }

    /// Conditional mutation: `op` returns false to signal "target not found",
    /// in which case nothing changes and no event fires.
    fn mutate(&self, op: impl FnOnce(&mut Vec<OfferPosition>) -> bool) -> Option<LedgerSnapshot> {
        let snapshot = {
            let mut state = self.state.write().expect("ledger lock poisoned");
            if !op(&mut state.positions) {
                return None;
            }
            renumber(&mut state.positions);
            state.generation += 1;
            state.updated_at = Utc::now();
            snapshot_of(&state, self.vat_rate)
        };
        self.notify(&snapshot);
        Some(snapshot)
    }

    /// Notify outside the state lock; both channels are non-blocking sends.
    fn notify(&self, snapshot: &LedgerSnapshot) {
        // send_replace stores the value even while nobody is subscribed yet.
        self.changed_tx.send_replace(snapshot.generation);
        self.events.emit(OfferEvent::PositionsChanged {
            generation: snapshot.generation,
            count: snapshot.positions.len(),
        });
        self.events.emit(OfferEvent::TotalsChanged {
            totals: snapshot.totals,
        });
    }
}

// ─── Derivations ──────────────────────────────────────────────────────────────

fn position_from_raw(raw: RawPosition) -> OfferPosition {
    OfferPosition {
        nr: 0, // assigned by renumber
        name: raw.name,
        menge: raw.menge,
        einheit: raw.einheit,
        epreis: raw.epreis,
        gesamtpreis: 0.0,
    }
}

/// Reassign `nr` 1..=len and recompute every line total.
fn renumber(positions: &mut [OfferPosition]) {
    for (idx, pos) in positions.iter_mut().enumerate() {
        pos.nr = (idx + 1) as u32;
        pos.gesamtpreis = round2(pos.menge * pos.epreis);
    }
}

/// Net, VAT and gross, rounded at each step.  `brutto` is computed from the
/// already-rounded `netto` and `steuer`, so the three always reconcile to
/// the cent.
fn totals_of(positions: &[OfferPosition], vat_rate: f64) -> OfferTotals {
    let netto = round2(positions.iter().map(|p| p.gesamtpreis).sum());
    let steuer = round2(netto * vat_rate);
    let brutto = round2(netto + steuer);
    OfferTotals { netto, steuer, brutto }
}

fn snapshot_of(state: &LedgerState, vat_rate: f64) -> LedgerSnapshot {
    LedgerSnapshot {
        draft_id: state.draft_id,
        generation: state.generation,
        positions: state.positions.clone(),
        totals: totals_of(&state.positions, vat_rate),
        updated_at: state.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, menge: f64, epreis: f64) -> RawPosition {
        RawPosition {
            name: name.to_string(),
            menge,
            einheit: "m²".to_string(),
            epreis,
        }
    }

    #[test]
    fn test_round2_half_away_from_zero() {
        assert_eq!(round2(3.805), 3.81);
        assert_eq!(round2(3.804), 3.8);
        assert_eq!(round2(20.0), 20.0);
    }

    #[test]
    fn test_line_totals_rounded_per_line() {
        let ledger = PositionLedger::new(0.19, EventBus::new());
        // 3 * 3.333 = 9.999 -> 10.00 on the line, not at the sum.
        let snap = ledger.replace(vec![raw("Vlies", 3.0, 3.333)]);
        assert_eq!(snap.positions[0].gesamtpreis, 10.0);
        assert_eq!(snap.totals.netto, 10.0);
    }

    #[test]
    fn test_totals_reconcile_to_the_cent() {
        let ledger = PositionLedger::new(0.19, EventBus::new());
        let snap = ledger.replace(vec![raw("A", 1.0, 10.01), raw("B", 3.0, 0.07)]);
        let t = snap.totals;
        // netto 10.22, steuer round2(1.9418) = 1.94, brutto 12.16
        assert_eq!(t.netto, 10.22);
        assert_eq!(t.steuer, 1.94);
        assert_eq!(round2(t.netto + t.steuer), t.brutto);
    }

    #[test]
    fn test_remove_unknown_nr_is_a_noop() {
        let ledger = PositionLedger::new(0.19, EventBus::new());
        ledger.replace(vec![raw("A", 1.0, 1.0)]);
        let gen_before = ledger.generation();
        assert!(ledger.remove(99).is_none());
        assert_eq!(ledger.generation(), gen_before);
    }

    #[test]
    fn test_snapshot_serializes_with_camel_case_keys() {
        let ledger = PositionLedger::new(0.19, EventBus::new());
        let snap = ledger.replace(vec![raw("Vlies", 2.0, 1.85)]);
        let json = serde_json::to_value(&snap).expect("snapshot serializes");
        // draft_id is a Uuid and must come out as a plain string.
        assert!(json["draftId"].is_string());
        assert_eq!(json["generation"], 1);
        assert_eq!(json["positions"][0]["gesamtpreis"], 3.7);
        assert!(json["updatedAt"].is_string());
    }
}

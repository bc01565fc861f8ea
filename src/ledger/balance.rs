//! Per-key balance cells.
//!
//! Every withdrawable balance lives in its own [`BalanceCell`] behind its own
//! mutex, so withdrawals on disjoint keys never contend. A withdrawal runs the
//! cell through `Idle -> Pending -> Idle`: the available amount is zeroed and
//! parked as in-flight before the transfer runs (with no lock held), then the
//! in-flight amount is either dropped (paid) or added back (failed).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::SettlementError;
use crate::ledger::Balance;

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CellState {
    #[default]
    Idle,
    Pending { in_flight: Balance },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BalanceCell {
    available: Balance,
    state: CellState,
}

impl BalanceCell {
    pub fn available(&self) -> Balance {
        self.available
    }

    pub fn in_flight(&self) -> Balance {
        match self.state {
            CellState::Idle => 0,
            CellState::Pending { in_flight } => in_flight,
        }
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    /// Balance still owed by the ledger, including any transfer in progress.
    pub fn owed(&self) -> Balance {
        self.available + self.in_flight()
    }

    pub fn credit(&mut self, amount: Balance) {
        self.available += amount;
    }

    /// Move `Idle` with a non-zero balance to `Pending`, returning the amount
    /// to transfer. Returns `None` when nothing is withdrawable.
    pub fn begin_withdrawal(&mut self) -> Option<Balance> {
        if self.state != CellState::Idle || self.available == 0 {
            return None;
        }
        let amount = std::mem::take(&mut self.available);
        self.state = CellState::Pending { in_flight: amount };
        Some(amount)
    }

    /// Close a pending withdrawal. On failure the in-flight amount is restored
    /// on top of anything accrued meanwhile.
    pub fn settle(&mut self, paid: bool) {
        if let CellState::Pending { in_flight } = self.state {
            if !paid {
                self.available += in_flight;
            }
        }
        self.state = CellState::Idle;
    }
}

/// Outcome of one withdrawal attempt on a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Withdrawal {
    Paid(Balance),
    Empty,
    Failed {
        amount: Balance,
        error: SettlementError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellView<K> {
    pub key: K,
    pub available: Balance,
    pub in_flight: Balance,
}

/// Keyed collection of balance cells. The outer lock guards the map shape;
/// balance mutations lock the individual cell. Lock order is map, then cell.
///
/// A cell that a successful withdrawal leaves `Idle` and empty is removed, so
/// the map holds only keys with something owed or in flight.
pub struct BalanceBook<K> {
    cells: RwLock<BTreeMap<K, Arc<Mutex<BalanceCell>>>>,
}

impl<K: Ord + Clone> Default for BalanceBook<K> {
    fn default() -> Self {
        Self {
            cells: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K: Ord + Clone> BalanceBook<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing(&self, key: &K) -> Option<Arc<Mutex<BalanceCell>>> {
        read(&self.cells).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        read(&self.cells).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.cells).is_empty()
    }

    pub fn credit(&self, key: &K, amount: Balance) {
        if amount == 0 {
            return;
        }
        // the map lock stays held until the credit lands, so pruning cannot
        // detach the cell in between
        {
            let cells = read(&self.cells);
            if let Some(cell) = cells.get(key) {
                lock(cell).credit(amount);
                return;
            }
        }
        let mut cells = write(&self.cells);
        let cell = cells.entry(key.clone()).or_default();
        lock(cell).credit(amount);
    }

    pub fn available(&self, key: &K) -> Balance {
        match self.existing(key) {
            Some(cell) => {
                let available = lock(&cell).available();
                available
            }
            None => 0,
        }
    }

    pub fn view(&self) -> Vec<CellView<K>> {
        let cells: Vec<_> = read(&self.cells)
            .iter()
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();
        cells
            .into_iter()
            .map(|(key, cell)| {
                let guard = lock(&cell);
                CellView {
                    key,
                    available: guard.available(),
                    in_flight: guard.in_flight(),
                }
            })
            .collect()
    }

    pub fn total_owed(&self) -> Balance {
        self.view().iter().map(|v| v.available + v.in_flight).sum()
    }

    /// Withdraw the whole available balance of `key` through `transfer`.
    ///
    /// The cell lock is released while `transfer` runs, so a re-entrant call on
    /// the same key observes a zero balance and cannot start a second withdrawal.
    pub fn withdraw<F>(&self, key: &K, transfer: F) -> Withdrawal
    where
        F: FnOnce(Balance) -> Result<(), SettlementError>,
    {
        let Some(cell) = self.existing(key) else {
            return Withdrawal::Empty;
        };
        let begun = lock(&cell).begin_withdrawal();
        let Some(amount) = begun else {
            return Withdrawal::Empty;
        };
        let result = transfer(amount);
        let paid = result.is_ok();
        lock(&cell).settle(paid);
        if paid {
            self.prune(key, &cell);
        }
        match result {
            Ok(()) => Withdrawal::Paid(amount),
            Err(error) => Withdrawal::Failed { amount, error },
        }
    }

    fn prune(&self, key: &K, cell: &Arc<Mutex<BalanceCell>>) {
        let mut cells = write(&self.cells);
        let Some(current) = cells.get(key) else {
            return;
        };
        if !Arc::ptr_eq(current, cell) {
            return;
        }
        let drained = {
            let guard = lock(current);
            guard.state() == CellState::Idle && guard.available() == 0
        };
        if drained {
            cells.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_state_machine() {
        let mut cell = BalanceCell::default();
        assert_eq!(cell.begin_withdrawal(), None);
        cell.credit(10);
        assert_eq!(cell.begin_withdrawal(), Some(10));
        assert_eq!(cell.state(), CellState::Pending { in_flight: 10 });
        assert_eq!(cell.available(), 0);
        assert_eq!(cell.owed(), 10);
        // a pending cell cannot start a second withdrawal, even after new credit
        cell.credit(5);
        assert_eq!(cell.begin_withdrawal(), None);
        cell.settle(false);
        assert_eq!(cell.state(), CellState::Idle);
        assert_eq!(cell.available(), 15);
        assert_eq!(cell.begin_withdrawal(), Some(15));
        cell.settle(true);
        assert_eq!(cell.owed(), 0);
    }

    #[test]
    fn book_withdraw_paths() {
        let book: BalanceBook<String> = BalanceBook::new();
        let key = "alice".to_string();
        assert_eq!(book.withdraw(&key, |_| Ok(())), Withdrawal::Empty);
        book.credit(&key, 40);
        let failed = book.withdraw(&key, |_| Err(SettlementError::Rejected(key.clone())));
        assert!(matches!(failed, Withdrawal::Failed { amount: 40, .. }));
        assert_eq!(book.available(&key), 40);
        assert_eq!(book.len(), 1);
        assert_eq!(book.withdraw(&key, |_| Ok(())), Withdrawal::Paid(40));
        assert_eq!(book.available(&key), 0);
        assert!(book.is_empty());
        assert_eq!(book.withdraw(&key, |_| Ok(())), Withdrawal::Empty);
    }

    #[test]
    fn nested_withdrawal_sees_empty_cell() {
        let book: BalanceBook<String> = BalanceBook::new();
        let key = "mallory".to_string();
        book.credit(&key, 7);
        let outcome = book.withdraw(&key, |amount| {
            assert_eq!(amount, 7);
            assert_eq!(book.withdraw(&key, |_| Ok(())), Withdrawal::Empty);
            assert_eq!(book.total_owed(), 7);
            Ok(())
        });
        assert_eq!(outcome, Withdrawal::Paid(7));
        assert_eq!(book.total_owed(), 0);
    }

    #[test]
    fn drained_cells_are_pruned_but_pending_credit_survives() {
        let book: BalanceBook<String> = BalanceBook::new();
        let (alice, bob) = ("alice".to_string(), "bob".to_string());
        book.credit(&alice, 10);
        book.credit(&bob, 3);
        // credit landing while the transfer is in flight keeps the cell alive
        let outcome = book.withdraw(&alice, |_| {
            book.credit(&alice, 4);
            Ok(())
        });
        assert_eq!(outcome, Withdrawal::Paid(10));
        assert_eq!(book.available(&alice), 4);
        assert_eq!(book.len(), 2);

        assert_eq!(book.withdraw(&alice, |_| Ok(())), Withdrawal::Paid(4));
        assert_eq!(book.withdraw(&bob, |_| Ok(())), Withdrawal::Paid(3));
        assert!(book.is_empty());
        assert_eq!(book.total_owed(), 0);

        // a fresh credit after pruning starts a new cell
        book.credit(&alice, 2);
        assert_eq!(book.available(&alice), 2);
    }

    #[test]
    fn balances_accumulate_past_u64() {
        let mut cell = BalanceCell::default();
        cell.credit(u64::MAX as Balance);
        cell.credit(u64::MAX as Balance);
        assert_eq!(cell.available(), 2 * u64::MAX as Balance);
    }
}

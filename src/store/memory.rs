//! In-memory store
//!
//! Same contract as the Postgres store without a database: a unit of work
//! keeps a private change set and validates it against the shared state at
//! commit, so a concurrent writer surfaces as `ConcurrencyConflict` instead
//! of waiting on a row lock. Also provides an `OutboxSource` over the
//! committed outbox rows.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::aggregate::{Account, Aggregate, Transaction};
use crate::outbox::{
    ClaimedBatch, NewOutboxEvent, OutboxError, OutboxEvent, OutboxSource, OutboxStats,
};

use super::{
    AccountRepository, StoreError, TransactionFilter, TransactionRepository, UnitOfWork,
    UnitOfWorkFactory,
};

#[derive(Debug, Default)]
struct State {
    transactions: HashMap<Uuid, Transaction>,
    accounts: HashMap<Uuid, Account>,
    outbox: Vec<OutboxEvent>,
    claimed: HashSet<i64>,
    next_outbox_id: i64,
}

/// Shared in-memory store; clones share state
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outbox source draining this store's committed rows
    pub fn outbox_source(&self) -> InMemoryOutboxSource {
        InMemoryOutboxSource {
            state: self.state.clone(),
        }
    }

    /// Snapshot of all committed outbox rows in id order
    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        lock(&self.state).outbox.clone()
    }

    /// Committed transaction, if any
    pub fn transaction(&self, id: Uuid) -> Option<Transaction> {
        lock(&self.state).transactions.get(&id).cloned()
    }

    /// Committed transactions on an account
    pub fn transactions_on(&self, account_id: Uuid) -> Vec<Transaction> {
        let mut found: Vec<Transaction> = lock(&self.state)
            .transactions
            .values()
            .filter(|t| t.account_id() == account_id)
            .cloned()
            .collect();
        sort_transactions(&mut found);
        found
    }
}

#[async_trait]
impl UnitOfWorkFactory for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(InMemoryUnitOfWork {
            state: self.state.clone(),
            transactions: ChangeSet::default(),
            accounts: ChangeSet::default(),
            staged: Vec::new(),
        }))
    }
}

fn sort_transactions(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| {
        (a.effective_date(), a.created_at(), a.id()).cmp(&(b.effective_date(), b.created_at(), b.id()))
    });
}

// =========================================================================
// Change tracking
// =========================================================================

/// Pending write of one aggregate inside a unit of work
#[derive(Debug, Clone)]
struct Change<T> {
    /// Version the committed state must still have; `None` for inserts
    base: Option<i64>,
    /// `None` once deleted
    value: Option<T>,
}

#[derive(Debug)]
struct ChangeSet<T> {
    changes: HashMap<Uuid, Change<T>>,
}

impl<T> Default for ChangeSet<T> {
    fn default() -> Self {
        Self {
            changes: HashMap::new(),
        }
    }
}

impl<T: Aggregate + Clone> ChangeSet<T> {
    /// Current view of an aggregate: own writes first, then committed state
    fn read(&self, id: Uuid, committed: &HashMap<Uuid, T>) -> Option<T> {
        match self.changes.get(&id) {
            Some(change) => change.value.clone(),
            None => committed.get(&id).cloned(),
        }
    }

    fn insert(&mut self, value: &T, committed: &HashMap<Uuid, T>) -> Result<(), StoreError> {
        if self.read(value.id(), committed).is_some() {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id: value.id(),
            });
        }

        let base = self.changes.get(&value.id()).and_then(|change| change.base);
        self.changes.insert(
            value.id(),
            Change {
                base,
                value: Some(value.clone()),
            },
        );
        Ok(())
    }

    /// Record a write of `value`, which must carry the version it was read at
    fn write(
        &mut self,
        value: Option<T>,
        id: Uuid,
        version: i64,
        committed: &HashMap<Uuid, T>,
    ) -> Result<(), StoreError> {
        let current = self
            .read(id, committed)
            .ok_or(StoreError::ConcurrencyConflict { aggregate_id: id })?;
        if current.version() != version {
            return Err(StoreError::ConcurrencyConflict { aggregate_id: id });
        }

        let base = match self.changes.get(&id) {
            Some(change) => change.base,
            None => Some(version),
        };
        self.changes.insert(id, Change { base, value });
        Ok(())
    }

    /// Check every change against committed state
    fn validate(&self, committed: &HashMap<Uuid, T>) -> Result<(), StoreError> {
        for (id, change) in &self.changes {
            let current = committed.get(id).map(|value| value.version());
            if current != change.base {
                return Err(StoreError::ConcurrencyConflict { aggregate_id: *id });
            }
        }
        Ok(())
    }

    fn apply(self, committed: &mut HashMap<Uuid, T>) {
        for (id, change) in self.changes {
            match change.value {
                Some(value) => committed.insert(id, value),
                None => committed.remove(&id),
            };
        }
    }
}

// =========================================================================
// Unit of work
// =========================================================================

struct InMemoryUnitOfWork {
    state: Arc<Mutex<State>>,
    transactions: ChangeSet<Transaction>,
    accounts: ChangeSet<Account>,
    staged: Vec<NewOutboxEvent>,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    fn transactions(&mut self) -> Box<dyn TransactionRepository + '_> {
        Box::new(InMemoryTransactionRepository {
            state: &self.state,
            changes: &mut self.transactions,
        })
    }

    fn accounts(&mut self) -> Box<dyn AccountRepository + '_> {
        Box::new(InMemoryAccountRepository {
            state: &self.state,
            changes: &mut self.accounts,
        })
    }

    fn collect_events(&mut self, events: Vec<NewOutboxEvent>) {
        self.staged.extend(events);
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut state = lock(&this.state);

        this.transactions.validate(&state.transactions)?;
        this.accounts.validate(&state.accounts)?;

        this.transactions.apply(&mut state.transactions);
        this.accounts.apply(&mut state.accounts);

        for event in this.staged {
            state.next_outbox_id += 1;
            let id = state.next_outbox_id;
            state.outbox.push(OutboxEvent {
                id,
                event_type: event.event_type,
                aggregate_type: event.aggregate_type,
                aggregate_id: event.aggregate_id,
                payload: event.payload,
                created_at: event.created_at,
                processed_at: None,
            });
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

struct InMemoryTransactionRepository<'u> {
    state: &'u Mutex<State>,
    changes: &'u mut ChangeSet<Transaction>,
}

impl<'u> InMemoryTransactionRepository<'u> {
    /// Committed state overlaid with this unit's changes
    fn visible(&self) -> Vec<Transaction> {
        let state = lock(self.state);
        let mut visible: HashMap<Uuid, Transaction> = state.transactions.clone();
        for (id, change) in &self.changes.changes {
            match &change.value {
                Some(value) => visible.insert(*id, value.clone()),
                None => visible.remove(id),
            };
        }
        visible.into_values().collect()
    }
}

#[async_trait]
impl<'u> TransactionRepository for InMemoryTransactionRepository<'u> {
    async fn add(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        let state = lock(self.state);
        self.changes.insert(transaction, &state.transactions)
    }

    async fn get(&mut self, id: Uuid) -> Result<Transaction, StoreError> {
        let state = lock(self.state);
        self.changes
            .read(id, &state.transactions)
            .ok_or_else(|| StoreError::not_found("Transaction", id))
    }

    async fn get_by_account(
        &mut self,
        account_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut found: Vec<Transaction> = self
            .visible()
            .into_iter()
            .filter(|t| t.account_id() == account_id && filter.matches(t))
            .collect();
        sort_transactions(&mut found);

        if let Some(limit) = filter.limit {
            found.truncate(limit.max(0) as usize);
        }
        Ok(found)
    }

    async fn update(&mut self, transaction: &mut Transaction) -> Result<(), StoreError> {
        let version = transaction.version();
        let mut persisted = transaction.clone();
        persisted.mark_persisted(version + 1);

        {
            let state = lock(self.state);
            self.changes.write(
                Some(persisted),
                transaction.id(),
                version,
                &state.transactions,
            )?;
        }

        transaction.mark_persisted(version + 1);
        Ok(())
    }

    async fn delete(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        let state = lock(self.state);
        self.changes.write(
            None,
            transaction.id(),
            transaction.version(),
            &state.transactions,
        )
    }

    async fn find_mirror_by_split(
        &mut self,
        source_split_id: Uuid,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .visible()
            .into_iter()
            .find(|t| t.source_split_id() == Some(source_split_id)))
    }

    async fn find_mirrors(
        &mut self,
        source_transaction_id: Uuid,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut mirrors: Vec<Transaction> = self
            .visible()
            .into_iter()
            .filter(|t| t.source_transaction_id() == Some(source_transaction_id))
            .collect();
        mirrors.sort_by_key(|t| (t.created_at(), t.id()));
        Ok(mirrors)
    }

    async fn find_taken_split_id(
        &mut self,
        transaction: &Transaction,
    ) -> Result<Option<Uuid>, StoreError> {
        let taken: HashSet<Uuid> = self
            .visible()
            .iter()
            .filter(|other| other.id() != transaction.id())
            .flat_map(|other| other.splits().iter().map(|split| split.id()))
            .collect();

        Ok(transaction
            .splits()
            .iter()
            .map(|split| split.id())
            .find(|id| taken.contains(id)))
    }
}

struct InMemoryAccountRepository<'u> {
    state: &'u Mutex<State>,
    changes: &'u mut ChangeSet<Account>,
}

#[async_trait]
impl<'u> AccountRepository for InMemoryAccountRepository<'u> {
    async fn add(&mut self, account: &Account) -> Result<(), StoreError> {
        let state = lock(self.state);
        self.changes.insert(account, &state.accounts)
    }

    async fn get(&mut self, id: Uuid) -> Result<Account, StoreError> {
        let state = lock(self.state);
        self.changes
            .read(id, &state.accounts)
            .ok_or_else(|| StoreError::not_found("Account", id))
    }

    async fn update(&mut self, account: &mut Account) -> Result<(), StoreError> {
        let version = account.version();
        let mut persisted = account.clone();
        persisted.mark_persisted(version + 1);

        {
            let state = lock(self.state);
            self.changes
                .write(Some(persisted), account.id(), version, &state.accounts)?;
        }

        account.mark_persisted(version + 1);
        Ok(())
    }
}

// =========================================================================
// Outbox source
// =========================================================================

/// Claims committed rows of an `InMemoryStore`.
///
/// Claimed rows are invisible to other claims until the batch finishes or is
/// dropped, like `FOR UPDATE SKIP LOCKED`.
#[derive(Debug, Clone)]
pub struct InMemoryOutboxSource {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl OutboxSource for InMemoryOutboxSource {
    async fn claim(&self, limit: i64) -> Result<Box<dyn ClaimedBatch>, OutboxError> {
        let mut state = lock(&self.state);

        let events: Vec<OutboxEvent> = state
            .outbox
            .iter()
            .filter(|e| e.processed_at.is_none() && !state.claimed.contains(&e.id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        state.claimed.extend(events.iter().map(|e| e.id));

        Ok(Box::new(InMemoryClaimedBatch {
            state: self.state.clone(),
            events,
            processed: Vec::new(),
        }))
    }

    async fn stats(&self) -> Result<OutboxStats, OutboxError> {
        let state = lock(&self.state);
        let pending: Vec<&OutboxEvent> = state
            .outbox
            .iter()
            .filter(|e| e.processed_at.is_none())
            .collect();

        Ok(OutboxStats {
            pending: pending.len() as i64,
            oldest_pending_at: pending.iter().map(|e| e.created_at).min(),
        })
    }
}

struct InMemoryClaimedBatch {
    state: Arc<Mutex<State>>,
    events: Vec<OutboxEvent>,
    processed: Vec<i64>,
}

#[async_trait]
impl ClaimedBatch for InMemoryClaimedBatch {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn mark_processed(&mut self, id: i64) -> Result<(), OutboxError> {
        self.processed.push(id);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), OutboxError> {
        let now = Utc::now();
        {
            let mut state = lock(&self.state);
            for event in state.outbox.iter_mut() {
                if self.processed.contains(&event.id) && event.processed_at.is_none() {
                    event.processed_at = Some(now);
                }
            }
        }
        // claims are released when the batch drops
        Ok(())
    }
}

impl Drop for InMemoryClaimedBatch {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        for event in &self.events {
            state.claimed.remove(&event.id);
        }
    }
}

//! Mirror Synchronizer
//!
//! Keeps exactly one mirror transaction per transfer split. For a split `s`
//! on source transaction `t`, the mirror lives on `s.transfer_account_id`,
//! carries `-s.amount` and points back through `source_split_id`.
//!
//! Synchronization runs source → mirror inside the caller's unit of work;
//! every mirror write stages its own event, so either the source change and
//! all mirror changes commit together or nothing does.

use std::collections::HashMap;
use uuid::Uuid;

use crate::aggregate::{Aggregate, Transaction, TransactionStatus};
use crate::domain::{DomainError, SplitLine, TransactionEvent};
use crate::error::AppResult;
use crate::store::UnitOfWork;

/// Applies source changes to mirrors and collects the resulting events
pub struct MirrorSynchronizer<'u> {
    uow: &'u mut dyn UnitOfWork,
    events: Vec<TransactionEvent>,
}

impl<'u> MirrorSynchronizer<'u> {
    pub fn new(uow: &'u mut dyn UnitOfWork) -> Self {
        Self {
            uow,
            events: Vec::new(),
        }
    }

    /// Events produced by mirror writes, in write order
    pub fn into_events(self) -> Vec<TransactionEvent> {
        self.events
    }

    /// A new source transaction: one mirror per transfer split
    pub async fn on_created(&mut self, source: &Transaction) -> AppResult<()> {
        for split in source.transfer_splits() {
            self.create_mirror(source, split).await?;
        }
        Ok(())
    }

    /// Source splits were replaced; `previous` are the splits before the change.
    ///
    /// Splits are matched by id. A transfer split that disappeared or stopped
    /// being a transfer loses its mirror; a retargeted split gets a new one;
    /// a split on the same target has its mirror amount updated in place.
    pub async fn on_splits_replaced(
        &mut self,
        previous: &[SplitLine],
        source: &Transaction,
    ) -> AppResult<()> {
        let previous_targets: HashMap<Uuid, Uuid> = previous
            .iter()
            .filter_map(|split| split.transfer_account_id().map(|target| (split.id(), target)))
            .collect();
        let current_targets: HashMap<Uuid, Uuid> = source
            .transfer_splits()
            .filter_map(|split| split.transfer_account_id().map(|target| (split.id(), target)))
            .collect();

        // Removed, or no longer a transfer
        for split in previous.iter().filter(|s| s.is_transfer()) {
            if !current_targets.contains_key(&split.id()) {
                self.delete_mirror_of(split.id()).await?;
            }
        }

        for split in source.transfer_splits() {
            match previous_targets.get(&split.id()) {
                None => self.create_mirror(source, split).await?,
                Some(previous_target) if Some(*previous_target) != split.transfer_account_id() => {
                    self.delete_mirror_of(split.id()).await?;
                    self.create_mirror(source, split).await?;
                }
                Some(_) => self.update_mirror(source, split).await?,
            }
        }

        Ok(())
    }

    /// Propagate dates, memo and clearing from the source to every mirror
    pub async fn on_metadata_changed(&mut self, source: &Transaction) -> AppResult<()> {
        let mirrors = self.uow.transactions().find_mirrors(source.id()).await?;

        for mut mirror in mirrors {
            let mut changed = Vec::new();

            if let Some(event) = mirror.sync_mirror_metadata(source) {
                changed.push(event);
            }
            if source.status() == TransactionStatus::Cleared {
                if let Some(event) = mirror.sync_mirror_cleared(source.posted_date()) {
                    changed.push(event);
                }
            }

            if !changed.is_empty() {
                self.uow.transactions().update(&mut mirror).await?;
                tracing::debug!(
                    mirror_id = %mirror.id(),
                    source_transaction_id = %source.id(),
                    "Mirror metadata synchronized"
                );
                self.events.extend(changed);
            }
        }

        Ok(())
    }

    /// The source is about to be deleted: remove all of its mirrors
    pub async fn on_deleted(&mut self, source: &Transaction) -> AppResult<()> {
        let mirrors = self.uow.transactions().find_mirrors(source.id()).await?;
        for mirror in mirrors {
            self.delete_mirror(mirror).await?;
        }
        Ok(())
    }

    async fn create_mirror(&mut self, source: &Transaction, split: &SplitLine) -> AppResult<()> {
        let Some(target_id) = split.transfer_account_id() else {
            return Ok(());
        };

        let target = self.uow.accounts().get(target_id).await?;
        // Transfers stay within one user's books
        if target.user_id() != source.user_id() {
            return Err(DomainError::not_found("Account", target_id).into());
        }
        target.ensure_accepts_transfer(split.amount().currency())?;

        let mirror = Transaction::create_mirror(source, split, target.user_id())?;
        self.uow.transactions().add(&mirror).await?;

        tracing::debug!(
            mirror_id = %mirror.id(),
            source_transaction_id = %source.id(),
            source_split_id = %split.id(),
            account_id = %target_id,
            "Mirror created"
        );
        self.events.push(mirror.created_event());
        Ok(())
    }

    async fn update_mirror(&mut self, source: &Transaction, split: &SplitLine) -> AppResult<()> {
        let found = self.uow.transactions().find_mirror_by_split(split.id()).await?;
        let Some(mut mirror) = found else {
            tracing::warn!(
                source_transaction_id = %source.id(),
                source_split_id = %split.id(),
                "Mirror missing for transfer split, recreating"
            );
            return self.create_mirror(source, split).await;
        };

        let target = self.uow.accounts().get(mirror.account_id()).await?;
        target.ensure_accepts_transfer(split.amount().currency())?;

        if let Some(event) = mirror.sync_mirror_amount(-split.amount())? {
            self.uow.transactions().update(&mut mirror).await?;
            tracing::debug!(
                mirror_id = %mirror.id(),
                source_split_id = %split.id(),
                amount = %mirror.amount(),
                "Mirror amount synchronized"
            );
            self.events.push(event);
        }
        Ok(())
    }

    async fn delete_mirror_of(&mut self, split_id: Uuid) -> AppResult<()> {
        let found = self.uow.transactions().find_mirror_by_split(split_id).await?;
        if let Some(mirror) = found {
            self.delete_mirror(mirror).await?;
        }
        Ok(())
    }

    async fn delete_mirror(&mut self, mirror: Transaction) -> AppResult<()> {
        self.uow.transactions().delete(&mirror).await?;
        tracing::debug!(
            mirror_id = %mirror.id(),
            source_split_id = ?mirror.source_split_id(),
            "Mirror deleted"
        );
        self.events.push(mirror.deleted_event());
        Ok(())
    }
}

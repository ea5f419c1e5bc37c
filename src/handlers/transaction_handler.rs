//! Transaction Handler
//!
//! Use cases on transactions. Each command runs in one unit of work: the
//! aggregate change, every mirror change and all resulting outbox rows commit
//! together or not at all. Returning early with an error drops the unit,
//! which discards everything staged so far.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::aggregate::{Aggregate, NewTransaction, Transaction, TransactionStatus};
use crate::domain::{DomainError, OperationContext, TransactionEvent, ValidationError};
use crate::error::{AppError, AppResult};
use crate::mirror::MirrorSynchronizer;
use crate::outbox::NewOutboxEvent;
use crate::store::{TransactionFilter, UnitOfWork, UnitOfWorkFactory};

use super::{
    CreateTransactionCommand, DeleteResult, MarkClearedCommand, ReplaceSplitsCommand,
    TransactionResult, UpdateTransactionCommand,
};

/// Attempts for commands that recompute from fresh state on a conflict
const MAX_RETRIES: u32 = 3;

/// Handler for transaction commands and queries
#[derive(Clone)]
pub struct TransactionHandler {
    uow_factory: Arc<dyn UnitOfWorkFactory>,
}

impl TransactionHandler {
    pub fn new(uow_factory: Arc<dyn UnitOfWorkFactory>) -> Self {
        Self { uow_factory }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Record a new transaction and mirror its transfer splits
    pub async fn create(
        &self,
        command: CreateTransactionCommand,
        context: &OperationContext,
    ) -> AppResult<TransactionResult> {
        let mut uow = self.uow_factory.begin().await?;

        let account = uow.accounts().get(command.account_id).await?;
        if account.user_id() != context.user_id {
            return Err(DomainError::not_found("Account", command.account_id).into());
        }
        account.ensure_accepts_posting(command.amount.currency())?;

        let mut new = NewTransaction::new(
            command.account_id,
            context.user_id,
            command.effective_date,
            command.amount,
            command.splits,
        );
        new.posted_date = command.posted_date;
        new.payee_id = command.payee_id;
        new.memo = command.memo;
        new.check_number = command.check_number;
        if let Some(status) = command.status {
            new.status = status;
        }
        if let Some(source) = command.source {
            new.source = source;
        }

        let transaction = Transaction::create(new)?;
        ensure_split_ids_free(uow.as_mut(), &transaction).await?;
        uow.transactions().add(&transaction).await?;

        let mut events = vec![transaction.created_event()];
        let mut sync = MirrorSynchronizer::new(uow.as_mut());
        sync.on_created(&transaction).await?;
        events.extend(sync.into_events());

        let recorded = stage(uow.as_mut(), &events)?;
        uow.commit().await?;

        tracing::info!(
            transaction_id = %transaction.id(),
            account_id = %transaction.account_id(),
            amount = %transaction.amount(),
            mirrors = recorded - 1,
            correlation_id = ?context.correlation_id,
            "Transaction created"
        );

        Ok(TransactionResult::new(&transaction, recorded))
    }

    /// Replace amount and splits, keeping mirrors in step.
    ///
    /// With `expected_version` set, a transaction changed since the caller read
    /// it is rejected instead of overwritten.
    pub async fn replace_splits(
        &self,
        command: ReplaceSplitsCommand,
        context: &OperationContext,
    ) -> AppResult<TransactionResult> {
        let mut uow = self.uow_factory.begin().await?;
        let mut transaction =
            load_owned(uow.as_mut(), command.transaction_id, context).await?;

        if let Some(expected) = command.expected_version {
            if expected != transaction.version() {
                return Err(DomainError::VersionConflict {
                    aggregate_id: transaction.id(),
                    expected,
                    found: transaction.version(),
                }
                .into());
            }
        }

        let previous = transaction.splits().to_vec();
        let event = transaction.replace_splits(command.amount, command.splits)?;

        let account = uow.accounts().get(transaction.account_id()).await?;
        account.ensure_accepts_posting(command.amount.currency())?;
        ensure_split_ids_free(uow.as_mut(), &transaction).await?;

        uow.transactions().update(&mut transaction).await?;

        let mut events = vec![event];
        let mut sync = MirrorSynchronizer::new(uow.as_mut());
        sync.on_splits_replaced(&previous, &transaction).await?;
        events.extend(sync.into_events());

        let recorded = stage(uow.as_mut(), &events)?;
        uow.commit().await?;

        tracing::info!(
            transaction_id = %transaction.id(),
            amount = %transaction.amount(),
            splits = transaction.splits().len(),
            version = transaction.version(),
            correlation_id = ?context.correlation_id,
            "Transaction splits replaced"
        );

        Ok(TransactionResult::new(&transaction, recorded))
    }

    /// Change dates, memo, payee or check number. Retried on concurrent writes.
    pub async fn update_metadata(
        &self,
        command: UpdateTransactionCommand,
        context: &OperationContext,
    ) -> AppResult<TransactionResult> {
        retry_on_conflict("update_metadata", || self.try_update_metadata(&command, context))
            .await
    }

    /// pending → cleared. Retried on concurrent writes.
    pub async fn mark_cleared(
        &self,
        command: MarkClearedCommand,
        context: &OperationContext,
    ) -> AppResult<TransactionResult> {
        retry_on_conflict("mark_cleared", || self.try_mark_cleared(&command, context)).await
    }

    /// Delete a transaction together with all of its mirrors
    pub async fn delete(
        &self,
        transaction_id: Uuid,
        context: &OperationContext,
    ) -> AppResult<DeleteResult> {
        let mut uow = self.uow_factory.begin().await?;
        let transaction = load_owned(uow.as_mut(), transaction_id, context).await?;
        transaction.ensure_deletable()?;

        // Mirrors reference the source row, so they go first
        let mut sync = MirrorSynchronizer::new(uow.as_mut());
        sync.on_deleted(&transaction).await?;
        let mut events = sync.into_events();
        let mirrors_deleted = events.len();

        uow.transactions().delete(&transaction).await?;
        events.push(transaction.deleted_event());

        stage(uow.as_mut(), &events)?;
        uow.commit().await?;

        tracing::info!(
            transaction_id = %transaction_id,
            mirrors_deleted = mirrors_deleted,
            correlation_id = ?context.correlation_id,
            "Transaction deleted"
        );

        Ok(DeleteResult {
            transaction_id,
            mirrors_deleted,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(
        &self,
        transaction_id: Uuid,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let mut uow = self.uow_factory.begin().await?;
        let transaction = load_owned(uow.as_mut(), transaction_id, context).await?;
        uow.rollback().await?;
        Ok(transaction)
    }

    /// Transactions on one of the caller's accounts, by effective date
    pub async fn list_by_account(
        &self,
        account_id: Uuid,
        filter: &TransactionFilter,
        context: &OperationContext,
    ) -> AppResult<Vec<Transaction>> {
        let mut uow = self.uow_factory.begin().await?;

        let account = uow.accounts().get(account_id).await?;
        if account.user_id() != context.user_id {
            return Err(DomainError::not_found("Account", account_id).into());
        }

        let transactions = uow.transactions().get_by_account(account_id, filter).await?;
        uow.rollback().await?;
        Ok(transactions)
    }

    // =========================================================================
    // Single attempts
    // =========================================================================

    async fn try_update_metadata(
        &self,
        command: &UpdateTransactionCommand,
        context: &OperationContext,
    ) -> AppResult<TransactionResult> {
        let mut uow = self.uow_factory.begin().await?;
        let mut transaction =
            load_owned(uow.as_mut(), command.transaction_id, context).await?;

        let Some(event) = transaction.update_metadata(command.update.clone())? else {
            uow.rollback().await?;
            return Ok(TransactionResult::new(&transaction, 0));
        };

        self.save_with_metadata_sync(uow, &mut transaction, event, context)
            .await
    }

    async fn try_mark_cleared(
        &self,
        command: &MarkClearedCommand,
        context: &OperationContext,
    ) -> AppResult<TransactionResult> {
        let mut uow = self.uow_factory.begin().await?;
        let mut transaction =
            load_owned(uow.as_mut(), command.transaction_id, context).await?;

        let Some(event) = transaction.mark_cleared(command.posted_date)? else {
            tracing::debug!(
                transaction_id = %transaction.id(),
                "Transaction already cleared"
            );
            uow.rollback().await?;
            return Ok(TransactionResult::new(&transaction, 0));
        };

        self.save_with_metadata_sync(uow, &mut transaction, event, context)
            .await
    }

    async fn save_with_metadata_sync(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        transaction: &mut Transaction,
        event: TransactionEvent,
        context: &OperationContext,
    ) -> AppResult<TransactionResult> {
        uow.transactions().update(transaction).await?;

        let mut events = vec![event];
        let mut sync = MirrorSynchronizer::new(uow.as_mut());
        sync.on_metadata_changed(transaction).await?;
        events.extend(sync.into_events());

        let recorded = stage(uow.as_mut(), &events)?;
        uow.commit().await?;

        tracing::info!(
            transaction_id = %transaction.id(),
            cleared = transaction.status() == TransactionStatus::Cleared,
            version = transaction.version(),
            correlation_id = ?context.correlation_id,
            "Transaction updated"
        );

        Ok(TransactionResult::new(transaction, recorded))
    }
}

/// Load a transaction the acting user owns. Other users' rows are reported
/// as missing.
async fn load_owned(
    uow: &mut dyn UnitOfWork,
    transaction_id: Uuid,
    context: &OperationContext,
) -> AppResult<Transaction> {
    let transaction = uow.transactions().get(transaction_id).await?;
    if transaction.user_id() != context.user_id {
        return Err(DomainError::not_found("Transaction", transaction_id).into());
    }
    Ok(transaction)
}

/// Caller-chosen split ids must not collide with another transaction's splits
async fn ensure_split_ids_free(
    uow: &mut dyn UnitOfWork,
    transaction: &Transaction,
) -> AppResult<()> {
    match uow.transactions().find_taken_split_id(transaction).await? {
        Some(split_id) => {
            Err(DomainError::from(ValidationError::DuplicateSplitId(split_id)).into())
        }
        None => Ok(()),
    }
}

/// Serialize events into outbox rows staged on `uow`
fn stage(uow: &mut dyn UnitOfWork, events: &[TransactionEvent]) -> AppResult<usize> {
    let rows = NewOutboxEvent::from_events(events)?;
    let count = rows.len();
    uow.collect_events(rows);
    Ok(count)
}

async fn retry_on_conflict<T, F, Fut>(operation: &'static str, mut attempt_once: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match attempt_once().await {
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES - 1 => {
                attempt += 1;
                let delay = Duration::from_millis(50 * attempt as u64);
                tokio::time::sleep(delay).await;
                tracing::warn!(
                    operation = operation,
                    "Concurrency conflict, retrying (attempt {}/{})",
                    attempt,
                    MAX_RETRIES
                );
            }
            result => return result,
        }
    }
}

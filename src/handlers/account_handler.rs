//! Account Handler
//!
//! Opens and closes accounts. Closing only blocks new postings and new
//! transfer mirrors; existing transactions stay as they are.

use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::{Account, Aggregate};
use crate::domain::{AccountEvent, DomainError, OperationContext};
use crate::error::AppResult;
use crate::outbox::NewOutboxEvent;
use crate::store::{UnitOfWork, UnitOfWorkFactory};

use super::{AccountResult, CreateAccountCommand};

/// Handler for account lifecycle commands
#[derive(Clone)]
pub struct AccountHandler {
    uow_factory: Arc<dyn UnitOfWorkFactory>,
}

impl AccountHandler {
    pub fn new(uow_factory: Arc<dyn UnitOfWorkFactory>) -> Self {
        Self { uow_factory }
    }

    /// Open an account owned by the acting user
    pub async fn create(
        &self,
        command: CreateAccountCommand,
        context: &OperationContext,
    ) -> AppResult<AccountResult> {
        let (account, event) = Account::create(
            context.user_id,
            command.name,
            command.account_type,
            command.currency,
        )?;

        let mut uow = self.uow_factory.begin().await?;
        uow.accounts().add(&account).await?;
        uow.collect_events(vec![NewOutboxEvent::from_event(&event)?]);
        uow.commit().await?;

        tracing::info!(
            account_id = %account.id(),
            account_type = %account.account_type(),
            currency = %account.currency(),
            "Account created"
        );

        Ok(AccountResult::from(&account))
    }

    pub async fn close(
        &self,
        account_id: Uuid,
        context: &OperationContext,
    ) -> AppResult<AccountResult> {
        let mut uow = self.uow_factory.begin().await?;
        let mut account = load_owned(uow.as_mut(), account_id, context).await?;

        let event: AccountEvent = account.close()?;
        uow.accounts().update(&mut account).await?;
        uow.collect_events(vec![NewOutboxEvent::from_event(&event)?]);
        uow.commit().await?;

        tracing::info!(account_id = %account_id, "Account closed");

        Ok(AccountResult::from(&account))
    }

    pub async fn get(&self, account_id: Uuid, context: &OperationContext) -> AppResult<Account> {
        let mut uow = self.uow_factory.begin().await?;
        let account = load_owned(uow.as_mut(), account_id, context).await?;
        uow.rollback().await?;
        Ok(account)
    }
}

async fn load_owned(
    uow: &mut dyn UnitOfWork,
    account_id: Uuid,
    context: &OperationContext,
) -> AppResult<Account> {
    let account = uow.accounts().get(account_id).await?;
    if account.user_id() != context.user_id {
        return Err(DomainError::not_found("Account", account_id).into());
    }
    Ok(account)
}

//! Invoice runs for one account.

use std::sync::Arc;

use tracing::debug;

use billforge_core::{AccountId, InternalCallContext};
use billforge_platform::{GlobalLocker, LockerConfig};

use crate::error::InvoiceDispatchError;

/// Lock namespace shared by everything that generates invoices for an account.
pub const ACCOUNT_FOR_INVOICING: &str = "ACCOUNT_FOR_INVOICING";

/// Entry point for (re)computing an account's invoices.
pub trait InvoiceDispatcher: Send + Sync {
    fn process_account(
        &self,
        account_id: AccountId,
        context: &InternalCallContext,
    ) -> Result<(), InvoiceDispatchError>;
}

impl<D> InvoiceDispatcher for Arc<D>
where
    D: InvoiceDispatcher + ?Sized,
{
    fn process_account(
        &self,
        account_id: AccountId,
        context: &InternalCallContext,
    ) -> Result<(), InvoiceDispatchError> {
        (**self).process_account(account_id, context)
    }
}

/// The invoice computation proper. Called with the account lock held.
pub trait AccountInvoiceRecomputer: Send + Sync {
    fn recompute_account(
        &self,
        account_id: AccountId,
        context: &InternalCallContext,
    ) -> Result<(), InvoiceDispatchError>;
}

impl<R> AccountInvoiceRecomputer for Arc<R>
where
    R: AccountInvoiceRecomputer + ?Sized,
{
    fn recompute_account(
        &self,
        account_id: AccountId,
        context: &InternalCallContext,
    ) -> Result<(), InvoiceDispatchError> {
        (**self).recompute_account(account_id, context)
    }
}

/// Serializes invoice runs per account on a global lock.
pub struct LockingInvoiceDispatcher<L, R> {
    locker: L,
    recomputer: R,
    lock_retries: u32,
}

impl<L, R> LockingInvoiceDispatcher<L, R>
where
    L: GlobalLocker,
    R: AccountInvoiceRecomputer,
{
    pub fn new(locker: L, recomputer: R, config: &LockerConfig) -> Self {
        Self {
            locker,
            recomputer,
            lock_retries: config.retries,
        }
    }
}

impl<L, R> InvoiceDispatcher for LockingInvoiceDispatcher<L, R>
where
    L: GlobalLocker,
    R: AccountInvoiceRecomputer,
{
    fn process_account(
        &self,
        account_id: AccountId,
        context: &InternalCallContext,
    ) -> Result<(), InvoiceDispatchError> {
        let lock = self.locker.lock_with_retries(
            ACCOUNT_FOR_INVOICING,
            &account_id.to_string(),
            self.lock_retries,
        )?;
        debug!(lock = lock.key(), account_id = %account_id, "account locked for invoicing");

        self.recomputer.recompute_account(account_id, context)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use billforge_core::{CallOrigin, InternalCallContextFactory, SystemClock, UserType};
    use billforge_platform::MemoryGlobalLocker;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        accounts: Mutex<Vec<AccountId>>,
    }

    impl AccountInvoiceRecomputer for Recorder {
        fn recompute_account(
            &self,
            account_id: AccountId,
            _context: &InternalCallContext,
        ) -> Result<(), InvoiceDispatchError> {
            self.accounts.lock().unwrap().push(account_id);
            Ok(())
        }
    }

    fn context() -> InternalCallContext {
        InternalCallContextFactory::new(Arc::new(SystemClock)).create_internal_call_context(
            1,
            2,
            "test",
            CallOrigin::Test,
            UserType::Test,
            None,
        )
    }

    fn config() -> LockerConfig {
        LockerConfig {
            retries: 1,
            wait_per_retry: Duration::from_millis(1),
        }
    }

    #[test]
    fn recomputes_under_the_account_lock() {
        let locker = MemoryGlobalLocker::new(Duration::from_millis(1));
        let recorder = Arc::new(Recorder::default());
        let dispatcher = LockingInvoiceDispatcher::new(locker.clone(), recorder.clone(), &config());
        let account = AccountId::new();

        dispatcher.process_account(account, &context()).unwrap();

        assert_eq!(*recorder.accounts.lock().unwrap(), vec![account]);
        assert!(locker.is_free(ACCOUNT_FOR_INVOICING, &account.to_string()));
    }

    #[test]
    fn held_lock_is_a_lock_failure() {
        let locker = MemoryGlobalLocker::new(Duration::from_millis(1));
        let recorder = Arc::new(Recorder::default());
        let dispatcher = LockingInvoiceDispatcher::new(locker.clone(), recorder.clone(), &config());
        let account = AccountId::new();

        let _held = locker
            .lock_with_retries(ACCOUNT_FOR_INVOICING, &account.to_string(), 0)
            .unwrap();
        let err = dispatcher.process_account(account, &context()).unwrap_err();

        assert!(matches!(err, InvoiceDispatchError::LockFailed(_)));
        assert!(recorder.accounts.lock().unwrap().is_empty());
    }
}

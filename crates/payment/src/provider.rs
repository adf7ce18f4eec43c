//! Control plugin that answers from pre-configured values.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::api::{
    OnFailurePaymentControlResult, OnSuccessPaymentControlResult, PaymentControlApiError,
    PaymentControlContext, PaymentControlPluginApi, PluginProperty, PriorPaymentControlResult,
};

/// Never aborts, never retries on its own, unless configured to.
///
/// A configured API error is returned from every call, so a test can make
/// the control step itself fail. Without one, no call ever errors.
#[derive(Debug, Clone, Default)]
pub struct NoOpPaymentControlProvider {
    api_error: Option<PaymentControlApiError>,
    is_retry_aborted: bool,
    next_retry_date: Option<DateTime<Utc>>,
}

impl NoOpPaymentControlProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with `error`, including ones that would otherwise
    /// succeed with `with_retry_aborted` or `with_next_retry_date` set.
    pub fn with_api_error(mut self, error: PaymentControlApiError) -> Self {
        self.api_error = Some(error);
        self
    }

    pub fn with_retry_aborted(mut self, aborted: bool) -> Self {
        self.is_retry_aborted = aborted;
        self
    }

    pub fn with_next_retry_date(mut self, next_retry_date: DateTime<Utc>) -> Self {
        self.next_retry_date = Some(next_retry_date);
        self
    }

    fn check(&self, call: &str, context: &PaymentControlContext) -> Result<(), PaymentControlApiError> {
        match &self.api_error {
            Some(err) => {
                debug!(call, account_id = %context.account_id, error = %err, "configured control plugin failure");
                Err(err.clone())
            }
            None => Ok(()),
        }
    }
}

impl PaymentControlPluginApi for NoOpPaymentControlProvider {
    fn prior_call(
        &self,
        context: &PaymentControlContext,
        _properties: &[PluginProperty],
    ) -> Result<PriorPaymentControlResult, PaymentControlApiError> {
        self.check("prior_call", context)?;
        Ok(PriorPaymentControlResult::new(self.is_retry_aborted))
    }

    fn on_success_call(
        &self,
        context: &PaymentControlContext,
        _properties: &[PluginProperty],
    ) -> Result<Option<OnSuccessPaymentControlResult>, PaymentControlApiError> {
        self.check("on_success_call", context)?;
        Ok(None)
    }

    fn on_failure_call(
        &self,
        context: &PaymentControlContext,
        _properties: &[PluginProperty],
    ) -> Result<OnFailurePaymentControlResult, PaymentControlApiError> {
        self.check("on_failure_call", context)?;
        Ok(OnFailurePaymentControlResult::new(self.next_retry_date))
    }
}

#[cfg(test)]
mod tests {
    use billforge_core::AccountId;
    use chrono::Duration;

    use super::*;
    use crate::api::TransactionType;

    fn context() -> PaymentControlContext {
        PaymentControlContext {
            account_id: AccountId::new(),
            payment_id: None,
            payment_external_key: Some("pay-1".into()),
            transaction_id: None,
            transaction_external_key: Some("txn-1".into()),
            transaction_type: TransactionType::Purchase,
            amount: Some(1_000),
            currency: Some("USD".into()),
            is_api_payment: true,
            user_token: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn defaults_neither_abort_nor_retry() {
        let provider = NoOpPaymentControlProvider::new();
        let properties = [PluginProperty::new("source", "test")];

        assert!(!provider.prior_call(&context(), &properties).unwrap().is_aborted);
        assert_eq!(provider.on_success_call(&context(), &properties).unwrap(), None);
        assert_eq!(
            provider.on_failure_call(&context(), &properties).unwrap().next_retry_date,
            None
        );
    }

    #[test]
    fn configured_values_are_returned() {
        let retry_at = Utc::now() + Duration::hours(1);
        let provider = NoOpPaymentControlProvider::new()
            .with_retry_aborted(true)
            .with_next_retry_date(retry_at);

        assert!(provider.prior_call(&context(), &[]).unwrap().is_aborted);
        assert_eq!(
            provider.on_failure_call(&context(), &[]).unwrap().next_retry_date,
            Some(retry_at)
        );
    }

    #[test]
    fn configured_error_fails_every_call() {
        let err = PaymentControlApiError::Unavailable("plugin down".into());
        let provider = NoOpPaymentControlProvider::new()
            .with_retry_aborted(true)
            .with_api_error(err.clone());

        assert_eq!(provider.prior_call(&context(), &[]).unwrap_err(), err);
        assert_eq!(provider.on_success_call(&context(), &[]).unwrap_err(), err);
        assert_eq!(provider.on_failure_call(&context(), &[]).unwrap_err(), err);
    }
}

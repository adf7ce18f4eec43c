use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use billforge_core::{AccountId, UserToken};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Authorize,
    Capture,
    Purchase,
    Void,
    Credit,
    Refund,
    Chargeback,
}

/// What the pipeline knows about the payment attempt being controlled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentControlContext {
    pub account_id: AccountId,
    pub payment_id: Option<Uuid>,
    pub payment_external_key: Option<String>,
    pub transaction_id: Option<Uuid>,
    pub transaction_external_key: Option<String>,
    pub transaction_type: TransactionType,
    /// Amount in minor currency units
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub is_api_payment: bool,
    pub user_token: Option<UserToken>,
    pub created_at: DateTime<Utc>,
}

/// Free-form key/value passed through from the API caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginProperty {
    pub key: String,
    pub value: String,
    pub is_updatable: bool,
}

impl PluginProperty {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            is_updatable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PriorPaymentControlResult {
    /// Abort the attempt before it reaches the payment gateway.
    pub is_aborted: bool,
    pub adjusted_amount: Option<i64>,
    pub adjusted_currency: Option<String>,
    pub adjusted_plugin_properties: Vec<PluginProperty>,
}

impl PriorPaymentControlResult {
    pub fn new(is_aborted: bool) -> Self {
        Self {
            is_aborted,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OnSuccessPaymentControlResult {
    pub adjusted_plugin_properties: Vec<PluginProperty>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OnFailurePaymentControlResult {
    /// `None` means "do not retry".
    pub next_retry_date: Option<DateTime<Utc>>,
    pub adjusted_plugin_properties: Vec<PluginProperty>,
}

impl OnFailurePaymentControlResult {
    pub fn new(next_retry_date: Option<DateTime<Utc>>) -> Self {
        Self {
            next_retry_date,
            adjusted_plugin_properties: Vec::new(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentControlApiError {
    #[error("payment control plugin rejected the call: {0}")]
    Rejected(String),
    #[error("payment control plugin unavailable: {0}")]
    Unavailable(String),
}

/// Hooks the payment pipeline calls around each transaction.
pub trait PaymentControlPluginApi: Send + Sync {
    fn prior_call(
        &self,
        context: &PaymentControlContext,
        properties: &[PluginProperty],
    ) -> Result<PriorPaymentControlResult, PaymentControlApiError>;

    fn on_success_call(
        &self,
        context: &PaymentControlContext,
        properties: &[PluginProperty],
    ) -> Result<Option<OnSuccessPaymentControlResult>, PaymentControlApiError>;

    fn on_failure_call(
        &self,
        context: &PaymentControlContext,
        properties: &[PluginProperty],
    ) -> Result<OnFailurePaymentControlResult, PaymentControlApiError>;
}

//! Payment control plugin boundary.
//!
//! The payment pipeline consults a control plugin before and after each
//! payment transaction. Only the contract and a configurable no-op provider
//! live here.

pub mod api;
pub mod provider;

pub use api::{
    OnFailurePaymentControlResult, OnSuccessPaymentControlResult, PaymentControlApiError,
    PaymentControlContext, PaymentControlPluginApi, PluginProperty, PriorPaymentControlResult,
    TransactionType,
};
pub use provider::NoOpPaymentControlProvider;

//! Invoicing side of the event-driven billing flow.
//!
//! Invoice generation itself lives behind [`AccountInvoiceRecomputer`]; this
//! crate owns the account-level locking around it and the listener that
//! recomputes an account's invoices when its `AUTO_INVOICING_OFF` tag is
//! removed.

pub mod dispatcher;
pub mod error;
pub mod tag_handler;

pub use dispatcher::{
    ACCOUNT_FOR_INVOICING, AccountInvoiceRecomputer, InvoiceDispatcher, LockingInvoiceDispatcher,
};
pub use error::InvoiceDispatchError;
pub use tag_handler::{INVOICE_TAG_HANDLER_QUEUE, INVOICE_TAG_HANDLER_SERVICE_NAME, InvoiceTagHandler};

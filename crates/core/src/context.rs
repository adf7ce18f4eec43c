//! Internal call context: routing and correlation data threaded through an
//! operation for auditing and tenant isolation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::id::UserToken;

/// Where a call came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallOrigin {
    Internal,
    External,
    Test,
}

/// Who is acting.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserType {
    System,
    Admin,
    Customer,
    Migration,
    Test,
}

/// Context for platform-internal calls.
///
/// Record ids are the tenant/account routing keys carried by bus events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalCallContext {
    pub tenant_record_id: u64,
    pub account_record_id: u64,
    pub user_token: Option<UserToken>,
    pub created_by: String,
    pub call_origin: CallOrigin,
    pub user_type: UserType,
    pub created_at: DateTime<Utc>,
}

/// Builds internal call contexts stamped with the injected clock.
#[derive(Clone)]
pub struct InternalCallContextFactory {
    clock: Arc<dyn Clock>,
}

impl core::fmt::Debug for InternalCallContextFactory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InternalCallContextFactory").finish_non_exhaustive()
    }
}

impl InternalCallContextFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn create_internal_call_context(
        &self,
        tenant_record_id: u64,
        account_record_id: u64,
        user_name: impl Into<String>,
        call_origin: CallOrigin,
        user_type: UserType,
        user_token: Option<UserToken>,
    ) -> InternalCallContext {
        InternalCallContext {
            tenant_record_id,
            account_record_id,
            user_token,
            created_by: user_name.into(),
            call_origin,
            user_type,
            created_at: self.clock.now(),
        }
    }
}

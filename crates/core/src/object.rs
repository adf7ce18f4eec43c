//! Object and tag vocabulary shared by events, tags and domain handlers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of platform object an id refers to (tags, events and audit all key on it).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    Account,
    AccountEmail,
    Bundle,
    Invoice,
    InvoiceItem,
    InvoicePayment,
    Payment,
    PaymentAttempt,
    PaymentMethod,
    Subscription,
    SubscriptionEvent,
    Tag,
    TagDefinition,
    Tenant,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Account => "ACCOUNT",
            ObjectType::AccountEmail => "ACCOUNT_EMAIL",
            ObjectType::Bundle => "BUNDLE",
            ObjectType::Invoice => "INVOICE",
            ObjectType::InvoiceItem => "INVOICE_ITEM",
            ObjectType::InvoicePayment => "INVOICE_PAYMENT",
            ObjectType::Payment => "PAYMENT",
            ObjectType::PaymentAttempt => "PAYMENT_ATTEMPT",
            ObjectType::PaymentMethod => "PAYMENT_METHOD",
            ObjectType::Subscription => "SUBSCRIPTION",
            ObjectType::SubscriptionEvent => "SUBSCRIPTION_EVENT",
            ObjectType::Tag => "TAG",
            ObjectType::TagDefinition => "TAG_DEFINITION",
            ObjectType::Tenant => "TENANT",
        }
    }
}

impl core::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// System-defined tags that switch platform behavior on or off for an object.
///
/// Control tags have fixed definition ids so every tenant shares them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlTagType {
    AutoPayOff,
    AutoInvoicingOff,
    OverdueEnforcementOff,
    WrittenOff,
    ManualPay,
    Test,
    Partner,
    AutoInvoicingDraft,
    AutoInvoicingReuseDraft,
}

impl ControlTagType {
    pub const ALL: [ControlTagType; 9] = [
        ControlTagType::AutoPayOff,
        ControlTagType::AutoInvoicingOff,
        ControlTagType::OverdueEnforcementOff,
        ControlTagType::WrittenOff,
        ControlTagType::ManualPay,
        ControlTagType::Test,
        ControlTagType::Partner,
        ControlTagType::AutoInvoicingDraft,
        ControlTagType::AutoInvoicingReuseDraft,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ControlTagType::AutoPayOff => "AUTO_PAY_OFF",
            ControlTagType::AutoInvoicingOff => "AUTO_INVOICING_OFF",
            ControlTagType::OverdueEnforcementOff => "OVERDUE_ENFORCEMENT_OFF",
            ControlTagType::WrittenOff => "WRITTEN_OFF",
            ControlTagType::ManualPay => "MANUAL_PAY",
            ControlTagType::Test => "TEST",
            ControlTagType::Partner => "PARTNER",
            ControlTagType::AutoInvoicingDraft => "AUTO_INVOICING_DRAFT",
            ControlTagType::AutoInvoicingReuseDraft => "AUTO_INVOICING_REUSE_DRAFT",
        }
    }

    pub fn definition_id(&self) -> Uuid {
        let n: u128 = match self {
            ControlTagType::AutoPayOff => 1,
            ControlTagType::AutoInvoicingOff => 2,
            ControlTagType::OverdueEnforcementOff => 3,
            ControlTagType::WrittenOff => 4,
            ControlTagType::ManualPay => 5,
            ControlTagType::Test => 6,
            ControlTagType::Partner => 7,
            ControlTagType::AutoInvoicingDraft => 8,
            ControlTagType::AutoInvoicingReuseDraft => 9,
        };
        Uuid::from_u128(n)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ControlTagType::AutoPayOff => "Suspends payments until removed.",
            ControlTagType::AutoInvoicingOff => "Suspends invoicing until removed.",
            ControlTagType::OverdueEnforcementOff => "Suspends overdue enforcement behaviour until removed.",
            ControlTagType::WrittenOff => "Indicates that an invoice is written off. No billing or payment effect.",
            ControlTagType::ManualPay => "Indicates that payments must be made manually.",
            ControlTagType::Test => "Indicates that this is a test account.",
            ControlTagType::Partner => "Indicates that this is a partner account.",
            ControlTagType::AutoInvoicingDraft => "Generate account invoices in DRAFT mode.",
            ControlTagType::AutoInvoicingReuseDraft => "Reuse existing draft invoice if exists.",
        }
    }

    pub fn applicable_object_types(&self) -> &'static [ObjectType] {
        match self {
            ControlTagType::WrittenOff => &[ObjectType::Invoice],
            _ => &[ObjectType::Account],
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn from_definition_id(id: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.definition_id() == id)
    }

    pub fn definition(&self) -> TagDefinition {
        TagDefinition {
            id: self.definition_id(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            is_control_tag: true,
            applicable_object_types: self.applicable_object_types().to_vec(),
        }
    }
}

impl core::fmt::Display for ControlTagType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Definition of a tag (control or user-defined).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub is_control_tag: bool,
    pub applicable_object_types: Vec<ObjectType>,
}

impl TagDefinition {
    /// A tenant-defined (non-control) tag definition.
    pub fn user_defined(
        id: Uuid,
        name: impl Into<String>,
        description: impl Into<String>,
        applicable_object_types: Vec<ObjectType>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            is_control_tag: false,
            applicable_object_types,
        }
    }

    /// Whether this definition is the given control tag.
    pub fn is(&self, control: ControlTagType) -> bool {
        self.is_control_tag && self.name == control.name()
    }
}

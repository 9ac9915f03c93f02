use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payables_core::{AccountId, Amount, Entity};

/// Invoice identifier: dense, 1-based, assigned in creation order.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InvoiceId(u64);

impl InvoiceId {
    /// The id given to the very first invoice of a ledger.
    pub const FIRST: InvoiceId = InvoiceId(1);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Position of this invoice in the ledger's append-only collection.
    ///
    /// `None` for id 0, which is never assigned.
    pub(crate) fn index(self) -> Option<usize> {
        self.0.checked_sub(1).and_then(|i| usize::try_from(i).ok())
    }
}

impl From<u64> for InvoiceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Invoice status lifecycle: `Unpaid -> Paid`, and `Paid` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
}

/// A supplier's claim on the client for a fixed amount.
///
/// Everything except the status is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    id: InvoiceId,
    description: String,
    amount: Amount,
    /// Unix timestamp in seconds. Advisory only.
    due_date: i64,
    supplier: AccountId,
    status: InvoiceStatus,
}

impl Invoice {
    pub(crate) fn new(
        id: InvoiceId,
        description: String,
        amount: Amount,
        due_date: i64,
        supplier: AccountId,
    ) -> Self {
        Self {
            id,
            description,
            amount,
            due_date,
            supplier,
            status: InvoiceStatus::Unpaid,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn due_date(&self) -> i64 {
        self.due_date
    }

    pub fn supplier(&self) -> AccountId {
        self.supplier
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }

    /// Due date as a calendar timestamp, if it is representable.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.due_date, 0)
    }

    /// Whether the invoice is unpaid past its due date at `now`.
    ///
    /// Informational: overdue invoices can still be paid, and nothing in the
    /// ledger ever acts on this.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_paid() && now.timestamp() > self.due_date
    }

    pub(crate) fn mark_paid(&mut self) {
        self.status = InvoiceStatus::Paid;
    }
}

impl Entity for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn invoice(due_date: i64) -> Invoice {
        Invoice::new(
            InvoiceId::FIRST,
            "Test Invoice".to_string(),
            Amount::new(1),
            due_date,
            AccountId::new(),
        )
    }

    #[test]
    fn new_invoice_starts_unpaid() {
        let invoice = invoice(2_000_000_000);
        assert_eq!(invoice.status(), InvoiceStatus::Unpaid);
        assert!(!invoice.is_paid());
        assert_eq!(*invoice.id(), InvoiceId::FIRST);
    }

    #[test]
    fn due_at_converts_unix_seconds() {
        let invoice = invoice(2_000_000_000);
        let expected = Utc.with_ymd_and_hms(2033, 5, 18, 3, 33, 20).unwrap();
        assert_eq!(invoice.due_at(), Some(expected));
    }

    #[test]
    fn overdue_is_informational_and_cleared_by_payment() {
        let mut invoice = invoice(1_000);
        let later = Utc.timestamp_opt(2_000, 0).unwrap();
        assert!(invoice.is_overdue(later));

        invoice.mark_paid();
        assert!(!invoice.is_overdue(later));
    }

    #[test]
    fn id_zero_has_no_position() {
        assert_eq!(InvoiceId::new(0).index(), None);
        assert_eq!(InvoiceId::new(3).index(), Some(2));
    }
}

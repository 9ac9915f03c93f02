use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payables_core::{
    AccountId, Aggregate, AggregateId, AggregateRoot, Amount, DomainError, DomainResult,
};
use payables_events::Event;

use crate::invoice::{Invoice, InvoiceId};

/// Stable aggregate type name used in event envelopes.
pub const AGGREGATE_TYPE: &str = "payables.ledger";

const ONLY_CLIENT_CAN_PAY: &str = "Only the client can pay invoices";

/// Ledger identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerId(pub AggregateId);

impl LedgerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LedgerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Ledger (invoices + escrowed supplier balances).
///
/// Invariants:
/// - invoice ids are `1..=invoice_count()` with no gaps
/// - an invoice goes from unpaid to paid at most once
/// - `total_in_custody()` equals the sum of all balances
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    id: LedgerId,
    client: AccountId,
    /// Append-only; invoice `n` lives at index `n - 1`.
    invoices: Vec<Invoice>,
    balances: HashMap<AccountId, Amount>,
    in_custody: Amount,
    version: u64,
}

impl Ledger {
    /// A fresh ledger whose invoices can only be settled by `client`.
    pub fn new(id: LedgerId, client: AccountId) -> Self {
        Self {
            id,
            client,
            invoices: Vec::new(),
            balances: HashMap::new(),
            in_custody: Amount::ZERO,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> LedgerId {
        self.id
    }

    /// The only identity allowed to pay invoices.
    pub fn client(&self) -> AccountId {
        self.client
    }

    pub fn invoice_count(&self) -> u64 {
        self.invoices.len() as u64
    }

    /// Id the next `CreateInvoice` will be assigned.
    pub fn next_invoice_id(&self) -> InvoiceId {
        InvoiceId::new(self.invoice_count() + 1)
    }

    pub fn invoice(&self, invoice_id: InvoiceId) -> Option<&Invoice> {
        invoice_id.index().and_then(|i| self.invoices.get(i))
    }

    /// All invoices in creation order.
    pub fn invoices(&self) -> &[Invoice] {
        &self.invoices
    }

    /// Withdrawable balance of `account`; zero for accounts never credited.
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(Amount::ZERO)
    }

    /// Total value held in escrow on behalf of suppliers.
    pub fn total_in_custody(&self) -> Amount {
        self.in_custody
    }

    /// `(is_paid, due_date)` of an existing invoice.
    pub fn check_invoice_status(&self, invoice_id: InvoiceId) -> DomainResult<(bool, i64)> {
        let invoice = self.require_invoice(invoice_id)?;
        Ok((invoice.is_paid(), invoice.due_date()))
    }

    /// Ids of `supplier`'s unpaid invoices, ascending.
    pub fn pending_invoices(&self, supplier: &AccountId) -> Vec<InvoiceId> {
        self.invoices
            .iter()
            .filter(|inv| !inv.is_paid() && inv.supplier() == *supplier)
            .map(Invoice::id_typed)
            .collect()
    }

    fn require_invoice(&self, invoice_id: InvoiceId) -> DomainResult<&Invoice> {
        self.invoice(invoice_id)
            .ok_or_else(|| DomainError::not_found("invoice"))
    }

    /// Compensating event for a committed withdrawal whose value never left
    /// the ledger. Applying it restores the supplier's balance.
    ///
    /// Not reachable through a command: only the service records it, right
    /// after the transfer for `withdrawn` failed.
    pub(crate) fn withdrawal_reverted(
        &self,
        withdrawn: &FundsWithdrawn,
        reason: impl Into<String>,
    ) -> LedgerEvent {
        LedgerEvent::WithdrawalReverted(WithdrawalReverted {
            ledger_id: self.id,
            supplier: withdrawn.supplier,
            amount: withdrawn.amount,
            reason: reason.into(),
            occurred_at: Utc::now(),
        })
    }
}

impl AggregateRoot for Ledger {
    type Id = LedgerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice. Open to any caller; the caller becomes the supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub caller: AccountId,
    pub description: String,
    pub amount: Amount,
    pub due_date: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PayInvoice. `payment` is the value attached to the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayInvoice {
    pub caller: AccountId,
    pub invoice_id: InvoiceId,
    pub payment: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Command: WithdrawFunds. Always withdraws the caller's whole balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawFunds {
    pub caller: AccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    CreateInvoice(CreateInvoice),
    PayInvoice(PayInvoice),
    WithdrawFunds(WithdrawFunds),
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub ledger_id: LedgerId,
    pub invoice_id: InvoiceId,
    pub supplier: AccountId,
    pub description: String,
    pub amount: Amount,
    pub due_date: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoicePaid. The amount is now escrowed for the supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePaid {
    pub ledger_id: LedgerId,
    pub invoice_id: InvoiceId,
    pub supplier: AccountId,
    pub amount: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FundsWithdrawn. The supplier's balance drops to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsWithdrawn {
    pub ledger_id: LedgerId,
    pub supplier: AccountId,
    pub amount: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WithdrawalReverted. The transfer for a `FundsWithdrawn` failed and
/// the amount is back in the supplier's balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalReverted {
    pub ledger_id: LedgerId,
    pub supplier: AccountId,
    pub amount: Amount,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    InvoiceCreated(InvoiceCreated),
    InvoicePaid(InvoicePaid),
    FundsWithdrawn(FundsWithdrawn),
    WithdrawalReverted(WithdrawalReverted),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::InvoiceCreated(_) => "payables.ledger.invoice_created",
            LedgerEvent::InvoicePaid(_) => "payables.ledger.invoice_paid",
            LedgerEvent::FundsWithdrawn(_) => "payables.ledger.funds_withdrawn",
            LedgerEvent::WithdrawalReverted(_) => "payables.ledger.withdrawal_reverted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::InvoiceCreated(e) => e.occurred_at,
            LedgerEvent::InvoicePaid(e) => e.occurred_at,
            LedgerEvent::FundsWithdrawn(e) => e.occurred_at,
            LedgerEvent::WithdrawalReverted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Ledger {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::InvoiceCreated(e) => {
                self.invoices.push(Invoice::new(
                    e.invoice_id,
                    e.description.clone(),
                    e.amount,
                    e.due_date,
                    e.supplier,
                ));
            }
            LedgerEvent::InvoicePaid(e) => {
                if let Some(invoice) = e.invoice_id.index().and_then(|i| self.invoices.get_mut(i))
                {
                    invoice.mark_paid();
                }
                let balance = self.balance_of(&e.supplier);
                self.balances
                    .insert(e.supplier, balance.saturating_add(e.amount));
                self.in_custody = self.in_custody.saturating_add(e.amount);
            }
            LedgerEvent::FundsWithdrawn(e) => {
                self.balances.insert(e.supplier, Amount::ZERO);
                self.in_custody = self.in_custody.saturating_sub(e.amount);
            }
            LedgerEvent::WithdrawalReverted(e) => {
                let balance = self.balance_of(&e.supplier);
                self.balances
                    .insert(e.supplier, balance.saturating_add(e.amount));
                self.in_custody = self.in_custody.saturating_add(e.amount);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LedgerCommand::CreateInvoice(cmd) => self.handle_create(cmd),
            LedgerCommand::PayInvoice(cmd) => self.handle_pay(cmd),
            LedgerCommand::WithdrawFunds(cmd) => self.handle_withdraw(cmd),
        }
    }
}

impl Ledger {
    fn handle_create(&self, cmd: &CreateInvoice) -> Result<Vec<LedgerEvent>, DomainError> {
        Ok(vec![LedgerEvent::InvoiceCreated(InvoiceCreated {
            ledger_id: self.id,
            invoice_id: self.next_invoice_id(),
            supplier: cmd.caller,
            description: cmd.description.clone(),
            amount: cmd.amount,
            due_date: cmd.due_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_pay(&self, cmd: &PayInvoice) -> Result<Vec<LedgerEvent>, DomainError> {
        if cmd.caller != self.client {
            return Err(DomainError::unauthorized(ONLY_CLIENT_CAN_PAY));
        }

        let invoice = self.require_invoice(cmd.invoice_id)?;

        if invoice.is_paid() {
            return Err(DomainError::invalid_state("invoice already paid"));
        }

        if cmd.payment != invoice.amount() {
            return Err(DomainError::invalid_state(
                "payment does not match invoice amount",
            ));
        }

        // Both credits must fit before anything is committed.
        self.balance_of(&invoice.supplier())
            .checked_add(invoice.amount())?;
        self.in_custody.checked_add(invoice.amount())?;

        Ok(vec![LedgerEvent::InvoicePaid(InvoicePaid {
            ledger_id: self.id,
            invoice_id: cmd.invoice_id,
            supplier: invoice.supplier(),
            amount: invoice.amount(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_withdraw(&self, cmd: &WithdrawFunds) -> Result<Vec<LedgerEvent>, DomainError> {
        let balance = self.balance_of(&cmd.caller);
        if balance.is_zero() {
            return Err(DomainError::InsufficientBalance);
        }

        Ok(vec![LedgerEvent::FundsWithdrawn(FundsWithdrawn {
            ledger_id: self.id,
            supplier: cmd.caller,
            amount: balance,
            occurred_at: cmd.occurred_at,
        })])
    }
}

//! `AccountsPayable`: the operational surface of one ledger.
//!
//! Each operation locks the ledger, runs the command through the pure
//! aggregate, and either commits every resulting event or nothing. Every
//! committed event is wrapped and published before the lock is released, so
//! envelope sequence numbers reach subscribers as `1, 2, 3, ...` with no gaps
//! and in order, even with concurrent callers. The bus therefore must not call
//! back into the service from `publish`.
//!
//! Withdrawal is the one operation with an external interaction:
//!
//! ```text
//! lock -> check balance -> zero balance -> publish FundsWithdrawn -> unlock
//!      -> transfer value to supplier
//!      -> ok:  done
//!      -> err: lock -> apply + publish WithdrawalReverted -> unlock -> report
//! ```
//!
//! The transfer runs without the lock and after the balance is already zero,
//! so a transfer that calls back into `withdraw_funds` sees nothing left to
//! withdraw.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use payables_core::{AccountId, Aggregate, AggregateId, AggregateRoot, Amount, DomainError};
use payables_events::{Event, EventBus, EventEnvelope};

use crate::config::PayablesConfig;
use crate::invoice::{Invoice, InvoiceId};
use crate::ledger::{
    AGGREGATE_TYPE, CreateInvoice, Ledger, LedgerCommand, LedgerEvent, LedgerId, PayInvoice,
    WithdrawFunds,
};
use crate::transfer::{TransferError, ValueTransfer};

#[derive(Debug, Error)]
pub enum PayablesError {
    /// The ledger rejected the operation; nothing changed.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Value could not be moved; the withdrawal was reverted.
    #[error("withdrawal reverted: {0}")]
    Transfer(#[from] TransferError),

    /// A previous operation panicked while holding the ledger lock.
    #[error("ledger lock poisoned")]
    Poisoned,
}

impl PayablesError {
    /// The domain error behind this failure, if it is one.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            PayablesError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// One escrow ledger plus the collaborators it needs to move value and
/// announce what happened.
pub struct AccountsPayable<B> {
    ledger_id: LedgerId,
    ledger: Mutex<Ledger>,
    transfer: Arc<dyn ValueTransfer>,
    bus: B,
}

impl<B> core::fmt::Debug for AccountsPayable<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccountsPayable")
            .field("ledger_id", &self.ledger_id)
            .finish_non_exhaustive()
    }
}

impl<B> AccountsPayable<B>
where
    B: EventBus<EventEnvelope<LedgerEvent>>,
{
    /// Open a new, empty ledger settled by `client`.
    pub fn new(client: AccountId, transfer: Arc<dyn ValueTransfer>, bus: B) -> Self {
        let ledger_id = LedgerId::new(AggregateId::new());
        info!(ledger_id = %ledger_id, client = %client, "ledger opened");
        Self {
            ledger_id,
            ledger: Mutex::new(Ledger::new(ledger_id, client)),
            transfer,
            bus,
        }
    }

    /// Install logging with the configured filter, then open the ledger.
    pub fn from_config(
        config: &PayablesConfig,
        transfer: Arc<dyn ValueTransfer>,
        bus: B,
    ) -> Self {
        payables_observability::init_with_filter(&config.log_filter);
        Self::new(config.client, transfer, bus)
    }

    pub fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// File a new invoice with `caller` as supplier. Returns its id.
    #[instrument(
        skip_all,
        fields(ledger_id = %self.ledger_id, caller = %caller, amount = %amount),
        err
    )]
    pub fn create_invoice(
        &self,
        caller: AccountId,
        description: impl Into<String>,
        amount: Amount,
        due_date: i64,
    ) -> Result<InvoiceId, PayablesError> {
        let command = LedgerCommand::CreateInvoice(CreateInvoice {
            caller,
            description: description.into(),
            amount,
            due_date,
            occurred_at: Utc::now(),
        });

        let committed = self.commit(&command)?;
        let invoice_id = committed
            .iter()
            .find_map(|event| match event {
                LedgerEvent::InvoiceCreated(e) => Some(e.invoice_id),
                _ => None,
            })
            .ok_or_else(|| DomainError::invariant("invoice creation produced no invoice"))?;

        info!(invoice_id = %invoice_id, "invoice created");
        Ok(invoice_id)
    }

    /// Settle `invoice_id` in full. `payment` is the value the client attaches.
    #[instrument(
        skip_all,
        fields(ledger_id = %self.ledger_id, caller = %caller, invoice_id = %invoice_id, payment = %payment),
        err
    )]
    pub fn pay_invoice(
        &self,
        caller: AccountId,
        invoice_id: InvoiceId,
        payment: Amount,
    ) -> Result<(), PayablesError> {
        let command = LedgerCommand::PayInvoice(PayInvoice {
            caller,
            invoice_id,
            payment,
            occurred_at: Utc::now(),
        });

        self.commit(&command).inspect_err(|e| {
            warn!(error = %e, "payment rejected");
        })?;

        info!("invoice paid");
        Ok(())
    }

    /// Move `caller`'s whole balance out of escrow to `caller`.
    ///
    /// Returns the amount transferred.
    #[instrument(skip_all, fields(ledger_id = %self.ledger_id, caller = %caller), err)]
    pub fn withdraw_funds(&self, caller: AccountId) -> Result<Amount, PayablesError> {
        let command = LedgerCommand::WithdrawFunds(WithdrawFunds {
            caller,
            occurred_at: Utc::now(),
        });

        // Effects are committed (and the lock released) before the transfer.
        let committed = self.commit(&command)?;
        let Some(withdrawn) = committed.into_iter().find_map(|event| match event {
            LedgerEvent::FundsWithdrawn(e) => Some(e),
            _ => None,
        }) else {
            return Err(DomainError::invariant("withdrawal produced no transfer").into());
        };

        if let Err(err) = self.transfer.transfer(caller, withdrawn.amount) {
            warn!(amount = %withdrawn.amount, error = %err, "transfer failed; reverting withdrawal");
            let mut ledger = self.lock()?;
            let reverted = ledger.withdrawal_reverted(&withdrawn, err.to_string());
            self.record(&mut ledger, reverted);
            return Err(err.into());
        }

        info!(amount = %withdrawn.amount, "funds withdrawn");
        Ok(withdrawn.amount)
    }

    /// `(is_paid, due_date)` for an existing invoice.
    pub fn check_invoice_status(&self, invoice_id: InvoiceId) -> Result<(bool, i64), PayablesError> {
        Ok(self.lock()?.check_invoice_status(invoice_id)?)
    }

    /// `supplier`'s unpaid invoice ids in creation order, as of now.
    pub fn get_pending_invoices(&self, supplier: AccountId) -> Result<Vec<InvoiceId>, PayablesError> {
        Ok(self.lock()?.pending_invoices(&supplier))
    }

    /// Full record of an invoice.
    pub fn invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, PayablesError> {
        self.lock()?
            .invoice(invoice_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("invoice").into())
    }

    /// Escrowed balance of `account`; zero if it was never credited.
    pub fn balance_of(&self, account: AccountId) -> Result<Amount, PayablesError> {
        Ok(self.lock()?.balance_of(&account))
    }

    pub fn client(&self) -> Result<AccountId, PayablesError> {
        Ok(self.lock()?.client())
    }

    pub fn invoice_count(&self) -> Result<u64, PayablesError> {
        Ok(self.lock()?.invoice_count())
    }

    pub fn total_in_custody(&self) -> Result<Amount, PayablesError> {
        Ok(self.lock()?.total_in_custody())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ledger>, PayablesError> {
        self.ledger.lock().map_err(|_| PayablesError::Poisoned)
    }

    /// Run `command` under the lock, then publish whatever it committed
    /// before unlocking.
    fn commit(&self, command: &LedgerCommand) -> Result<Vec<LedgerEvent>, PayablesError> {
        let mut ledger = self.lock()?;
        let base = ledger.version();
        let events = ledger.execute(command)?;

        for (event, sequence) in events.iter().zip(base + 1..) {
            self.publish(sequence, event.clone());
        }
        Ok(events)
    }

    /// Apply an event the service produced itself (not the outcome of a
    /// command) and publish it under the same lock.
    fn record(&self, ledger: &mut MutexGuard<'_, Ledger>, event: LedgerEvent) {
        ledger.apply(&event);
        self.publish(ledger.version(), event);
    }

    /// Best-effort: state is already committed, so a failed publish is logged
    /// rather than surfaced.
    fn publish(&self, sequence: u64, event: LedgerEvent) {
        let event_type = event.event_type();
        let envelope = EventEnvelope::wrap(self.ledger_id.0, AGGREGATE_TYPE, sequence, event);
        if let Err(err) = self.bus.publish(envelope) {
            warn!(event_type = %event_type, sequence, error = ?err, "event publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payables_events::InMemoryEventBus;

    use crate::transfer::InMemoryTransfer;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<LedgerEvent>>>;

    struct Rejecting;

    impl ValueTransfer for Rejecting {
        fn transfer(&self, _to: AccountId, _amount: Amount) -> Result<(), TransferError> {
            Err(TransferError::Rejected("receiver refused".to_string()))
        }
    }

    fn service(client: AccountId, transfer: Arc<dyn ValueTransfer>) -> AccountsPayable<Bus> {
        AccountsPayable::new(client, transfer, Arc::new(InMemoryEventBus::new()))
    }

    #[test]
    fn committed_events_are_published_with_increasing_sequence_numbers() {
        let client = AccountId::new();
        let supplier = AccountId::new();
        let ap = service(client, Arc::new(InMemoryTransfer::new()));
        let subscription = ap.bus().subscribe();

        let id = ap.create_invoice(supplier, "Test Invoice", Amount::new(7), 0).unwrap();
        ap.pay_invoice(client, id, Amount::new(7)).unwrap();
        ap.withdraw_funds(supplier).unwrap();

        let envelopes = subscription.drain();
        let types: Vec<&str> = envelopes.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "payables.ledger.invoice_created",
                "payables.ledger.invoice_paid",
                "payables.ledger.funds_withdrawn",
            ]
        );
        let sequences: Vec<u64> = envelopes.iter().map(|e| e.sequence_number()).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(envelopes.iter().all(|e| e.aggregate_id() == ap.ledger_id().0));
        assert!(envelopes.iter().all(|e| e.aggregate_type() == "payables.ledger"));
    }

    #[test]
    fn rejected_commands_publish_nothing() {
        let client = AccountId::new();
        let supplier = AccountId::new();
        let ap = service(client, Arc::new(InMemoryTransfer::new()));
        let id = ap.create_invoice(supplier, "Test Invoice", Amount::new(7), 0).unwrap();
        let subscription = ap.bus().subscribe();

        assert!(ap.pay_invoice(supplier, id, Amount::new(7)).is_err());
        assert!(ap.withdraw_funds(supplier).is_err());

        assert!(subscription.drain().is_empty());
    }

    #[test]
    fn failed_transfer_publishes_withdrawal_and_its_reversal() {
        let client = AccountId::new();
        let supplier = AccountId::new();
        let ap = service(client, Arc::new(Rejecting));
        let subscription = ap.bus().subscribe();
        let id = ap.create_invoice(supplier, "Test Invoice", Amount::new(7), 0).unwrap();
        ap.pay_invoice(client, id, Amount::new(7)).unwrap();

        let err = ap.withdraw_funds(supplier).unwrap_err();

        assert!(matches!(err, PayablesError::Transfer(TransferError::Rejected(_))));
        assert_eq!(ap.balance_of(supplier).unwrap(), Amount::new(7));
        assert_eq!(ap.total_in_custody().unwrap(), Amount::new(7));

        let envelopes = subscription.drain();
        let types: Vec<&str> = envelopes.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "payables.ledger.invoice_created",
                "payables.ledger.invoice_paid",
                "payables.ledger.funds_withdrawn",
                "payables.ledger.withdrawal_reverted",
            ]
        );
        let sequences: Vec<u64> = envelopes.iter().map(|e| e.sequence_number()).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);

        // Every version step is visible on the bus.
        let version = ap.lock().unwrap().version();
        assert_eq!(version, envelopes.len() as u64);

        let LedgerEvent::WithdrawalReverted(reverted) = envelopes[3].payload() else {
            panic!("Expected WithdrawalReverted event");
        };
        assert_eq!(reverted.supplier, supplier);
        assert_eq!(reverted.amount, Amount::new(7));
        assert_eq!(reverted.reason, "transfer rejected: receiver refused");
    }

    #[test]
    fn concurrent_commands_publish_gapless_ordered_sequences() {
        let client = AccountId::new();
        let ap = Arc::new(service(client, Arc::new(InMemoryTransfer::new())));
        let subscription = ap.bus().subscribe();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ap = Arc::clone(&ap);
                std::thread::spawn(move || {
                    let supplier = AccountId::new();
                    for _ in 0..25 {
                        let id = ap
                            .create_invoice(supplier, "Concurrent", Amount::new(1), 0)
                            .unwrap();
                        ap.pay_invoice(client, id, Amount::new(1)).unwrap();
                    }
                    ap.withdraw_funds(supplier).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let sequences: Vec<u64> = subscription
            .drain()
            .iter()
            .map(|e| e.sequence_number())
            .collect();
        let expected: Vec<u64> = (1..=8 * 51).collect();
        assert_eq!(sequences, expected);
        assert_eq!(ap.lock().unwrap().version(), 8 * 51);
    }

    #[test]
    fn domain_errors_are_exposed_unchanged() {
        let ap = service(AccountId::new(), Arc::new(InMemoryTransfer::new()));

        let err = ap.check_invoice_status(InvoiceId::FIRST).unwrap_err();
        assert_eq!(err.domain(), Some(&DomainError::not_found("invoice")));
        assert_eq!(err.to_string(), "invoice not found");

        let err = ap.invoice(InvoiceId::FIRST).unwrap_err();
        assert_eq!(err.domain(), Some(&DomainError::not_found("invoice")));
    }
}

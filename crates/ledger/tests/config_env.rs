//! Deployment from process environment variables.
//!
//! Kept in its own test binary: it mutates the environment, which must not
//! race with other tests.

use std::sync::Arc;

use payables_core::{AccountId, Amount};
use payables_events::{EventEnvelope, InMemoryEventBus};
use payables_ledger::config::{CLIENT_VAR, LOG_VAR};
use payables_ledger::{AccountsPayable, InMemoryTransfer, InvoiceId, LedgerEvent, PayablesConfig};

type Bus = Arc<InMemoryEventBus<EventEnvelope<LedgerEvent>>>;

#[test]
fn deploys_from_environment() {
    let client = AccountId::new();
    // SAFETY: this binary runs a single test, so no other thread reads the
    // environment concurrently.
    unsafe {
        std::env::set_var(CLIENT_VAR, client.to_string());
        std::env::set_var(LOG_VAR, "payables_ledger=debug");
    }

    let config = PayablesConfig::from_env().unwrap();
    assert_eq!(config.client, client);
    assert_eq!(config.log_filter, "payables_ledger=debug");

    let ap: AccountsPayable<Bus> = AccountsPayable::from_config(
        &config,
        Arc::new(InMemoryTransfer::new()),
        Arc::new(InMemoryEventBus::new()),
    );
    assert_eq!(ap.client().unwrap(), client);

    let supplier = AccountId::new();
    let id = ap
        .create_invoice(supplier, "From env", Amount::new(3), 0)
        .unwrap();
    ap.pay_invoice(client, id, Amount::new(3)).unwrap();
    assert_eq!(id, InvoiceId::FIRST);
    assert_eq!(ap.balance_of(supplier).unwrap(), Amount::new(3));

    // SAFETY: as above.
    unsafe {
        std::env::remove_var(CLIENT_VAR);
    }
    let err = PayablesConfig::from_env().unwrap_err();
    assert!(err.to_string().contains(CLIENT_VAR));
}

//! Accounts payable escrow ledger.
//!
//! Suppliers file invoices against a single designated client. The client
//! settles them in full, the ledger holds the value in escrow, and suppliers
//! pull their accumulated balance out when they choose.
//!
//! - [`Ledger`] is the pure aggregate: commands in, events out, no IO.
//! - [`AccountsPayable`] is the service around it: serialises operations,
//!   moves value through a [`ValueTransfer`], publishes events and logs.

pub mod config;
pub mod invoice;
pub mod ledger;
pub mod service;
pub mod transfer;

pub use config::PayablesConfig;
pub use invoice::{Invoice, InvoiceId, InvoiceStatus};
pub use ledger::{
    CreateInvoice, FundsWithdrawn, InvoiceCreated, InvoicePaid, Ledger, LedgerCommand, LedgerEvent,
    LedgerId, PayInvoice, WithdrawFunds, WithdrawalReverted,
};
pub use service::{AccountsPayable, PayablesError};
pub use transfer::{InMemoryTransfer, TransferError, ValueTransfer};

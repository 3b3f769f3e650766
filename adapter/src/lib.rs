#![deny(rust_2018_idioms)]
#![deny(clippy::all)]
//! The payments provider seam of the control plane.
//!
//! The ledger only talks to a provider through [`PaymentsGateway`]. The
//! [`Dummy`](dummy::Dummy) gateway is always available and is used when no
//! provider is configured and in tests.

pub use self::{
    client::{AttachedPaymentMethod, Customer, NewPaymentIntent, PaymentIntent, PaymentsGateway},
    error::{Error, Kind},
};

pub mod client;
pub mod dummy;
pub mod error;
pub mod webhook;

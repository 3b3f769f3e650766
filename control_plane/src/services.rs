//! The domain services behind the routes.
//!
//! Services take the acting [`Actor`](crate::Actor), check what it may do
//! through [`authz`] and persist through the [`Store`](crate::store::Store).
//! The current time is always passed in.

pub mod association;
pub mod authz;
pub mod catalog;
pub mod delegation;
pub mod identity;
pub mod invitation;
pub mod ledger;
pub mod usage;
pub mod visibility;
pub mod webhook;

//! CSRF/origin security gate and encrypted token envelopes for the duplex
//! RPC session protocol.
//!
//! [`gate`] implements the pure decision function that every credentialed
//! call must pass before it is allowed to touch the cookie session.
//! [`breach`] implements the BREACH-shielding transform applied to any
//! token value before it is echoed into a response body. [`tokenbox`]
//! implements the authenticated encryption used to seal the five envelope
//! payloads defined in `rpc_protocol::tokens`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod breach;
pub mod gate;
pub mod tokenbox;

pub use breach::{shield_token_against_breach, unshield_token_from_breach};
pub use gate::{GateDecision, GateRejection, GateRequest, SimpleRequestHint, evaluate};
pub use tokenbox::TokenBox;

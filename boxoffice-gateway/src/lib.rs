pub mod client;
pub mod mock;
pub mod webhook;

pub use client::NowPaymentsClient;
pub use mock::MockGateway;
pub use webhook::{sign_ipn_payload, verify_ipn_signature, IPN_SIGNATURE_HEADER};

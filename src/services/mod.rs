pub mod armado;
pub mod classifier;
pub mod crypto;
pub mod ledger;
pub mod orchestrator;
pub mod payment_modes;
pub mod pennylane;
pub mod scheduler;
pub mod tempo;
pub mod transport;

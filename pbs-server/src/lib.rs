//! The HTTP/2 request pipeline a PBS node serves its phase and status
//! endpoints through: per-request authorization/body-receipt
//! synchronization, routing between local handling and forwarding
//! to whichever node holds a partition's lease, and the phase handlers
//! that drive `pbs_txn::TransactionManager`.

mod forwarder;
mod phases;
mod router;
mod routing;
mod state;
mod status_codes;
mod sync_context;

pub use forwarder::Forwarder;
pub use router::build_router;
pub use routing::{AlwaysLocal, LeaseBackedResolver, RouteResolver};
pub use state::AppState;

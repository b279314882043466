//! ACME certificate acquisition over DNS-01.
//!
//! The order driver runs an ACME v2 order for a single name to completion.
//! It proves control of the name through the zone this process itself
//! hosts: the challenge coordinator writes the `_acme-challenge.<name>` TXT
//! value into the shared store, the [zone responder][crate::dns] serves it
//! to the CA's resolvers, and a propagation probe confirms the record is
//! answerable before the CA is told to validate.
//!
//! Account state is created lazily on first use and persisted in the store
//! under a reserved key, so restarts re-use the registered account instead
//! of minting a new one per boot.

pub mod challenge;
pub mod driver;
pub mod probe;

pub use challenge::ChallengeCoordinator;
pub use driver::{Acquire, CertBundle, OrderDriver};
pub use probe::PropagationProbe;

//! The built-in `util` service (§4.9): iteration over collections, plain
//! templates, debug printing, and results-map snapshots — the "thin
//! collaborator" service a default `ServiceRegistry` registers so that
//! `util:template`, `util:map`, and friends are always available without
//! the caller having to wire them up by hand.

mod service;

pub use service::UtilService;

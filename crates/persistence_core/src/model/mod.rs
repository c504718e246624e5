//! Object-graph records shared by contexts and stores.
//!
//! # Responsibility
//! - Define managed objects, property values and fetch requests.
//! - Track pending changes per context until they are saved.
//!
//! # Invariants
//! - Every object is identified by a stable `ObjectId`.
//! - Change sets hold at most one folded change per object.

pub mod change_set;
pub mod object;

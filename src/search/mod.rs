//! Unified academic search surface: multi-provider fan-out, citation graph
//! traversal, and SERP complement routing.

pub mod academic;
pub mod router;

pub use academic::{AcademicSearchProvider, ClientRegistry, Direction, SearchOptions};
pub use router::complement_serp_result;

//! Session-scoped event processing on top of the core components.

mod router;

pub use router::SessionRouter;

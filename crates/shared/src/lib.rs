//! Types shared by the catalog, the controllers and the front-ends.

pub mod domain;
pub mod error;
pub mod protocol;

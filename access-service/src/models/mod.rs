pub mod access;
pub mod filter;
pub mod party;
pub mod request;

pub use access::{AccessNode, AccessResponse, AggregationResult};
pub use filter::{Filter, FilterError, FilterInput};
pub use party::{LegacyGrant, Party};
pub use request::{AccessRequest, SubjectId};

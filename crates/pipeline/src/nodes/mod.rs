//! The pipeline's nodes.
//!
//! Job search runs `[profile_retrieval, discovery, matching, research,
//! fabrication, completion, delivery]`; profiling runs `[validation,
//! structuring]`. Each node persists exactly the data it produces and
//! talks to the others only through the context.

mod completion;
mod delivery;
mod discovery;
mod fabrication;
mod matching;
mod profile_retrieval;
mod profiling;
mod research;

pub use completion::CompletionNode;
pub use delivery::DeliveryNode;
pub use discovery::DiscoveryNode;
pub use fabrication::FabricationNode;
pub use matching::MatchingNode;
pub use profile_retrieval::ProfileRetrievalNode;
pub use profiling::{ProfileStructuringNode, ProfileValidationNode};
pub use research::ResearchNode;

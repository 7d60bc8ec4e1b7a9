pub mod compliance;
pub mod refiner;
pub mod retriever;
pub mod summarizer;

pub use compliance::ComplianceAgent;
pub use refiner::{RefinedQuery, RefinerAgent};
pub use retriever::RetrieverAgent;
pub use summarizer::{Answer, SummarizerAgent};

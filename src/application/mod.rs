pub mod use_cases;

pub use use_cases::dedup::Deduplicator;
pub use use_cases::harvester::ResponseHarvester;
pub use use_cases::pipeline::Pipeline;

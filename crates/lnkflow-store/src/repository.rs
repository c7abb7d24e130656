//! Repository layer for data access

pub mod memory;
pub mod rules;

// Re-export concrete repository implementations with simple names
pub use memory::MemoryRuleRepository;
pub use rules::DbRuleRepository;

// Re-export repository traits
pub use rules::RuleRepository;

//! Read path: filtered search and timeframe parsing.

pub mod search;
pub mod timeframe;

pub use search::ConversationSearcher;
pub use timeframe::parse_timeframe;

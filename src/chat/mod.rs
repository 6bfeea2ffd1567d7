pub mod merger;
pub mod view_model;

pub use merger::{ConversationState, HistoryStatus, MessageMerger};
pub use view_model::ConversationViewModel;

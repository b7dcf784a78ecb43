pub mod ask;
pub mod history;

pub use ask::AskCommand;
pub use history::HistoryCommand;

pub mod consolidate;
pub mod recall;
pub mod show;
pub mod stats;
pub mod store;

pub use consolidate::ConsolidateCommand;
pub use recall::RecallCommand;
pub use show::ShowCommand;
pub use stats::StatsCommand;
pub use store::StoreCommand;

pub mod names;
pub mod params;
pub mod schema;
pub mod selectors;

pub use params::Params;
pub use schema::{
    BrowserConfig, BrowserPosture, CaptureConfig, Config, DownloadConfig, Environment,
    OverlayConfig, RetryConfig, Timeouts,
};
pub use selectors::{Pick, SelectorTable, Strategy, StrategyTier};

// Library interface for sweatrs
// The binary in main.rs is a thin CLI over these modules

pub mod config;
pub mod critical_power;
pub mod error;
pub mod heart_rate_model;
pub mod import;
pub mod logging;
pub mod models;
pub mod optimize;
pub mod power;
pub mod streams;
pub mod w_prime_balance;
pub mod zones;

// Re-export commonly used types for convenience
pub use models::*;
pub use config::AppConfig;
pub use critical_power::{fit_critical_power_model, CpModelKind, CriticalPowerFitter, FittedModel};
pub use error::{Result, SweatError};
pub use heart_rate_model::{fit_heart_rate_model, HeartRateModel, HeartRateModelFitter, HeartRateModelParams};
pub use import::{ImportFormat, ImportManager};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use optimize::SolverConfig;
pub use power::{PowerAnalyzer, WapAlgorithm};
pub use streams::RollingAlgorithm;
pub use w_prime_balance::{
    w_prime_balance, WPrimeBalance, WPrimeBalanceAlgorithm, WPrimeBalanceCalculator,
    WPrimeBalanceConfig,
};
pub use zones::{ZoneCalculator, ZoneSpec};

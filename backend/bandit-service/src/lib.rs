pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{BanditError, ErrorClass, StoreError};
pub use models::{InstanceKey, InstanceState, PolicyParams, Recommendation};
pub use services::{ArmGenerator, ArmStore, BanditManager, ManagerConfig};

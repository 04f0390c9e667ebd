pub mod generator;
pub mod manager;
pub mod policy;
pub mod store;

pub use generator::{ArmGenerator, GeneratorConfig, SeedReport};
pub use manager::{BanditManager, ManagerConfig};
pub use policy::{PUcb, Policy, Ucb1};
pub use store::{ArmStore, FileArmStore, InMemoryArmStore, RedisArmStore};

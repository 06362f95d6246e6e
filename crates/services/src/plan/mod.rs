pub mod ports;

pub use ports::{Plan, PlanRepository, FREE_PLAN_NAME};

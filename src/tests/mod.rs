// Cross-module tests
pub mod test_agent;
pub mod test_optimizer;

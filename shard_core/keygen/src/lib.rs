pub mod increment;
pub mod snowflake;
pub mod uuid_hash;

use common::config::components::sharding::{KeyGeneratorConfig, KeyGeneratorType};
use std::sync::Arc;
use thiserror::Error;

pub use increment::IncrementGenerator;
pub use snowflake::SnowflakeGenerator;
pub use uuid_hash::UuidGenerator;

#[derive(Debug, Error)]
pub enum KeyGeneratorError {
    #[error("invalid key generator configuration: {0}")]
    InvalidConfig(String),
    #[error("clock moved backwards: last generation at {last_ms}ms, now {now_ms}ms")]
    ClockMovedBackwards { last_ms: i64, now_ms: i64 },
}

/// Distributed key generator. Every implementation is safe to share across
/// threads and issues exactly one id per call.
pub trait KeyGenerator: Send + Sync {
    fn next_id(&self) -> Result<i64, KeyGeneratorError>;
}

/// Build a generator from its configuration record.
pub fn create_key_generator(
    config: &KeyGeneratorConfig,
) -> Result<Arc<dyn KeyGenerator>, KeyGeneratorError> {
    match config.generator_type {
        KeyGeneratorType::Snowflake => {
            let worker = config.worker_id.unwrap_or(0);
            let datacenter = config.datacenter_id.unwrap_or(0);
            Ok(Arc::new(SnowflakeGenerator::new(worker, datacenter)?))
        }
        KeyGeneratorType::Uuid => Ok(Arc::new(UuidGenerator::new())),
        KeyGeneratorType::Increment => {
            let start = config.start.unwrap_or(0);
            let step = config.step.unwrap_or(1);
            if step == 0 {
                return Err(KeyGeneratorError::InvalidConfig(
                    "increment step must be non-zero".to_string(),
                ));
            }
            Ok(Arc::new(IncrementGenerator::new(start, step)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::components::sharding::{KeyGeneratorConfig, KeyGeneratorType};

    fn config(generator_type: KeyGeneratorType) -> KeyGeneratorConfig {
        KeyGeneratorConfig {
            column: "order_id".to_string(),
            generator_type,
            worker_id: Some(1),
            datacenter_id: Some(1),
            start: Some(100),
            step: Some(10),
        }
    }

    #[test]
    fn test_factory_dispatch() {
        for generator_type in [
            KeyGeneratorType::Snowflake,
            KeyGeneratorType::Uuid,
            KeyGeneratorType::Increment,
        ] {
            let generator = create_key_generator(&config(generator_type)).expect("build generator");
            generator.next_id().expect("generate id");
        }
    }

    #[test]
    fn test_factory_rejects_zero_step() {
        let mut cfg = config(KeyGeneratorType::Increment);
        cfg.step = Some(0);
        assert!(matches!(
            create_key_generator(&cfg),
            Err(KeyGeneratorError::InvalidConfig(_))
        ));
    }
}

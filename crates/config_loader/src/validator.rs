//! 配置校验模块
//!
//! 校验规则：
//! - dispatcher.quota > 0
//! - dispatcher.event_queue_size > 0
//! - source.refill_interval_ms > 0
//! - read_error_policy 为 retry 时 attempts > 0
//! - persistence.capacity > 0

use contracts::{BrokerConfig, ContractError, ReadErrorPolicy};

/// 校验 BrokerConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &BrokerConfig) -> Result<(), ContractError> {
    validate_dispatcher(config)?;
    validate_source(config)?;
    validate_persistence(config)?;
    Ok(())
}

fn positive(field: &str, value: u64) -> Result<(), ContractError> {
    if value == 0 {
        return Err(ContractError::config_validation(
            field,
            "must be greater than 0",
        ));
    }
    Ok(())
}

/// 校验分发配置
fn validate_dispatcher(config: &BrokerConfig) -> Result<(), ContractError> {
    positive("dispatcher.quota", config.dispatcher.quota as u64)?;
    positive(
        "dispatcher.event_queue_size",
        config.dispatcher.event_queue_size as u64,
    )
}

/// 校验限流 Source 配置
fn validate_source(config: &BrokerConfig) -> Result<(), ContractError> {
    let source = &config.source;
    positive("source.refill_interval_ms", source.refill_interval_ms)?;

    if let ReadErrorPolicy::Retry { attempts, .. } = source.read_error_policy {
        positive("source.read_error_policy.attempts", u64::from(attempts))?;
    }
    Ok(())
}

/// 校验持久化配置
fn validate_persistence(config: &BrokerConfig) -> Result<(), ContractError> {
    positive("persistence.capacity", config.persistence.capacity as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&BrokerConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_quota_rejected() {
        let mut config = BrokerConfig::default();
        config.dispatcher.quota = 0;
        let err = validate(&config).unwrap_err();
        assert!(matches!(
            err,
            ContractError::ConfigValidation { ref field, .. } if field == "dispatcher.quota"
        ));
    }

    #[test]
    fn test_zero_event_queue_rejected() {
        let mut config = BrokerConfig::default();
        config.dispatcher.event_queue_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_refill_interval_rejected() {
        let mut config = BrokerConfig::default();
        config.source.refill_interval_ms = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("refill_interval_ms"));
    }

    #[test]
    fn test_zero_rate_is_allowed() {
        let mut config = BrokerConfig::default();
        config.source.rate_per_sec = 0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_retry_without_attempts_rejected() {
        let mut config = BrokerConfig::default();
        config.source.read_error_policy = ReadErrorPolicy::Retry {
            attempts: 0,
            backoff_ms: 10,
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = BrokerConfig::default();
        config.persistence.capacity = 0;
        assert!(validate(&config).is_err());
    }
}

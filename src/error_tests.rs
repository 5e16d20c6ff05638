//! Tests for error types

#[cfg(test)]
mod tests {
    use super::super::error::TraderError;

    #[test]
    fn test_gas_reserve_display() {
        let err = TraderError::GasReserve {
            chain_id: 8453,
            balance: "0.004".into(),
            reserve: "0.01".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("8453"));
        assert!(msg.contains("0.004"));
        assert!(msg.contains("0.01"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = TraderError::InvalidTransition {
            from: "closed".into(),
            to: "holding".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid position transition: closed → holding"
        );
    }

    #[test]
    fn test_config_errors_not_recoverable() {
        assert!(!TraderError::Config("missing key".into()).is_recoverable());
        assert!(TraderError::Rpc("timeout".into()).is_recoverable());
        assert!(TraderError::Scan("etherscan 502".into()).is_recoverable());
    }

    #[test]
    fn test_no_pool_display() {
        let err = TraderError::NoPool {
            chain_id: 1,
            token: "0xabc".into(),
        };
        assert!(err.to_string().contains("0xabc"));
    }
}

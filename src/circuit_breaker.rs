use failsafe::{backoff, failure_policy, Config};
use std::time::Duration;

/// Circuit breaker type guarding the CRM transport.
pub type CrmCircuitBreaker = failsafe::StateMachine<
    failure_policy::ConsecutiveFailures<backoff::Exponential>,
    (),
>;

/// Creates a circuit breaker for CRM REST calls so a Bitrix outage fails
/// webhook requests fast instead of stacking up timeouts.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive transport failures trigger OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// Only transport failures count (connection errors, timeouts, 5xx). A CRM
/// rejecting a request with a 4xx or an `error` body leaves the breaker alone.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: Too many failures, requests fail fast.
/// - **HALF_OPEN**: Testing if service recovered.
pub fn create_crm_circuit_breaker() -> CrmCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_crm_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("connection reset"));
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[test]
    fn test_circuit_breaker_ignores_non_failures() {
        let cb = create_crm_circuit_breaker();

        // Remote rejections are reported through the predicate as non-failures.
        for _ in 0..10 {
            let result: Result<(), Error<&str>> =
                cb.call_with(|_: &&str| false, || Err::<(), &str>("ACCESS_DENIED"));
            assert!(matches!(result, Err(Error::Inner("ACCESS_DENIED"))));
        }

        let result: Result<i32, Error<&str>> = cb.call(|| Ok::<i32, &str>(42));
        assert_eq!(result.unwrap(), 42);
    }
}

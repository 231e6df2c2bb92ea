use std::time::Duration;

use rand::Rng;
use vertex_types::RetryPolicy;

/// Delay before the given attempt (1-indexed):
/// `min(cap, base * 2^(attempt-1)) * (1 + rand[-jitter, +jitter])`.
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    // shift is capped so the multiplier can't overflow u64
    let exp = attempt.saturating_sub(1).min(16);
    let raw = policy.base_delay_ms.saturating_mul(1u64 << exp);
    let capped = raw.min(policy.max_delay_ms);

    let jitter = policy.jitter.clamp(0.0, 1.0);
    if jitter > 0.0 {
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        Duration::from_millis((capped as f64 * factor).max(0.0) as u64)
    } else {
        Duration::from_millis(capped)
    }
}

/// Advisory delay from a `Retry-After` response header (delta-seconds
/// form only), clamped to the policy's cap.
pub fn retry_after_delay(headers: &reqwest::header::HeaderMap, policy: &RetryPolicy) -> Option<Duration> {
    let seconds: u64 = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(Duration::from_millis(
        (seconds * 1_000).min(policy.max_delay_ms),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64, jitter: f64) -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: base_ms,
            max_delay_ms: max_ms,
            max_attempts: 3,
            jitter,
        }
    }

    #[test]
    fn exponential_growth_without_jitter() {
        let p = policy(1_000, 60_000, 0.0);
        assert_eq!(delay_for_attempt(&p, 1), Duration::from_millis(1_000));
        assert_eq!(delay_for_attempt(&p, 2), Duration::from_millis(2_000));
        assert_eq!(delay_for_attempt(&p, 3), Duration::from_millis(4_000));
    }

    #[test]
    fn cap_applies() {
        let p = policy(1_000, 3_000, 0.0);
        assert_eq!(delay_for_attempt(&p, 10), Duration::from_millis(3_000));
        // huge attempt numbers don't overflow
        assert_eq!(delay_for_attempt(&p, u32::MAX), Duration::from_millis(3_000));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let p = policy(1_000, 60_000, 0.2);
        for _ in 0..100 {
            let d = delay_for_attempt(&p, 2).as_millis() as f64;
            assert!((1_600.0..=2_400.0).contains(&d), "delay {} out of range", d);
        }
    }

    #[test]
    fn retry_after_parsing() {
        let p = policy(1_000, 60_000, 0.2);
        let mut headers = reqwest::header::HeaderMap::new();

        assert_eq!(retry_after_delay(&headers, &p), None);

        headers.insert(reqwest::header::RETRY_AFTER, "5".parse().unwrap());
        assert_eq!(retry_after_delay(&headers, &p), Some(Duration::from_secs(5)));

        // clamped to the cap
        headers.insert(reqwest::header::RETRY_AFTER, "600".parse().unwrap());
        assert_eq!(retry_after_delay(&headers, &p), Some(Duration::from_secs(60)));

        // http-date form is ignored rather than guessed at
        headers.insert(
            reqwest::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(retry_after_delay(&headers, &p), None);
    }
}

use super::*;

#[test]
fn zero_rate_is_a_config_error() {
    let err = HostRateLimiter::new(0).unwrap_err();
    assert!(err.to_string().starts_with("configuration error:"));
}

#[test]
fn throttles_share_one_bucket_per_host() {
    let limiter = HostRateLimiter::new(1).unwrap();
    let a = limiter.throttle("Example.org");
    let b = limiter.throttle("example.org");
    assert_eq!(a.host(), b.host());

    // Burst of one: the first check consumes the only token for the host.
    assert!(limiter.inner.check_key(&a.host().to_string()).is_ok());
    assert!(limiter.inner.check_key(&b.host().to_string()).is_err());

    // Other hosts keep their own bucket.
    let other = limiter.throttle("gpsjam.org");
    assert!(limiter.inner.check_key(&other.host().to_string()).is_ok());
}

#[tokio::test]
async fn acquire_returns_when_a_token_is_available() {
    let limiter = HostRateLimiter::new(1000).unwrap();
    let throttle = limiter.throttle("example.org");
    throttle.acquire().await;
    throttle.acquire().await;
    assert_eq!(limiter.requests_per_second(), 1000);
}

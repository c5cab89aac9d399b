use super::*;

#[test]
fn test_allows_under_limit() {
    let limiter = RateLimiter::new(WindowConfig::new(5, Duration::from_secs(60)));
    for i in 0..5 {
        let result = limiter.acquire("p1:alice");
        assert!(result.allowed);
        assert_eq!(result.remaining, 4 - i);
    }
}

#[test]
fn test_denies_over_limit() {
    let limiter = RateLimiter::new(WindowConfig::new(3, Duration::from_secs(60)));
    for _ in 0..3 {
        assert!(limiter.acquire("p1:alice").allowed);
    }
    let result = limiter.acquire("p1:alice");
    assert!(!result.allowed);
    assert_eq!(result.remaining, 0);
    assert_eq!(limiter.usage("p1:alice"), (3, 3));
}

#[test]
fn test_separate_keys() {
    let limiter = RateLimiter::new(WindowConfig::new(2, Duration::from_secs(60)));
    limiter.acquire("a");
    limiter.acquire("a");
    assert!(!limiter.acquire("a").allowed);
    assert!(limiter.acquire("b").allowed);
}

#[test]
fn test_window_slides() {
    let limiter = RateLimiter::new(WindowConfig::new(2, Duration::from_millis(100)));
    let start = Instant::now();
    assert!(limiter.acquire_at("k", start).allowed);
    assert!(limiter.acquire_at("k", start + Duration::from_millis(50)).allowed);
    assert!(!limiter.acquire_at("k", start + Duration::from_millis(90)).allowed);

    // The first request has left the window.
    assert!(limiter.acquire_at("k", start + Duration::from_millis(101)).allowed);
    assert!(!limiter.acquire_at("k", start + Duration::from_millis(120)).allowed);
}

#[test]
fn test_cleanup_drops_idle_keys() {
    let limiter = RateLimiter::new(WindowConfig::new(10, Duration::from_millis(1)));
    limiter.acquire("a");
    limiter.acquire("b");
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(limiter.cleanup(), 2);
    assert_eq!(limiter.tracked_keys(), 0);
}

#[test]
fn test_ingress_user_tier() {
    let limiter = IngressLimiter::new(
        WindowConfig::new(2, Duration::from_secs(60)),
        WindowConfig::new(100, Duration::from_secs(60)),
    );
    assert!(limiter.admit("p1", "alice").is_ok());
    assert!(limiter.admit("p1", "alice").is_ok());
    assert_eq!(limiter.admit("p1", "alice"), Err(LimitScope::User));

    // Refused messages are not counted.
    assert_eq!(limiter.user_usage("p1", "alice"), (2, 2));

    // Same user in another project has a fresh budget.
    assert!(limiter.admit("p2", "alice").is_ok());
    assert!(limiter.admit("p1", "bob").is_ok());
    assert_eq!(limiter.user_usage("p2", "alice"), (1, 2));
}

#[test]
fn test_ingress_project_tier() {
    let limiter = IngressLimiter::new(
        WindowConfig::new(100, Duration::from_secs(60)),
        WindowConfig::new(3, Duration::from_secs(60)),
    );
    assert!(limiter.admit("p1", "a").is_ok());
    assert!(limiter.admit("p1", "b").is_ok());
    assert!(limiter.admit("p1", "c").is_ok());
    assert_eq!(limiter.admit("p1", "d"), Err(LimitScope::Project));
    assert!(limiter.admit("p2", "d").is_ok());
    assert_eq!(limiter.project_usage("p1"), (3, 3));
}

#[test]
fn test_disabled_settings_build_no_limiter() {
    let settings = RateLimitSettings {
        enabled: false,
        ..Default::default()
    };
    assert!(IngressLimiter::from_settings(&settings).is_none());
    assert!(IngressLimiter::from_settings(&RateLimitSettings::default()).is_some());
}

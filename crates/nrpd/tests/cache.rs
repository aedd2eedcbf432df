use nrpd::cache::ExpiringCache;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

fn ip(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 0, 2, n))
}

#[test]
fn entry_expires_after_ttl() {
    let cache = ExpiringCache::new(Duration::from_secs(1));
    assert_eq!(cache.ttl(), Duration::from_secs(1));
    cache.add(ip(1));
    assert!(cache.is_present(&ip(1)));

    std::thread::sleep(Duration::from_millis(1100));
    assert!(!cache.is_present(&ip(1)));
}

#[test]
fn background_sweep_drops_expired_entries() {
    let cache = ExpiringCache::new(Duration::from_millis(100));
    for n in 0..10 {
        cache.add(ip(n));
    }
    std::thread::sleep(Duration::from_millis(150));

    // This call is past one TTL since the last sweep and wakes the sweeper.
    cache.add(ip(200));
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while cache.len() > 1 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(cache.len(), 1);
    assert!(cache.is_present(&ip(200)));
}

#[test]
fn concurrent_clean_never_removes_live_keys() {
    let cache = Arc::new(ExpiringCache::new(Duration::from_secs(5)));
    for n in 0..50 {
        cache.add(ip(n));
    }

    let cleaners: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    assert_eq!(cache.clean(), 0);
                }
            })
        })
        .collect();
    for n in 0..50 {
        assert!(cache.is_present(&ip(n)));
    }
    for c in cleaners {
        c.join().unwrap();
    }
    assert_eq!(cache.len(), 50);
}

#[test]
fn is_present_add_from_many_threads_admits_once() {
    let cache = Arc::new(ExpiringCache::new(Duration::from_secs(60)));
    let admitted: usize = (0..8)
        .map(|_| {
            let cache = cache.clone();
            std::thread::spawn(move || usize::from(!cache.is_present_add(ip(7))))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .sum();
    assert_eq!(admitted, 1);
}

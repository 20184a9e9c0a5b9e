use fleet_scan_rs::error::ScanError;
use fleet_scan_rs::iprange::generate_ips;

#[test]
fn length_and_strict_order() {
    let cases = [
        ("192.168.0.1", "192.168.0.1"),
        ("192.168.0.250", "192.168.1.10"),
        ("10.255.255.0", "11.0.0.5"),
    ];
    for (start, end) in cases {
        let ips = generate_ips(start, end).unwrap();
        let s = u32::from(start.parse::<std::net::Ipv4Addr>().unwrap());
        let e = u32::from(end.parse::<std::net::Ipv4Addr>().unwrap());
        assert_eq!(ips.len() as u64, u64::from(e - s) + 1);
        assert!(ips.windows(2).all(|w| u32::from(w[0]) < u32::from(w[1])));
        assert_eq!(ips.first().map(|ip| ip.to_string()).as_deref(), Some(start));
        assert_eq!(ips.last().map(|ip| ip.to_string()).as_deref(), Some(end));
    }
}

#[test]
fn start_after_end_rejected() {
    let err = generate_ips("192.168.1.0", "192.168.0.255").unwrap_err();
    assert!(matches!(err, ScanError::InvalidRange(_)));
    assert!(err.to_string().starts_with("Invalid IP range"));
}

#[test]
fn whitespace_around_literals_is_tolerated() {
    let ips = generate_ips(" 10.0.0.1", "10.0.0.2 ").unwrap();
    assert_eq!(ips.len(), 2);
}

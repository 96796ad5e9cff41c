use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Format the network containing `ip` as CIDR
pub fn format_cidr(ip: IpAddr, prefix_len: u8) -> String {
    match ip {
        IpAddr::V4(ipv4) => {
            let prefix_len = prefix_len.min(32);
            let mask = if prefix_len == 0 {
                0u32
            } else {
                !0u32 << (32 - prefix_len)
            };
            let network = Ipv4Addr::from(u32::from(ipv4) & mask);
            format!("{}/{}", network, prefix_len)
        }
        IpAddr::V6(ipv6) => {
            let prefix_len = prefix_len.min(128);
            let mask = if prefix_len == 0 {
                0u128
            } else {
                !0u128 << (128 - prefix_len)
            };
            let network = Ipv6Addr::from(u128::from(ipv6) & mask);
            format!("{}/{}", network, prefix_len)
        }
    }
}

/// Format a Unix timestamp as `YYYY-MM-DD HH:MM:SS UTC`
pub fn format_unix_timestamp(timestamp: u64) -> String {
    let days = timestamp / 86400;
    let remaining = timestamp % 86400;
    let hours = remaining / 3600;
    let minutes = (remaining % 3600) / 60;
    let seconds = remaining % 60;

    let (year, month, day) = days_to_ymd(days);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        year, month, day, hours, minutes, seconds
    )
}

/// Format a byte count with a binary unit
pub fn format_bytes(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}

// Convert days since Unix epoch to year/month/day
fn days_to_ymd(days: u64) -> (u64, u64, u64) {
    let mut year = 1970;
    let mut remaining_days = days;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < days_in_year {
            break;
        }
        remaining_days -= days_in_year;
        year += 1;
    }

    let days_in_months = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 1;
    for &days_in_month in &days_in_months {
        if remaining_days < days_in_month {
            break;
        }
        remaining_days -= days_in_month;
        month += 1;
    }

    (year, month, remaining_days + 1)
}

fn is_leap_year(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

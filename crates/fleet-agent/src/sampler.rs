//! Host resource sampling.

use fleet_core::agent::ResourceSample;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use sysinfo::{Disks, Networks, System};
use tracing::debug;

/// Samples CPU, memory, disk and load. Holds the `System` handle between
/// samples so CPU usage is measured over the interval.
pub struct ResourceSampler {
    sys: System,
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self { sys }
    }

    pub fn sample(&mut self) -> ResourceSample {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let disks = Disks::new_with_refreshed_list();
        let disk_usage: Vec<(u64, u64)> = disks
            .list()
            .iter()
            .map(|d| (d.total_space(), d.available_space()))
            .collect();

        let load = System::load_average();
        let sample = build_sample(
            self.sys.global_cpu_usage() as f64,
            self.sys.total_memory(),
            memory_percent(self.sys.used_memory(), self.sys.total_memory()),
            &disk_usage,
            [load.one, load.five, load.fifteen],
        );
        debug!(
            cpu_percent = sample.cpu_percent,
            ram_used_bytes = sample.ram_used_bytes,
            disk_used_bytes = sample.disk_used_bytes,
            "Resources sampled"
        );
        sample
    }
}

fn memory_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

/// RAM used is `total × percent / 100`; disk used is the sum of
/// `total - available` over all disks.
pub fn build_sample(
    cpu_percent: f64,
    ram_total: u64,
    ram_percent: f64,
    disks: &[(u64, u64)],
    load_average: [f64; 3],
) -> ResourceSample {
    let ram_used = (ram_total as f64 * ram_percent.clamp(0.0, 100.0) / 100.0).round() as u64;
    let (disk_total, disk_used) = disks
        .iter()
        .fold((0u64, 0u64), |(total, used), (t, available)| {
            (
                total.saturating_add(*t),
                used.saturating_add(t.saturating_sub(*available)),
            )
        });

    ResourceSample {
        cpu_percent,
        ram_total_bytes: ram_total,
        ram_used_bytes: ram_used,
        disk_total_bytes: disk_total,
        disk_used_bytes: disk_used,
        load_average,
    }
}

/// First non-loopback IPv4 address on the host. Falls back to the address
/// the kernel would route outbound traffic from, then to loopback.
pub fn detect_ipv4() -> IpAddr {
    let networks = Networks::new_with_refreshed_list();
    let mut candidates: Vec<(String, Ipv4Addr)> = networks
        .iter()
        .flat_map(|(name, data)| {
            data.ip_networks().iter().filter_map(move |net| match net.addr {
                IpAddr::V4(v4) if usable(v4) => Some((name.clone(), v4)),
                _ => None,
            })
        })
        .collect();
    candidates.sort();

    if let Some((name, addr)) = candidates.into_iter().next() {
        debug!(interface = %name, address = %addr, "Agent address detected");
        return IpAddr::V4(addr);
    }

    outbound_ipv4().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn usable(addr: Ipv4Addr) -> bool {
    !addr.is_loopback() && !addr.is_unspecified() && !addr.is_link_local()
}

/// Connecting a UDP socket sends nothing; it only selects a route.
fn outbound_ipv4() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    let addr = socket.local_addr().ok()?.ip();
    match addr {
        IpAddr::V4(v4) if usable(v4) => Some(addr),
        _ => None,
    }
}

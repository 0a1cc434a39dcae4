use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use anyhow::{anyhow, Result};
use crossbeam_channel::bounded;
use super::{Addr, Flow, Kind, Point, Process, Stats};

fn addr(ip: &str, port: u16) -> Addr {
    Addr {
        addr: ip.parse::<IpAddr>().unwrap(),
        port: port,
    }
}

fn flow(point: Point) -> Flow {
    Flow {
        start:    UNIX_EPOCH,
        end:      UNIX_EPOCH + Duration::from_secs(10),
        protocol: 6,
        src:      addr("10.0.0.1", 1234),
        dst:      addr("10.0.0.2", 5678),
        point:    point,
        stats:    Stats {
            bytes:         100,
            packets:       2,
            bytes_delta:   100,
            packets_delta: 2,
            throughput:    0,
        },
        ..Default::default()
    }
}

fn process(active: Duration, inactive: Duration) -> Process {
    let (_, rx) = bounded(1);
    Process::new(rx, active, inactive)
}

#[test]
fn ingest_accumulates_stats() {
    let process = process(Duration::from_secs(60), Duration::from_secs(90));

    for _ in 0..3 {
        process.ingest(flow(Point::Source));
    }

    assert_eq!(1, process.num_flows());

    process.for_all_expired(|_, _| Ok(()));
    assert_eq!(1, process.num_flows());
}

#[test]
fn merge_sums_both_directions() {
    let process = process(Duration::from_secs(0), Duration::from_secs(0));

    let mut forward = flow(Point::Source);
    let mut reply   = flow(Point::Destination);
    reply.reverse = Stats {
        bytes:         50,
        packets:       1,
        bytes_delta:   50,
        packets_delta: 1,
        throughput:    0,
    };
    reply.kube.dst_pod = "podB".to_owned();
    forward.kube.src_pod = "podA".to_owned();

    process.ingest(forward);
    process.ingest(reply);

    process.for_all_expired(|_, record| {
        assert_eq!(200, record.flow.stats.bytes);
        assert_eq!(4,   record.flow.stats.packets);
        assert_eq!(50,  record.flow.reverse.bytes);
        assert_eq!("podA", record.flow.kube.src_pod);
        assert_eq!("podB", record.flow.kube.dst_pod);
        assert!(record.ready_to_send());
        Ok(())
    });

    assert_eq!(0, process.num_flows());
}

#[test]
fn merge_does_not_overwrite_identity() {
    let process = process(Duration::from_secs(0), Duration::from_secs(0));

    let mut first = flow(Point::Source);
    first.kube.src_pod = "podA".to_owned();
    let mut second = flow(Point::Destination);
    second.kube.src_pod = "other".to_owned();

    process.ingest(first);
    process.ingest(second);

    process.for_all_expired(|_, record| {
        assert_eq!("podA", record.flow.kube.src_pod);
        Ok(())
    });
}

#[test]
fn single_observation_not_ready() {
    let process = process(Duration::from_secs(0), Duration::from_secs(0));
    process.ingest(flow(Point::Source));
    process.for_all_expired(|_, record| {
        assert!(!record.ready_to_send());
        Ok(())
    });
}

#[test]
fn intra_node_flow_ready_at_creation() {
    let process = process(Duration::from_secs(0), Duration::from_secs(0));
    let mut intra = flow(Point::Source);
    intra.kind = Kind::Intra;
    process.ingest(intra);
    process.for_all_expired(|_, record| {
        assert!(record.ready_to_send());
        Ok(())
    });
}

#[test]
fn expiry_retains_record_on_failure() {
    let process = process(Duration::from_secs(0), Duration::from_secs(0));
    process.ingest(flow(Point::Source));

    let mut calls = 0;
    process.for_all_expired(|_, _| {
        calls += 1;
        Err(anyhow!("sink unavailable"))
    });
    assert_eq!(1, calls);
    assert_eq!(1, process.num_flows());

    process.for_all_expired(|_, _| Ok(()));
    assert_eq!(0, process.num_flows());
}

#[test]
fn expiry_visits_each_record_once() {
    let process = process(Duration::from_secs(0), Duration::from_secs(0));

    let mut other = flow(Point::Source);
    other.src = addr("10.0.0.3", 4242);
    process.ingest(flow(Point::Source));
    process.ingest(other);

    let mut calls = 0;
    process.for_all_expired(|_, _| {
        calls += 1;
        Ok(())
    });
    assert_eq!(2, calls);
    assert_eq!(0, process.num_flows());
}

#[test]
fn enrichment_flags_persist_across_sweeps() {
    let process = process(Duration::from_secs(0), Duration::from_secs(0));
    process.ingest(flow(Point::Source));

    process.for_all_expired(|_, record| {
        assert!(!record.correlated_filled());
        assert!(!record.external_filled());
        record.set_correlated_filled(true);
        record.set_external_filled(true);
        Err(anyhow!("sink unavailable"))
    });

    process.for_all_expired(|_, record| {
        assert!(record.correlated_filled());
        assert!(record.external_filled());
        Ok(())
    });
    assert_eq!(0, process.num_flows());
}

#[test]
fn fresh_record_not_expired() {
    let process = process(Duration::from_secs(3600), Duration::from_secs(3600));
    process.ingest(flow(Point::Source));
    process.for_all_expired(|_, _| panic!("record should not expire"));
    assert_eq!(1, process.num_flows());
}

#[test]
fn reset_keeps_totals() {
    let mut f = flow(Point::Source);
    f.stats.throughput = 42;
    f.reset_stats();
    assert_eq!(100, f.stats.bytes);
    assert_eq!(2,   f.stats.packets);
    assert_eq!(0,   f.stats.bytes_delta);
    assert_eq!(0,   f.stats.packets_delta);
    assert_eq!(0,   f.stats.throughput);
}

#[test]
fn finalize_computes_throughput() {
    let mut f = flow(Point::Source);
    f.reverse.bytes = 50;
    f.finalize();
    assert_eq!(100 * 8 / 10, f.stats.throughput);
    assert_eq!(50 * 8 / 10,  f.reverse.throughput);
}

#[test]
fn classify_address_family() {
    let mut f = flow(Point::Source);
    assert!(f.is_ipv4());
    f.src = addr("2001:0:3238:dfe1:63::fefb", 1234);
    assert!(!f.is_ipv4());
}

#[test]
fn start_consumes_ingest_channel() -> Result<()> {
    let (tx, rx) = bounded(16);
    let process = Arc::new(Process::new(
        rx,
        Duration::from_secs(60),
        Duration::from_secs(90),
    ));

    let worker = {
        let process = process.clone();
        std::thread::spawn(move || process.start())
    };

    tx.send(flow(Point::Source))?;
    tx.send(flow(Point::Destination))?;

    while process.num_flows() == 0 {
        std::thread::yield_now();
    }

    process.stop();
    worker.join().map_err(|_| anyhow!("process panicked"))?;

    assert_eq!(1, process.num_flows());
    Ok(())
}

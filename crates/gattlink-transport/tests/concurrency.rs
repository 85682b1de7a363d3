use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gattlink_core::config::Preset;
use gattlink_core::{decode, Packet};
use gattlink_transport::mock::{CommandKind, MockHost};
use gattlink_transport::{Inbound, ManualTimer, PeerAddress, ThreadTimer, Transport};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn ignore(_inbound: Inbound, _packet: Packet) {}

#[test]
fn concurrent_senders_never_interleave_frames() {
    let host = Arc::new(MockHost::new());
    let transport = Arc::new(
        Transport::builder(host.clone())
            .preset(Preset::Ble5UltraPerf)
            .timer(Arc::new(ManualTimer::new()))
            .build(),
    );
    transport.quick_start("dev", ignore).expect("quick start");
    for id in 1..=3_u16 {
        host.connect(id, PeerAddress([0, 0, 0, 0, 0, id as u8]));
    }
    host.negotiate_mtu(1, 247);

    let workers: Vec<_> = (0..4_u8)
        .map(|worker| {
            let transport = Arc::clone(&transport);
            thread::spawn(move || {
                for seq in 0..50_u8 {
                    let payload = vec![worker; 8 + seq as usize];
                    transport
                        .send(0_u16, worker, &payload)
                        .expect("broadcast should succeed");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("sender thread panicked");
    }

    let sent = host.notifications();
    assert_eq!(sent.len(), 4 * 50 * 3);
    // Each broadcast notifies the three connections back to back.
    for chunk in sent.chunks(3) {
        let ids: Vec<u16> = chunk.iter().map(|(conn_id, _)| *conn_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(chunk.iter().all(|(_, value)| *value == chunk[0].1));
        let packet = decode(&chunk[0].1).expect("intact frame");
        assert!(packet.payload.iter().all(|b| *b == packet.id));
    }
}

#[test]
fn events_from_another_thread_are_serialized_with_sends() {
    let host = Arc::new(MockHost::new());
    let transport = Arc::new(
        Transport::builder(host.clone())
            .timer(Arc::new(ThreadTimer))
            .readvertise_delay(Duration::from_millis(1))
            .build(),
    );
    transport.quick_start("dev", ignore).expect("quick start");
    host.connect(1, PeerAddress::default());

    let events = {
        let host = Arc::clone(&host);
        thread::spawn(move || {
            for id in 2..200_u16 {
                host.connect(id, PeerAddress::default());
                host.disconnect(id);
            }
        })
    };
    for _ in 0..200 {
        transport.send(1_u16, 9, b"steady").expect("conn 1 stays connected");
    }
    events.join().expect("event thread panicked");

    assert_eq!(transport.connected_devices_count(), 1);
    assert_eq!(host.count(CommandKind::Notify), 200);
}

#[test]
fn registry_tracks_random_connect_disconnect_sequences() {
    let mut rng = StdRng::seed_from_u64(0x5EED_B1E);
    let host = Arc::new(MockHost::new());
    let transport = Transport::builder(host.clone())
        .timer(Arc::new(ManualTimer::new()))
        .build();
    transport.quick_start("dev", ignore).expect("quick start");

    let mut model = BTreeSet::new();
    for step in 0..2000 {
        let id = rng.gen_range(1..16_u16);
        if rng.gen_bool(0.55) {
            host.connect(id, PeerAddress([0, 0, 0, 0, 0, id as u8]));
            model.insert(id);
        } else {
            host.disconnect(id);
            model.remove(&id);
        }
        assert_eq!(
            transport.connected_devices_count() as usize,
            model.len(),
            "step {step}"
        );
    }
    let live: BTreeSet<u16> = transport.connections().iter().map(|c| c.conn_id).collect();
    assert_eq!(live, model);
}

#![no_main]

use std::sync::Arc;

use gattlink_core::Packet;
use gattlink_transport::mock::{MockHost, MOCK_CHAR_HANDLE};
use gattlink_transport::{Inbound, ManualTimer, PeerAddress, Transport};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let host = Arc::new(MockHost::new());
    let transport = Transport::builder(host.clone())
        .timer(Arc::new(ManualTimer::new()))
        .build();
    if transport
        .quick_start("fuzz", |inbound: Inbound, packet: Packet| {
            let _ = inbound.reply(packet.id, &packet.payload);
        })
        .is_err()
    {
        return;
    }
    host.connect(1, PeerAddress::default());
    host.negotiate_mtu(1, 512);
    for chunk in data.split(|b| *b == 0xff) {
        host.write(1, MOCK_CHAR_HANDLE, chunk, true);
    }
    let _ = transport.stop();
});

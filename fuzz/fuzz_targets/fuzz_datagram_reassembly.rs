#![no_main]

use libfuzzer_sys::fuzz_target;
use reliable_protocol::config::FragmentationConfig;
use reliable_protocol::core::frame::DatagramFrame;
use reliable_protocol::protocol::fragment::Reassembler;
use std::time::Instant;

// input is a sequence of length-prefixed datagrams
fuzz_target!(|data: &[u8]| {
    let config = FragmentationConfig::default();
    let mut reassembler = Reassembler::new(&config);
    let now = Instant::now();

    let mut rest = data;
    while rest.len() >= 2 {
        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        rest = &rest[2..];
        let take = len.min(rest.len());
        let (datagram, tail) = rest.split_at(take);
        rest = tail;

        let Ok(frame) = DatagramFrame::parse(datagram, config.max_reassembled_size) else {
            continue;
        };
        if let Some(fragment) = frame.fragment().copied() {
            let _ = reassembler.accept(frame.header().peer_id(), &fragment, frame.chunk(), now);
        }
    }
    reassembler.sweep(now);
});

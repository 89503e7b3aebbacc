#![no_main]

use libfuzzer_sys::fuzz_target;
use reliable_protocol::core::frame::StreamFramer;
use reliable_protocol::core::header::{DatagramHeader, FragmentHeader, StreamHeader};

fuzz_target!(|data: &[u8]| {
    let _ = StreamHeader::parse(data);
    let _ = DatagramHeader::parse(data);
    let _ = FragmentHeader::parse(data);

    // arbitrary split points through the stream framer
    let mut framer = StreamFramer::new(64 * 1024);
    for chunk in data.chunks(7) {
        if framer.feed(chunk).is_err() {
            break;
        }
    }
});

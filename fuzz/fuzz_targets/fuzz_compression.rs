#![no_main]

use libfuzzer_sys::fuzz_target;
use reliable_protocol::protocol::pipeline::{reverse_bytes, TransformPolicy};
use reliable_protocol::core::header::FrameFlags;
use reliable_protocol::utils::compression::{compress, decompress, CompressionKind};

fuzz_target!(|data: &[u8]| {
    for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
        if let Ok(compressed) = compress(data, &kind) {
            let _ = decompress(&compressed, &kind);
        }
        // malformed input must be refused, never allocate past the cap
        let _ = decompress(data, &kind);
    }

    let policy = TransformPolicy::plain(64 * 1024);
    let _ = reverse_bytes(FrameFlags::COMPRESSED, data, &policy, None);
});

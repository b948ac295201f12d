//! Fuzz target for the peer file parser.
//!
//! Tests that arbitrary file contents never panic and that every parsed
//! entry is a trimmed, non-empty, non-comment line.

#![no_main]

use libfuzzer_sys::fuzz_target;
use patch_replica::config::PeerConfig;

fuzz_target!(|contents: &str| {
    let peers = PeerConfig::parse_peer_list(contents);

    assert!(peers.len() <= contents.lines().count());
    for peer in &peers {
        assert!(!peer.addr.is_empty());
        assert_eq!(peer.addr, peer.addr.trim());
        assert!(!peer.addr.starts_with('#'));
        assert!(peer.url().starts_with("ws://"));
    }
});

//! Fuzz target for wire frame decoding.
//!
//! Decoding must never panic, and anything it accepts must carry an
//! assigned sequence and survive an encode/decode pass unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use patch_replica::Transaction;

fuzz_target!(|data: &[u8]| {
    let Ok(txn) = Transaction::decode(data) else {
        return;
    };

    assert!(txn.is_assigned());

    let frame = txn.encode().expect("decoded transaction must encode");
    let again = Transaction::decode(frame.as_bytes()).expect("encoded frame must decode");
    assert_eq!(txn, again);
});

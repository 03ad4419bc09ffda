//! Arbitrary text must never panic the envelope codec or payload views, and
//! anything that decodes must survive re-encoding.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mup_proto::{Envelope, Payload, payloads::update::ComponentUpdate};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(envelope) = Envelope::decode(text) else {
        return;
    };

    let _ = Payload::from_envelope(&envelope);
    let _ = ComponentUpdate::from_value(&envelope.payload);

    let encoded = envelope.encode().expect("decoded envelope re-encodes");
    let again = Envelope::decode(&encoded).expect("re-encoded envelope decodes");
    assert_eq!(again.message_id, envelope.message_id);
    assert_eq!(again.message_type, envelope.message_type);
});

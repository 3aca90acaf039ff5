#![no_main]

use boba_stream::{decode, ExpectedShape};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);

    if let Ok(result) = decode(&raw, ExpectedShape::RecordArray) {
        let records = result.value.as_array().expect("record decode yields an array");
        assert!(records.iter().all(|record| record.is_object()));
        assert_eq!(decode(&raw, ExpectedShape::RecordArray), Ok(result));
    }

    let text = decode(&raw, ExpectedShape::Text).expect("text decode is infallible");
    assert_eq!(text.as_text(), Some(raw.as_ref()));
});

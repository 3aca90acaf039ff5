#![no_main]

use boba_stream::sse::SseFrameDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&split, body)) = data.split_first() else {
        return;
    };

    let mut whole = SseFrameDecoder::default();
    let mut expected = whole.push(body);
    expected.extend(whole.finish());

    let cut = usize::from(split).min(body.len());
    let mut chunked = SseFrameDecoder::default();
    let mut actual = chunked.push(&body[..cut]);
    actual.extend(chunked.push(&body[cut..]));
    actual.extend(chunked.finish());

    assert_eq!(actual, expected);
});

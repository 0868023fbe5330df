//! Property-based robustness coverage: arbitrary byte streams must never
//! panic, read past the buffer, or loop, regardless of whether they
//! decode successfully (§8's fuzz target). Grounded on
//! `aero-cpu-decoder`'s `tests/fuzz_props.rs`.

use proptest::prelude::*;

use x86dasm::cursor::Cursor;
use x86dasm::decoder::decode_one;
use x86dasm::encoder::encode;

proptest! {
    #[test]
    fn decode_never_panics_or_overruns(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mut cursor = Cursor::new(&bytes);
        while !cursor.is_empty() {
            let start = cursor.position();
            match decode_one(&mut cursor) {
                Ok(instr) => {
                    let consumed = cursor.consumed_since(start);
                    prop_assert!(!consumed.is_empty());
                    // Whatever decoded successfully must re-encode to
                    // exactly the bytes the decoder consumed for it.
                    if let Ok(encoded) = encode(&instr) {
                        prop_assert_eq!(encoded.as_slice(), consumed);
                    }
                }
                Err(_) => break,
            }
        }
        prop_assert!(cursor.position() <= bytes.len());
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use leafscan::preprocess::{prepare, UploadedImage};

#[derive(Debug, Arbitrary)]
struct Upload {
    bytes: Vec<u8>,
    content_type: Option<String>,
    size: u8,
}

// Any byte stream must either decode into a well-formed tensor or fail cleanly
fuzz_target!(|input: Upload| {
    let size = u32::from(input.size % 64) + 1;
    let upload = UploadedImage::new(input.bytes, input.content_type);
    if let Ok(prepared) = prepare(&upload, size) {
        assert_eq!(prepared.tensor.shape(), [1, size as usize, size as usize, 3]);
        assert!(prepared.tensor.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }
});

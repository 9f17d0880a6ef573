//! Frame codec integration tests: parsing, building, CONTINUATION sequencing
//! and per-frame validation.

mod codec_lifecycle;
mod round_trip;

use h2_mux::{H2Codec, Role};

/// A codec that does not expect the client preface.
pub fn client_codec() -> H2Codec {
    H2Codec::new(Role::Client)
}

// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::io::Result;

fn main() -> Result<()> {
    prost_build::compile_protos(&["proto/types.proto"], &["proto/"])?;
    println!("cargo:rerun-if-changed=proto/types.proto");
    Ok(())
}

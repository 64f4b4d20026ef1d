/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

use std::fs;
use std::path::Path;

fn main() {
    // Keep a runnable example config next to the built binary.
    let out_dir = std::env::var("OUT_DIR").unwrap();
    let target_dir = Path::new(&out_dir)
        .parent()
        .and_then(Path::parent)
        .and_then(Path::parent);

    if let Some(target_dir) = target_dir {
        let _ = fs::copy("./resource/config.yaml", target_dir.join("config.yaml"));
    }
    println!("cargo:rerun-if-changed=resource/config.yaml");
}

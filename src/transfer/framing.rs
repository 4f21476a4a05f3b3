// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Text control lines of the offload protocol.
//!
//! Raw file chunks are interleaved between these lines on the same data
//! channel.

pub const FILE_START: &str = "FILE_START:";
pub const FILE_END: &str = "FILE_END:";
pub const TRANSFER_COMPLETE: &str = "TRANSFER_COMPLETE|";

/// `FILE_START:<name>|SIZE:<bytes>`
pub fn file_start(name: &str, size: u64) -> String {
    format!("{}{}|SIZE:{}", FILE_START, name, size)
}

/// `FILE_END:<name>`
pub fn file_end(name: &str) -> String {
    format!("{}{}", FILE_END, name)
}

/// `TRANSFER_COMPLETE|<summary>`
pub fn transfer_complete(files: usize) -> String {
    let noun = if files == 1 { "file" } else { "files" };
    format!("{}{} {} transferred", TRANSFER_COMPLETE, files, noun)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_lines() {
        assert_eq!(
            file_start("farmland_3.json", 412),
            "FILE_START:farmland_3.json|SIZE:412"
        );
        assert_eq!(file_end("farmland_3.json"), "FILE_END:farmland_3.json");
        assert_eq!(transfer_complete(1), "TRANSFER_COMPLETE|1 file transferred");
        assert_eq!(transfer_complete(0), "TRANSFER_COMPLETE|0 files transferred");
    }
}

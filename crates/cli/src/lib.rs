use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use sha2::{Digest, Sha256};

pub mod commands;

/// Compute the SHA-256 hash of a file and return it as a hex string.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hasher.finalize();
    Ok(format!("{:x}", digest))
}

/// Parse an address argument: `0x`-prefixed hex or plain decimal.
pub fn parse_addr(s: &str) -> Result<u64> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|_| anyhow!("Invalid address: {s}"))
}

/// Derive a module name from a file path (final component).
pub fn module_name_from_path(path: &Path) -> String {
    path.file_name().and_then(|os| os.to_str()).unwrap_or("unnamed-module").to_string()
}

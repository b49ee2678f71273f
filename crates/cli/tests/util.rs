use std::path::Path;

use cfi_warden::{module_name_from_path, parse_addr, sha256_file};
use tempfile::tempdir;

#[test]
fn parse_addr_accepts_hex_and_decimal() {
    assert_eq!(parse_addr("0x1000").unwrap(), 0x1000);
    assert_eq!(parse_addr("0X7fff").unwrap(), 0x7fff);
    assert_eq!(parse_addr("4096").unwrap(), 4096);
    assert!(parse_addr("zzz").is_err());
    assert!(parse_addr("0x").is_err());
}

#[test]
fn module_name_is_the_final_path_component() {
    assert_eq!(module_name_from_path(Path::new("/usr/lib/libfoo.so.6")), "libfoo.so.6");
    assert_eq!(module_name_from_path(Path::new("app")), "app");
    assert_eq!(module_name_from_path(Path::new("/")), "unnamed-module");
}

#[test]
fn sha256_of_known_content_is_stable() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("blob");
    std::fs::write(&path, b"abc").unwrap();

    let digest = sha256_file(&path).unwrap();
    assert_eq!(digest, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");

    assert!(sha256_file(&temp.path().join("absent")).is_err());
}

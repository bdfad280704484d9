//! MD5 checksums, as stored in `resource.filechecksum`.

use md5::{Digest, Md5};
use std::io::{self, Read};

use crate::prelude::*;

/// Compute the lowercase hex MD5 of a file, streaming its contents.
pub fn md5_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("could not open {}", path.display()))?;
    let mut hasher = Md5::new();
    let mut buf = [0; 64 * 1024];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("could not read {}", path.display()))
            }
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the lowercase hex MD5 of some bytes.
pub fn md5_bytes(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Compare two hex checksums, ignoring case.
pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

#[test]
fn md5_of_known_values() {
    assert_eq!(md5_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.txt");
    fs::write(&path, b"hello\n").unwrap();
    assert_eq!(md5_file(&path).unwrap(), "b1946ac92492d2347c6235b4d2611184");
    assert!(checksums_match("B1946AC92492D2347C6235B4D2611184", &md5_file(&path).unwrap()));
}
